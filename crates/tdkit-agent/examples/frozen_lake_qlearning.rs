//! Example: tabular Q-learning on the non-slippery FrozenLake

use rand::rngs::StdRng;
use rand::SeedableRng;
use tdkit_agent::{NStep, QLearning, RewardTracer, TdLearning};
use tdkit_core::{
    Adam, BoltzmannPolicy, Environment, EnvironmentConfig, MlpConfig, Shared, StochasticPolicy,
    ValueTransform, Q,
};
use tdkit_env::{make_env, TrainMonitor};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut rng = StdRng::seed_from_u64(13);
    let env = make_env("FrozenLakeNonSlippery-v0", EnvironmentConfig::default())?;
    let mut env = TrainMonitor::new(env).with_log_every(25);
    let max_steps = env.spec().max_episode_steps.unwrap_or(100);

    // one-hot states into a linear head: a lookup table
    let q = Shared::new(Q::new(
        env.observation_space(),
        env.action_space(),
        &MlpConfig::linear(),
        ValueTransform::Identity,
        &mut rng,
    )?);
    let pi = BoltzmannPolicy::new(q.clone(), 0.1)?;

    let mut tracer = NStep::new(1, 0.9)?;
    let mut qlearning = QLearning::new(q.clone()).with_optimizer(Box::new(Adam::new(0.02)));

    for _ in 0..500 {
        let (mut s, _) = env.reset().await?;

        for _ in 0..max_steps {
            let a = pi.sample(&s, &mut rng)?;
            let step = env.step(&a).await?;

            // small incentive to keep moving
            let r = if step.observation == s { -0.01 } else { step.reward };

            tracer.add(s, a, r, step.finished())?;
            while tracer.is_ready() {
                let batch = tracer.pop()?;
                let metrics = qlearning.update(&batch)?;
                env.record_metrics(&metrics);
            }

            if step.finished() {
                break;
            }
            s = step.observation;
        }
    }

    // one greedy rollout
    let (mut s, _) = env.reset().await?;
    println!("{}", env.render()?);
    for _ in 0..max_steps {
        let values = q.read().values(&s)?;
        for (name, value) in "LDRU".chars().zip(values.iter()) {
            println!("  q(s,{name}) = {value:.3}");
        }

        let a = pi.mode(&s)?;
        let step = env.step(&a).await?;
        println!("{}", env.render()?);
        if step.finished() {
            info!(reward = step.reward, "greedy rollout finished");
            break;
        }
        s = step.observation;
    }

    env.close().await?;
    Ok(())
}
