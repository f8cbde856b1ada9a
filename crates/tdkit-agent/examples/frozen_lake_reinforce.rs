//! Example: REINFORCE with Monte-Carlo returns on the non-slippery FrozenLake

use rand::rngs::StdRng;
use rand::SeedableRng;
use tdkit_agent::{MonteCarlo, PolicyObjective, RewardTracer, VanillaPG};
use tdkit_core::{Adam, Environment, EnvironmentConfig, MlpConfig, Policy, Shared, StochasticPolicy};
use tdkit_env::{make_env, TrainMonitor};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut rng = StdRng::seed_from_u64(42);
    let env = make_env("FrozenLakeNonSlippery-v0", EnvironmentConfig::default())?;
    let mut env = TrainMonitor::new(env).with_log_every(25);
    let max_steps = env.spec().max_episode_steps.unwrap_or(100);

    let pi = Shared::new(Policy::new(
        env.observation_space(),
        env.action_space(),
        &MlpConfig::linear(),
        &mut rng,
    )?);

    let mut tracer = MonteCarlo::new(0.9)?;
    let mut vanilla_pg = VanillaPG::new(pi.clone()).with_optimizer(Box::new(Adam::new(0.01)));

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
                let adv = batch.r_n.clone();
                let metrics = vanilla_pg.update(&batch, &adv)?;
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
        let probs = pi.dist_params(&s)?.probs()?;
        for (name, p) in "LDRU".chars().zip(probs.row(0).iter()) {
            println!("  π({name}|s) = {p:.3}");
        }

        let a = pi.mode(&s)?;
        let step = env.step(&a).await?;
        println!("{}", env.render()?);
        if step.finished() {
            break;
        }
        s = step.observation;
    }

    env.close().await?;
    Ok(())
}
