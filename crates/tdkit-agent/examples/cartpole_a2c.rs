//! Example: advantage actor-critic on CartPole
//!
//! The critic's TD error serves as the advantage estimate for the actor.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tdkit_agent::{NStep, PolicyObjective, RewardTracer, SimpleTD, TdLearning, ValueLoss, VanillaPG};
use tdkit_core::{
    Activation, Adam, Environment, EnvironmentConfig, Metrics, MlpConfig, Policy, Shared,
    StochasticPolicy, ValueTransform, V,
};
use tdkit_env::{make_env, TrainMonitor};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut rng = StdRng::seed_from_u64(1);
    let config = EnvironmentConfig {
        seed: Some(1),
        ..EnvironmentConfig::default()
    };
    let mut env = TrainMonitor::new(make_env("CartPole-v0", config)?).with_log_every(10);
    let max_steps = env.spec().max_episode_steps.unwrap_or(200);

    let network = MlpConfig::with_hidden(vec![8, 8, 8], Activation::Relu);
    let v = Shared::new(V::new(
        env.observation_space(),
        &network,
        ValueTransform::Identity,
        &mut rng,
    )?);
    let pi = Shared::new(Policy::new(
        env.observation_space(),
        env.action_space(),
        &network,
        &mut rng,
    )?);

    let mut tracer = NStep::new(1, 0.9)?;

    // both optimizers collect 32 gradients before applying an update
    let mut vanillapg = VanillaPG::new(pi.clone())
        .with_optimizer(Box::new(Adam::new(0.001).apply_every(32)));
    let mut simple_td = SimpleTD::new(v)
        .with_loss(ValueLoss::Mse)
        .with_optimizer(Box::new(Adam::new(0.002).apply_every(32)));

    for _ in 0..1000 {
        let (mut s, _) = env.reset().await?;

        for _ in 0..max_steps {
            let a = pi.sample(&s, &mut rng)?;
            let step = env.step(&a).await?;

            // surviving the whole episode is worth the value of balancing forever
            let r = if step.truncated {
                1.0 / (1.0 - tracer.gamma())
            } else {
                step.reward
            };

            tracer.add(s, a, r, step.finished())?;
            while tracer.is_ready() {
                let batch = tracer.pop()?;
                let adv = simple_td.td_error(&batch)?;

                let mut metrics = Metrics::new();
                metrics.extend(vanillapg.update(&batch, &adv)?);
                metrics.extend(simple_td.update(&batch)?);
                env.record_metrics(&metrics);
            }

            if step.finished() {
                break;
            }
            s = step.observation;
        }

        if env.is_solved() {
            info!(ep = env.ep(), avg_G = env.avg_return(), "solved");
            break;
        }
    }

    env.close().await?;
    Ok(())
}
