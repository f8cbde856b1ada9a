//! Learning end-to-end on the FrozenLake fixture

use rand::rngs::StdRng;
use rand::SeedableRng;
use tdkit_agent::prelude::*;
use tdkit_agent::{SimpleReplayBuffer, SimpleTD};
use tdkit_core::{
    Action, Environment, EnvironmentConfig, MlpConfig, Observation, RandomPolicy, Sgd, Shared,
    StochasticPolicy, ValueTransform, Q, V,
};
use tdkit_env::{make_env, TrainMonitor};

async fn collect_random_episodes(
    episodes: usize,
    tracer: &mut dyn RewardTracer,
    buffer: &mut SimpleReplayBuffer,
) -> usize {
    let mut env = make_env("FrozenLakeNonSlippery-v0", EnvironmentConfig::default()).unwrap();
    let pi = RandomPolicy::new(env.action_space());
    let mut rng = StdRng::seed_from_u64(3);
    let mut steps = 0;

    for _ in 0..episodes {
        let (mut s, _) = env.reset().await.unwrap();
        loop {
            let a = pi.sample(&s, &mut rng).unwrap();
            let step = env.step(&a).await.unwrap();
            steps += 1;
            tracer.add(s, a, step.reward, step.finished()).unwrap();
            while tracer.is_ready() {
                buffer.add(&tracer.pop().unwrap()).unwrap();
            }
            if step.finished() {
                break;
            }
            s = step.observation;
        }
        assert!(tracer.is_empty());
    }
    steps
}

#[tokio::test]
async fn test_tracer_emits_one_transition_per_step() {
    let mut tracer = NStep::new(3, 0.9).unwrap();
    let mut buffer = SimpleReplayBuffer::new(100_000, Some(0)).unwrap();
    let steps = collect_random_episodes(20, &mut tracer, &mut buffer).await;
    assert_eq!(buffer.len(), steps);
}

#[tokio::test]
async fn test_q_learning_from_replay_finds_the_goal() {
    let mut tracer = NStep::new(1, 0.9).unwrap();
    let mut buffer = SimpleReplayBuffer::new(100_000, Some(0)).unwrap();
    collect_random_episodes(3000, &mut tracer, &mut buffer).await;

    let mut rng = StdRng::seed_from_u64(0);
    let mut env = make_env("FrozenLakeNonSlippery-v0", EnvironmentConfig::default()).unwrap();
    let q = Shared::new(
        Q::new(
            env.observation_space(),
            env.action_space(),
            &MlpConfig::linear(),
            ValueTransform::Identity,
            &mut rng,
        )
        .unwrap(),
    );
    let mut qlearning = QLearning::new(q.clone())
        .with_loss(ValueLoss::Mse)
        .with_optimizer(Box::new(Sgd::new(0.5)));

    for _ in 0..20_000 {
        let batch = buffer.sample(32).unwrap();
        let metrics = qlearning.update(&batch).unwrap();
        assert!(metrics["QLearning/loss"].is_finite());
    }

    // greedy rollout along the learned values
    let (mut s, _) = env.reset().await.unwrap();
    let mut reward = 0.0;
    for _ in 0..20 {
        let a = q.read().greedy(&s).unwrap();
        let step = env.step(&Action::Discrete(a)).await.unwrap();
        reward += step.reward;
        if step.finished() {
            break;
        }
        s = step.observation;
    }
    assert_eq!(reward, 1.0);
    assert!(q.read().value(&Observation::Discrete(0), &Action::Discrete(1)).unwrap() > 0.4);
}

#[tokio::test]
async fn test_monte_carlo_values_match_discounted_returns() {
    let mut env = TrainMonitor::new(
        make_env("FrozenLakeNonSlippery-v0", EnvironmentConfig::default()).unwrap(),
    );
    let mut rng = StdRng::seed_from_u64(0);
    let v = Shared::new(V::new(
        env.observation_space(),
        &MlpConfig::linear(),
        ValueTransform::Identity,
        &mut rng,
    )
    .unwrap());
    let mut simple_td = SimpleTD::new(v.clone()).with_loss(ValueLoss::Mse);
    let mut tracer = MonteCarlo::new(0.9).unwrap();

    // shortest path to the goal: right, right, down, down, down, right
    for _ in 0..3 {
        let (mut s, _) = env.reset().await.unwrap();
        for a in [2, 2, 1, 1, 1, 2] {
            let a = Action::Discrete(a);
            let step = env.step(&a).await.unwrap();
            tracer.add(s, a, step.reward, step.finished()).unwrap();
            s = step.observation;
        }
        let batch = tracer.flush().unwrap();
        assert_eq!(batch.batch_size(), 6);
        // popped back to front: the last transition comes out first
        approx::assert_relative_eq!(batch.r_n[0], 1.0);
        approx::assert_relative_eq!(batch.r_n[5], 0.9_f64.powi(5), epsilon = 1e-12);
        assert!(batch.i_n.iter().all(|&i| i == 0.0));
        env.record_metrics(&simple_td.update(&batch).unwrap());
    }

    assert_eq!(env.ep(), 3);
    assert_eq!(env.avg_return(), 1.0);
    let summary = env.last_summary().unwrap();
    assert!(summary.metrics.contains_key("SimpleTD/loss"));
    assert!(v.read().value(&Observation::Discrete(14)).unwrap() > 0.0);
}
