//! Random rollouts through the registry and wrappers

use rand::rngs::StdRng;
use rand::SeedableRng;
use tdkit_core::{Environment, RandomPolicy, StochasticPolicy};
use tdkit_env::{list_envs, make_env, EnvironmentConfig, TrainMonitor};

#[tokio::test]
async fn test_random_rollouts_respect_spaces_and_limits() {
    let mut rng = StdRng::seed_from_u64(11);

    for name in ["FrozenLakeNonSlippery-v0", "CartPole-v0"] {
        let config = EnvironmentConfig {
            seed: Some(5),
            ..EnvironmentConfig::default()
        };
        let mut env = TrainMonitor::new(make_env(name, config).unwrap());
        let limit = env.spec().max_episode_steps.unwrap();
        let observation_space = env.observation_space();
        let pi = RandomPolicy::new(env.action_space());

        for _ in 0..5 {
            let (mut s, _) = env.reset().await.unwrap();
            loop {
                assert!(observation_space.contains(&s));
                let a = pi.sample(&s, &mut rng).unwrap();
                let step = env.step(&a).await.unwrap();
                assert!(env.t() <= limit);
                if step.finished() {
                    break;
                }
                s = step.observation;
            }
        }

        assert_eq!(env.ep(), 5);
        let summary = env.last_summary().unwrap();
        assert_eq!(summary.ep, 5);
        assert!(summary.dt_ms >= 0.0);
        env.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_time_limit_truncates_long_episodes() {
    let config = EnvironmentConfig {
        max_steps: Some(7),
        ..EnvironmentConfig::default()
    };
    let mut env = make_env("FrozenLakeNonSlippery-v0", config).unwrap();
    env.reset().await.unwrap();

    // left into the wall, forever
    let mut last = None;
    for _ in 0..7 {
        last = Some(env.step(&tdkit_env::Action::Discrete(0)).await.unwrap());
    }
    let last = last.unwrap();
    assert!(last.truncated);
    assert!(!last.done);
    assert!(list_envs().len() >= 2);
}
