//! Environment traits and types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Action, ActionSpace, Observation, ObservationSpace};

/// Result of a single environment step
#[derive(Debug, Clone)]
pub struct Step {
    /// Observation from the environment
    pub observation: Observation,
    /// Reward signal
    pub reward: f64,
    /// Whether the episode reached a terminal state
    pub done: bool,
    /// Whether the episode was truncated (e.g., time limit)
    pub truncated: bool,
    /// Additional info from the environment
    pub info: StepInfo,
}

impl Step {
    /// Whether the episode is over for either reason
    #[must_use]
    pub fn finished(&self) -> bool {
        self.done || self.truncated
    }
}

/// Additional information from a step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    /// Custom fields
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl StepInfo {
    /// Insert a field, returning `self` for chaining
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }
}

/// Static description of an environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvSpec {
    /// Registry id, e.g. `"CartPole-v0"`
    pub id: String,
    /// Steps after which an episode is truncated
    pub max_episode_steps: Option<usize>,
    /// Average return at which the task counts as solved
    pub reward_threshold: Option<f64>,
}

/// Configuration for environments
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Random seed
    pub seed: Option<u64>,
    /// Maximum episode steps, overriding the environment's own limit
    pub max_steps: Option<usize>,
    /// Additional parameters
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// Core environment trait
#[async_trait]
pub trait Environment: Send + Sync {
    /// Static description of the environment
    fn spec(&self) -> EnvSpec;

    /// Get the observation space
    fn observation_space(&self) -> ObservationSpace;

    /// Get the action space
    fn action_space(&self) -> ActionSpace;

    /// Reset the environment
    async fn reset(&mut self) -> crate::Result<(Observation, StepInfo)>;

    /// Take a step in the environment
    async fn step(&mut self, action: &Action) -> crate::Result<Step>;

    /// Text rendering of the current state
    fn render(&self) -> crate::Result<String> {
        Ok(String::new())
    }

    /// Close the environment
    async fn close(&mut self) -> crate::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Environment for Box<dyn Environment> {
    fn spec(&self) -> EnvSpec {
        (**self).spec()
    }

    fn observation_space(&self) -> ObservationSpace {
        (**self).observation_space()
    }

    fn action_space(&self) -> ActionSpace {
        (**self).action_space()
    }

    async fn reset(&mut self) -> crate::Result<(Observation, StepInfo)> {
        (**self).reset().await
    }

    async fn step(&mut self, action: &Action) -> crate::Result<Step> {
        (**self).step(action).await
    }

    fn render(&self) -> crate::Result<String> {
        (**self).render()
    }

    async fn close(&mut self) -> crate::Result<()> {
        (**self).close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts down from `start`; every step pays the remaining count
    struct Countdown {
        start: usize,
        left: usize,
    }

    #[async_trait]
    impl Environment for Countdown {
        fn spec(&self) -> EnvSpec {
            EnvSpec {
                id: "Countdown-v0".to_string(),
                max_episode_steps: None,
                reward_threshold: None,
            }
        }

        fn observation_space(&self) -> ObservationSpace {
            ObservationSpace::discrete(self.start + 1)
        }

        fn action_space(&self) -> ActionSpace {
            ActionSpace::discrete(1)
        }

        async fn reset(&mut self) -> crate::Result<(Observation, StepInfo)> {
            self.left = self.start;
            Ok((Observation::Discrete(self.left), StepInfo::default()))
        }

        async fn step(&mut self, _action: &Action) -> crate::Result<Step> {
            self.left = self.left.saturating_sub(1);
            Ok(Step {
                observation: Observation::Discrete(self.left),
                reward: self.left as f64,
                done: self.left == 0,
                truncated: false,
                info: StepInfo::default().with("left", self.left),
            })
        }
    }

    #[tokio::test]
    async fn test_boxed_environment_forwards() {
        let mut env: Box<dyn Environment> = Box::new(Countdown { start: 3, left: 0 });
        let (s, _) = env.reset().await.unwrap();
        assert_eq!(s, Observation::Discrete(3));

        let mut total = 0.0;
        loop {
            let step = env.step(&Action::Discrete(0)).await.unwrap();
            total += step.reward;
            if step.finished() {
                assert_eq!(step.info.fields["left"], 0);
                break;
            }
        }
        assert_eq!(total, 3.0);
        assert_eq!(env.render().unwrap(), "");
        assert_eq!(env.spec().id, "Countdown-v0");
        env.close().await.unwrap();
    }
}
