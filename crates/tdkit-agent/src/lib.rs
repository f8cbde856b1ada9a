//! Learning algorithms for tdkit
//!
//! This crate provides the pieces a training loop is assembled from:
//! - Reward tracing (n-step and Monte-Carlo returns)
//! - Experience replay (uniform and prioritized)
//! - TD-learning updaters (SimpleTD, SARSA, Expected SARSA, Q-learning,
//!   Double Q-learning, Soft Q-learning)
//! - Policy objectives (vanilla policy gradient, PPO-clip)
//! - Value losses and policy regularizers

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod config;
pub mod experience_replay;
pub mod policy_objectives;
pub mod regularizers;
pub mod reward_tracing;
pub mod td_learning;
pub mod value_losses;

pub use config::{AgentConfig, TracerConfig};
pub use experience_replay::{PrioritizedReplayBuffer, SimpleReplayBuffer};
pub use policy_objectives::{PPOClip, PolicyObjective, VanillaPG};
pub use regularizers::{EntropyRegularizer, KLDivRegularizer, Regularizer};
pub use reward_tracing::{MonteCarlo, NStep, RewardTracer};
pub use td_learning::{
    DoubleQLearning, ExpectedSarsa, QLearning, Sarsa, SimpleTD, SoftQLearning, TdLearning,
};
pub use value_losses::ValueLoss;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        AgentConfig, ExpectedSarsa, MonteCarlo, NStep, PolicyObjective, QLearning, RewardTracer,
        SimpleTD, TdLearning, VanillaPG, ValueLoss,
    };
    pub use tdkit_core::prelude::*;
}
