//! Environments for tdkit
//!
//! This crate provides:
//! - Small fixture environments (FrozenLake, CartPole)
//! - A name-based registry
//! - Wrappers for time limits and training logs

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod classic;
pub mod registry;
pub mod wrappers;

pub use classic::{CartPoleEnv, FrozenLakeEnv};
pub use registry::{list_envs, make_env, register_env, EnvRegistry};
pub use wrappers::{EpisodeSummary, TimeLimit, TrainMonitor};

// Re-export core types
pub use tdkit_core::{
    Action, ActionSpace, EnvSpec, Environment, EnvironmentConfig, Observation, ObservationSpace,
    Step, StepInfo,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{make_env, CartPoleEnv, FrozenLakeEnv, TimeLimit, TrainMonitor};
    pub use tdkit_core::prelude::*;
}
