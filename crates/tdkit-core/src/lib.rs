//! Core reinforcement learning types for tdkit
//!
//! This crate provides the building blocks the learning algorithms in
//! `tdkit-agent` operate on: observation and action spaces, transition
//! batches, a small differentiable backbone with optimizers, and the
//! function approximators (V, Q, stochastic policies) built on top of it.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::many_single_char_names)]

use std::collections::BTreeMap;

pub mod environment;
pub mod error;
pub mod nn;
pub mod optim;
pub mod policy;
pub mod proba_dist;
pub mod schedule;
pub mod shared;
pub mod spaces;
pub mod trajectory;
pub mod value;
pub mod value_transform;

// Re-export core traits and types
pub use environment::{EnvSpec, Environment, EnvironmentConfig, Step, StepInfo};
pub use error::{RLError, Result};
pub use nn::{Activation, Mlp, MlpConfig, MlpGrads};
pub use optim::{Adam, ApplyEvery, Optimizer, OptimizerConfig, Sgd};
pub use policy::{BoltzmannPolicy, EpsilonGreedy, Policy, RandomPolicy, StochasticPolicy};
pub use proba_dist::{DistParams, ProbaDist};
pub use schedule::{ConstantSchedule, ExponentialSchedule, LinearSchedule, Schedule};
pub use shared::Shared;
pub use spaces::{Action, ActionSpace, Observation, ObservationSpace};
pub use trajectory::{Transition, TransitionBatch};
pub use value::{ValueModel, Q, V};
pub use value_transform::ValueTransform;

/// Named scalar diagnostics returned by updaters and monitors
pub type Metrics = BTreeMap<String, f64>;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Action, ActionSpace, Environment, Metrics, Observation, ObservationSpace, Policy, Result,
        Shared, StochasticPolicy, Step, TransitionBatch, Q, V,
    };
}
