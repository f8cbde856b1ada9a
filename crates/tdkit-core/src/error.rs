//! Error types for the tdkit libraries

use thiserror::Error;

/// Core error type for RL operations
#[derive(Error, Debug)]
pub enum RLError {
    /// Environment-related errors
    #[error("Environment error: {0}")]
    Environment(String),

    /// Policy-related errors
    #[error("Policy error: {0}")]
    Policy(String),

    /// Action that does not belong to the action space
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// Observation that does not belong to the observation space
    #[error("Invalid observation: {0}")]
    InvalidObservation(String),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Bad hyperparameters or incompatible components
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A tracer or replay buffer was asked for data it does not hold yet
    #[error("Insufficient cache: {0}")]
    InsufficientCache(String),

    /// A transition was added after the episode had already ended
    #[error("Episode done: {0}")]
    EpisodeDone(String),

    /// Numerical failure
    #[error("Computation error: {0}")]
    Computation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for RL operations
pub type Result<T> = std::result::Result<T, RLError>;

/// Fails with [`RLError::DimensionMismatch`] unless `actual == expected`.
pub fn ensure_len(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(RLError::DimensionMismatch { expected, actual })
    }
}
