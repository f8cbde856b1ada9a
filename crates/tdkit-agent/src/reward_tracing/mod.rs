//! Reward tracing: turning a stream of `(s, a, r, done)` into transition batches
//!
//! A tracer caches the transitions of the current episode and emits
//! [`TransitionBatch`]es once enough of the future is known to build their
//! (partial) returns. The usual driver loop is:
//!
//! ```text
//! tracer.add(s, a, r, done)?;
//! while tracer.is_ready() {
//!     let batch = tracer.pop()?;
//!     updater.update(&batch)?;
//! }
//! ```

mod monte_carlo;
mod nstep;

pub use monte_carlo::MonteCarlo;
pub use nstep::NStep;

use tdkit_core::{Action, Observation, RLError, Result, TransitionBatch};

/// Accumulates rewards of an episode into transition batches
pub trait RewardTracer: Send {
    /// Discount factor
    fn gamma(&self) -> f64;

    /// Add a transition with neutral propensity and unit weight
    fn add(&mut self, s: Observation, a: Action, r: f64, done: bool) -> Result<()> {
        self.add_full(s, a, r, done, 0.0, 1.0)
    }

    /// Add a transition with its behaviour log-propensity and importance weight
    ///
    /// Adding after a `done` transition without draining the cache first
    /// fails with [`RLError::EpisodeDone`].
    fn add_full(
        &mut self,
        s: Observation,
        a: Action,
        r: f64,
        done: bool,
        logp: f64,
        w: f64,
    ) -> Result<()>;

    /// Whether [`Self::pop`] would succeed
    fn is_ready(&self) -> bool;

    /// Number of cached transitions
    fn len(&self) -> usize;

    /// Whether the cache is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Emit the next transition batch (of size one)
    fn pop(&mut self) -> Result<TransitionBatch>;

    /// Pop everything that is ready into a single batch
    fn flush(&mut self) -> Result<TransitionBatch> {
        let mut batches = Vec::new();
        while self.is_ready() {
            batches.push(self.pop()?);
        }
        TransitionBatch::concatenate(&batches)
    }

    /// Drop the cache and start a fresh episode
    fn reset(&mut self);
}

/// Cached transition awaiting its return
#[derive(Debug, Clone)]
struct CachedStep {
    s: Observation,
    a: Action,
    r: f64,
    logp: f64,
    w: f64,
}

fn check_gamma(gamma: f64) -> Result<()> {
    if (0.0..=1.0).contains(&gamma) {
        Ok(())
    } else {
        Err(RLError::InvalidConfig(format!(
            "gamma must lie in [0, 1], got {gamma}"
        )))
    }
}

fn not_ready(name: &str) -> RLError {
    RLError::InsufficientCache(format!("{name} is not ready to pop"))
}

fn episode_done(name: &str) -> RLError {
    RLError::EpisodeDone(format!(
        "{name} received a transition after the episode ended; pop or reset first"
    ))
}
