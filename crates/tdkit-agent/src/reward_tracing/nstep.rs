//! n-step reward tracing

use std::collections::VecDeque;

use ndarray::Array1;
use tdkit_core::{Action, Observation, RLError, Result, TransitionBatch};
use tracing::debug;

use super::{check_gamma, episode_done, not_ready, CachedStep, RewardTracer};

/// n-step bootstrapped returns
///
/// Each popped transition carries
/// `R_n = Σ_{k<n} γ^k r_{t+k}` and `I_n = γ^n`, bootstrapping from the state
/// `n` steps ahead, or `I_n = 0` when the episode ends within the horizon.
#[derive(Debug, Clone)]
pub struct NStep {
    n: usize,
    gamma: f64,
    cache: VecDeque<CachedStep>,
    done: bool,
    counter: u64,
}

impl NStep {
    /// Create a new n-step tracer
    pub fn new(n: usize, gamma: f64) -> Result<Self> {
        if n == 0 {
            return Err(RLError::InvalidConfig("n must be at least 1".to_string()));
        }
        check_gamma(gamma)?;
        Ok(Self {
            n,
            gamma,
            cache: VecDeque::with_capacity(n + 1),
            done: false,
            counter: 0,
        })
    }

    /// Horizon
    #[must_use]
    pub fn n(&self) -> usize {
        self.n
    }
}

impl RewardTracer for NStep {
    fn gamma(&self) -> f64 {
        self.gamma
    }

    fn add_full(
        &mut self,
        s: Observation,
        a: Action,
        r: f64,
        done: bool,
        logp: f64,
        w: f64,
    ) -> Result<()> {
        if self.done && !self.cache.is_empty() {
            return Err(episode_done("NStep"));
        }
        self.done = done;
        self.cache.push_back(CachedStep { s, a, r, logp, w });
        Ok(())
    }

    fn is_ready(&self) -> bool {
        !self.cache.is_empty() && (self.done || self.cache.len() > self.n)
    }

    fn len(&self) -> usize {
        self.cache.len()
    }

    fn pop(&mut self) -> Result<TransitionBatch> {
        if !self.is_ready() {
            return Err(not_ready("NStep"));
        }
        let first = self.cache.pop_front().ok_or_else(|| not_ready("NStep"))?;

        let mut r_n = first.r;
        let mut discount = self.gamma;
        for step in self.cache.iter().take(self.n - 1) {
            r_n += discount * step.r;
            discount *= self.gamma;
        }

        let (s_next, a_next, logp_next, i_n) = match self.cache.get(self.n - 1) {
            Some(ahead) => (
                ahead.s.clone(),
                ahead.a.clone(),
                ahead.logp,
                discount,
            ),
            None => (first.s.clone(), first.a.clone(), first.logp, 0.0),
        };

        let idx = self.counter;
        self.counter += 1;
        debug!(idx, r_n, i_n, remaining = self.cache.len(), "NStep pop");

        Ok(TransitionBatch {
            s: vec![first.s],
            a: vec![first.a],
            logp: Array1::from_elem(1, first.logp),
            r_n: Array1::from_elem(1, r_n),
            i_n: Array1::from_elem(1, i_n),
            s_next: vec![s_next],
            a_next: vec![a_next],
            logp_next: Array1::from_elem(1, logp_next),
            w: Array1::from_elem(1, first.w),
            idx: vec![idx],
        })
    }

    fn reset(&mut self) {
        self.cache.clear();
        self.done = false;
    }
}
