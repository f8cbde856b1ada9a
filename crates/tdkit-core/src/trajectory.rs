//! Transition batches, the unit of data every updater consumes

use ndarray::{concatenate as nd_concatenate, Array1, Axis};
use serde::{Deserialize, Serialize};

use crate::error::ensure_len;
use crate::{Action, Observation, RLError, Result};

/// Single transition as produced by an environment loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// State the action was taken in
    pub s: Observation,
    /// Action taken
    pub a: Action,
    /// Reward received
    pub r: f64,
    /// Whether the episode ended with this transition
    pub done: bool,
    /// Successor state
    pub s_next: Observation,
    /// Action taken in the successor state (SARSA-style targets)
    pub a_next: Action,
    /// Log-propensity of `a` under the behaviour policy
    pub logp: f64,
    /// Log-propensity of `a_next` under the behaviour policy
    pub logp_next: f64,
    /// Importance weight
    pub w: f64,
}

impl Transition {
    /// Transition with neutral propensities and unit weight
    #[must_use]
    pub fn new(s: Observation, a: Action, r: f64, done: bool, s_next: Observation, a_next: Action) -> Self {
        Self {
            s,
            a,
            r,
            done,
            s_next,
            a_next,
            logp: 0.0,
            logp_next: 0.0,
            w: 1.0,
        }
    }
}

/// Batch of (possibly n-step) transitions
///
/// `r_n` holds the discounted reward accumulated between `s` and `s_next`
/// and `i_n` the bootstrap factor applied to the value at `s_next`
/// (`γ^n`, or zero when the episode ended before the horizon).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionBatch {
    /// States
    pub s: Vec<Observation>,
    /// Actions
    pub a: Vec<Action>,
    /// Behaviour log-propensities of `a`
    pub logp: Array1<f64>,
    /// Discounted partial returns
    pub r_n: Array1<f64>,
    /// Bootstrap factors
    pub i_n: Array1<f64>,
    /// Bootstrap states
    pub s_next: Vec<Observation>,
    /// Bootstrap actions
    pub a_next: Vec<Action>,
    /// Behaviour log-propensities of `a_next`
    pub logp_next: Array1<f64>,
    /// Importance weights
    pub w: Array1<f64>,
    /// Identifiers (tracer counters or replay slots)
    pub idx: Vec<u64>,
}

impl TransitionBatch {
    /// Batch of size one from a single one-step transition
    #[must_use]
    pub fn from_single(transition: Transition, gamma: f64, idx: u64) -> Self {
        let i_n = if transition.done { 0.0 } else { gamma };
        Self {
            s: vec![transition.s],
            a: vec![transition.a],
            logp: Array1::from_elem(1, transition.logp),
            r_n: Array1::from_elem(1, transition.r),
            i_n: Array1::from_elem(1, i_n),
            s_next: vec![transition.s_next],
            a_next: vec![transition.a_next],
            logp_next: Array1::from_elem(1, transition.logp_next),
            w: Array1::from_elem(1, transition.w),
            idx: vec![idx],
        }
    }

    /// Number of transitions in the batch
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.s.len()
    }

    /// Check that all fields agree on the batch size
    pub fn validate(&self) -> Result<()> {
        let n = self.batch_size();
        for len in [
            self.a.len(),
            self.logp.len(),
            self.r_n.len(),
            self.i_n.len(),
            self.s_next.len(),
            self.a_next.len(),
            self.logp_next.len(),
            self.w.len(),
            self.idx.len(),
        ] {
            ensure_len(n, len)?;
        }
        Ok(())
    }

    /// Sub-batch containing the rows at `indices`, in that order
    pub fn select(&self, indices: &[usize]) -> Result<Self> {
        let n = self.batch_size();
        if let Some(&bad) = indices.iter().find(|&&i| i >= n) {
            return Err(RLError::DimensionMismatch {
                expected: n,
                actual: bad + 1,
            });
        }
        Ok(Self {
            s: indices.iter().map(|&i| self.s[i].clone()).collect(),
            a: indices.iter().map(|&i| self.a[i].clone()).collect(),
            logp: self.logp.select(Axis(0), indices),
            r_n: self.r_n.select(Axis(0), indices),
            i_n: self.i_n.select(Axis(0), indices),
            s_next: indices.iter().map(|&i| self.s_next[i].clone()).collect(),
            a_next: indices.iter().map(|&i| self.a_next[i].clone()).collect(),
            logp_next: self.logp_next.select(Axis(0), indices),
            w: self.w.select(Axis(0), indices),
            idx: indices.iter().map(|&i| self.idx[i]).collect(),
        })
    }

    /// Batch of size one holding row `i`
    pub fn get(&self, i: usize) -> Result<Self> {
        self.select(&[i])
    }

    /// Split into batches of size one
    #[must_use]
    pub fn to_singles(&self) -> Vec<Self> {
        (0..self.batch_size())
            .filter_map(|i| self.get(i).ok())
            .collect()
    }

    /// Stack batches along the batch axis
    pub fn concatenate(batches: &[Self]) -> Result<Self> {
        if batches.is_empty() {
            return Err(RLError::InsufficientCache(
                "cannot concatenate an empty list of batches".to_string(),
            ));
        }
        let stack = |field: fn(&Self) -> &Array1<f64>| -> Result<Array1<f64>> {
            let views: Vec<_> = batches.iter().map(|b| field(b).view()).collect();
            nd_concatenate(Axis(0), &views).map_err(|e| RLError::Computation(e.to_string()))
        };
        Ok(Self {
            s: batches.iter().flat_map(|b| b.s.iter().cloned()).collect(),
            a: batches.iter().flat_map(|b| b.a.iter().cloned()).collect(),
            logp: stack(|b| &b.logp)?,
            r_n: stack(|b| &b.r_n)?,
            i_n: stack(|b| &b.i_n)?,
            s_next: batches.iter().flat_map(|b| b.s_next.iter().cloned()).collect(),
            a_next: batches.iter().flat_map(|b| b.a_next.iter().cloned()).collect(),
            logp_next: stack(|b| &b.logp_next)?,
            w: stack(|b| &b.w)?,
            idx: batches.iter().flat_map(|b| b.idx.iter().copied()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn single(s: usize, r: f64, done: bool) -> TransitionBatch {
        let t = Transition::new(
            Observation::Discrete(s),
            Action::Discrete(0),
            r,
            done,
            Observation::Discrete(s + 1),
            Action::Discrete(1),
        );
        TransitionBatch::from_single(t, 0.9, s as u64)
    }

    #[test]
    fn test_from_single_discounts_unless_done() {
        assert_relative_eq!(single(0, 1.0, false).i_n[0], 0.9);
        assert_relative_eq!(single(0, 1.0, true).i_n[0], 0.0);
    }

    #[test]
    fn test_concatenate_and_split() {
        let batch = TransitionBatch::concatenate(&[single(0, 1.0, false), single(1, 2.0, true)]).unwrap();
        batch.validate().unwrap();
        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.idx, vec![0, 1]);
        assert_relative_eq!(batch.r_n[1], 2.0);

        let singles = batch.to_singles();
        assert_eq!(singles.len(), 2);
        assert_eq!(singles[1], single(1, 2.0, true));
        assert!(batch.get(2).is_err());
    }

    #[test]
    fn test_concatenate_empty_fails() {
        assert!(matches!(
            TransitionBatch::concatenate(&[]),
            Err(RLError::InsufficientCache(_))
        ));
    }
}
