//! Experience replay buffers
//!
//! Buffers store single transitions (as emitted by a reward tracer) and hand
//! out random mini-batches for off-policy updaters.

use std::collections::VecDeque;

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, WeightedIndex};
use tdkit_core::error::ensure_len;
use tdkit_core::{RLError, Result, TransitionBatch};

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn check_capacity(capacity: usize) -> Result<()> {
    if capacity == 0 {
        return Err(RLError::InvalidConfig(
            "replay buffer capacity must be positive".to_string(),
        ));
    }
    Ok(())
}

fn check_batch_size(batch_size: usize) -> Result<()> {
    if batch_size == 0 {
        return Err(RLError::InvalidConfig(
            "batch size must be positive".to_string(),
        ));
    }
    Ok(())
}

fn empty_buffer() -> RLError {
    RLError::InsufficientCache("cannot sample from an empty replay buffer".to_string())
}

/// Uniform FIFO replay buffer
#[derive(Debug, Clone)]
pub struct SimpleReplayBuffer {
    storage: VecDeque<TransitionBatch>,
    capacity: usize,
    rng: StdRng,
}

impl SimpleReplayBuffer {
    /// Create a new replay buffer
    pub fn new(capacity: usize, seed: Option<u64>) -> Result<Self> {
        check_capacity(capacity)?;
        Ok(Self {
            storage: VecDeque::with_capacity(capacity),
            capacity,
            rng: seeded_rng(seed),
        })
    }

    /// Add every transition of `batch`, evicting the oldest ones when full
    pub fn add(&mut self, batch: &TransitionBatch) -> Result<()> {
        batch.validate()?;
        for single in batch.to_singles() {
            if self.storage.len() >= self.capacity {
                self.storage.pop_front();
            }
            self.storage.push_back(single);
        }
        Ok(())
    }

    /// Sample `batch_size` transitions uniformly, with replacement
    pub fn sample(&mut self, batch_size: usize) -> Result<TransitionBatch> {
        check_batch_size(batch_size)?;
        if self.storage.is_empty() {
            return Err(empty_buffer());
        }
        let picks: Vec<TransitionBatch> = (0..batch_size)
            .map(|_| self.storage[self.rng.gen_range(0..self.storage.len())].clone())
            .collect();
        TransitionBatch::concatenate(&picks)
    }

    /// Maximum number of stored transitions
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the current size of the buffer
    #[must_use]
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check if buffer is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.storage.clear();
    }
}

/// Prioritized experience replay
///
/// Transitions are sampled with probability proportional to
/// `(|adv| + ε)^α`. Sampled batches carry importance weights
/// `(N·P(i))^{−β}` normalised by the largest weight in the batch, and their
/// `idx` field holds buffer slots to pass back to [`Self::update`].
#[derive(Debug, Clone)]
pub struct PrioritizedReplayBuffer {
    storage: Vec<TransitionBatch>,
    priorities: Vec<f64>,
    capacity: usize,
    alpha: f64,
    beta: f64,
    epsilon: f64,
    position: usize,
    rng: StdRng,
}

impl PrioritizedReplayBuffer {
    /// Create a new prioritized replay buffer
    pub fn new(capacity: usize, alpha: f64, beta: f64, seed: Option<u64>) -> Result<Self> {
        check_capacity(capacity)?;
        if alpha < 0.0 {
            return Err(RLError::InvalidConfig(format!(
                "alpha must be non-negative, got {alpha}"
            )));
        }
        Ok(Self {
            storage: Vec::with_capacity(capacity),
            priorities: Vec::with_capacity(capacity),
            capacity,
            alpha,
            beta: beta.clamp(0.0, 1.0),
            epsilon: 1e-4,
            position: 0,
            rng: seeded_rng(seed),
        })
    }

    /// Override the additive priority floor, which must be positive
    pub fn with_epsilon(mut self, epsilon: f64) -> Result<Self> {
        if !(epsilon.is_finite() && epsilon > 0.0) {
            return Err(RLError::InvalidConfig(format!(
                "priority epsilon must be positive, got {epsilon}"
            )));
        }
        self.epsilon = epsilon;
        Ok(self)
    }

    fn priority(&self, adv: f64) -> f64 {
        (adv.abs() + self.epsilon).powf(self.alpha)
    }

    /// Add transitions with their advantages (typically TD errors)
    pub fn add(&mut self, batch: &TransitionBatch, adv: &Array1<f64>) -> Result<()> {
        batch.validate()?;
        ensure_len(batch.batch_size(), adv.len())?;
        for (single, &a) in batch.to_singles().into_iter().zip(adv) {
            let priority = self.priority(a);
            if self.storage.len() < self.capacity {
                self.storage.push(single);
                self.priorities.push(priority);
            } else {
                self.storage[self.position] = single;
                self.priorities[self.position] = priority;
            }
            self.position = (self.position + 1) % self.capacity;
        }
        Ok(())
    }

    /// Sample a batch with importance weights in `w`
    pub fn sample(&mut self, batch_size: usize) -> Result<TransitionBatch> {
        check_batch_size(batch_size)?;
        if self.storage.is_empty() {
            return Err(empty_buffer());
        }
        let total: f64 = self.priorities.iter().sum();
        let dist = WeightedIndex::new(&self.priorities)
            .map_err(|e| RLError::Computation(e.to_string()))?;

        let n = self.storage.len() as f64;
        let slots: Vec<usize> = (0..batch_size).map(|_| dist.sample(&mut self.rng)).collect();
        let weights: Vec<f64> = slots
            .iter()
            .map(|&slot| (n * self.priorities[slot] / total).powf(-self.beta))
            .collect();
        // sampled slots have positive priority, so the largest weight is finite
        let max_weight = weights.iter().copied().fold(f64::MIN_POSITIVE, f64::max);

        let picks: Vec<TransitionBatch> = slots
            .iter()
            .zip(&weights)
            .map(|(&slot, &w)| {
                let mut single = self.storage[slot].clone();
                single.w = Array1::from_elem(1, w / max_weight);
                single.idx = vec![slot as u64];
                single
            })
            .collect();
        TransitionBatch::concatenate(&picks)
    }

    /// Update priorities of previously sampled slots
    pub fn update(&mut self, idx: &[u64], adv: &Array1<f64>) -> Result<()> {
        ensure_len(idx.len(), adv.len())?;
        for (&slot, &a) in idx.iter().zip(adv) {
            let slot = usize::try_from(slot).map_err(|e| RLError::Computation(e.to_string()))?;
            if slot >= self.priorities.len() {
                return Err(RLError::DimensionMismatch {
                    expected: self.priorities.len(),
                    actual: slot + 1,
                });
            }
            self.priorities[slot] = self.priority(a);
        }
        Ok(())
    }

    /// Set beta (importance sampling exponent)
    pub fn set_beta(&mut self, beta: f64) {
        self.beta = beta.clamp(0.0, 1.0);
    }

    /// Get current buffer size
    #[must_use]
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check if buffer is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.storage.clear();
        self.priorities.clear();
        self.position = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tdkit_core::{Action, Observation, Transition};

    fn single(s: usize) -> TransitionBatch {
        let t = Transition::new(
            Observation::Discrete(s),
            Action::Discrete(0),
            s as f64,
            false,
            Observation::Discrete(s + 1),
            Action::Discrete(0),
        );
        TransitionBatch::from_single(t, 0.9, 0)
    }

    #[test]
    fn test_simple_buffer_evicts_oldest() {
        let mut buffer = SimpleReplayBuffer::new(2, Some(0)).unwrap();
        assert!(matches!(buffer.sample(1), Err(RLError::InsufficientCache(_))));
        for s in 0..3 {
            buffer.add(&single(s)).unwrap();
        }
        assert_eq!(buffer.len(), 2);
        let batch = buffer.sample(16).unwrap();
        assert_eq!(batch.batch_size(), 16);
        assert!(batch.s.iter().all(|s| *s != Observation::Discrete(0)));

        buffer.clear();
        assert!(buffer.is_empty());
        assert!(SimpleReplayBuffer::new(0, None).is_err());
    }

    #[test]
    fn test_zero_batch_size_is_a_config_error() {
        let mut simple = SimpleReplayBuffer::new(4, Some(0)).unwrap();
        simple.add(&single(0)).unwrap();
        assert!(matches!(simple.sample(0), Err(RLError::InvalidConfig(_))));

        let mut prioritized = PrioritizedReplayBuffer::new(4, 0.6, 0.4, Some(0)).unwrap();
        prioritized.add(&single(0), &Array1::from_vec(vec![1.0])).unwrap();
        assert!(matches!(prioritized.sample(0), Err(RLError::InvalidConfig(_))));
    }

    #[test]
    fn test_prioritized_prefers_large_errors() {
        let mut buffer = PrioritizedReplayBuffer::new(10, 1.0, 1.0, Some(1)).unwrap();
        let batch = TransitionBatch::concatenate(&[single(0), single(1)]).unwrap();
        buffer.add(&batch, &Array1::from_vec(vec![0.0, 100.0])).unwrap();

        let sampled = buffer.sample(50).unwrap();
        let hits = sampled.idx.iter().filter(|&&i| i == 1).count();
        assert!(hits > 45);
        assert!(sampled.w.iter().all(|&w| w > 0.0 && w <= 1.0));
        assert_relative_eq!(sampled.w.fold(0.0, |m: f64, &w| m.max(w)), 1.0);

        buffer.update(&[1], &Array1::from_vec(vec![0.0])).unwrap();
        assert!(buffer.update(&[7], &Array1::from_vec(vec![0.0])).is_err());
        assert!(buffer.add(&batch, &Array1::zeros(1)).is_err());
    }

    #[test]
    fn test_importance_weights_survive_zero_priorities() {
        // nothing but the priority floor keeps slot 0 from having zero priority
        let mut buffer = PrioritizedReplayBuffer::new(10, 1.0, 1.0, Some(3))
            .unwrap()
            .with_epsilon(1e-12)
            .unwrap();
        let batch = TransitionBatch::concatenate(&[single(0), single(1)]).unwrap();
        buffer.add(&batch, &Array1::from_vec(vec![0.0, 1.0])).unwrap();

        let sampled = buffer.sample(8).unwrap();
        assert!(sampled.w.iter().all(|&w| w.is_finite() && w > 0.0));
        assert_relative_eq!(sampled.w.fold(0.0, |m: f64, &w| m.max(w)), 1.0);

        let fresh = PrioritizedReplayBuffer::new(10, 1.0, 1.0, Some(3)).unwrap();
        assert!(matches!(fresh.clone().with_epsilon(0.0), Err(RLError::InvalidConfig(_))));
        assert!(fresh.with_epsilon(-1.0).is_err());
    }

    #[test]
    fn test_importance_weights_are_relative_to_the_batch() {
        let mut buffer = PrioritizedReplayBuffer::new(10, 1.0, 1.0, Some(5)).unwrap();
        let batch = TransitionBatch::concatenate(&[single(0), single(1)]).unwrap();
        buffer.add(&batch, &Array1::from_vec(vec![1.0, 3.0])).unwrap();

        let sampled = buffer.sample(200).unwrap();
        assert!(sampled.idx.contains(&0) && sampled.idx.contains(&1));
        for (&slot, &w) in sampled.idx.iter().zip(&sampled.w) {
            // P = (1 + ε)/(4 + 2ε) vs (3 + ε)/(4 + 2ε), so the weights differ by 3x
            let expected = if slot == 0 { 1.0 } else { (1.0 + 1e-4) / (3.0 + 1e-4) };
            assert_relative_eq!(w, expected, epsilon = 1e-9);
        }
    }
}
