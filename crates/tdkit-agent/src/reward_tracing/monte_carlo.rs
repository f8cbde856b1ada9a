//! Monte-Carlo reward tracing

use std::collections::VecDeque;

use ndarray::Array1;
use tdkit_core::{Action, Observation, Result, TransitionBatch};
use tracing::debug;

use super::{check_gamma, episode_done, not_ready, CachedStep, RewardTracer};

/// Full-episode discounted returns
///
/// Nothing is emitted until the episode is done. Transitions then come out
/// last-to-first, each with `R_n = G_t` and `I_n = 0`.
#[derive(Debug, Clone)]
pub struct MonteCarlo {
    gamma: f64,
    cache: VecDeque<CachedStep>,
    done: bool,
    g: f64,
    counter: u64,
}

impl MonteCarlo {
    /// Create a new Monte-Carlo tracer
    pub fn new(gamma: f64) -> Result<Self> {
        check_gamma(gamma)?;
        Ok(Self {
            gamma,
            cache: VecDeque::new(),
            done: false,
            g: 0.0,
            counter: 0,
        })
    }
}

impl RewardTracer for MonteCarlo {
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
            return Err(episode_done("MonteCarlo"));
        }
        if self.cache.is_empty() {
            self.g = 0.0;
        }
        self.done = done;
        self.cache.push_back(CachedStep { s, a, r, logp, w });
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.done && !self.cache.is_empty()
    }

    fn len(&self) -> usize {
        self.cache.len()
    }

    fn pop(&mut self) -> Result<TransitionBatch> {
        if !self.is_ready() {
            return Err(not_ready("MonteCarlo"));
        }
        let step = self.cache.pop_back().ok_or_else(|| not_ready("MonteCarlo"))?;
        self.g = step.r + self.gamma * self.g;
        let g = self.g;
        if self.cache.is_empty() {
            self.g = 0.0;
        }

        let idx = self.counter;
        self.counter += 1;
        debug!(idx, g, remaining = self.cache.len(), "MonteCarlo pop");

        Ok(TransitionBatch {
            s: vec![step.s.clone()],
            a: vec![step.a.clone()],
            logp: Array1::from_elem(1, step.logp),
            r_n: Array1::from_elem(1, g),
            i_n: Array1::zeros(1),
            s_next: vec![step.s],
            a_next: vec![step.a],
            logp_next: Array1::from_elem(1, step.logp),
            w: Array1::from_elem(1, step.w),
            idx: vec![idx],
        })
    }

    fn reset(&mut self) {
        self.cache.clear();
        self.done = false;
        self.g = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use tdkit_core::RLError;

    #[test]
    fn test_returns_come_out_backwards() {
        let mut tracer = MonteCarlo::new(0.9).unwrap();
        tracer.add(Observation::Discrete(0), Action::Discrete(0), 0.0, false).unwrap();
        tracer.add(Observation::Discrete(1), Action::Discrete(1), 0.0, false).unwrap();
        assert!(!tracer.is_ready());
        assert!(matches!(tracer.pop(), Err(RLError::InsufficientCache(_))));
        tracer.add(Observation::Discrete(2), Action::Discrete(2), 1.0, true).unwrap();

        let batch = tracer.flush().unwrap();
        assert_eq!(batch.batch_size(), 3);
        assert_eq!(batch.s[0], Observation::Discrete(2));
        assert_relative_eq!(batch.r_n[0], 1.0);
        assert_relative_eq!(batch.r_n[1], 0.9);
        assert_relative_eq!(batch.r_n[2], 0.81, epsilon = 1e-12);
        assert!(batch.i_n.iter().all(|&i| i == 0.0));
    }

    #[test]
    fn test_return_resets_between_episodes() {
        let mut tracer = MonteCarlo::new(1.0).unwrap();
        tracer.add(Observation::Discrete(0), Action::Discrete(0), 5.0, true).unwrap();
        assert!(tracer.add(Observation::Discrete(0), Action::Discrete(0), 1.0, false).is_err());
        assert_relative_eq!(tracer.pop().unwrap().r_n[0], 5.0);

        tracer.add(Observation::Discrete(0), Action::Discrete(0), 2.0, true).unwrap();
        assert_relative_eq!(tracer.pop().unwrap().r_n[0], 2.0);
    }

    proptest! {
        #[test]
        fn prop_first_return_is_discounted_sum(
            rewards in prop::collection::vec(-5.0f64..5.0, 1..25),
            gamma in 0.0f64..=1.0,
        ) {
            let mut tracer = MonteCarlo::new(gamma).unwrap();
            let last = rewards.len() - 1;
            for (t, &r) in rewards.iter().enumerate() {
                tracer.add(Observation::Discrete(t), Action::Discrete(0), r, t == last).unwrap();
            }
            let batch = tracer.flush().unwrap();
            prop_assert_eq!(batch.batch_size(), rewards.len());
            let expected: f64 = rewards
                .iter()
                .enumerate()
                .map(|(k, r)| gamma.powi(k as i32) * r)
                .sum();
            prop_assert!((batch.r_n[rewards.len() - 1] - expected).abs() < 1e-9);
            prop_assert_eq!(&batch.s[rewards.len() - 1], &Observation::Discrete(0));
        }
    }
}
