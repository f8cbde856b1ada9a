use ndarray::{Array1, Axis};
use tdkit_core::proba_dist::{argmax, logsumexp};
use tdkit_core::{RLError, Result, Shared, TransitionBatch, Q};

use super::{TdCore, TdLearning};

/// Off-policy TD control: next value `max_a q_targ(S_next, a)`
pub struct QLearning {
    core: TdCore<Q>,
}

impl QLearning {
    /// Updater for `q` with default loss, optimizer and `q` as its own target
    pub fn new(q: Shared<Q>) -> Self {
        Self {
            core: TdCore::new(q),
        }
    }
}

impl TdLearning for QLearning {
    type Model = Q;

    fn name(&self) -> &'static str {
        "QLearning"
    }

    fn core(&self) -> &TdCore<Q> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TdCore<Q> {
        &mut self.core
    }

    fn next_values(&self, batch: &TransitionBatch) -> Result<Array1<f64>> {
        let values = self.core.target.read().values_batch(&batch.s_next)?;
        Ok(values.map_axis(Axis(1), |row| row.fold(f64::NEG_INFINITY, |m, &v| m.max(v))))
    }
}

/// Double Q-learning: the main model picks `argmax_a q(S_next, a)`, the
/// target model evaluates it
pub struct DoubleQLearning {
    core: TdCore<Q>,
}

impl DoubleQLearning {
    /// Updater for `q`; pair it with [`TdLearning::with_target`]
    pub fn new(q: Shared<Q>) -> Self {
        Self {
            core: TdCore::new(q),
        }
    }
}

impl TdLearning for DoubleQLearning {
    type Model = Q;

    fn name(&self) -> &'static str {
        "DoubleQLearning"
    }

    fn core(&self) -> &TdCore<Q> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TdCore<Q> {
        &mut self.core
    }

    fn next_values(&self, batch: &TransitionBatch) -> Result<Array1<f64>> {
        let greedy: Vec<usize> = self
            .core
            .model
            .read()
            .values_batch(&batch.s_next)?
            .rows()
            .into_iter()
            .map(|row| argmax(row.iter()))
            .collect();
        let values = self.core.target.read().values_batch(&batch.s_next)?;
        Ok(greedy
            .iter()
            .enumerate()
            .map(|(i, &a)| values[[i, a]])
            .collect())
    }
}

/// Soft Q-learning: next value `τ·logsumexp(q_targ(S_next, ·)/τ)`
pub struct SoftQLearning {
    core: TdCore<Q>,
    temperature: f64,
}

impl SoftQLearning {
    /// Updater for `q` with the given Boltzmann temperature
    pub fn new(q: Shared<Q>, temperature: f64) -> Result<Self> {
        if temperature <= 0.0 {
            return Err(RLError::InvalidConfig(format!(
                "temperature must be positive, got {temperature}"
            )));
        }
        Ok(Self {
            core: TdCore::new(q),
            temperature,
        })
    }

    /// Boltzmann temperature
    #[must_use]
    pub fn temperature(&self) -> f64 {
        self.temperature
    }
}

impl TdLearning for SoftQLearning {
    type Model = Q;

    fn name(&self) -> &'static str {
        "SoftQLearning"
    }

    fn core(&self) -> &TdCore<Q> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TdCore<Q> {
        &mut self.core
    }

    fn next_values(&self, batch: &TransitionBatch) -> Result<Array1<f64>> {
        let tau = self.temperature;
        let scaled = self.core.target.read().values_batch(&batch.s_next)? / tau;
        Ok(scaled.map_axis(Axis(1), |row| tau * logsumexp(row.iter())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::td_learning::test_utils::{q_model, transition};
    use crate::value_losses::ValueLoss;
    use approx::assert_relative_eq;
    use tdkit_core::{Observation, Sgd};

    fn set_values(q: &Shared<Q>, s: usize, values: &[f64]) {
        let mut updater = QLearning::new(q.clone())
            .with_loss(ValueLoss::Mse)
            .with_optimizer(Box::new(Sgd::new(0.5)));
        // with a one-hot input, lr 0.5 lands exactly on the target
        for (a, &v) in values.iter().enumerate() {
            updater.update(&transition(s, a, v, true, s, a)).unwrap();
        }
    }

    #[test]
    fn test_q_learning_uses_max() {
        let q = q_model(2, 3);
        set_values(&q, 1, &[1.0, 3.0, 2.0]);
        let next = q.read().values(&Observation::Discrete(1)).unwrap();
        let max = next.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let updater = QLearning::new(q);
        let batch = transition(0, 0, 0.5, false, 1, 0);
        assert_relative_eq!(updater.target(&batch).unwrap()[0], 0.5 + 0.9 * max, epsilon = 1e-12);
    }

    #[test]
    fn test_soft_q_learning_approaches_max_at_low_temperature() {
        let q = q_model(2, 3);
        set_values(&q, 1, &[1.0, 3.0, 2.0]);
        let next = q.read().values(&Observation::Discrete(1)).unwrap();
        let max = next.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let batch = transition(0, 0, 0.0, false, 1, 0);

        let cold = SoftQLearning::new(q.clone(), 1e-3).unwrap();
        assert_relative_eq!(cold.target(&batch).unwrap()[0], 0.9 * max, epsilon = 1e-6);

        let warm = SoftQLearning::new(q.clone(), 1.0).unwrap();
        let expected = 0.9 * next.iter().map(|v| v.exp()).sum::<f64>().ln();
        assert_relative_eq!(warm.target(&batch).unwrap()[0], expected, epsilon = 1e-12);
        assert!(SoftQLearning::new(q, 0.0).is_err());
    }

    #[test]
    fn test_double_q_learning_decouples_selection_and_evaluation() {
        let q = q_model(2, 2);
        let q_targ = q.deep_copy();
        set_values(&q, 1, &[0.0, 1.0]);
        set_values(&q_targ, 1, &[5.0, -1.0]);
        let eval = q_targ.read().values(&Observation::Discrete(1)).unwrap();
        let main = q.read().values(&Observation::Discrete(1)).unwrap();
        let greedy = argmax(main.iter());

        let updater = DoubleQLearning::new(q).with_target(q_targ).unwrap();
        let batch = transition(0, 0, 0.0, false, 1, 0);
        assert_relative_eq!(updater.target(&batch).unwrap()[0], 0.9 * eval[greedy], epsilon = 1e-12);
    }
}
