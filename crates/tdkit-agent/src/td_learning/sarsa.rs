use ndarray::{Array1, Axis};
use tdkit_core::{RLError, Result, Shared, StochasticPolicy, TransitionBatch, ValueModel, Q};

use super::{TdCore, TdLearning};

/// On-policy TD control: next value `q_targ(S_next, A_next)`
pub struct Sarsa {
    core: TdCore<Q>,
}

impl Sarsa {
    /// Updater for `q` with default loss, optimizer and `q` as its own target
    pub fn new(q: Shared<Q>) -> Self {
        Self {
            core: TdCore::new(q),
        }
    }
}

impl TdLearning for Sarsa {
    type Model = Q;

    fn name(&self) -> &'static str {
        "Sarsa"
    }

    fn core(&self) -> &TdCore<Q> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TdCore<Q> {
        &mut self.core
    }

    fn next_values(&self, batch: &TransitionBatch) -> Result<Array1<f64>> {
        let q_targ = self.core.target.read();
        let prediction = q_targ.predict(&batch.s_next, &batch.a_next)?;
        Ok(q_targ.value_transform().inverse_array(&prediction))
    }
}

/// Expected SARSA: next value `Σ_a π_targ(a|S_next) q_targ(S_next, a)`
pub struct ExpectedSarsa {
    core: TdCore<Q>,
    pi_targ: Box<dyn StochasticPolicy>,
}

impl ExpectedSarsa {
    /// Updater for `q` averaging next values under `pi_targ`
    ///
    /// `pi_targ` must be a categorical policy over the same actions as `q`.
    pub fn new(q: Shared<Q>, pi_targ: impl StochasticPolicy + 'static) -> Result<Self> {
        let n = q.read().n_actions();
        if pi_targ.action_space().n() != Some(n) {
            return Err(RLError::InvalidConfig(format!(
                "ExpectedSarsa needs a policy over Discrete({n}), got {:?}",
                pi_targ.action_space()
            )));
        }
        Ok(Self {
            core: TdCore::new(q),
            pi_targ: Box::new(pi_targ),
        })
    }
}

impl TdLearning for ExpectedSarsa {
    type Model = Q;

    fn name(&self) -> &'static str {
        "ExpectedSarsa"
    }

    fn core(&self) -> &TdCore<Q> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TdCore<Q> {
        &mut self.core
    }

    fn next_values(&self, batch: &TransitionBatch) -> Result<Array1<f64>> {
        let probs = self.pi_targ.dist_params_batch(&batch.s_next)?.probs()?;
        let values = self.core.target.read().values_batch(&batch.s_next)?;
        Ok((probs * values).sum_axis(Axis(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::td_learning::test_utils::{q_model, q_model_with, transition};
    use crate::value_losses::ValueLoss;
    use approx::assert_relative_eq;
    use tdkit_core::{Action, ActionSpace, Observation, RandomPolicy, Sgd, ValueTransform};

    fn seed_q(q: &Shared<Q>, s: usize, a: usize, target: f64) {
        let mut updater = Sarsa::new(q.clone())
            .with_loss(ValueLoss::Mse)
            .with_optimizer(Box::new(Sgd::new(0.5)));
        updater.update(&transition(s, a, target, true, s, a)).unwrap();
    }

    #[test]
    fn test_sarsa_bootstraps_from_next_action() {
        let q = q_model(3, 2);
        seed_q(&q, 1, 1, 4.0);
        let q_next = q.read().value(&Observation::Discrete(1), &Action::Discrete(1)).unwrap();
        assert_relative_eq!(q_next, 4.0);

        let updater = Sarsa::new(q.clone());
        let batch = transition(0, 0, 1.0, false, 1, 1);
        let expected = 1.0 + 0.9 * q_next;
        assert_relative_eq!(updater.target(&batch).unwrap()[0], expected);
        let q_now = q.read().value(&Observation::Discrete(0), &Action::Discrete(0)).unwrap();
        assert_relative_eq!(updater.td_error(&batch).unwrap()[0], expected - q_now);
    }

    #[test]
    fn test_expected_sarsa_averages_under_policy() {
        let q = q_model(2, 2);
        seed_q(&q, 1, 0, 2.0);
        let values = q.read().values(&Observation::Discrete(1)).unwrap();

        let updater = ExpectedSarsa::new(q, RandomPolicy::new(ActionSpace::discrete(2))).unwrap();
        let batch = transition(0, 0, 0.0, false, 1, 0);
        assert_relative_eq!(
            updater.target(&batch).unwrap()[0],
            0.9 * 0.5 * (values[0] + values[1]),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_expected_sarsa_rejects_mismatched_policy() {
        let q = q_model(2, 2);
        assert!(ExpectedSarsa::new(q, RandomPolicy::new(ActionSpace::discrete(3))).is_err());
    }

    #[test]
    fn test_sarsa_inverts_log_transform_before_bootstrapping() {
        let f = ValueTransform::log(2.0).unwrap();
        let q = q_model_with(3, 2, f);
        seed_q(&q, 1, 1, 4.0);
        seed_q(&q, 0, 0, -1.0);
        let read = |s: usize, a: usize| {
            q.read()
                .value(&Observation::Discrete(s), &Action::Discrete(a))
                .unwrap()
        };
        assert_relative_eq!(read(1, 1), 4.0, epsilon = 1e-12);
        assert_relative_eq!(read(0, 0), -1.0, epsilon = 1e-12);

        let updater = Sarsa::new(q.clone());
        let batch = transition(0, 0, 1.0, false, 1, 1);
        let g = updater.target(&batch).unwrap()[0];
        assert_relative_eq!(g, 2.0 * 5.6_f64.ln(), epsilon = 1e-12);
        assert_relative_eq!(f.inverse(g), 1.0 + 0.9 * 4.0, epsilon = 1e-12);
        assert_relative_eq!(updater.td_error(&batch).unwrap()[0], 4.6 + 1.0, epsilon = 1e-12);
    }
}
