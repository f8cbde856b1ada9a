use ndarray::Array1;
use tdkit_core::{DistParams, Metrics, Policy, Result, Shared, TransitionBatch};

use super::{ObjectiveValue, PolicyCore, PolicyObjective};

/// REINFORCE-style objective `mean(W · Adv · log π(A|S))`
pub struct VanillaPG {
    core: PolicyCore,
}

impl VanillaPG {
    /// Objective for `pi` with the default optimizer
    pub fn new(pi: Shared<Policy>) -> Self {
        Self {
            core: PolicyCore::new(pi),
        }
    }
}

impl PolicyObjective for VanillaPG {
    fn name(&self) -> &'static str {
        "VanillaPG"
    }

    fn core(&self) -> &PolicyCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PolicyCore {
        &mut self.core
    }

    fn objective(
        &self,
        dist_params: &DistParams,
        batch: &TransitionBatch,
        adv: &Array1<f64>,
    ) -> Result<ObjectiveValue> {
        let n = batch.batch_size().max(1) as f64;
        let log_pi = dist_params.log_prob(&batch.a)?;
        let coef = &batch.w * adv;
        let objective = (&coef * &log_pi).sum() / n;

        let mut grad = dist_params.log_prob_grad(&batch.a)?;
        grad.scale_rows(&(coef / n));
        Ok(ObjectiveValue {
            objective,
            grad,
            metrics: Metrics::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy_objectives::test_utils::{batch, policy};
    use crate::regularizers::EntropyRegularizer;
    use approx::assert_relative_eq;
    use tdkit_core::{Action, Observation, RLError, Sgd, StochasticPolicy};

    #[test]
    fn test_positive_advantage_raises_propensity() {
        let pi = policy(2, 3);
        let mut pg = VanillaPG::new(pi.clone()).with_optimizer(Box::new(Sgd::new(0.5)));
        let s = Observation::Discrete(0);
        let before = pi.log_prob(&[s.clone()], &[Action::Discrete(2)]).unwrap()[0];

        let metrics = pg.update(&batch(0, 2, 0.0), &Array1::from_elem(1, 1.0)).unwrap();
        assert_relative_eq!(metrics["VanillaPG/loss"], -before, epsilon = 1e-12);

        let after = pi.log_prob(&[s], &[Action::Discrete(2)]).unwrap()[0];
        assert!(after > before);
    }

    #[test]
    fn test_advantage_length_is_checked() {
        let pg = VanillaPG::new(policy(2, 2));
        assert!(matches!(
            pg.grads_and_metrics(&batch(0, 0, 0.0), &Array1::zeros(2)),
            Err(RLError::DimensionMismatch { expected: 1, actual: 2 })
        ));
    }

    #[test]
    fn test_entropy_regularizer_adds_to_loss() {
        let pi = policy(2, 2);
        let reg = EntropyRegularizer::new(pi.clone(), 0.1);
        let pg = VanillaPG::new(pi).with_regularizer(Box::new(reg));
        let (_, metrics) = pg
            .grads_and_metrics(&batch(0, 0, 0.0), &Array1::zeros(1))
            .unwrap();
        assert_relative_eq!(metrics["VanillaPG/loss"], -0.1 * 2.0_f64.ln(), epsilon = 1e-12);
        assert_relative_eq!(metrics["EntropyRegularizer/entropy"], 2.0_f64.ln(), epsilon = 1e-12);
    }
}
