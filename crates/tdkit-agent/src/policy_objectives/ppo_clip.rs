use ndarray::Array1;
use tdkit_core::{DistParams, Metrics, Policy, RLError, Result, Shared, TransitionBatch};

use super::{ObjectiveValue, PolicyCore, PolicyObjective};

/// Clipped surrogate objective
///
/// `mean(W · min(ρ·Adv, clip(ρ, 1−ε, 1+ε)·Adv))` with the importance ratio
/// `ρ = exp(log π(A|S) − logP)` against the behaviour propensities stored in
/// the batch.
pub struct PPOClip {
    core: PolicyCore,
    epsilon: f64,
}

impl PPOClip {
    /// Objective for `pi` with `ε = 0.2`
    pub fn new(pi: Shared<Policy>) -> Self {
        Self {
            core: PolicyCore::new(pi),
            epsilon: 0.2,
        }
    }

    /// Use a different clipping range
    pub fn with_epsilon(mut self, epsilon: f64) -> Result<Self> {
        if epsilon <= 0.0 {
            return Err(RLError::InvalidConfig(format!(
                "clipping epsilon must be positive, got {epsilon}"
            )));
        }
        self.epsilon = epsilon;
        Ok(self)
    }

    /// Clipping range
    #[must_use]
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }
}

impl PolicyObjective for PPOClip {
    fn name(&self) -> &'static str {
        "PPOClip"
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
        let (lo, hi) = (1.0 - self.epsilon, 1.0 + self.epsilon);
        let log_pi = dist_params.log_prob(&batch.a)?;

        let mut objective = 0.0;
        let mut clipped = 0.0;
        // d(objective)/d(log π) per sample
        let mut coef = Array1::zeros(log_pi.len());
        for i in 0..log_pi.len() {
            let ratio = (log_pi[i] - batch.logp[i]).exp();
            let unclipped = ratio * adv[i];
            let clipped_term = ratio.clamp(lo, hi) * adv[i];
            if unclipped <= clipped_term {
                objective += batch.w[i] * unclipped;
                coef[i] = batch.w[i] * unclipped / n;
            } else {
                objective += batch.w[i] * clipped_term;
                clipped += 1.0;
            }
        }

        let mut grad = dist_params.log_prob_grad(&batch.a)?;
        grad.scale_rows(&coef);
        let metrics = Metrics::from([(format!("{}/clip_fraction", self.name()), clipped / n)]);
        Ok(ObjectiveValue {
            objective: objective / n,
            grad,
            metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy_objectives::test_utils::{batch, policy};
    use approx::assert_relative_eq;
    use tdkit_core::{Action, Observation, StochasticPolicy};

    #[test]
    fn test_on_policy_matches_ratio_one() {
        let pi = policy(2, 2);
        let logp = pi
            .log_prob(&[Observation::Discrete(0)], &[Action::Discrete(1)])
            .unwrap()[0];
        let ppo = PPOClip::new(pi);
        let (grads, metrics) = ppo
            .grads_and_metrics(&batch(0, 1, logp), &Array1::from_elem(1, 2.0))
            .unwrap();
        assert_relative_eq!(metrics["PPOClip/loss"], -2.0, epsilon = 1e-12);
        assert_relative_eq!(metrics["PPOClip/clip_fraction"], 0.0);
        assert!(grads.max_abs() > 0.0);
    }

    #[test]
    fn test_clipped_samples_have_no_gradient() {
        let pi = policy(2, 2);
        // behaviour propensity far below the current one: ratio ≈ 2 > 1 + ε
        let logp = 0.5_f64.ln() - 2.0_f64.ln();
        let ppo = PPOClip::new(pi);
        let (grads, metrics) = ppo
            .grads_and_metrics(&batch(0, 1, logp), &Array1::from_elem(1, 1.0))
            .unwrap();
        assert_relative_eq!(metrics["PPOClip/loss"], -1.2, epsilon = 1e-12);
        assert_relative_eq!(metrics["PPOClip/clip_fraction"], 1.0);
        assert_relative_eq!(grads.max_abs(), 0.0);
        assert!(PPOClip::new(policy(1, 2)).with_epsilon(0.0).is_err());
    }
}
