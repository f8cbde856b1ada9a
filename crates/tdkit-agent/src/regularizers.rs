//! Policy regularizers
//!
//! A regularizer contributes a per-sample additive loss term computed from
//! the distribution parameters of a stochastic policy. TD updaters subtract
//! it from their targets; policy objectives add it to their loss.

use ndarray::Array1;
use tdkit_core::{DistParams, Metrics, StochasticPolicy};

/// Additive loss term over the distribution of a stochastic policy
pub trait Regularizer: Send + Sync {
    /// Prefix for metric names
    fn name(&self) -> &'static str;

    /// The regularized policy
    fn policy(&self) -> &dyn StochasticPolicy;

    /// Hyperparameters, keyed by name
    fn hyperparams(&self) -> Metrics;

    /// Per-sample loss term
    fn function(&self, dist_params: &DistParams) -> Array1<f64>;

    /// Per-sample gradient of [`Self::function`] with respect to `dist_params`
    fn grad(&self, dist_params: &DistParams) -> DistParams;

    /// Diagnostics, averaged over the batch
    fn metrics(&self, dist_params: &DistParams) -> Metrics;
}

/// Entropy bonus: `function = −β·H[π]`
///
/// Added to a TD target this gives the soft (SAC-style) target `G + β·H`.
#[derive(Debug, Clone)]
pub struct EntropyRegularizer<P> {
    f: P,
    beta: f64,
}

impl<P: StochasticPolicy> EntropyRegularizer<P> {
    /// Regularize `f` with coefficient `beta`
    pub fn new(f: P, beta: f64) -> Self {
        Self { f, beta }
    }

    /// Coefficient
    #[must_use]
    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// Change the coefficient, e.g. from a schedule
    pub fn set_beta(&mut self, beta: f64) {
        self.beta = beta;
    }
}

impl<P: StochasticPolicy> Regularizer for EntropyRegularizer<P> {
    fn name(&self) -> &'static str {
        "EntropyRegularizer"
    }

    fn policy(&self) -> &dyn StochasticPolicy {
        &self.f
    }

    fn hyperparams(&self) -> Metrics {
        Metrics::from([("beta".to_string(), self.beta)])
    }

    fn function(&self, dist_params: &DistParams) -> Array1<f64> {
        dist_params.entropy() * -self.beta
    }

    fn grad(&self, dist_params: &DistParams) -> DistParams {
        let mut grad = dist_params.entropy_grad();
        grad.scale_rows(&Array1::from_elem(dist_params.batch_size(), -self.beta));
        grad
    }

    fn metrics(&self, dist_params: &DistParams) -> Metrics {
        Metrics::from([
            (format!("{}/beta", self.name()), self.beta),
            (
                format!("{}/entropy", self.name()),
                dist_params.entropy().mean().unwrap_or(0.0),
            ),
        ])
    }
}

/// KL penalty towards the prior: `function = β·KL(π ‖ prior)`
///
/// The prior is uniform for categorical and standard normal for Gaussian
/// policies.
#[derive(Debug, Clone)]
pub struct KLDivRegularizer<P> {
    f: P,
    beta: f64,
}

impl<P: StochasticPolicy> KLDivRegularizer<P> {
    /// Regularize `f` with coefficient `beta`
    pub fn new(f: P, beta: f64) -> Self {
        Self { f, beta }
    }

    /// Coefficient
    #[must_use]
    pub fn beta(&self) -> f64 {
        self.beta
    }
}

impl<P: StochasticPolicy> Regularizer for KLDivRegularizer<P> {
    fn name(&self) -> &'static str {
        "KLDivRegularizer"
    }

    fn policy(&self) -> &dyn StochasticPolicy {
        &self.f
    }

    fn hyperparams(&self) -> Metrics {
        Metrics::from([("beta".to_string(), self.beta)])
    }

    fn function(&self, dist_params: &DistParams) -> Array1<f64> {
        dist_params.kl_to_prior() * self.beta
    }

    fn grad(&self, dist_params: &DistParams) -> DistParams {
        let mut grad = dist_params.kl_to_prior_grad();
        grad.scale_rows(&Array1::from_elem(dist_params.batch_size(), self.beta));
        grad
    }

    fn metrics(&self, dist_params: &DistParams) -> Metrics {
        Metrics::from([
            (format!("{}/beta", self.name()), self.beta),
            (
                format!("{}/kl_div", self.name()),
                dist_params.kl_to_prior().mean().unwrap_or(0.0),
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use tdkit_core::{ActionSpace, Observation, RandomPolicy};

    #[test]
    fn test_entropy_regularizer_on_uniform_policy() {
        let pi = RandomPolicy::new(ActionSpace::discrete(4));
        let reg = EntropyRegularizer::new(pi, 0.1);
        let dp = reg.policy().dist_params(&Observation::Discrete(0)).unwrap();

        assert_relative_eq!(reg.function(&dp)[0], -0.1 * 4.0_f64.ln(), epsilon = 1e-12);
        let metrics = reg.metrics(&dp);
        assert_relative_eq!(metrics["EntropyRegularizer/entropy"], 4.0_f64.ln(), epsilon = 1e-12);
        assert_relative_eq!(reg.hyperparams()["beta"], 0.1);

        // entropy is maximal, so its gradient vanishes
        let DistParams::Categorical { logits } = reg.grad(&dp) else {
            panic!("expected categorical gradient");
        };
        assert!(logits.iter().all(|g| g.abs() < 1e-12));
    }

    #[test]
    fn test_kl_regularizer_penalises_peaked_policy() {
        let reg = KLDivRegularizer::new(RandomPolicy::new(ActionSpace::discrete(2)), 2.0);
        let dp = DistParams::Categorical {
            logits: array![[3.0, 0.0]],
        };
        let penalty = reg.function(&dp)[0];
        assert!(penalty > 0.0);
        let DistParams::Categorical { logits: grad } = reg.grad(&dp) else {
            panic!("expected categorical gradient");
        };
        // moving probability mass back towards uniform lowers the penalty
        assert!(grad[[0, 0]] > 0.0);
        assert!(grad[[0, 1]] < 0.0);
    }
}
