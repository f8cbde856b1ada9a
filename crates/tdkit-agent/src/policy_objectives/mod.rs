//! Policy-gradient objectives
//!
//! An objective scores the log-propensities of the actions in a transition
//! batch against externally supplied advantages (typically TD errors from a
//! value updater, or Monte-Carlo returns) and ascends that score.

mod ppo_clip;
mod vanilla_pg;

pub use ppo_clip::PPOClip;
pub use vanilla_pg::VanillaPG;

use ndarray::Array1;
use tdkit_core::error::ensure_len;
use tdkit_core::nn::MlpGrads;
use tdkit_core::{DistParams, Metrics, Optimizer, OptimizerConfig, Policy, Result, Shared, TransitionBatch};
use tracing::{debug, warn};

use crate::regularizers::Regularizer;

/// State shared by all policy objectives
pub struct PolicyCore {
    pi: Shared<Policy>,
    optimizer: Box<dyn Optimizer>,
    regularizer: Option<Box<dyn Regularizer>>,
}

impl PolicyCore {
    /// Core with Adam(1e-3) and no regularizer
    pub fn new(pi: Shared<Policy>) -> Self {
        Self {
            pi,
            optimizer: OptimizerConfig::default().build(),
            regularizer: None,
        }
    }

    /// Policy being updated
    pub fn policy(&self) -> &Shared<Policy> {
        &self.pi
    }

    /// Optimizer, e.g. to follow a learning-rate schedule
    pub fn optimizer_mut(&mut self) -> &mut dyn Optimizer {
        self.optimizer.as_mut()
    }
}

/// Objective evaluated on a batch, with its gradient
#[derive(Debug, Clone)]
pub struct ObjectiveValue {
    /// Batch objective (to be maximised)
    pub objective: f64,
    /// `∂ objective / ∂ dist_params`
    pub grad: DistParams,
    /// Extra diagnostics
    pub metrics: Metrics,
}

/// A policy-gradient objective
pub trait PolicyObjective: Send + Sync {
    /// Prefix for metric names
    fn name(&self) -> &'static str;

    /// Shared objective state
    fn core(&self) -> &PolicyCore;

    /// Shared objective state
    fn core_mut(&mut self) -> &mut PolicyCore;

    /// Objective value and gradient for the current distribution parameters
    fn objective(
        &self,
        dist_params: &DistParams,
        batch: &TransitionBatch,
        adv: &Array1<f64>,
    ) -> Result<ObjectiveValue>;

    /// Use a different optimizer
    fn with_optimizer(mut self, optimizer: Box<dyn Optimizer>) -> Self
    where
        Self: Sized,
    {
        self.core_mut().optimizer = optimizer;
        self
    }

    /// Add a regularizer term to the loss
    fn with_regularizer(mut self, regularizer: Box<dyn Regularizer>) -> Self
    where
        Self: Sized,
    {
        self.core_mut().regularizer = Some(regularizer);
        self
    }

    /// Gradients of the loss (negated objective plus regularizer) and metrics
    fn grads_and_metrics(&self, batch: &TransitionBatch, adv: &Array1<f64>) -> Result<(MlpGrads, Metrics)> {
        batch.validate()?;
        ensure_len(batch.batch_size(), adv.len())?;
        let core = self.core();
        let pi = core.pi.read();
        let (dist_params, cache) = pi.forward_cached(&batch.s)?;

        let value = self.objective(&dist_params, batch, adv)?;
        let mut loss = -value.objective;
        let mut grad = value.grad;
        grad.scale_rows(&Array1::from_elem(batch.batch_size(), -1.0));

        let mut metrics = value.metrics;
        if let Some(reg) = &core.regularizer {
            let n = batch.batch_size() as f64;
            loss += reg.function(&dist_params).mean().unwrap_or(0.0);
            let mut reg_grad = reg.grad(&dist_params);
            reg_grad.scale_rows(&Array1::from_elem(batch.batch_size(), 1.0 / n));
            grad = grad.add(&reg_grad)?;
            metrics.extend(reg.metrics(&dist_params));
        }

        let grads = pi.backward(&cache, &grad)?;
        drop(pi);

        if !loss.is_finite() {
            warn!(objective = self.name(), loss, "non-finite policy loss");
        }
        let name = self.name();
        metrics.insert(format!("{name}/loss"), loss);
        metrics.insert(format!("{name}/grads_max"), grads.max_abs());
        metrics.insert(format!("{name}/grads_norm"), grads.l2_norm());
        Ok((grads, metrics))
    }

    /// Feed gradients to the optimizer; returns whether parameters changed
    fn apply_grads(&mut self, grads: &MlpGrads) -> bool {
        let core = self.core_mut();
        match core.optimizer.update(grads) {
            Some(updates) => {
                core.pi.write().apply_updates(&updates);
                true
            }
            None => false,
        }
    }

    /// One gradient step on `batch` with advantages `adv`
    fn update(&mut self, batch: &TransitionBatch, adv: &Array1<f64>) -> Result<Metrics> {
        let (grads, metrics) = self.grads_and_metrics(batch, adv)?;
        let applied = self.apply_grads(&grads);
        debug!(objective = self.name(), applied, batch_size = batch.batch_size(), "policy update");
        Ok(metrics)
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tdkit_core::{
        Action, ActionSpace, MlpConfig, Observation, ObservationSpace, Policy, Shared, Transition,
        TransitionBatch,
    };

    pub fn policy(n_states: usize, n_actions: usize) -> Shared<Policy> {
        let mut rng = StdRng::seed_from_u64(0);
        Shared::new(Policy::new(
            ObservationSpace::discrete(n_states),
            ActionSpace::discrete(n_actions),
            &MlpConfig::linear(),
            &mut rng,
        )
        .unwrap())
    }

    pub fn batch(s: usize, a: usize, logp: f64) -> TransitionBatch {
        let mut t = Transition::new(
            Observation::Discrete(s),
            Action::Discrete(a),
            0.0,
            true,
            Observation::Discrete(s),
            Action::Discrete(a),
        );
        t.logp = logp;
        TransitionBatch::from_single(t, 0.9, 0)
    }
}
