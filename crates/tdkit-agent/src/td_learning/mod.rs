//! Temporal-difference learning updaters
//!
//! Every updater regresses a value model towards the bootstrapped target
//!
//! ```text
//! G = f(R_n + I_n · f⁻¹(next value))
//! ```
//!
//! where `f` is the model's value transform and the next value is the
//! updater-specific estimate at `S_next` (see the individual types). With a
//! policy regularizer the target is shifted by `−function(π(·|S))`, so an
//! entropy regularizer adds `β·H[π]`.

mod q_learning;
mod sarsa;
mod simple_td;

pub use q_learning::{DoubleQLearning, QLearning, SoftQLearning};
pub use sarsa::{ExpectedSarsa, Sarsa};
pub use simple_td::SimpleTD;

use ndarray::Array1;
use tdkit_core::nn::MlpGrads;
use tdkit_core::{
    Metrics, Optimizer, OptimizerConfig, RLError, Result, Shared, TransitionBatch, ValueModel,
};
use tracing::{debug, warn};

use crate::regularizers::Regularizer;
use crate::value_losses::ValueLoss;

/// State shared by all TD updaters
pub struct TdCore<M> {
    model: Shared<M>,
    target: Shared<M>,
    loss: ValueLoss,
    optimizer: Box<dyn Optimizer>,
    regularizer: Option<Box<dyn Regularizer>>,
}

impl<M: ValueModel> TdCore<M> {
    /// Core with the model as its own target, Huber loss and Adam(1e-3)
    pub fn new(model: Shared<M>) -> Self {
        Self {
            target: model.clone(),
            model,
            loss: ValueLoss::default(),
            optimizer: OptimizerConfig::default().build(),
            regularizer: None,
        }
    }

    /// Model being updated
    pub fn model(&self) -> &Shared<M> {
        &self.model
    }

    /// Model used to build targets
    pub fn target_model(&self) -> &Shared<M> {
        &self.target
    }

    /// Loss function
    pub fn loss(&self) -> ValueLoss {
        self.loss
    }

    /// Optimizer
    pub fn optimizer(&self) -> &dyn Optimizer {
        self.optimizer.as_ref()
    }

    /// Optimizer, e.g. to follow a learning-rate schedule
    pub fn optimizer_mut(&mut self) -> &mut dyn Optimizer {
        self.optimizer.as_mut()
    }

    /// Policy regularizer, if any
    pub fn regularizer(&self) -> Option<&dyn Regularizer> {
        self.regularizer.as_deref()
    }
}

/// A TD-learning updater
pub trait TdLearning: Send + Sync {
    /// Value model type (V or Q)
    type Model: ValueModel;

    /// Prefix for metric names
    fn name(&self) -> &'static str;

    /// Shared updater state
    fn core(&self) -> &TdCore<Self::Model>;

    /// Shared updater state
    fn core_mut(&mut self) -> &mut TdCore<Self::Model>;

    /// Reward-scale estimate of the value at `S_next` for every transition
    fn next_values(&self, batch: &TransitionBatch) -> Result<Array1<f64>>;

    /// Use a separate target model
    fn with_target(mut self, target: Shared<Self::Model>) -> Result<Self>
    where
        Self: Sized,
    {
        if !self.core().model.read().mlp().same_shape(target.read().mlp()) {
            return Err(RLError::InvalidConfig(
                "target model must share the architecture of the main model".to_string(),
            ));
        }
        self.core_mut().target = target;
        Ok(self)
    }

    /// Use a different loss function
    fn with_loss(mut self, loss: ValueLoss) -> Self
    where
        Self: Sized,
    {
        self.core_mut().loss = loss;
        self
    }

    /// Use a different optimizer
    fn with_optimizer(mut self, optimizer: Box<dyn Optimizer>) -> Self
    where
        Self: Sized,
    {
        self.core_mut().optimizer = optimizer;
        self
    }

    /// Add a policy regularizer to the target
    fn with_regularizer(mut self, regularizer: Box<dyn Regularizer>) -> Self
    where
        Self: Sized,
    {
        self.core_mut().regularizer = Some(regularizer);
        self
    }

    /// Bootstrapped targets, in the model's transformed space
    fn target(&self, batch: &TransitionBatch) -> Result<Array1<f64>> {
        let next = self.next_values(batch)?;
        let f = self.core().model.read().value_transform();
        let mut g = f.transform_array(&(&batch.r_n + &(&batch.i_n * &next)));
        if let Some(reg) = self.core().regularizer() {
            let dist_params = reg.policy().dist_params_batch(&batch.s)?;
            g -= &reg.function(&dist_params);
        }
        Ok(g)
    }

    /// Reward-scale TD errors `f⁻¹(G) − f⁻¹(prediction)`
    fn td_error(&self, batch: &TransitionBatch) -> Result<Array1<f64>> {
        let g = self.target(batch)?;
        let model = self.core().model.read();
        let f = model.value_transform();
        let prediction = model.predict(&batch.s, &batch.a)?;
        Ok(f.inverse_array(&g) - f.inverse_array(&prediction))
    }

    /// Gradients, metrics and TD errors without touching the parameters
    fn grads_and_metrics(&self, batch: &TransitionBatch) -> Result<(MlpGrads, Metrics, Array1<f64>)> {
        batch.validate()?;
        let core = self.core();
        let g = self.target(batch)?;

        let model = core.model.read();
        let (prediction, cache) = model.predict_cached(&batch.s, &batch.a)?;
        let loss = core.loss.loss(&g, &prediction, &batch.w)?;
        let grad = core.loss.grad(&g, &prediction, &batch.w)?;
        let grads = model.backward(&cache, &grad)?;
        let f = model.value_transform();
        let td_error = f.inverse_array(&g) - f.inverse_array(&prediction);
        drop(model);

        if !loss.is_finite() {
            warn!(updater = self.name(), loss, "non-finite TD loss");
        }

        let name = self.name();
        let mut metrics = Metrics::from([
            (format!("{name}/loss"), loss),
            (format!("{name}/td_error"), td_error.mean().unwrap_or(0.0)),
            (format!("{name}/grads_max"), grads.max_abs()),
            (format!("{name}/grads_norm"), grads.l2_norm()),
        ]);
        if let Some(reg) = core.regularizer() {
            let dist_params = reg.policy().dist_params_batch(&batch.s)?;
            metrics.extend(reg.metrics(&dist_params));
        }
        Ok((grads, metrics, td_error))
    }

    /// Feed gradients to the optimizer; returns whether parameters changed
    fn apply_grads(&mut self, grads: &MlpGrads) -> bool {
        let core = self.core_mut();
        match core.optimizer.update(grads) {
            Some(updates) => {
                core.model.write().apply_updates(&updates);
                true
            }
            None => false,
        }
    }

    /// One gradient step on `batch`
    fn update(&mut self, batch: &TransitionBatch) -> Result<Metrics> {
        Ok(self.update_with_td_error(batch)?.0)
    }

    /// One gradient step, also returning the TD errors (e.g. for replay priorities)
    fn update_with_td_error(&mut self, batch: &TransitionBatch) -> Result<(Metrics, Array1<f64>)> {
        let (grads, metrics, td_error) = self.grads_and_metrics(batch)?;
        let applied = self.apply_grads(&grads);
        debug!(updater = self.name(), applied, batch_size = batch.batch_size(), "TD update");
        Ok((metrics, td_error))
    }

    /// Polyak-average the target model towards the main model
    ///
    /// No-op when the target is the main model itself.
    fn sync_target(&self, tau: f64) {
        let core = self.core();
        if core.model.ptr_eq(&core.target) {
            return;
        }
        let model = core.model.read();
        core.target.write().soft_update(&model, tau);
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tdkit_core::{
        Action, ActionSpace, MlpConfig, Observation, ObservationSpace, Shared, Transition,
        TransitionBatch, ValueTransform, Q, V,
    };

    pub fn q_model(n_states: usize, n_actions: usize) -> Shared<Q> {
        q_model_with(n_states, n_actions, ValueTransform::Identity)
    }

    pub fn q_model_with(n_states: usize, n_actions: usize, f: ValueTransform) -> Shared<Q> {
        let mut rng = StdRng::seed_from_u64(0);
        Shared::new(
            Q::new(
                ObservationSpace::discrete(n_states),
                ActionSpace::discrete(n_actions),
                &MlpConfig::linear(),
                f,
                &mut rng,
            )
            .unwrap(),
        )
    }

    pub fn v_model(n_states: usize) -> Shared<V> {
        v_model_with(n_states, ValueTransform::Identity)
    }

    pub fn v_model_with(n_states: usize, f: ValueTransform) -> Shared<V> {
        let mut rng = StdRng::seed_from_u64(0);
        Shared::new(
            V::new(ObservationSpace::discrete(n_states), &MlpConfig::linear(), f, &mut rng).unwrap(),
        )
    }

    pub fn transition(s: usize, a: usize, r: f64, done: bool, s_next: usize, a_next: usize) -> TransitionBatch {
        TransitionBatch::from_single(
            Transition::new(
                Observation::Discrete(s),
                Action::Discrete(a),
                r,
                done,
                Observation::Discrete(s_next),
                Action::Discrete(a_next),
            ),
            0.9,
            0,
        )
    }
}
