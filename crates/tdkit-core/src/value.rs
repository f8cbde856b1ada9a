//! Value functions: state values V(s) and action values Q(s, a)
//!
//! Both models predict in the space of their [`ValueTransform`]; the public
//! `value*` accessors map back to reward scale.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::{Array1, Array2};
use rand::RngCore;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::warn;

use crate::error::ensure_len;
use crate::nn::{Mlp, MlpCache, MlpConfig, MlpGrads};
use crate::proba_dist::argmax;
use crate::{Action, ActionSpace, Observation, ObservationSpace, RLError, Result, ValueTransform};

/// Backprop state of a [`ValueModel`] prediction
#[derive(Debug, Clone)]
pub struct ValueCache {
    mlp: MlpCache,
    actions: Option<Vec<usize>>,
    n_outputs: usize,
}

/// Common interface of V and Q as seen by TD-learning updaters
pub trait ValueModel: Send + Sync {
    /// Transform the model predicts in
    fn value_transform(&self) -> ValueTransform;

    /// Backbone parameters
    fn mlp(&self) -> &Mlp;

    /// Transformed-space predictions at `(s, a)`, plus what backprop needs
    ///
    /// State-value models ignore the actions.
    fn predict_cached(&self, s: &[Observation], a: &[Action]) -> Result<(Array1<f64>, ValueCache)>;

    /// Transformed-space predictions at `(s, a)`
    fn predict(&self, s: &[Observation], a: &[Action]) -> Result<Array1<f64>> {
        Ok(self.predict_cached(s, a)?.0)
    }

    /// Parameter gradients given `dL/d(prediction)`
    fn backward(&self, cache: &ValueCache, grad: &Array1<f64>) -> Result<MlpGrads> {
        let batch = grad.len();
        let mut grad_out = Array2::zeros((batch, cache.n_outputs));
        match &cache.actions {
            Some(actions) => {
                ensure_len(batch, actions.len())?;
                for (i, &a) in actions.iter().enumerate() {
                    grad_out[[i, a]] = grad[i];
                }
            }
            None => grad_out.column_mut(0).assign(grad),
        }
        Ok(self.mlp().backward(&cache.mlp, &grad_out))
    }

    /// Add optimizer updates to the parameters
    fn apply_updates(&mut self, updates: &MlpGrads);

    /// Polyak-average towards `other`
    fn soft_update(&mut self, other: &Self, tau: f64)
    where
        Self: Sized;
}

/// State value function V(s)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct V {
    observation_space: ObservationSpace,
    mlp: Mlp,
    value_transform: ValueTransform,
}

impl V {
    /// Create a new state value function
    ///
    /// Fails with [`RLError::InvalidConfig`] for an empty observation space or
    /// a non-invertible value transform.
    pub fn new(
        observation_space: ObservationSpace,
        config: &MlpConfig,
        value_transform: ValueTransform,
        rng: &mut dyn RngCore,
    ) -> Result<Self> {
        observation_space.validate()?;
        value_transform.validate()?;
        let mlp = Mlp::new(observation_space.feature_dim(), 1, config, rng);
        Ok(Self {
            observation_space,
            mlp,
            value_transform,
        })
    }

    /// Observation space the model was built for
    #[must_use]
    pub fn observation_space(&self) -> &ObservationSpace {
        &self.observation_space
    }

    /// V(s) in reward scale
    pub fn value(&self, s: &Observation) -> Result<f64> {
        Ok(self.values(std::slice::from_ref(s))?[0])
    }

    /// V(s) for a batch of states, in reward scale
    pub fn values(&self, s: &[Observation]) -> Result<Array1<f64>> {
        Ok(self.value_transform.inverse_array(&self.predict_states(s)?))
    }

    /// Transformed-space predictions for a batch of states
    pub fn predict_states(&self, s: &[Observation]) -> Result<Array1<f64>> {
        let x = self.observation_space.preprocess_batch(s)?;
        Ok(self.mlp.forward(&x).column(0).to_owned())
    }

    /// Save parameters as JSON
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        save_json(self, path)
    }

    /// Load parameters saved by [`Self::save_json`]
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        load_json(path, |v: &Self| {
            v.observation_space.validate()?;
            v.value_transform.validate()?;
            v.mlp.check_dims(v.observation_space.feature_dim(), 1)
        })
    }
}

impl ValueModel for V {
    fn value_transform(&self) -> ValueTransform {
        self.value_transform
    }

    fn mlp(&self) -> &Mlp {
        &self.mlp
    }

    fn predict_cached(&self, s: &[Observation], _a: &[Action]) -> Result<(Array1<f64>, ValueCache)> {
        let x = self.observation_space.preprocess_batch(s)?;
        let (out, mlp) = self.mlp.forward_cached(&x);
        Ok((
            out.column(0).to_owned(),
            ValueCache {
                mlp,
                actions: None,
                n_outputs: 1,
            },
        ))
    }

    fn apply_updates(&mut self, updates: &MlpGrads) {
        self.mlp.apply_updates(updates);
    }

    fn soft_update(&mut self, other: &Self, tau: f64) {
        self.mlp.soft_update(&other.mlp, tau);
    }
}

/// Action value function Q(s, ·) for discrete action spaces
///
/// The model maps a state to one output per action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Q {
    observation_space: ObservationSpace,
    action_space: ActionSpace,
    mlp: Mlp,
    value_transform: ValueTransform,
}

impl Q {
    /// Create a new action value function
    ///
    /// Fails with [`RLError::InvalidConfig`] for box or empty action spaces,
    /// an empty observation space or a non-invertible value transform.
    pub fn new(
        observation_space: ObservationSpace,
        action_space: ActionSpace,
        config: &MlpConfig,
        value_transform: ValueTransform,
        rng: &mut dyn RngCore,
    ) -> Result<Self> {
        let n = discrete_actions(&action_space)?;
        observation_space.validate()?;
        value_transform.validate()?;
        let mlp = Mlp::new(observation_space.feature_dim(), n, config, rng);
        Ok(Self {
            observation_space,
            action_space,
            mlp,
            value_transform,
        })
    }

    /// Observation space the model was built for
    #[must_use]
    pub fn observation_space(&self) -> &ObservationSpace {
        &self.observation_space
    }

    /// Action space the model was built for
    #[must_use]
    pub fn action_space(&self) -> &ActionSpace {
        &self.action_space
    }

    /// Number of discrete actions
    #[must_use]
    pub fn n_actions(&self) -> usize {
        self.mlp.output_dim()
    }

    /// Q(s, ·) in reward scale
    pub fn values(&self, s: &Observation) -> Result<Array1<f64>> {
        Ok(self.values_batch(std::slice::from_ref(s))?.row(0).to_owned())
    }

    /// Q(s, a) in reward scale
    pub fn value(&self, s: &Observation, a: &Action) -> Result<f64> {
        let a = self.check_action(a)?;
        Ok(self.values(s)?[a])
    }

    /// Q(s, ·) for a batch of states, shaped `(batch, n_actions)`, in reward scale
    pub fn values_batch(&self, s: &[Observation]) -> Result<Array2<f64>> {
        let f = self.value_transform;
        Ok(self.predict_all(s)?.mapv(|y| f.inverse(y)))
    }

    /// Transformed-space predictions for every action
    pub fn predict_all(&self, s: &[Observation]) -> Result<Array2<f64>> {
        let x = self.observation_space.preprocess_batch(s)?;
        Ok(self.mlp.forward(&x))
    }

    /// `argmax_a Q(s, a)`
    pub fn greedy(&self, s: &Observation) -> Result<usize> {
        Ok(argmax(self.values(s)?.iter()))
    }

    /// Save parameters as JSON
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        save_json(self, path)
    }

    /// Load parameters saved by [`Self::save_json`]
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        load_json(path, |q: &Self| {
            let n = discrete_actions(&q.action_space)?;
            q.observation_space.validate()?;
            q.value_transform.validate()?;
            q.mlp.check_dims(q.observation_space.feature_dim(), n)
        })
    }

    fn check_action(&self, a: &Action) -> Result<usize> {
        let index = a.as_discrete()?;
        if index < self.n_actions() {
            Ok(index)
        } else {
            Err(RLError::InvalidAction(format!(
                "action {index} outside of Discrete({})",
                self.n_actions()
            )))
        }
    }
}

impl ValueModel for Q {
    fn value_transform(&self) -> ValueTransform {
        self.value_transform
    }

    fn mlp(&self) -> &Mlp {
        &self.mlp
    }

    fn predict_cached(&self, s: &[Observation], a: &[Action]) -> Result<(Array1<f64>, ValueCache)> {
        ensure_len(s.len(), a.len())?;
        let actions = a
            .iter()
            .map(|a| self.check_action(a))
            .collect::<Result<Vec<_>>>()?;
        let x = self.observation_space.preprocess_batch(s)?;
        let (out, mlp) = self.mlp.forward_cached(&x);
        let predictions = actions
            .iter()
            .enumerate()
            .map(|(i, &a)| out[[i, a]])
            .collect();
        Ok((
            predictions,
            ValueCache {
                mlp,
                actions: Some(actions),
                n_outputs: self.n_actions(),
            },
        ))
    }

    fn apply_updates(&mut self, updates: &MlpGrads) {
        self.mlp.apply_updates(updates);
    }

    fn soft_update(&mut self, other: &Self, tau: f64) {
        self.mlp.soft_update(&other.mlp, tau);
    }
}

pub(crate) fn save_json<T: Serialize>(model: &T, path: impl AsRef<Path>) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(writer, model)?;
    Ok(())
}

fn discrete_actions(action_space: &ActionSpace) -> Result<usize> {
    let n = action_space.n().ok_or_else(|| {
        RLError::InvalidConfig("Q requires a discrete action space".to_string())
    })?;
    action_space.validate()?;
    Ok(n)
}

/// Deserialise a model and run `check` on it before handing it out
pub(crate) fn load_json<T: DeserializeOwned>(
    path: impl AsRef<Path>,
    check: impl FnOnce(&T) -> Result<()>,
) -> Result<T> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let model: T = serde_json::from_reader(reader)?;
    if let Err(e) = check(&model) {
        warn!(path = %path.display(), error = %e, "rejecting malformed model file");
        return Err(e);
    }
    Ok(model)
}
