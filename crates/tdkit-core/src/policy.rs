//! Stochastic policies π(a|s)
//!
//! [`Policy`] is the learnable one. [`BoltzmannPolicy`] and [`EpsilonGreedy`]
//! are derived from a shared [`Q`] and follow its parameters as they train.

use std::path::Path;

use ndarray::{Array1, Array2};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::nn::{Mlp, MlpCache, MlpConfig, MlpGrads};
use crate::proba_dist::argmax;
use crate::value::{load_json, save_json};
use crate::{
    Action, ActionSpace, DistParams, Observation, ObservationSpace, ProbaDist, RLError, Result,
    Shared, Q,
};

/// Policy that can be queried for a distribution over actions
pub trait StochasticPolicy: Send + Sync {
    /// Action space of the policy
    fn action_space(&self) -> ActionSpace;

    /// Distribution family of the policy
    fn proba_dist(&self) -> ProbaDist;

    /// Distribution parameters for a batch of states
    fn dist_params_batch(&self, s: &[Observation]) -> Result<DistParams>;

    /// Distribution parameters for a single state (batch of one)
    fn dist_params(&self, s: &Observation) -> Result<DistParams> {
        self.dist_params_batch(std::slice::from_ref(s))
    }

    /// Sample an action
    fn sample(&self, s: &Observation, rng: &mut dyn RngCore) -> Result<Action> {
        Ok(self.sample_with_logp(s, rng)?.0)
    }

    /// Sample an action along with its log-propensity
    ///
    /// Continuous actions are clipped into the action space after the
    /// log-propensity has been computed.
    fn sample_with_logp(&self, s: &Observation, rng: &mut dyn RngCore) -> Result<(Action, f64)> {
        let params = self.dist_params(s)?;
        let a = params.sample(0, rng)?;
        let logp = params.log_prob(std::slice::from_ref(&a))?[0];
        Ok((self.action_space().clip(a), logp))
    }

    /// Most likely action
    fn mode(&self, s: &Observation) -> Result<Action> {
        let a = self.dist_params(s)?.mode(0)?;
        Ok(self.action_space().clip(a))
    }

    /// `log π(a|s)` for a batch
    fn log_prob(&self, s: &[Observation], a: &[Action]) -> Result<Array1<f64>> {
        self.dist_params_batch(s)?.log_prob(a)
    }
}

impl<P: StochasticPolicy> StochasticPolicy for Shared<P> {
    fn action_space(&self) -> ActionSpace {
        self.read().action_space()
    }

    fn proba_dist(&self) -> ProbaDist {
        self.read().proba_dist()
    }

    fn dist_params_batch(&self, s: &[Observation]) -> Result<DistParams> {
        self.read().dist_params_batch(s)
    }
}

/// Backprop state of a [`Policy`] forward pass
pub type PolicyCache = MlpCache;

/// Learnable policy
///
/// Categorical over discrete action spaces, diagonal Gaussian over box
/// action spaces. With a zero-initialised output layer it starts out
/// uniform (respectively standard normal).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    observation_space: ObservationSpace,
    action_space: ActionSpace,
    proba_dist: ProbaDist,
    mlp: Mlp,
}

impl Policy {
    /// Create a new policy
    pub fn new(
        observation_space: ObservationSpace,
        action_space: ActionSpace,
        config: &MlpConfig,
        rng: &mut dyn RngCore,
    ) -> Result<Self> {
        observation_space.validate()?;
        action_space.validate()?;
        let proba_dist = ProbaDist::for_action_space(&action_space);
        let mlp = Mlp::new(
            observation_space.feature_dim(),
            proba_dist.param_dim(),
            config,
            rng,
        );
        Ok(Self {
            observation_space,
            action_space,
            proba_dist,
            mlp,
        })
    }

    /// Observation space the policy was built for
    #[must_use]
    pub fn observation_space(&self) -> &ObservationSpace {
        &self.observation_space
    }

    /// Backbone parameters
    #[must_use]
    pub fn mlp(&self) -> &Mlp {
        &self.mlp
    }

    /// Distribution parameters plus what [`Self::backward`] needs
    pub fn forward_cached(&self, s: &[Observation]) -> Result<(DistParams, PolicyCache)> {
        let x = self.observation_space.preprocess_batch(s)?;
        let (raw, cache) = self.mlp.forward_cached(&x);
        Ok((self.proba_dist.from_raw(raw)?, cache))
    }

    /// Parameter gradients given `dL/d(dist_params)`
    pub fn backward(&self, cache: &PolicyCache, grad: &DistParams) -> Result<MlpGrads> {
        let grad_raw = self.proba_dist.to_raw(grad)?;
        Ok(self.mlp.backward(cache, &grad_raw))
    }

    /// Add optimizer updates to the parameters
    pub fn apply_updates(&mut self, updates: &MlpGrads) {
        self.mlp.apply_updates(updates);
    }

    /// Polyak-average towards `other`
    pub fn soft_update(&mut self, other: &Policy, tau: f64) {
        self.mlp.soft_update(&other.mlp, tau);
    }

    /// Save parameters as JSON
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        save_json(self, path)
    }

    /// Load parameters saved by [`Self::save_json`]
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        load_json(path, |pi: &Self| {
            pi.observation_space.validate()?;
            pi.action_space.validate()?;
            if pi.proba_dist != ProbaDist::for_action_space(&pi.action_space) {
                return Err(RLError::InvalidConfig(format!(
                    "{:?} does not fit the saved action space",
                    pi.proba_dist
                )));
            }
            pi.mlp
                .check_dims(pi.observation_space.feature_dim(), pi.proba_dist.param_dim())
        })
    }
}

impl StochasticPolicy for Policy {
    fn action_space(&self) -> ActionSpace {
        self.action_space.clone()
    }

    fn proba_dist(&self) -> ProbaDist {
        self.proba_dist
    }

    fn dist_params_batch(&self, s: &[Observation]) -> Result<DistParams> {
        Ok(self.forward_cached(s)?.0)
    }
}

/// Softmax over `Q(s, ·) / temperature`
#[derive(Debug, Clone)]
pub struct BoltzmannPolicy {
    q: Shared<Q>,
    temperature: f64,
}

impl BoltzmannPolicy {
    /// Derive a Boltzmann policy from a shared Q-function
    pub fn new(q: Shared<Q>, temperature: f64) -> Result<Self> {
        if temperature <= 0.0 {
            return Err(RLError::InvalidConfig(format!(
                "temperature must be positive, got {temperature}"
            )));
        }
        Ok(Self { q, temperature })
    }

    /// Current temperature
    #[must_use]
    pub fn temperature(&self) -> f64 {
        self.temperature
    }
}

impl StochasticPolicy for BoltzmannPolicy {
    fn action_space(&self) -> ActionSpace {
        self.q.read().action_space().clone()
    }

    fn proba_dist(&self) -> ProbaDist {
        ProbaDist::Categorical {
            n: self.q.read().n_actions(),
        }
    }

    fn dist_params_batch(&self, s: &[Observation]) -> Result<DistParams> {
        let values = self.q.read().values_batch(s)?;
        Ok(DistParams::Categorical {
            logits: values / self.temperature,
        })
    }
}

/// ε-greedy policy over a shared Q-function
#[derive(Debug, Clone)]
pub struct EpsilonGreedy {
    q: Shared<Q>,
    epsilon: f64,
}

impl EpsilonGreedy {
    /// Derive an ε-greedy policy from a shared Q-function
    pub fn new(q: Shared<Q>, epsilon: f64) -> Result<Self> {
        check_epsilon(epsilon)?;
        Ok(Self { q, epsilon })
    }

    /// Current exploration rate
    #[must_use]
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Change the exploration rate, e.g. from a schedule
    pub fn set_epsilon(&mut self, epsilon: f64) -> Result<()> {
        check_epsilon(epsilon)?;
        self.epsilon = epsilon;
        Ok(())
    }
}

fn check_epsilon(epsilon: f64) -> Result<()> {
    if (0.0..=1.0).contains(&epsilon) {
        Ok(())
    } else {
        Err(RLError::InvalidConfig(format!(
            "epsilon must lie in [0, 1], got {epsilon}"
        )))
    }
}

impl StochasticPolicy for EpsilonGreedy {
    fn action_space(&self) -> ActionSpace {
        self.q.read().action_space().clone()
    }

    fn proba_dist(&self) -> ProbaDist {
        ProbaDist::Categorical {
            n: self.q.read().n_actions(),
        }
    }

    fn dist_params_batch(&self, s: &[Observation]) -> Result<DistParams> {
        let values = self.q.read().values_batch(s)?;
        let n = values.ncols();
        let explore = self.epsilon / n as f64;
        let mut logits = Array2::from_elem(values.raw_dim(), explore);
        for (mut row, q_row) in logits.rows_mut().into_iter().zip(values.rows()) {
            row[argmax(q_row.iter())] += 1.0 - self.epsilon;
            // probabilities as logits; zero probability maps to a large negative logit
            row.mapv_inplace(|p| p.max(1e-15).ln());
        }
        Ok(DistParams::Categorical { logits })
    }
}

/// Uniformly random policy (standard normal over box spaces)
#[derive(Debug, Clone)]
pub struct RandomPolicy {
    action_space: ActionSpace,
}

impl RandomPolicy {
    /// Create a random policy over `action_space`
    #[must_use]
    pub fn new(action_space: ActionSpace) -> Self {
        Self { action_space }
    }
}

impl StochasticPolicy for RandomPolicy {
    fn action_space(&self) -> ActionSpace {
        self.action_space.clone()
    }

    fn proba_dist(&self) -> ProbaDist {
        ProbaDist::for_action_space(&self.action_space)
    }

    fn dist_params_batch(&self, s: &[Observation]) -> Result<DistParams> {
        let batch = s.len();
        Ok(match self.proba_dist() {
            ProbaDist::Categorical { n } => DistParams::Categorical {
                logits: Array2::zeros((batch, n)),
            },
            ProbaDist::Normal { dim } => DistParams::Normal {
                mu: Array2::zeros((batch, dim)),
                logvar: Array2::zeros((batch, dim)),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueModel;
    use crate::ValueTransform;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn shared_q(rng: &mut StdRng) -> Shared<Q> {
        Shared::new(
            Q::new(
                ObservationSpace::discrete(2),
                ActionSpace::discrete(3),
                &MlpConfig::linear(),
                ValueTransform::Identity,
                rng,
            )
            .unwrap(),
        )
    }

    fn bump(q: &Shared<Q>, s: usize, a: usize) {
        let mut model = q.write();
        let (_, cache) = model
            .predict_cached(&[Observation::Discrete(s)], &[Action::Discrete(a)])
            .unwrap();
        let grads = model.backward(&cache, &Array1::from_elem(1, 1.0)).unwrap();
        model.apply_updates(&grads);
    }

    #[test]
    fn test_epsilon_greedy_probabilities() {
        let mut rng = StdRng::seed_from_u64(0);
        let q = shared_q(&mut rng);
        bump(&q, 0, 2);

        let pi = EpsilonGreedy::new(q, 0.3).unwrap();
        let probs = pi.dist_params(&Observation::Discrete(0)).unwrap().probs().unwrap();
        assert_relative_eq!(probs[[0, 0]], 0.1, epsilon = 1e-9);
        assert_relative_eq!(probs[[0, 2]], 0.8, epsilon = 1e-9);
        assert_eq!(pi.mode(&Observation::Discrete(0)).unwrap(), Action::Discrete(2));
    }

    #[test]
    fn test_greedy_never_explores() {
        let mut rng = StdRng::seed_from_u64(1);
        let q = shared_q(&mut rng);
        bump(&q, 1, 1);
        let mut pi = EpsilonGreedy::new(q, 0.5).unwrap();
        pi.set_epsilon(0.0).unwrap();
        assert!(pi.set_epsilon(1.5).is_err());
        for _ in 0..20 {
            let (a, logp) = pi.sample_with_logp(&Observation::Discrete(1), &mut rng).unwrap();
            assert_eq!(a, Action::Discrete(1));
            assert_relative_eq!(logp, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_boltzmann_follows_shared_q() {
        let mut rng = StdRng::seed_from_u64(2);
        let q = shared_q(&mut rng);
        let pi = BoltzmannPolicy::new(q.clone(), 0.5).unwrap();
        let before = pi.dist_params(&Observation::Discrete(0)).unwrap().probs().unwrap();
        assert_relative_eq!(before[[0, 1]], 1.0 / 3.0, epsilon = 1e-12);

        bump(&q, 0, 1);
        let after = pi.dist_params(&Observation::Discrete(0)).unwrap().probs().unwrap();
        assert!(after[[0, 1]] > before[[0, 1]]);
        assert!(BoltzmannPolicy::new(q, 0.0).is_err());
    }

    #[test]
    fn test_gaussian_policy_clips_samples() {
        let mut rng = StdRng::seed_from_u64(3);
        let space = ActionSpace::box_space(vec![-0.1], vec![0.1]).unwrap();
        let pi = Policy::new(ObservationSpace::discrete(2), space.clone(), &MlpConfig::linear(), &mut rng)
            .unwrap();
        assert_eq!(pi.proba_dist(), ProbaDist::Normal { dim: 1 });
        for _ in 0..20 {
            let a = pi.sample(&Observation::Discrete(0), &mut rng).unwrap();
            assert!(space.contains(&a));
        }
    }

    #[test]
    fn test_random_policy_is_uniform() {
        let pi = RandomPolicy::new(ActionSpace::discrete(4));
        let logp = pi
            .log_prob(&[Observation::Discrete(0)], &[Action::Discrete(3)])
            .unwrap();
        assert_relative_eq!(logp[0], 0.25_f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_policy_load_checks_head_size() {
        let mut rng = StdRng::seed_from_u64(0);
        let pi = Policy::new(
            ObservationSpace::discrete(2),
            ActionSpace::discrete(3),
            &MlpConfig::linear(),
            &mut rng,
        )
        .unwrap();
        let mut value = serde_json::to_value(&pi).unwrap();
        value["action_space"] = serde_json::json!({ "Discrete": { "n": 4 } });
        value["proba_dist"] = serde_json::to_value(ProbaDist::Categorical { n: 4 }).unwrap();
        let path = std::env::temp_dir().join(format!("tdkit-pi-head-{}.json", std::process::id()));
        std::fs::write(&path, value.to_string()).unwrap();
        let loaded = Policy::load_json(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(loaded, Err(RLError::InvalidConfig(_))));

        assert!(Policy::new(
            ObservationSpace::discrete(2),
            ActionSpace::discrete(0),
            &MlpConfig::linear(),
            &mut rng
        )
        .is_err());
    }
}
