//! Observations, actions and the spaces they live in

use ndarray::{Array1, Array2};
use rand::{Rng, RngCore};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::{RLError, Result};

/// Observation emitted by an environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Observation {
    /// Index into a discrete observation space
    Discrete(usize),
    /// Real-valued feature vector
    Vector(Array1<f64>),
}

impl Observation {
    /// Build a vector observation from a slice
    #[must_use]
    pub fn vector(values: &[f64]) -> Self {
        Self::Vector(Array1::from_vec(values.to_vec()))
    }
}

impl From<usize> for Observation {
    fn from(index: usize) -> Self {
        Self::Discrete(index)
    }
}

impl From<Vec<f64>> for Observation {
    fn from(values: Vec<f64>) -> Self {
        Self::Vector(Array1::from_vec(values))
    }
}

/// Action taken in an environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    /// Index of a discrete action
    Discrete(usize),
    /// Real-valued action vector
    Continuous(Array1<f64>),
}

impl Action {
    /// Discrete action index, or an error for continuous actions
    pub fn as_discrete(&self) -> Result<usize> {
        match self {
            Self::Discrete(a) => Ok(*a),
            Self::Continuous(_) => Err(RLError::InvalidAction(
                "expected a discrete action, got a continuous one".to_string(),
            )),
        }
    }

    /// Continuous action vector, or an error for discrete actions
    pub fn as_continuous(&self) -> Result<&Array1<f64>> {
        match self {
            Self::Continuous(a) => Ok(a),
            Self::Discrete(a) => Err(RLError::InvalidAction(format!(
                "expected a continuous action, got discrete action {a}"
            ))),
        }
    }
}

impl From<usize> for Action {
    fn from(index: usize) -> Self {
        Self::Discrete(index)
    }
}

/// Space of observations, also responsible for turning them into features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObservationSpace {
    /// `n` discrete observations, one-hot encoded as features
    Discrete {
        /// Number of observations
        n: usize,
    },
    /// Bounded (or unbounded, with infinite bounds) real vectors
    Box {
        /// Lower bounds
        low: Vec<f64>,
        /// Upper bounds
        high: Vec<f64>,
    },
}

impl ObservationSpace {
    /// Create a discrete observation space
    ///
    /// `n == 0` is representable but fails [`Self::validate`].
    #[must_use]
    pub fn discrete(n: usize) -> Self {
        Self::Discrete { n }
    }

    /// Create a box observation space
    pub fn box_space(low: Vec<f64>, high: Vec<f64>) -> Result<Self> {
        check_bounds(&low, &high)?;
        Ok(Self::Box { low, high })
    }

    /// Length of the feature vector produced by [`Self::preprocess`]
    #[must_use]
    pub fn feature_dim(&self) -> usize {
        match self {
            Self::Discrete { n } => *n,
            Self::Box { low, .. } => low.len(),
        }
    }

    /// Check if an observation is valid within this space
    #[must_use]
    pub fn contains(&self, observation: &Observation) -> bool {
        match (self, observation) {
            (Self::Discrete { n }, Observation::Discrete(s)) => s < n,
            (Self::Box { low, high }, Observation::Vector(x)) => within_bounds(x, low, high),
            _ => false,
        }
    }

    /// Reject empty discrete spaces and inverted box bounds
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Discrete { n } => check_discrete(*n),
            Self::Box { low, high } => check_bounds(low, high),
        }
    }

    /// Sample a random observation from the space
    pub fn sample(&self, rng: &mut dyn RngCore) -> Result<Observation> {
        match self {
            Self::Discrete { n } => {
                check_discrete(*n)?;
                Ok(Observation::Discrete(rng.gen_range(0..*n)))
            }
            Self::Box { low, high } => Ok(Observation::Vector(sample_box(low, high, rng))),
        }
    }

    /// Map an observation to its feature vector
    pub fn preprocess(&self, observation: &Observation) -> Result<Array1<f64>> {
        match (self, observation) {
            (Self::Discrete { n }, Observation::Discrete(s)) => {
                if s >= n {
                    return Err(RLError::InvalidObservation(format!(
                        "observation {s} outside of Discrete({n})"
                    )));
                }
                let mut x = Array1::zeros(*n);
                x[*s] = 1.0;
                Ok(x)
            }
            (Self::Box { low, .. }, Observation::Vector(x)) => {
                crate::error::ensure_len(low.len(), x.len())?;
                Ok(x.clone())
            }
            (space, observation) => Err(RLError::InvalidObservation(format!(
                "{observation:?} does not belong to {space:?}"
            ))),
        }
    }

    /// Map a batch of observations to a `(batch, features)` matrix
    pub fn preprocess_batch(&self, observations: &[Observation]) -> Result<Array2<f64>> {
        let mut x = Array2::zeros((observations.len(), self.feature_dim()));
        for (mut row, observation) in x.rows_mut().into_iter().zip(observations) {
            row.assign(&self.preprocess(observation)?);
        }
        Ok(x)
    }
}

/// Space of actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionSpace {
    /// `n` discrete actions
    Discrete {
        /// Number of actions
        n: usize,
    },
    /// Bounded real vectors
    Box {
        /// Lower bounds
        low: Vec<f64>,
        /// Upper bounds
        high: Vec<f64>,
    },
}

impl ActionSpace {
    /// Create a discrete action space
    ///
    /// `n == 0` is representable but fails [`Self::validate`].
    #[must_use]
    pub fn discrete(n: usize) -> Self {
        Self::Discrete { n }
    }

    /// Create a box action space
    pub fn box_space(low: Vec<f64>, high: Vec<f64>) -> Result<Self> {
        check_bounds(&low, &high)?;
        Ok(Self::Box { low, high })
    }

    /// Whether actions are discrete
    #[must_use]
    pub fn is_discrete(&self) -> bool {
        matches!(self, Self::Discrete { .. })
    }

    /// Number of discrete actions, `None` for box spaces
    #[must_use]
    pub fn n(&self) -> Option<usize> {
        match self {
            Self::Discrete { n } => Some(*n),
            Self::Box { .. } => None,
        }
    }

    /// Dimensionality of a box space (1 for discrete spaces)
    #[must_use]
    pub fn dim(&self) -> usize {
        match self {
            Self::Discrete { .. } => 1,
            Self::Box { low, .. } => low.len(),
        }
    }

    /// Check if an action is valid within this space
    #[must_use]
    pub fn contains(&self, action: &Action) -> bool {
        match (self, action) {
            (Self::Discrete { n }, Action::Discrete(a)) => a < n,
            (Self::Box { low, high }, Action::Continuous(x)) => within_bounds(x, low, high),
            _ => false,
        }
    }

    /// Reject empty discrete spaces and inverted box bounds
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Discrete { n } => check_discrete(*n),
            Self::Box { low, high } => check_bounds(low, high),
        }
    }

    /// Sample a random action from the space
    pub fn sample(&self, rng: &mut dyn RngCore) -> Result<Action> {
        match self {
            Self::Discrete { n } => {
                check_discrete(*n)?;
                Ok(Action::Discrete(rng.gen_range(0..*n)))
            }
            Self::Box { low, high } => Ok(Action::Continuous(sample_box(low, high, rng))),
        }
    }

    /// Clip a continuous action into the box; discrete actions pass through
    #[must_use]
    pub fn clip(&self, action: Action) -> Action {
        match (self, action) {
            (Self::Box { low, high }, Action::Continuous(mut x)) => {
                for ((v, l), h) in x.iter_mut().zip(low).zip(high) {
                    *v = v.clamp(*l, *h);
                }
                Action::Continuous(x)
            }
            (_, action) => action,
        }
    }
}

fn check_discrete(n: usize) -> Result<()> {
    if n == 0 {
        return Err(RLError::InvalidConfig(
            "discrete space needs at least one element".to_string(),
        ));
    }
    Ok(())
}

fn check_bounds(low: &[f64], high: &[f64]) -> Result<()> {
    crate::error::ensure_len(low.len(), high.len())?;
    if low.iter().zip(high).any(|(l, h)| l > h) {
        return Err(RLError::InvalidConfig(
            "box space lower bound exceeds upper bound".to_string(),
        ));
    }
    Ok(())
}

fn within_bounds(x: &Array1<f64>, low: &[f64], high: &[f64]) -> bool {
    x.len() == low.len()
        && x.iter()
            .zip(low)
            .zip(high)
            .all(|((v, l), h)| v >= l && v <= h)
}

fn sample_box(low: &[f64], high: &[f64], rng: &mut dyn RngCore) -> Array1<f64> {
    low.iter()
        .zip(high)
        .map(|(&l, &h)| {
            if l.is_finite() && h.is_finite() {
                if l < h {
                    rng.gen_range(l..h)
                } else {
                    l
                }
            } else {
                let z: f64 = rng.sample(StandardNormal);
                z.clamp(l, h)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_discrete_preprocess_is_one_hot() {
        let space = ObservationSpace::discrete(4);
        let x = space.preprocess(&Observation::Discrete(2)).unwrap();
        assert_eq!(x.to_vec(), vec![0.0, 0.0, 1.0, 0.0]);
        assert!(space.preprocess(&Observation::Discrete(4)).is_err());
    }

    #[test]
    fn test_box_preprocess_checks_shape() {
        let space = ObservationSpace::box_space(vec![-1.0; 3], vec![1.0; 3]).unwrap();
        assert!(space.preprocess(&Observation::vector(&[0.1, 0.2])).is_err());
        let batch = space
            .preprocess_batch(&vec![Observation::vector(&[0.1, 0.2, 0.3]); 2])
            .unwrap();
        assert_eq!(batch.dim(), (2, 3));
    }

    #[test]
    fn test_box_bounds_validated() {
        assert!(matches!(
            ActionSpace::box_space(vec![0.0], vec![1.0, 2.0]),
            Err(RLError::DimensionMismatch { expected: 1, actual: 2 })
        ));
        assert!(matches!(
            ActionSpace::box_space(vec![1.0], vec![0.0]),
            Err(RLError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_samples_are_contained() {
        let mut rng = StdRng::seed_from_u64(7);
        let discrete = ActionSpace::discrete(3);
        let boxed = ActionSpace::box_space(vec![-2.0, 0.0], vec![2.0, 0.5]).unwrap();
        let unbounded =
            ObservationSpace::box_space(vec![f64::NEG_INFINITY; 2], vec![f64::INFINITY; 2]).unwrap();
        for _ in 0..100 {
            assert!(discrete.contains(&discrete.sample(&mut rng).unwrap()));
            assert!(boxed.contains(&boxed.sample(&mut rng).unwrap()));
            assert!(unbounded.contains(&unbounded.sample(&mut rng).unwrap()));
        }
    }

    #[test]
    fn test_empty_discrete_spaces_are_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let actions = ActionSpace::discrete(0);
        let observations = ObservationSpace::discrete(0);
        assert!(matches!(actions.validate(), Err(RLError::InvalidConfig(_))));
        assert!(matches!(observations.validate(), Err(RLError::InvalidConfig(_))));
        assert!(matches!(actions.sample(&mut rng), Err(RLError::InvalidConfig(_))));
        assert!(matches!(observations.sample(&mut rng), Err(RLError::InvalidConfig(_))));
        assert!(ActionSpace::discrete(1).validate().is_ok());
    }

    #[test]
    fn test_clip() {
        let space = ActionSpace::box_space(vec![-1.0], vec![1.0]).unwrap();
        let clipped = space.clip(Action::Continuous(Array1::from_vec(vec![3.0])));
        assert_eq!(clipped, Action::Continuous(Array1::from_vec(vec![1.0])));
        assert_eq!(space.clip(Action::Discrete(5)), Action::Discrete(5));
    }
}
