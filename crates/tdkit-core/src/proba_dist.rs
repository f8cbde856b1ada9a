//! Batched probability distributions over actions
//!
//! Policies emit [`DistParams`]; everything a policy objective or regularizer
//! needs (log-propensities, entropies, KL terms and their gradients with
//! respect to the distribution parameters) lives here.

use ndarray::{concatenate, s, Array1, Array2, Axis};
use rand::RngCore;
use rand_distr::{Distribution, StandardNormal, WeightedIndex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ensure_len;
use crate::{Action, ActionSpace, RLError, Result};

const LOG_2PI: f64 = 1.837_877_066_409_345_3;
const LOGVAR_MIN: f64 = -10.0;
const LOGVAR_MAX: f64 = 10.0;

/// Family of distributions a policy head parameterises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbaDist {
    /// Categorical over `n` discrete actions
    Categorical {
        /// Number of actions
        n: usize,
    },
    /// Diagonal Gaussian over `dim`-dimensional actions
    Normal {
        /// Action dimensionality
        dim: usize,
    },
}

impl ProbaDist {
    /// Natural distribution family for an action space
    #[must_use]
    pub fn for_action_space(space: &ActionSpace) -> Self {
        match space {
            ActionSpace::Discrete { n } => Self::Categorical { n: *n },
            ActionSpace::Box { low, .. } => Self::Normal { dim: low.len() },
        }
    }

    /// Number of raw outputs a model needs to parameterise this family
    #[must_use]
    pub fn param_dim(&self) -> usize {
        match *self {
            Self::Categorical { n } => n,
            Self::Normal { dim } => 2 * dim,
        }
    }

    /// Split raw model outputs into distribution parameters
    pub fn from_raw(&self, raw: Array2<f64>) -> Result<DistParams> {
        ensure_len(self.param_dim(), raw.ncols())?;
        Ok(match *self {
            Self::Categorical { .. } => DistParams::Categorical { logits: raw },
            Self::Normal { dim } => {
                let logvar = raw.slice(s![.., dim..]);
                let clamped = logvar
                    .iter()
                    .filter(|v| !(LOGVAR_MIN..=LOGVAR_MAX).contains(*v))
                    .count();
                if clamped > 0 {
                    debug!(clamped, min = LOGVAR_MIN, max = LOGVAR_MAX, "clamping policy log-variance");
                }
                DistParams::Normal {
                    mu: raw.slice(s![.., ..dim]).to_owned(),
                    logvar: logvar.mapv(|v| v.clamp(LOGVAR_MIN, LOGVAR_MAX)),
                }
            }
        })
    }

    /// Inverse of [`Self::from_raw`], used to route gradients back to a model
    pub fn to_raw(&self, params: &DistParams) -> Result<Array2<f64>> {
        match (*self, params) {
            (Self::Categorical { n }, DistParams::Categorical { logits }) => {
                ensure_len(n, logits.ncols())?;
                Ok(logits.clone())
            }
            (Self::Normal { dim }, DistParams::Normal { mu, logvar }) => {
                ensure_len(dim, mu.ncols())?;
                concatenate(Axis(1), &[mu.view(), logvar.view()])
                    .map_err(|e| RLError::Computation(e.to_string()))
            }
            _ => Err(RLError::Policy(format!(
                "distribution parameters do not match {self:?}"
            ))),
        }
    }
}

/// Parameters of a batch of distributions, one row per sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DistParams {
    /// Unnormalised log-probabilities
    Categorical {
        /// `(batch, n)` logits
        logits: Array2<f64>,
    },
    /// Mean and log-variance of a diagonal Gaussian
    Normal {
        /// `(batch, dim)` means
        mu: Array2<f64>,
        /// `(batch, dim)` log-variances
        logvar: Array2<f64>,
    },
}

impl DistParams {
    /// Number of distributions in the batch
    #[must_use]
    pub fn batch_size(&self) -> usize {
        match self {
            Self::Categorical { logits } => logits.nrows(),
            Self::Normal { mu, .. } => mu.nrows(),
        }
    }

    /// Category probabilities (categorical only)
    pub fn probs(&self) -> Result<Array2<f64>> {
        match self {
            Self::Categorical { logits } => Ok(log_softmax(logits).mapv(f64::exp)),
            Self::Normal { .. } => Err(RLError::Policy(
                "probabilities are only defined for categorical distributions".to_string(),
            )),
        }
    }

    /// Draw an action from the `i`-th distribution
    pub fn sample(&self, i: usize, rng: &mut dyn RngCore) -> Result<Action> {
        self.check_row(i)?;
        match self {
            Self::Categorical { .. } => {
                let probs = self.probs()?;
                let dist = WeightedIndex::new(probs.row(i).iter().copied())
                    .map_err(|e| RLError::Computation(e.to_string()))?;
                Ok(Action::Discrete(dist.sample(rng)))
            }
            Self::Normal { mu, logvar } => {
                let action = mu
                    .row(i)
                    .iter()
                    .zip(logvar.row(i))
                    .map(|(&m, &lv)| {
                        let z: f64 = StandardNormal.sample(rng);
                        m + (0.5 * lv).exp() * z
                    })
                    .collect();
                Ok(Action::Continuous(action))
            }
        }
    }

    /// Most likely action of the `i`-th distribution
    pub fn mode(&self, i: usize) -> Result<Action> {
        self.check_row(i)?;
        match self {
            Self::Categorical { logits } => Ok(Action::Discrete(argmax(logits.row(i).iter()))),
            Self::Normal { mu, .. } => Ok(Action::Continuous(mu.row(i).to_owned())),
        }
    }

    /// `log π(a_i)` for every row
    pub fn log_prob(&self, actions: &[Action]) -> Result<Array1<f64>> {
        ensure_len(self.batch_size(), actions.len())?;
        match self {
            Self::Categorical { logits } => {
                let log_p = log_softmax(logits);
                actions
                    .iter()
                    .enumerate()
                    .map(|(i, a)| {
                        let a = checked_index(a, logits.ncols())?;
                        Ok(log_p[[i, a]])
                    })
                    .collect()
            }
            Self::Normal { mu, logvar } => actions
                .iter()
                .enumerate()
                .map(|(i, a)| {
                    let a = checked_vector(a, mu.ncols())?;
                    Ok(mu
                        .row(i)
                        .iter()
                        .zip(logvar.row(i))
                        .zip(a)
                        .map(|((&m, &lv), &x)| {
                            -0.5 * ((x - m).powi(2) / lv.exp() + lv + LOG_2PI)
                        })
                        .sum())
                })
                .collect(),
        }
    }

    /// `∂ log π(a_i) / ∂ params` for every row
    pub fn log_prob_grad(&self, actions: &[Action]) -> Result<DistParams> {
        ensure_len(self.batch_size(), actions.len())?;
        match self {
            Self::Categorical { logits } => {
                let mut grad = -self.probs()?;
                for (i, a) in actions.iter().enumerate() {
                    let a = checked_index(a, logits.ncols())?;
                    grad[[i, a]] += 1.0;
                }
                Ok(Self::Categorical { logits: grad })
            }
            Self::Normal { mu, logvar } => {
                let mut d_mu = Array2::zeros(mu.raw_dim());
                let mut d_logvar = Array2::zeros(logvar.raw_dim());
                for (i, a) in actions.iter().enumerate() {
                    let a = checked_vector(a, mu.ncols())?;
                    for j in 0..mu.ncols() {
                        let var = logvar[[i, j]].exp();
                        let diff = a[j] - mu[[i, j]];
                        d_mu[[i, j]] = diff / var;
                        d_logvar[[i, j]] = 0.5 * (diff * diff / var - 1.0);
                    }
                }
                Ok(Self::Normal {
                    mu: d_mu,
                    logvar: d_logvar,
                })
            }
        }
    }

    /// Differential entropy of every row
    #[must_use]
    pub fn entropy(&self) -> Array1<f64> {
        match self {
            Self::Categorical { logits } => {
                let log_p = log_softmax(logits);
                log_p.map_axis(Axis(1), |row| {
                    -row.iter()
                        .map(|&lp| if lp.is_finite() { lp.exp() * lp } else { 0.0 })
                        .sum::<f64>()
                })
            }
            Self::Normal { logvar, .. } => {
                logvar.map_axis(Axis(1), |row| row.iter().map(|&lv| 0.5 * (1.0 + LOG_2PI + lv)).sum())
            }
        }
    }

    /// `∂H / ∂ params` for every row
    #[must_use]
    pub fn entropy_grad(&self) -> DistParams {
        match self {
            Self::Categorical { logits } => {
                let log_p = log_softmax(logits);
                let h = self.entropy();
                let mut grad = Array2::zeros(logits.raw_dim());
                for ((i, j), g) in grad.indexed_iter_mut() {
                    let lp: f64 = log_p[[i, j]];
                    if lp.is_finite() {
                        *g = -lp.exp() * (lp + h[i]);
                    }
                }
                Self::Categorical { logits: grad }
            }
            Self::Normal { mu, logvar } => Self::Normal {
                mu: Array2::zeros(mu.raw_dim()),
                logvar: Array2::from_elem(logvar.raw_dim(), 0.5),
            },
        }
    }

    /// KL divergence to the prior (uniform categorical / standard normal)
    #[must_use]
    pub fn kl_to_prior(&self) -> Array1<f64> {
        match self {
            Self::Categorical { logits } => {
                let log_n = (logits.ncols() as f64).ln();
                self.entropy().mapv(|h| log_n - h)
            }
            Self::Normal { mu, logvar } => {
                let mut kl = Array1::zeros(mu.nrows());
                for ((i, j), &m) in mu.indexed_iter() {
                    let lv = logvar[[i, j]];
                    kl[i] += 0.5 * (lv.exp() + m * m - 1.0 - lv);
                }
                kl
            }
        }
    }

    /// `∂ KL(π ‖ prior) / ∂ params` for every row
    #[must_use]
    pub fn kl_to_prior_grad(&self) -> DistParams {
        match self {
            Self::Categorical { .. } => {
                let mut grad = self.entropy_grad();
                grad.scale_rows(&Array1::from_elem(self.batch_size(), -1.0));
                grad
            }
            Self::Normal { mu, logvar } => Self::Normal {
                mu: mu.clone(),
                logvar: logvar.mapv(|lv| 0.5 * (lv.exp() - 1.0)),
            },
        }
    }

    /// Multiply row `i` by `factors[i]`
    pub fn scale_rows(&mut self, factors: &Array1<f64>) {
        let factors = factors.view().insert_axis(Axis(1));
        match self {
            Self::Categorical { logits } => *logits *= &factors,
            Self::Normal { mu, logvar } => {
                *mu *= &factors;
                *logvar *= &factors;
            }
        }
    }

    /// Elementwise sum with parameters of the same family and shape
    pub fn add(&self, other: &DistParams) -> Result<DistParams> {
        match (self, other) {
            (Self::Categorical { logits: a }, Self::Categorical { logits: b }) => {
                ensure_len(a.len(), b.len())?;
                Ok(Self::Categorical { logits: a + b })
            }
            (Self::Normal { mu: m1, logvar: v1 }, Self::Normal { mu: m2, logvar: v2 }) => {
                ensure_len(m1.len(), m2.len())?;
                Ok(Self::Normal {
                    mu: m1 + m2,
                    logvar: v1 + v2,
                })
            }
            _ => Err(RLError::Policy(
                "cannot combine parameters of different distribution families".to_string(),
            )),
        }
    }

    fn check_row(&self, i: usize) -> Result<()> {
        if i < self.batch_size() {
            Ok(())
        } else {
            Err(RLError::DimensionMismatch {
                expected: self.batch_size(),
                actual: i + 1,
            })
        }
    }
}

/// Row-wise numerically stable log-softmax
#[must_use]
pub fn log_softmax(logits: &Array2<f64>) -> Array2<f64> {
    let mut out = logits.clone();
    for mut row in out.rows_mut() {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let log_sum = row.iter().map(|&v| (v - max).exp()).sum::<f64>().ln() + max;
        row.mapv_inplace(|v| v - log_sum);
    }
    out
}

/// Numerically stable `ln Σ exp(x)`
#[must_use]
pub fn logsumexp<'a>(values: impl Iterator<Item = &'a f64> + Clone) -> f64 {
    let max = values.clone().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    values.map(|&v| (v - max).exp()).sum::<f64>().ln() + max
}

/// Index of the largest value (first one on ties)
pub fn argmax<'a>(values: impl Iterator<Item = &'a f64>) -> usize {
    let mut best = (0, f64::NEG_INFINITY);
    for (i, &v) in values.enumerate() {
        if v > best.1 {
            best = (i, v);
        }
    }
    best.0
}

fn checked_index(action: &Action, n: usize) -> Result<usize> {
    let a = action.as_discrete()?;
    if a < n {
        Ok(a)
    } else {
        Err(RLError::InvalidAction(format!("action {a} outside of Discrete({n})")))
    }
}

fn checked_vector(action: &Action, dim: usize) -> Result<&Array1<f64>> {
    let a = action.as_continuous()?;
    ensure_len(dim, a.len())?;
    Ok(a)
}
