//! Regression losses for value-function updaters

use ndarray::{Array1, Zip};
use serde::{Deserialize, Serialize};
use tdkit_core::error::ensure_len;
use tdkit_core::Result;

const LOGLOSS_EPS: f64 = 1e-15;

/// Loss between bootstrapped targets and predictions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueLoss {
    /// `½(y − ŷ)²`
    Mse,
    /// Quadratic within `delta`, linear outside
    Huber {
        /// Transition point
        delta: f64,
    },
    /// Binary cross-entropy, for predictions that are probabilities
    LogLoss,
}

impl Default for ValueLoss {
    fn default() -> Self {
        Self::Huber { delta: 1.0 }
    }
}

impl ValueLoss {
    fn elementwise(self, y_true: f64, y_pred: f64) -> f64 {
        match self {
            Self::Mse => 0.5 * (y_pred - y_true).powi(2),
            Self::Huber { delta } => {
                let err = (y_pred - y_true).abs();
                if err <= delta {
                    0.5 * err * err
                } else {
                    delta * (err - 0.5 * delta)
                }
            }
            Self::LogLoss => {
                let p = y_pred.clamp(LOGLOSS_EPS, 1.0 - LOGLOSS_EPS);
                -(y_true * p.ln() + (1.0 - y_true) * (1.0 - p).ln())
            }
        }
    }

    fn derivative(self, y_true: f64, y_pred: f64) -> f64 {
        match self {
            Self::Mse => y_pred - y_true,
            Self::Huber { delta } => (y_pred - y_true).clamp(-delta, delta),
            Self::LogLoss => {
                let p = y_pred.clamp(LOGLOSS_EPS, 1.0 - LOGLOSS_EPS);
                (p - y_true) / (p * (1.0 - p))
            }
        }
    }

    /// Weighted mean loss `mean(w · L(y, ŷ))`
    pub fn loss(self, y_true: &Array1<f64>, y_pred: &Array1<f64>, w: &Array1<f64>) -> Result<f64> {
        check_shapes(y_true, y_pred, w)?;
        if y_true.is_empty() {
            return Ok(0.0);
        }
        let total = Zip::from(y_true)
            .and(y_pred)
            .and(w)
            .fold(0.0, |acc, &y, &p, &wi| acc + wi * self.elementwise(y, p));
        Ok(total / y_true.len() as f64)
    }

    /// Gradient of [`Self::loss`] with respect to `y_pred`
    pub fn grad(
        self,
        y_true: &Array1<f64>,
        y_pred: &Array1<f64>,
        w: &Array1<f64>,
    ) -> Result<Array1<f64>> {
        check_shapes(y_true, y_pred, w)?;
        let n = y_true.len().max(1) as f64;
        Ok(Zip::from(y_true)
            .and(y_pred)
            .and(w)
            .map_collect(|&y, &p, &wi| wi * self.derivative(y, p) / n))
    }
}

fn check_shapes(y_true: &Array1<f64>, y_pred: &Array1<f64>, w: &Array1<f64>) -> Result<()> {
    ensure_len(y_true.len(), y_pred.len())?;
    ensure_len(y_true.len(), w.len())
}
