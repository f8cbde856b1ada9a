//! Invertible transforms applied to value-function outputs

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::{RLError, Result};

/// Transform between reward scale and the space a value model predicts in
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueTransform {
    /// No transform
    #[default]
    Identity,
    /// `f(x) = sign(x)·scale·ln(1+|x|)`, compressing large returns
    Log {
        /// Output scale
        scale: f64,
    },
}

impl ValueTransform {
    /// Log transform with the given output scale
    pub fn log(scale: f64) -> Result<Self> {
        let f = Self::Log { scale };
        f.validate()?;
        Ok(f)
    }

    /// Reject transforms that cannot be inverted
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Identity => Ok(()),
            Self::Log { scale } if scale.is_finite() && scale > 0.0 => Ok(()),
            Self::Log { scale } => Err(RLError::InvalidConfig(format!(
                "log transform scale must be positive and finite, got {scale}"
            ))),
        }
    }

    /// Map a reward-scale value into model space
    #[must_use]
    pub fn transform(&self, x: f64) -> f64 {
        match *self {
            Self::Identity => x,
            Self::Log { scale } => x.signum() * scale * x.abs().ln_1p(),
        }
    }

    /// Map a model-space value back to reward scale
    #[must_use]
    pub fn inverse(&self, y: f64) -> f64 {
        match *self {
            Self::Identity => y,
            Self::Log { scale } => y.signum() * (y.abs() / scale).exp_m1(),
        }
    }

    /// Elementwise [`Self::transform`]
    #[must_use]
    pub fn transform_array(&self, x: &Array1<f64>) -> Array1<f64> {
        x.mapv(|v| self.transform(v))
    }

    /// Elementwise [`Self::inverse`]
    #[must_use]
    pub fn inverse_array(&self, y: &Array1<f64>) -> Array1<f64> {
        y.mapv(|v| self.inverse(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_log_transform_inverts() {
        let f = ValueTransform::Log { scale: 2.0 };
        for x in [-100.0, -1.5, 0.0, 0.3, 42.0] {
            assert_relative_eq!(f.inverse(f.transform(x)), x, epsilon = 1e-9);
        }
        assert!(f.transform(1000.0) < 1000.0);
    }

    proptest::proptest! {
        #[test]
        fn prop_log_transform_is_monotone(a in -1e6_f64..1e6, b in -1e6_f64..1e6, scale in 0.1_f64..10.0) {
            let f = ValueTransform::Log { scale };
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            proptest::prop_assert!(f.transform(lo) <= f.transform(hi));
            proptest::prop_assert!((f.inverse(f.transform(a)) - a).abs() <= 1e-6 * (1.0 + a.abs()));
        }
    }

    #[test]
    fn test_log_scale_must_be_positive() {
        assert!(ValueTransform::log(0.5).is_ok());
        for scale in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(ValueTransform::log(scale), Err(RLError::InvalidConfig(_))));
        }
        assert!(ValueTransform::Log { scale: 0.0 }.validate().is_err());
        assert!(ValueTransform::Identity.validate().is_ok());
    }

    #[test]
    fn test_identity() {
        let f = ValueTransform::default();
        assert_eq!(f.transform(3.5), 3.5);
        assert_eq!(f.inverse(-1.0), -1.0);
    }
}
