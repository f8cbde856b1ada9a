//! Gradient-transform optimizers
//!
//! Optimizers turn raw gradients into parameter *updates* (already negated),
//! which are then added to the parameters with [`Mlp::apply_updates`].
//!
//! [`Mlp::apply_updates`]: crate::nn::Mlp::apply_updates

use serde::{Deserialize, Serialize};

use crate::nn::MlpGrads;

/// Gradient transformation producing parameter updates
pub trait Optimizer: Send + Sync {
    /// Turn gradients into an update, or `None` when the step is deferred
    fn update(&mut self, grads: &MlpGrads) -> Option<MlpGrads>;

    /// Current learning rate
    fn learning_rate(&self) -> f64;

    /// Change the learning rate (e.g. from a schedule)
    fn set_learning_rate(&mut self, learning_rate: f64);
}

impl<O: Optimizer + ?Sized> Optimizer for Box<O> {
    fn update(&mut self, grads: &MlpGrads) -> Option<MlpGrads> {
        (**self).update(grads)
    }

    fn learning_rate(&self) -> f64 {
        (**self).learning_rate()
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        (**self).set_learning_rate(learning_rate);
    }
}

/// Plain stochastic gradient descent
#[derive(Debug, Clone)]
pub struct Sgd {
    learning_rate: f64,
}

impl Sgd {
    /// Create a new SGD optimizer
    #[must_use]
    pub fn new(learning_rate: f64) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for Sgd {
    fn update(&mut self, grads: &MlpGrads) -> Option<MlpGrads> {
        let lr = self.learning_rate;
        Some(grads.map(|g| -lr * g))
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }
}

/// Adam with bias correction
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    momentum: Option<MlpGrads>,
    velocity: Option<MlpGrads>,
    t: i32,
}

impl Adam {
    /// Create a new Adam optimizer with the usual betas
    #[must_use]
    pub fn new(learning_rate: f64) -> Self {
        Self::with_betas(learning_rate, 0.9, 0.999, 1e-8)
    }

    /// Create a new Adam optimizer with explicit hyperparameters
    #[must_use]
    pub fn with_betas(learning_rate: f64, beta1: f64, beta2: f64, epsilon: f64) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            momentum: None,
            velocity: None,
            t: 0,
        }
    }

    /// Wrap this optimizer so it only steps every `k` calls
    #[must_use]
    pub fn apply_every(self, k: usize) -> ApplyEvery<Self> {
        ApplyEvery::new(self, k)
    }
}

impl Optimizer for Adam {
    fn update(&mut self, grads: &MlpGrads) -> Option<MlpGrads> {
        let (beta1, beta2) = (self.beta1, self.beta2);
        self.t += 1;

        let momentum = match self.momentum.take() {
            Some(m) => m.zip_map(grads, |m, g| beta1 * m + (1.0 - beta1) * g),
            None => grads.map(|g| (1.0 - beta1) * g),
        };
        let velocity = match self.velocity.take() {
            Some(v) => v.zip_map(grads, |v, g| beta2 * v + (1.0 - beta2) * g * g),
            None => grads.map(|g| (1.0 - beta2) * g * g),
        };

        let bias1 = 1.0 - beta1.powi(self.t);
        let bias2 = 1.0 - beta2.powi(self.t);
        let (lr, eps) = (self.learning_rate, self.epsilon);
        let updates = momentum.zip_map(&velocity, |m, v| {
            let m_hat = m / bias1;
            let v_hat = v / bias2;
            -lr * m_hat / (v_hat.sqrt() + eps)
        });

        self.momentum = Some(momentum);
        self.velocity = Some(velocity);
        Some(updates)
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }
}

/// Accumulates `k` gradients and hands their sum to the inner optimizer
#[derive(Debug, Clone)]
pub struct ApplyEvery<O> {
    inner: O,
    k: usize,
    accumulated: Option<MlpGrads>,
    count: usize,
}

impl<O: Optimizer> ApplyEvery<O> {
    /// Create a new accumulating wrapper; `k` is clamped to at least 1
    pub fn new(inner: O, k: usize) -> Self {
        Self {
            inner,
            k: k.max(1),
            accumulated: None,
            count: 0,
        }
    }

    /// Number of gradients currently held back
    #[must_use]
    pub fn pending(&self) -> usize {
        self.count
    }
}

impl<O: Optimizer> Optimizer for ApplyEvery<O> {
    fn update(&mut self, grads: &MlpGrads) -> Option<MlpGrads> {
        match self.accumulated.as_mut() {
            Some(acc) => acc.add_assign(grads),
            None => self.accumulated = Some(grads.clone()),
        }
        self.count += 1;

        if self.count < self.k {
            return None;
        }
        self.count = 0;
        let summed = self.accumulated.take()?;
        self.inner.update(&summed)
    }

    fn learning_rate(&self) -> f64 {
        self.inner.learning_rate()
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        self.inner.set_learning_rate(learning_rate);
    }
}

/// Serializable optimizer description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerConfig {
    /// Plain SGD
    Sgd {
        /// Step size
        learning_rate: f64,
        /// Accumulate this many gradients per step
        #[serde(default)]
        apply_every: Option<usize>,
    },
    /// Adam
    Adam {
        /// Step size
        learning_rate: f64,
        /// First-moment decay
        #[serde(default = "default_beta1")]
        beta1: f64,
        /// Second-moment decay
        #[serde(default = "default_beta2")]
        beta2: f64,
        /// Numerical stabiliser
        #[serde(default = "default_epsilon")]
        epsilon: f64,
        /// Accumulate this many gradients per step
        #[serde(default)]
        apply_every: Option<usize>,
    },
}

fn default_beta1() -> f64 {
    0.9
}

fn default_beta2() -> f64 {
    0.999
}

fn default_epsilon() -> f64 {
    1e-8
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::adam(1e-3)
    }
}

impl OptimizerConfig {
    /// Adam with default betas
    #[must_use]
    pub fn adam(learning_rate: f64) -> Self {
        Self::Adam {
            learning_rate,
            beta1: default_beta1(),
            beta2: default_beta2(),
            epsilon: default_epsilon(),
            apply_every: None,
        }
    }

    /// Build the optimizer this config describes
    #[must_use]
    pub fn build(&self) -> Box<dyn Optimizer> {
        match *self {
            Self::Sgd {
                learning_rate,
                apply_every,
            } => wrap(Sgd::new(learning_rate), apply_every),
            Self::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
                apply_every,
            } => wrap(
                Adam::with_betas(learning_rate, beta1, beta2, epsilon),
                apply_every,
            ),
        }
    }
}

fn wrap<O: Optimizer + 'static>(optimizer: O, apply_every: Option<usize>) -> Box<dyn Optimizer> {
    match apply_every {
        Some(k) if k > 1 => Box::new(ApplyEvery::new(optimizer, k)),
        _ => Box::new(optimizer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn grads(value: f64) -> MlpGrads {
        MlpGrads {
            weights: vec![array![[value]]],
            biases: vec![array![value]],
        }
    }

    #[test]
    fn test_sgd_negates() {
        let mut sgd = Sgd::new(0.1);
        let update = sgd.update(&grads(2.0)).unwrap();
        assert_relative_eq!(update.weights[0][[0, 0]], -0.2);
    }

    #[test]
    fn test_adam_first_step_is_lr_sized() {
        let mut adam = Adam::new(0.01);
        let update = adam.update(&grads(5.0)).unwrap();
        assert_relative_eq!(update.weights[0][[0, 0]], -0.01, epsilon = 1e-8);
        let update = adam.update(&grads(-5.0)).unwrap();
        assert!(update.biases[0][0].abs() < 0.01);
    }

    #[test]
    fn test_apply_every_defers_and_sums() {
        let mut opt = ApplyEvery::new(Sgd::new(1.0), 3);
        assert!(opt.update(&grads(1.0)).is_none());
        assert!(opt.update(&grads(2.0)).is_none());
        assert_eq!(opt.pending(), 2);
        let update = opt.update(&grads(3.0)).unwrap();
        assert_relative_eq!(update.weights[0][[0, 0]], -6.0);
        assert_eq!(opt.pending(), 0);
    }

    #[test]
    fn test_config_roundtrip_and_build() {
        let json = r#"{"kind": "adam", "learning_rate": 0.002, "apply_every": 32}"#;
        let config: OptimizerConfig = serde_json::from_str(json).unwrap();
        let mut optimizer = config.build();
        assert_relative_eq!(optimizer.learning_rate(), 0.002);
        assert!(optimizer.update(&grads(1.0)).is_none());
        optimizer.set_learning_rate(0.5);
        assert_relative_eq!(optimizer.learning_rate(), 0.5);
    }
}
