//! Dense feed-forward backbone shared by all function approximators
//!
//! A pure ndarray multi-layer perceptron with an explicit backward pass.
//! With no hidden layers it reduces to a linear model, which is what the
//! tabular-style problems (one-hot observations) use.

use ndarray::{Array1, Array2, Axis};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::{RLError, Result};

/// Hidden-layer nonlinearity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// max(0, x)
    Relu,
    /// tanh(x)
    Tanh,
    /// x
    Identity,
}

impl Activation {
    fn apply(self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Self::Relu => z.mapv(|v| v.max(0.0)),
            Self::Tanh => z.mapv(f64::tanh),
            Self::Identity => z.clone(),
        }
    }

    fn derivative(self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Self::Relu => z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Self::Tanh => z.mapv(|v| 1.0 - v.tanh().powi(2)),
            Self::Identity => Array2::ones(z.raw_dim()),
        }
    }
}

/// Architecture of a function approximator's backbone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpConfig {
    /// Hidden layer sizes; empty means a linear model
    pub hidden_dims: Vec<usize>,
    /// Activation function between hidden layers
    pub activation: Activation,
    /// Initialise the output layer with zeros
    pub zero_init_output: bool,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            hidden_dims: Vec::new(),
            activation: Activation::Relu,
            zero_init_output: true,
        }
    }
}

impl MlpConfig {
    /// Linear model with zero-initialised weights
    #[must_use]
    pub fn linear() -> Self {
        Self::default()
    }

    /// MLP with the given hidden layer sizes
    #[must_use]
    pub fn with_hidden(hidden_dims: Vec<usize>, activation: Activation) -> Self {
        Self {
            hidden_dims,
            activation,
            zero_init_output: true,
        }
    }
}

/// Multi-layer perceptron parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mlp {
    /// Weights for each layer, shaped `(inputs, outputs)`
    weights: Vec<Array2<f64>>,
    /// Biases for each layer
    biases: Vec<Array1<f64>>,
    activation: Activation,
}

/// Intermediate values of a forward pass, needed for backprop
#[derive(Debug, Clone)]
pub struct MlpCache {
    /// Input to every layer
    inputs: Vec<Array2<f64>>,
    /// Pre-activations of the hidden layers
    pre_activations: Vec<Array2<f64>>,
}

/// Gradients (or updates) with the same layout as [`Mlp`]
#[derive(Debug, Clone, PartialEq)]
pub struct MlpGrads {
    /// Per-layer weight gradients
    pub weights: Vec<Array2<f64>>,
    /// Per-layer bias gradients
    pub biases: Vec<Array1<f64>>,
}

impl Mlp {
    /// Create a new MLP mapping `input_dim` features to `output_dim` outputs
    pub fn new(
        input_dim: usize,
        output_dim: usize,
        config: &MlpConfig,
        rng: &mut dyn RngCore,
    ) -> Self {
        let mut weights = Vec::with_capacity(config.hidden_dims.len() + 1);
        let mut biases = Vec::with_capacity(config.hidden_dims.len() + 1);

        let mut prev_dim = input_dim;
        for &hidden_dim in &config.hidden_dims {
            weights.push(Self::xavier_init(prev_dim, hidden_dim, rng));
            biases.push(Array1::zeros(hidden_dim));
            prev_dim = hidden_dim;
        }

        if config.zero_init_output {
            weights.push(Array2::zeros((prev_dim, output_dim)));
        } else {
            weights.push(Self::xavier_init(prev_dim, output_dim, rng));
        }
        biases.push(Array1::zeros(output_dim));

        Self {
            weights,
            biases,
            activation: config.activation,
        }
    }

    /// Xavier initialization for weights
    fn xavier_init(in_dim: usize, out_dim: usize, rng: &mut dyn RngCore) -> Array2<f64> {
        let limit = (6.0 / (in_dim + out_dim).max(1) as f64).sqrt();
        Array2::from_shape_fn((in_dim, out_dim), |_| rng.gen_range(-limit..limit))
    }

    /// Number of input features
    #[must_use]
    pub fn input_dim(&self) -> usize {
        self.weights[0].nrows()
    }

    /// Number of outputs
    #[must_use]
    pub fn output_dim(&self) -> usize {
        self.biases[self.biases.len() - 1].len()
    }

    /// Total number of scalar parameters
    #[must_use]
    pub fn n_params(&self) -> usize {
        self.weights.iter().map(Array2::len).sum::<usize>()
            + self.biases.iter().map(Array1::len).sum::<usize>()
    }

    /// Forward pass over a `(batch, inputs)` matrix
    #[must_use]
    pub fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        self.forward_cached(x).0
    }

    /// Forward pass that also records what [`Self::backward`] needs
    #[must_use]
    pub fn forward_cached(&self, x: &Array2<f64>) -> (Array2<f64>, MlpCache) {
        let n_layers = self.weights.len();
        let mut inputs = Vec::with_capacity(n_layers);
        let mut pre_activations = Vec::with_capacity(n_layers - 1);

        let mut hidden = x.clone();
        for i in 0..n_layers - 1 {
            let z = hidden.dot(&self.weights[i]) + &self.biases[i];
            inputs.push(hidden);
            hidden = self.activation.apply(&z);
            pre_activations.push(z);
        }

        // Output layer has no activation
        let out = hidden.dot(&self.weights[n_layers - 1]) + &self.biases[n_layers - 1];
        inputs.push(hidden);

        (
            out,
            MlpCache {
                inputs,
                pre_activations,
            },
        )
    }

    /// Backpropagate `grad_out = dL/d(output)` to parameter gradients
    #[must_use]
    pub fn backward(&self, cache: &MlpCache, grad_out: &Array2<f64>) -> MlpGrads {
        let n_layers = self.weights.len();
        let mut weights = vec![Array2::zeros((0, 0)); n_layers];
        let mut biases = vec![Array1::zeros(0); n_layers];

        let mut delta = grad_out.clone();
        for i in (0..n_layers).rev() {
            weights[i] = cache.inputs[i].t().dot(&delta);
            biases[i] = delta.sum_axis(Axis(0));
            if i > 0 {
                let upstream = delta.dot(&self.weights[i].t());
                delta = upstream * self.activation.derivative(&cache.pre_activations[i - 1]);
            }
        }

        MlpGrads { weights, biases }
    }

    /// Add `updates` to the parameters
    pub fn apply_updates(&mut self, updates: &MlpGrads) {
        for (w, u) in self.weights.iter_mut().zip(&updates.weights) {
            *w += u;
        }
        for (b, u) in self.biases.iter_mut().zip(&updates.biases) {
            *b += u;
        }
    }

    /// Polyak averaging: `θ ← τ·θ_other + (1−τ)·θ`
    pub fn soft_update(&mut self, other: &Mlp, tau: f64) {
        for (w, w_other) in self.weights.iter_mut().zip(&other.weights) {
            w.zip_mut_with(w_other, |t, &s| *t = tau * s + (1.0 - tau) * *t);
        }
        for (b, b_other) in self.biases.iter_mut().zip(&other.biases) {
            b.zip_mut_with(b_other, |t, &s| *t = tau * s + (1.0 - tau) * *t);
        }
    }

    /// Check that the layers chain from `input_dim` features to `output_dim` outputs
    ///
    /// Freshly built networks always pass; this guards parameters that were
    /// deserialised from disk.
    pub fn check_dims(&self, input_dim: usize, output_dim: usize) -> Result<()> {
        if self.weights.is_empty() || self.weights.len() != self.biases.len() {
            return Err(RLError::InvalidConfig(format!(
                "network needs at least one layer and one bias per weight matrix, got {} and {}",
                self.weights.len(),
                self.biases.len()
            )));
        }
        let mut prev_dim = input_dim;
        for (i, (w, b)) in self.weights.iter().zip(&self.biases).enumerate() {
            if w.nrows() != prev_dim || b.len() != w.ncols() {
                return Err(RLError::InvalidConfig(format!(
                    "layer {i} has weights {:?} and {} biases, expected {prev_dim} inputs",
                    w.dim(),
                    b.len()
                )));
            }
            prev_dim = w.ncols();
        }
        if prev_dim != output_dim {
            return Err(RLError::InvalidConfig(format!(
                "network has {prev_dim} outputs, expected {output_dim}"
            )));
        }
        Ok(())
    }

    /// Whether both networks share the same architecture
    #[must_use]
    pub fn same_shape(&self, other: &Mlp) -> bool {
        self.weights.len() == other.weights.len()
            && self
                .weights
                .iter()
                .zip(&other.weights)
                .all(|(a, b)| a.dim() == b.dim())
    }
}

impl MlpGrads {
    /// Zero gradients shaped like `mlp`
    #[must_use]
    pub fn zeros_like(mlp: &Mlp) -> Self {
        Self {
            weights: mlp.weights.iter().map(|w| Array2::zeros(w.raw_dim())).collect(),
            biases: mlp.biases.iter().map(|b| Array1::zeros(b.raw_dim())).collect(),
        }
    }

    /// Accumulate another set of gradients
    pub fn add_assign(&mut self, other: &MlpGrads) {
        for (a, b) in self.weights.iter_mut().zip(&other.weights) {
            *a += b;
        }
        for (a, b) in self.biases.iter_mut().zip(&other.biases) {
            *a += b;
        }
    }

    /// Multiply every entry by `factor`
    pub fn scale(&mut self, factor: f64) {
        for w in &mut self.weights {
            *w *= factor;
        }
        for b in &mut self.biases {
            *b *= factor;
        }
    }

    /// Elementwise map into a new gradient set
    #[must_use]
    pub fn map(&self, f: impl Fn(f64) -> f64 + Copy) -> MlpGrads {
        MlpGrads {
            weights: self.weights.iter().map(|w| w.mapv(f)).collect(),
            biases: self.biases.iter().map(|b| b.mapv(f)).collect(),
        }
    }

    /// Elementwise combination of two gradient sets with the same layout
    #[must_use]
    pub fn zip_map(&self, other: &MlpGrads, f: impl Fn(f64, f64) -> f64 + Copy) -> MlpGrads {
        let mut out = self.clone();
        for (a, b) in out.weights.iter_mut().zip(&other.weights) {
            a.zip_mut_with(b, |x, &y| *x = f(*x, y));
        }
        for (a, b) in out.biases.iter_mut().zip(&other.biases) {
            a.zip_mut_with(b, |x, &y| *x = f(*x, y));
        }
        out
    }

    /// Largest absolute entry
    #[must_use]
    pub fn max_abs(&self) -> f64 {
        self.iter().fold(0.0, |acc, v| acc.max(v.abs()))
    }

    /// Global L2 norm
    #[must_use]
    pub fn l2_norm(&self) -> f64 {
        self.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.weights
            .iter()
            .flat_map(|w| w.iter().copied())
            .chain(self.biases.iter().flat_map(|b| b.iter().copied()))
    }
}
