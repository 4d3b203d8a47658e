use ndarray::prelude::*;
use rand::prelude::*;
use rand_distr::Uniform;
use rayon::prelude::*;

use crate::activation::{Activation, ActivationKind};
use crate::error::{EkfError, Result};

pub const SEED: u64 = 42;
pub const DEFAULT_WEIGHT_SCALE: f64 = 5.0;

/// Construction-time settings for a single-hidden-layer network.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    pub n_input: usize,
    pub n_output: usize,
    pub n_hidden: usize,
    pub activation: ActivationKind,
    /// Initial weights are drawn uniformly from `[-weight_scale, weight_scale]`.
    pub weight_scale: f64,
    pub seed: u64,
}

impl NetworkConfig {
    pub fn new(n_input: usize, n_output: usize, n_hidden: usize, activation: ActivationKind) -> Self {
        Self {
            n_input,
            n_output,
            n_hidden,
            activation,
            weight_scale: DEFAULT_WEIGHT_SCALE,
            seed: SEED,
        }
    }

    pub fn with_weight_scale(mut self, scale: f64) -> Self {
        self.weight_scale = scale;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_input == 0 || self.n_output == 0 || self.n_hidden == 0 {
            return Err(EkfError::Configuration(format!(
                "layer sizes must be positive, got n_input={} n_output={} n_hidden={}",
                self.n_input, self.n_output, self.n_hidden
            )));
        }
        if !(self.weight_scale.is_finite() && self.weight_scale > 0.0) {
            return Err(EkfError::Configuration(format!(
                "weight scale must be a positive float, got {}",
                self.weight_scale
            )));
        }
        Ok(())
    }
}

/// Feedforward network with one hidden layer.
///
/// Each weight matrix carries its bias as the trailing column. The flattened
/// weight vector is the row-major hidden matrix followed by the row-major
/// output matrix; `hidden_weight_count` marks the boundary and is shared by
/// the Jacobian layout and `apply_delta`.
pub struct Network {
    n_input: usize,
    n_output: usize,
    n_hidden: usize,
    hidden: Array2<f64>,
    output: Array2<f64>,
    kind: ActivationKind,
    activation: &'static dyn Activation,
    hidden_weight_count: usize,
    num_weights: usize,
}

/// `W[:, :-1] . v + W[:, -1]`
fn affine(w: &Array2<f64>, v: &ArrayView1<f64>) -> Array1<f64> {
    let n = w.ncols() - 1;
    w.slice(s![.., ..n]).dot(v) + &w.column(n)
}

fn with_bias(v: &ArrayView1<f64>) -> Array1<f64> {
    let mut out = Array1::ones(v.len() + 1);
    out.slice_mut(s![..v.len()]).assign(v);
    out
}

impl Network {
    pub fn new<R: Rng + ?Sized>(config: &NetworkConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let dist = Uniform::new_inclusive(-config.weight_scale, config.weight_scale);
        let hidden = Array::from_shape_simple_fn((config.n_hidden, config.n_input + 1), || {
            rng.sample(dist)
        });
        let output = Array::from_shape_simple_fn((config.n_output, config.n_hidden + 1), || {
            rng.sample(dist)
        });
        let hidden_weight_count = hidden.len();
        let num_weights = hidden_weight_count + output.len();
        log::debug!(
            "network {}-{}-{} ({}), {} weights",
            config.n_input,
            config.n_hidden,
            config.n_output,
            config.activation,
            num_weights
        );
        Ok(Self {
            n_input: config.n_input,
            n_output: config.n_output,
            n_hidden: config.n_hidden,
            hidden,
            output,
            kind: config.activation,
            activation: config.activation.resolve(),
            hidden_weight_count,
            num_weights,
        })
    }

    pub fn n_input(&self) -> usize {
        self.n_input
    }

    pub fn n_output(&self) -> usize {
        self.n_output
    }

    pub fn n_hidden(&self) -> usize {
        self.n_hidden
    }

    pub fn num_weights(&self) -> usize {
        self.num_weights
    }

    pub fn hidden_weight_count(&self) -> usize {
        self.hidden_weight_count
    }

    pub fn activation_kind(&self) -> ActivationKind {
        self.kind
    }

    pub fn hidden_weights(&self) -> ArrayView2<'_, f64> {
        self.hidden.view()
    }

    pub fn output_weights(&self) -> ArrayView2<'_, f64> {
        self.output.view()
    }

    /// Replace both weight matrices; shapes must match the ones fixed at construction.
    pub fn set_weights(&mut self, hidden: Array2<f64>, output: Array2<f64>) -> Result<()> {
        if hidden.dim() != self.hidden.dim() {
            return Err(EkfError::Shape(format!(
                "hidden weights must be {:?}, got {:?}",
                self.hidden.shape(),
                hidden.shape()
            )));
        }
        if output.dim() != self.output.dim() {
            return Err(EkfError::Shape(format!(
                "output weights must be {:?}, got {:?}",
                self.output.shape(),
                output.shape()
            )));
        }
        self.hidden = hidden;
        self.output = output;
        Ok(())
    }

    pub fn flat_weights(&self) -> Array1<f64> {
        self.hidden.iter().chain(self.output.iter()).copied().collect()
    }

    /// Add a flattened weight correction, split at `hidden_weight_count`.
    pub fn apply_delta(&mut self, delta: &ArrayView1<f64>) -> Result<()> {
        if delta.len() != self.num_weights {
            return Err(EkfError::Shape(format!(
                "weight delta must have {} elements, got {}",
                self.num_weights,
                delta.len()
            )));
        }
        let (dh, dout) = delta.view().split_at(Axis(0), self.hidden_weight_count);
        self.hidden.iter_mut().zip(dh.iter()).for_each(|(w, d)| *w += d);
        self.output.iter_mut().zip(dout.iter()).for_each(|(w, d)| *w += d);
        Ok(())
    }

    fn check_input(&self, input: &ArrayView1<f64>) -> Result<()> {
        if input.len() != self.n_input {
            return Err(EkfError::Shape(format!(
                "input must have {} variables, got {}",
                self.n_input,
                input.len()
            )));
        }
        Ok(())
    }

    /// Returns `(output, hidden_activation)`.
    pub fn forward(&self, input: &ArrayView1<f64>) -> Result<(Array1<f64>, Array1<f64>)> {
        self.check_input(input)?;
        let act = self.activation;
        let hidden = affine(&self.hidden, input).mapv_into(|x| act.activate(x));
        let output = affine(&self.output, &hidden.view());
        Ok((output, hidden))
    }

    pub fn predict(&self, input: &ArrayView1<f64>) -> Result<Array1<f64>> {
        let (output, _) = self.forward(input)?;
        Ok(output)
    }

    /// Row-wise prediction over a `(samples, n_input)` batch.
    pub fn predict_batch(&self, inputs: &ArrayView2<f64>) -> Result<Array2<f64>> {
        if inputs.ncols() != self.n_input {
            return Err(EkfError::Shape(format!(
                "inputs must have {} columns, got {}",
                self.n_input,
                inputs.ncols()
            )));
        }
        let n = inputs.nrows();
        let rows = (0..n)
            .into_par_iter()
            .map(|i| self.predict(&inputs.row(i)))
            .collect::<Result<Vec<_>>>()?;
        let mut out = Array2::zeros((n, self.n_output));
        for (mut dst, row) in out.rows_mut().into_iter().zip(rows.iter()) {
            dst.assign(row);
        }
        Ok(out)
    }

    pub fn mean_squared_error(&self, inputs: &ArrayView2<f64>, targets: &ArrayView2<f64>) -> Result<f64> {
        if targets.dim() != (inputs.nrows(), self.n_output) {
            return Err(EkfError::Shape(format!(
                "targets must be ({}, {}), got {:?}",
                inputs.nrows(),
                self.n_output,
                targets.shape()
            )));
        }
        let predictions = self.predict_batch(inputs)?;
        let mut err = &predictions - targets;
        err.par_mapv_inplace(|e| e * e);
        Ok(err.mean().unwrap_or(0.0))
    }

    /// Sensitivity of every output to every weight, `(n_output, num_weights)`.
    ///
    /// Columns follow the flattened weight order: for output row `k`, hidden
    /// weight `(j, i)` sits at `j * (n_input + 1) + i` and holds
    /// `output[k, j] * act'(hidden[j]) * [input, 1][i]`; output weight `(k, m)`
    /// sits at `hidden_weight_count + k * (n_hidden + 1) + m` and holds
    /// `[hidden, 1][m]`. Output rows other than `k` are zero in that block.
    pub fn jacobian(&self, input: &ArrayView1<f64>, hidden: &ArrayView1<f64>) -> Result<Array2<f64>> {
        self.check_input(input)?;
        if hidden.len() != self.n_hidden {
            return Err(EkfError::Shape(format!(
                "hidden activation must have {} units, got {}",
                self.n_hidden,
                hidden.len()
            )));
        }
        let act = self.activation;
        let input_b = with_bias(input);
        let hidden_b = with_bias(hidden);
        let slope = hidden.mapv(|l| act.derivative(l));
        let stride_in = self.n_input + 1;
        let stride_hidden = self.n_hidden + 1;

        let mut h = Array2::zeros((self.n_output, self.num_weights));
        for k in 0..self.n_output {
            let mut row = h.row_mut(k);
            for j in 0..self.n_hidden {
                let d = self.output[[k, j]] * slope[j];
                let c = j * stride_in;
                row.slice_mut(s![c..c + stride_in]).assign(&(d * &input_b));
            }
            let c = self.hidden_weight_count + k * stride_hidden;
            row.slice_mut(s![c..c + stride_hidden]).assign(&hidden_b);
        }
        Ok(h)
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("n_input", &self.n_input)
            .field("n_output", &self.n_output)
            .field("n_hidden", &self.n_hidden)
            .field("activation", &self.kind)
            .field("num_weights", &self.num_weights)
            .finish()
    }
}
