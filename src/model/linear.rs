//! Linear softmax classifier
//!
//! The reference [`DifferentiableModel`] implementation: class scores are
//! `softmax(xW + b)` and the input gradient is computed in closed form.

use ndarray::{Array1, Array2, Axis};

use super::DifferentiableModel;
use crate::{Error, Result};

/// Multinomial logistic model over encoded feature vectors.
#[derive(Debug, Clone)]
pub struct LinearSoftmaxModel {
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl LinearSoftmaxModel {
    /// Build from a (input width × classes) weight matrix and a
    /// per-class bias vector.
    pub fn new(weights: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        if weights.ncols() != bias.len() {
            return Err(Error::Config(format!(
                "weight columns {} do not match bias length {}",
                weights.ncols(),
                bias.len()
            )));
        }
        if weights.ncols() < 2 {
            return Err(Error::Config(format!(
                "need at least 2 classes, got {}",
                weights.ncols()
            )));
        }
        Ok(Self { weights, bias })
    }

    /// Input width the model accepts.
    #[must_use]
    pub fn input_width(&self) -> usize {
        self.weights.nrows()
    }

    fn logits(&self, x: &Array2<f32>) -> Array2<f32> {
        x.dot(&self.weights) + &self.bias
    }
}

/// Row-wise numerically stable softmax.
fn softmax_rows(z: &Array2<f32>) -> Array2<f32> {
    let mut out = z.clone();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

impl DifferentiableModel for LinearSoftmaxModel {
    fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        softmax_rows(&self.logits(x))
    }

    fn backward(&self, x: &Array2<f32>, grad_output: &Array2<f32>) -> Array2<f32> {
        // Softmax Jacobian-vector product per row: dz = p ⊙ (g − ⟨g, p⟩),
        // then back through the linear map: dx = dz · Wᵀ.
        let p = self.forward(x);
        let dot = (grad_output * &p).sum_axis(Axis(1)).insert_axis(Axis(1));
        let dz = &p * &(grad_output - &dot);
        dz.dot(&self.weights.t())
    }

    fn n_classes(&self) -> usize {
        self.weights.ncols()
    }
}
