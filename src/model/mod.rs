//! Differentiable classifier interface
//!
//! The search engine needs two capabilities from a model: a forward pass
//! over encoded batches, and the gradient of a scalar loss with respect
//! to the model's *input*. The latter is expressed as a vector-Jacobian
//! product so the engine stays agnostic of how a model implementation
//! represents gradients internally.

mod linear;

pub use linear::LinearSoftmaxModel;

use ndarray::Array2;

/// A classifier whose output can be differentiated with respect to its
/// input.
pub trait DifferentiableModel {
    /// Class scores for a batch, shape (rows × classes). Rows are
    /// expected to sum to 1 for score-threshold losses to be meaningful,
    /// but the engine only ever compares scores within a row.
    fn forward(&self, x: &Array2<f32>) -> Array2<f32>;

    /// Vector-Jacobian product: given `grad_output` = ∂loss/∂forward(x),
    /// return ∂loss/∂x, shape (rows × input width).
    fn backward(&self, x: &Array2<f32>, grad_output: &Array2<f32>) -> Array2<f32>;

    /// Number of output classes.
    fn n_classes(&self) -> usize;
}
