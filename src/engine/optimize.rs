//! Gradient-guided continuous search loop
//!
//! Runs masked gradient descent on the relaxed candidate batch: forward
//! pass, mixed loss, gradient masking, parameter update, periodic
//! re-projection into valid decodable space, early-stop check.

use ndarray::{Array1, Array2};

use super::config::EngineConfig;
use super::loss::MixedLoss;
use super::prepare::{all_valid, clip_masked};
use crate::model::DifferentiableModel;
use crate::space::TabularSpace;
use crate::{Error, Result};

/// Terminal state of one optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Early stop fired: every candidate was valid and the loss had
    /// flattened out.
    Converged,
    /// The iteration cap was hit first. The candidates returned are the
    /// best effort at that point, not a failure.
    MaxIterReached,
}

/// Result of one optimization run over a candidate batch.
#[derive(Debug, Clone)]
pub(crate) struct Optimized {
    pub candidates: Array2<f32>,
    pub predictions: Array2<f32>,
    pub loss: f32,
    pub iterations: usize,
    pub outcome: Outcome,
}

/// Masked SGD over a candidate batch.
pub(crate) struct GradientOptimizer<'a> {
    space: &'a TabularSpace,
    model: &'a dyn DifferentiableModel,
    loss: &'a MixedLoss,
    config: &'a EngineConfig,
}

impl<'a> GradientOptimizer<'a> {
    pub(crate) fn new(
        space: &'a TabularSpace,
        model: &'a dyn DifferentiableModel,
        loss: &'a MixedLoss,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            space,
            model,
            loss,
            config,
        }
    }

    /// Run the loop until convergence or the iteration cap.
    ///
    /// The gradient is masked after computation and before the update,
    /// so frozen columns never move, not even by float rounding. Every
    /// `project_frequency` iterations the candidates are clipped into
    /// their bounds and reloaded through a decode→encode round trip to
    /// shed accumulated drift.
    pub(crate) fn optimize(
        &self,
        init: Array2<f32>,
        origin: &Array2<f32>,
        targets: &Array2<f32>,
        mask: &Array2<f32>,
        lo: &Array1<f32>,
        hi: &Array1<f32>,
    ) -> Result<Optimized> {
        if self.config.max_iter == 0 {
            return Err(Error::Config(
                "max_iter must be greater than 0".to_string(),
            ));
        }

        let mut cfs = init;
        let mut prev_loss = 0.0;
        let mut last = (0.0, Array2::zeros(targets.raw_dim()), 0);
        let mut outcome = Outcome::MaxIterReached;

        for iter in 0..self.config.max_iter {
            let (loss, mut grad, pred) = self.loss.evaluate(self.model, &cfs, origin, targets);
            grad *= mask;
            cfs.scaled_add(-self.config.lr, &grad);

            let improvement = prev_loss - loss;
            last = (loss, pred, iter);
            if self.stoppable(iter, &last.1, targets, improvement) {
                outcome = Outcome::Converged;
                break;
            }

            if iter % self.config.project_frequency == 0 {
                clip_masked(self.space, &mut cfs, mask, lo, hi);
                cfs = self.space.reload(&cfs)?;
            }
            prev_loss = loss;
        }

        clip_masked(self.space, &mut cfs, mask, lo, hi);
        let (loss, pred, iterations) = last;
        Ok(Optimized {
            candidates: cfs,
            predictions: pred,
            loss,
            iterations,
            outcome,
        })
    }

    fn stoppable(
        &self,
        iter: usize,
        pred: &Array2<f32>,
        targets: &Array2<f32>,
        improvement: f32,
    ) -> bool {
        if iter < self.config.min_iter {
            return false;
        }
        if iter <= self.config.project_frequency {
            return false;
        }
        all_valid(pred, targets) && improvement < self.config.loss_diff
    }
}
