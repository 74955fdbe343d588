//! Mixed search loss
//!
//! Loss over a candidate batch =
//! `validity_weight · margin(pred, 0.5, target)`
//! `+ proximity_weight · Σ weighted_distance(candidate, origin)`
//! `+ diversity_weight · repulsion within each origin group`.
//!
//! Every term carries its own closed-form (sub)gradient. The validity
//! term is differentiated with respect to the predictions and pulled
//! back through the model's vector-Jacobian product; the proximity and
//! diversity terms are differentiated directly with respect to the
//! candidates.

use ndarray::{Array1, Array2};

use super::config::{DistanceMetric, EngineConfig};
use crate::model::DifferentiableModel;
use crate::{Error, Result};

/// Loss evaluator bound to one search request's weights and group size.
pub(crate) struct MixedLoss {
    validity_weight: f32,
    proximity_weight: f32,
    diversity_weight: f32,
    metric: DistanceMetric,
    weights: Array1<f32>,
    count: usize,
}

impl MixedLoss {
    /// Bind the configured term weights to per-column distance weights
    /// and the per-instance group size.
    pub(crate) fn new(
        config: &EngineConfig,
        weights: Array1<f32>,
        count: usize,
    ) -> Result<Self> {
        if config.metric == DistanceMetric::Cosine {
            return Err(Error::NotImplemented(
                "cosine distance metric".to_string(),
            ));
        }
        Ok(Self {
            validity_weight: config.validity_weight,
            proximity_weight: config.proximity_weight,
            diversity_weight: config.diversity_weight,
            metric: config.metric,
            weights,
            count,
        })
    }

    /// Evaluate the mixed loss at `cfs`.
    ///
    /// Returns `(loss, ∂loss/∂cfs, predictions)`. One model forward and
    /// one backward per call.
    pub(crate) fn evaluate(
        &self,
        model: &dyn DifferentiableModel,
        cfs: &Array2<f32>,
        origin: &Array2<f32>,
        targets: &Array2<f32>,
    ) -> (f32, Array2<f32>, Array2<f32>) {
        let pred = model.forward(cfs);

        let (validity, mut grad_pred) = margin_rank(&pred, targets);
        grad_pred *= self.validity_weight;
        let mut grad = model.backward(cfs, &grad_pred);
        let mut loss = self.validity_weight * validity;

        let (proximity, grad_prox) = proximity(cfs, origin, &self.weights, self.metric);
        loss += self.proximity_weight * proximity;
        grad.scaled_add(self.proximity_weight, &grad_prox);

        if self.diversity_weight > 0.0 && self.count > 1 {
            let (diversity, grad_div) = diversity(cfs, &self.weights, self.metric, self.count);
            loss += self.diversity_weight * diversity;
            grad.scaled_add(self.diversity_weight, &grad_div);
        }

        (loss, grad, pred)
    }
}

/// L1 subgradient; zero at zero, unlike `f32::signum`.
fn sign(d: f32) -> f32 {
    if d == 0.0 {
        0.0
    } else {
        d.signum()
    }
}

/// Margin ranking term against the 0.5 score threshold, summed over all
/// entries. Targets are one-hot; they are re-signed to ±1 so the target
/// class is pushed above the threshold and every other class below it.
pub(crate) fn margin_rank(pred: &Array2<f32>, targets: &Array2<f32>) -> (f32, Array2<f32>) {
    let mut value = 0.0;
    let mut grad = Array2::zeros(pred.raw_dim());
    for ((idx, &p), &t) in pred.indexed_iter().zip(targets.iter()) {
        let y = 2.0 * t - 1.0;
        let hinge = -y * (p - 0.5);
        if hinge > 0.0 {
            value += hinge;
            grad[idx] = -y;
        }
    }
    (value, grad)
}

/// Weighted distance between candidates and their origins, summed over
/// rows, with its gradient with respect to the candidates.
pub(crate) fn proximity(
    cfs: &Array2<f32>,
    origin: &Array2<f32>,
    weights: &Array1<f32>,
    metric: DistanceMetric,
) -> (f32, Array2<f32>) {
    let mut value = 0.0;
    let mut grad = Array2::zeros(cfs.raw_dim());
    for ((idx, &c), &o) in cfs.indexed_iter().zip(origin.iter()) {
        let w = weights[idx.1];
        let d = c - o;
        match metric {
            DistanceMetric::L1 => {
                value += w * d.abs();
                grad[idx] = w * sign(d);
            }
            DistanceMetric::L2 => {
                value += w * d * d;
                grad[idx] = 2.0 * w * d;
            }
            DistanceMetric::Cosine => unreachable!("rejected at construction"),
        }
    }
    (value, grad)
}

/// Repulsion among the `count` alternatives generated for the same
/// origin instance: the negated mean pairwise weighted distance within
/// each group, with its gradient.
pub(crate) fn diversity(
    cfs: &Array2<f32>,
    weights: &Array1<f32>,
    metric: DistanceMetric,
    count: usize,
) -> (f32, Array2<f32>) {
    let mut value = 0.0;
    let mut grad = Array2::zeros(cfs.raw_dim());
    let groups = cfs.nrows() / count;
    let scale = 1.0 / count as f32;
    for g in 0..groups {
        let start = g * count;
        for i in start..start + count {
            for j in start..start + count {
                for (col, &w) in weights.iter().enumerate() {
                    let d = cfs[[i, col]] - cfs[[j, col]];
                    match metric {
                        DistanceMetric::L1 => {
                            value -= scale * w * d.abs();
                            // the ordered-pair sum counts d(i,j) and
                            // d(j,i); the factor 2 charges both to row i
                            grad[[i, col]] -= 2.0 * scale * w * sign(d);
                        }
                        DistanceMetric::L2 => {
                            value -= scale * w * d * d;
                            grad[[i, col]] -= 4.0 * scale * w * d;
                        }
                        DistanceMetric::Cosine => unreachable!("rejected at construction"),
                    }
                }
            }
        }
    }
    (value, grad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, arr2};

    #[test]
    fn test_margin_rank_pushes_target_up() {
        let pred = arr2(&[[0.3, 0.7]]);
        let targets = arr2(&[[1.0, 0.0]]);
        let (value, grad) = margin_rank(&pred, &targets);
        // target class below threshold and non-target above: both active
        assert_relative_eq!(value, 0.2 + 0.2, epsilon = 1e-6);
        assert_eq!(grad[[0, 0]], -1.0);
        assert_eq!(grad[[0, 1]], 1.0);
    }

    #[test]
    fn test_margin_rank_zero_when_satisfied() {
        let pred = arr2(&[[0.8, 0.2]]);
        let targets = arr2(&[[1.0, 0.0]]);
        let (value, grad) = margin_rank(&pred, &targets);
        assert_eq!(value, 0.0);
        assert!(grad.iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_proximity_l1() {
        let cfs = arr2(&[[0.5, 0.2]]);
        let origin = arr2(&[[0.3, 0.4]]);
        let weights = arr1(&[1.0, 2.0]);
        let (value, grad) = proximity(&cfs, &origin, &weights, DistanceMetric::L1);
        assert_relative_eq!(value, 0.2 + 2.0 * 0.2, epsilon = 1e-5);
        assert_eq!(grad[[0, 0]], 1.0);
        assert_eq!(grad[[0, 1]], -2.0);
    }

    #[test]
    fn test_proximity_l2() {
        let cfs = arr2(&[[0.5]]);
        let origin = arr2(&[[0.3]]);
        let weights = arr1(&[1.0]);
        let (value, grad) = proximity(&cfs, &origin, &weights, DistanceMetric::L2);
        assert_relative_eq!(value, 0.04, epsilon = 1e-5);
        assert_relative_eq!(grad[[0, 0]], 0.4, epsilon = 1e-5);
    }

    #[test]
    fn test_diversity_repels_identical_candidates() {
        // Two groups of two; the first group's rows coincide.
        let cfs = arr2(&[[0.5, 0.5], [0.5, 0.5], [0.1, 0.9], [0.9, 0.1]]);
        let weights = arr1(&[1.0, 1.0]);
        let (value, grad) = diversity(&cfs, &weights, DistanceMetric::L1, 2);
        // identical rows contribute nothing; the distinct pair does
        assert!(value < 0.0);
        assert_eq!(grad[[0, 0]], 0.0);
        // row 2 is pushed away from row 3
        assert!(grad[[2, 0]] > 0.0);
        assert!(grad[[2, 1]] < 0.0);
    }

    #[test]
    fn test_diversity_gradient_matches_finite_differences() {
        let cfs = arr2(&[[0.2, 0.6], [0.7, 0.3]]);
        let weights = arr1(&[1.0, 0.5]);
        let (_, grad) = diversity(&cfs, &weights, DistanceMetric::L2, 2);
        let eps = 1e-3;
        for r in 0..2 {
            for c in 0..2 {
                let mut plus = cfs.clone();
                plus[[r, c]] += eps;
                let mut minus = cfs.clone();
                minus[[r, c]] -= eps;
                let (v_plus, _) = diversity(&plus, &weights, DistanceMetric::L2, 2);
                let (v_minus, _) = diversity(&minus, &weights, DistanceMetric::L2, 2);
                let numeric = (v_plus - v_minus) / (2.0 * eps);
                assert_relative_eq!(grad[[r, c]], numeric, epsilon = 1e-2);
            }
        }
    }

    #[test]
    fn test_cosine_metric_rejected() {
        let config = EngineConfig {
            metric: DistanceMetric::Cosine,
            ..EngineConfig::default()
        };
        let result = MixedLoss::new(&config, arr1(&[1.0]), 1);
        assert!(matches!(result, Err(Error::NotImplemented(_))));
    }
}
