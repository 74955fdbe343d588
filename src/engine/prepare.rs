//! Candidate preparation: masks, bounds, targets, initialization
//!
//! Builds the in-flight state for one mini-batch: the replicated origin
//! matrix, the per-row change mask, the encoded clip bounds derived from
//! the value ranges, the one-hot target matrix, and the perturbed
//! initial candidates.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::Rng;

use super::config::Perturbation;
use super::setting::{DesiredClass, SearchSetting};
use crate::model::DifferentiableModel;
use crate::schema::{FeatureKind, FeatureRange};
use crate::space::{argmax, TabularSpace};

/// Build the change mask over the encoded width for one search request.
///
/// A column is changeable (1.0) when its feature is in the changeable
/// set and, for categorical features, its category is not banned by a
/// range restriction. A categorical feature pinned to a single allowed
/// category has no remaining freedom and masks to 0 entirely.
pub(crate) fn change_mask_row(
    space: &TabularSpace,
    setting: &SearchSetting,
    changeable_override: Option<&[String]>,
) -> Array1<f32> {
    let schema = space.schema();
    let default_names;
    let names: &[String] = match changeable_override {
        Some(names) => names,
        None => {
            default_names = setting.changeable_features(schema);
            &default_names
        }
    };
    let mut mask = Array1::zeros(space.encoded_width());
    for (desc, cols) in schema.features().iter().zip(schema.column_ranges()) {
        if !names.contains(&desc.name().to_string()) {
            continue;
        }
        match setting.ranges.get(desc.name()) {
            Some(FeatureRange::Categories(allowed)) => {
                if allowed.len() < 2 {
                    continue; // pinned: nothing left to change
                }
                for (i, cat) in desc.categories().iter().enumerate() {
                    if allowed.contains(cat) {
                        mask[cols.start + i] = 1.0;
                    }
                }
            }
            _ => {
                for c in cols {
                    mask[c] = 1.0;
                }
            }
        }
    }
    mask
}

/// Encoded clip bounds for one search request, defaulting to the [0, 1]
/// normalized box. Numeric range bounds are normalized into it; banned
/// category dummies get an upper bound of 0 so projection evicts them.
pub(crate) fn bounds(space: &TabularSpace, setting: &SearchSetting) -> (Array1<f32>, Array1<f32>) {
    let schema = space.schema();
    let width = space.encoded_width();
    let mut lo = Array1::zeros(width);
    let mut hi = Array1::ones(width);
    for (desc, cols) in schema.features().iter().zip(schema.column_ranges()) {
        let Some(range) = setting.ranges.get(desc.name()) else {
            continue;
        };
        match (range, desc.kind()) {
            (FeatureRange::Numeric { min, max }, FeatureKind::Numerical { min: f_min, max: f_max, .. }) => {
                let span = f_max - f_min;
                if span <= 0.0 {
                    continue;
                }
                if let Some(v) = min {
                    lo[cols.start] = ((v - f_min) / span).clamp(0.0, 1.0);
                }
                if let Some(v) = max {
                    hi[cols.start] = ((v - f_min) / span).clamp(0.0, 1.0);
                }
            }
            (FeatureRange::Categories(allowed), FeatureKind::Categorical { categories }) => {
                for (i, cat) in categories.iter().enumerate() {
                    if !allowed.contains(cat) {
                        hi[cols.start + i] = 0.0;
                    }
                }
            }
            _ => {}
        }
    }
    (lo, hi)
}

/// Clip candidates into the bounds, feature by feature. Bounds derived
/// from value ranges only apply to features the row's mask leaves
/// changeable; frozen features clip to the universal [0, 1] box so a
/// range on an unchangeable feature can never move it off its origin.
pub(crate) fn clip_masked(
    space: &TabularSpace,
    cfs: &mut Array2<f32>,
    mask: &Array2<f32>,
    lo: &Array1<f32>,
    hi: &Array1<f32>,
) {
    let column_ranges = space.schema().column_ranges();
    for r in 0..cfs.nrows() {
        for cols in &column_ranges {
            let active = cols.clone().any(|c| mask[[r, c]] > 0.0);
            for c in cols.clone() {
                let (l, h) = if active { (lo[c], hi[c]) } else { (0.0, 1.0) };
                cfs[[r, c]] = cfs[[r, c]].clamp(l, h);
            }
        }
    }
}

/// Replicate every row of `x` `count` times, preserving order.
pub(crate) fn replicate(x: &Array2<f32>, count: usize) -> Array2<f32> {
    let mut out = Array2::zeros((x.nrows() * count, x.ncols()));
    for (i, row) in x.outer_iter().enumerate() {
        for k in 0..count {
            out.row_mut(i * count + k).assign(&row);
        }
    }
    out
}

/// One-hot target matrix for the replicated batch.
///
/// `Opposite` runs the model once on the replicated originals and flips
/// each prediction: the complementary class for binary tasks, the
/// lowest-scored class otherwise. Explicit labels are replicated
/// per-instance.
pub(crate) fn target_matrix(
    model: &dyn DifferentiableModel,
    origin_replicated: &Array2<f32>,
    setting: &SearchSetting,
) -> Array2<f32> {
    let n_classes = model.n_classes();
    let rows = origin_replicated.nrows();
    let mut targets = Array2::zeros((rows, n_classes));
    match &setting.desired {
        DesiredClass::Opposite => {
            let pred = model.forward(origin_replicated);
            for (r, row) in pred.outer_iter().enumerate() {
                let predicted = argmax(row);
                let target = if n_classes == 2 {
                    1 - predicted
                } else {
                    // multi-class fallback: the least likely class
                    let mut best = 0;
                    let mut best_val = f32::INFINITY;
                    for (i, &v) in row.iter().enumerate() {
                        if v < best_val {
                            best = i;
                            best_val = v;
                        }
                    }
                    best
                };
                targets[[r, target]] = 1.0;
            }
        }
        DesiredClass::Explicit(labels) => {
            for (i, &label) in labels.iter().enumerate() {
                for k in 0..setting.count {
                    targets[[i * setting.count + k, label]] = 1.0;
                }
            }
        }
    }
    targets
}

/// Perturbed initial candidates.
///
/// Changeable numeric columns start at the origin plus small uniform
/// noise (a tenth of the normalized range at most) so gradient descent
/// does not start in the flat region at the origin itself. Changeable
/// dummy columns start at 0.5 (`Unit`), at a random simplex point over
/// the allowed categories (`Random`), or untouched (`None`).
/// Frozen columns are copied unmodified.
pub(crate) fn init_candidates(
    space: &TabularSpace,
    origin_replicated: &Array2<f32>,
    mask: &Array2<f32>,
    perturbation: Perturbation,
    rng: &mut StdRng,
) -> Array2<f32> {
    let mut cfs = origin_replicated.clone();
    let schema = space.schema();
    let column_ranges = schema.column_ranges();
    for r in 0..cfs.nrows() {
        for (desc, cols) in schema.features().iter().zip(&column_ranges) {
            if desc.is_numerical() {
                let c = cols.start;
                if mask[[r, c]] > 0.0 {
                    cfs[[r, c]] += rng.random::<f32>() * 0.1;
                }
            } else {
                let active: Vec<usize> =
                    cols.clone().filter(|&c| mask[[r, c]] > 0.0).collect();
                if active.is_empty() {
                    continue;
                }
                match perturbation {
                    Perturbation::Unit => {
                        for &c in &active {
                            cfs[[r, c]] = 0.5;
                        }
                    }
                    Perturbation::Random => {
                        let draws: Vec<f32> =
                            active.iter().map(|_| rng.random::<f32>().max(1e-6)).collect();
                        let sum: f32 = draws.iter().sum();
                        for (&c, &d) in active.iter().zip(&draws) {
                            cfs[[r, c]] = d / sum;
                        }
                    }
                    Perturbation::None => {}
                }
            }
        }
    }
    cfs
}

/// Seed the perturbation RNG from the configuration.
pub(crate) fn rng_from_seed(seed: Option<u64>) -> StdRng {
    use rand::SeedableRng;
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// Check a batch against its targets: valid rows predict their target
/// class.
pub(crate) fn valid_rows(pred: &Array2<f32>, targets: &Array2<f32>) -> Vec<bool> {
    pred.outer_iter()
        .zip(targets.outer_iter())
        .map(|(p, t)| argmax(p) == argmax(t))
        .collect()
}

/// Convenience wrapper for the all-valid early-stop check.
pub(crate) fn all_valid(pred: &Array2<f32>, targets: &Array2<f32>) -> bool {
    valid_rows(pred, targets).into_iter().all(|v| v)
}
