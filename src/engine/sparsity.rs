//! Sparsity selection: collapse the mask to the top-k changed features
//!
//! When a search caps the number of changed features, a first
//! optimization run over the full mask is used only to rank features by
//! how much each candidate actually moved them; the mask is then rebuilt
//! per row from the k highest-ranked features and the real optimization
//! runs against that tightened mask, restarting from fresh candidates.

use ndarray::{Array1, Array2};

use super::prepare::change_mask_row;
use super::setting::SearchSetting;
use crate::space::TabularSpace;
use crate::Result;

/// Rank features per row by weighted absolute change between converged
/// candidates and origins, and return each row's top-k feature indices.
///
/// Both sides go through a decode→encode round trip first so the
/// comparison happens between decodable points. A categorical feature
/// collapses to a single changed/unchanged signal via the max over its
/// dummy group. Ties break toward the earlier feature, so rankings are
/// deterministic for a fixed seed.
pub(crate) fn topk_features(
    space: &TabularSpace,
    cfs: &Array2<f32>,
    origin: &Array2<f32>,
    weights: &Array1<f32>,
    k: usize,
) -> Result<Vec<Vec<usize>>> {
    let cfs = space.reload(cfs)?;
    let origin = space.reload(origin)?;
    let schema = space.schema();
    let column_ranges = schema.column_ranges();

    let mut out = Vec::with_capacity(cfs.nrows());
    for r in 0..cfs.nrows() {
        let mut scored: Vec<(usize, f32)> = Vec::with_capacity(schema.len());
        for (f, cols) in column_ranges.iter().enumerate() {
            let mut score = 0.0f32;
            for c in cols.clone() {
                let d = (cfs[[r, c]] - origin[[r, c]]).abs() * weights[c];
                score = score.max(d);
            }
            scored.push((f, score));
        }
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        out.push(scored.into_iter().take(k).map(|(f, _)| f).collect());
    }
    Ok(out)
}

/// Rebuild the change mask per row from each row's selected features,
/// re-applying the setting's category restrictions.
pub(crate) fn masks_for(
    space: &TabularSpace,
    setting: &SearchSetting,
    selected: &[Vec<usize>],
) -> Array2<f32> {
    let schema = space.schema();
    let mut mask = Array2::zeros((selected.len(), space.encoded_width()));
    for (r, features) in selected.iter().enumerate() {
        let names: Vec<String> = features
            .iter()
            .map(|&f| schema.features()[f].name().to_string())
            .collect();
        let row = change_mask_row(space, setting, Some(&names));
        mask.row_mut(r).assign(&row);
    }
    mask
}
