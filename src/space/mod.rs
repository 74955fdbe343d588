//! Tabular feature space: raw rows ↔ normalized dummy-expanded vectors
//!
//! [`TabularSpace`] owns the schema, the class list of the prediction
//! target, and the per-column distance weights. Encoding maps numerical
//! features onto [0, 1] by min-max scaling and expands categorical
//! features to one-hot dummy groups; decoding inverts both, snapping
//! numerical values back onto their quantization grid and categorical
//! groups onto their arg-max category.

use ndarray::{Array1, Array2, ArrayView1};

use crate::schema::{
    FeatureKind, FeatureRange, FeatureSchema, FeatureValue, Instance, RangeMap,
};
use crate::{Error, Result};

/// Encoder/decoder and distance-weight provider for one tabular dataset.
#[derive(Debug, Clone)]
pub struct TabularSpace {
    schema: FeatureSchema,
    classes: Vec<String>,
    weights: Array1<f32>,
}

impl TabularSpace {
    /// Build a space with unit distance weights.
    pub fn new(schema: FeatureSchema, classes: Vec<String>) -> Result<Self> {
        if classes.len() < 2 {
            return Err(Error::Schema(format!(
                "need at least 2 target classes, got {}",
                classes.len()
            )));
        }
        let width = schema.encoded_width();
        Ok(Self {
            schema,
            classes,
            weights: Array1::ones(width),
        })
    }

    /// Build a space whose numerical distance weights are derived from
    /// the training distribution: `1 / (1 + MAD)` of each normalized
    /// numerical column, rounded to three decimals. Dummy columns keep
    /// unit weight. Changes to naturally dispersed features are thereby
    /// down-weighted in the proximity term.
    pub fn fit(schema: FeatureSchema, classes: Vec<String>, data: &[Instance]) -> Result<Self> {
        let mut space = Self::new(schema, classes)?;
        if data.is_empty() {
            return Ok(space);
        }
        let encoded = space.encode_batch(data)?;
        let ranges = space.schema.column_ranges();
        for (feature, desc) in space.schema.features().iter().enumerate() {
            if !desc.is_numerical() {
                continue;
            }
            let col = ranges[feature].start;
            let mut values: Vec<f32> = encoded.column(col).to_vec();
            let med = median(&mut values);
            let mut deviations: Vec<f32> = encoded
                .column(col)
                .iter()
                .map(|v| (v - med).abs())
                .collect();
            let mad = median(&mut deviations);
            space.weights[col] = (1.0 / (1.0 + mad) * 1000.0).round() / 1000.0;
        }
        Ok(space)
    }

    /// Schema of the raw feature space.
    #[must_use]
    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Target class names, in model output order.
    #[must_use]
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Number of target classes.
    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    /// Total encoded width.
    #[must_use]
    pub fn encoded_width(&self) -> usize {
        self.schema.encoded_width()
    }

    /// Per-encoded-column distance weights.
    #[must_use]
    pub fn distance_weights(&self) -> &Array1<f32> {
        &self.weights
    }

    /// Encode one raw row.
    pub fn encode(&self, instance: &Instance) -> Result<Array1<f32>> {
        if instance.len() != self.schema.len() {
            return Err(Error::Instance(format!(
                "expected {} features, got {}",
                self.schema.len(),
                instance.len()
            )));
        }
        let mut out = Array1::zeros(self.encoded_width());
        let mut col = 0;
        for (desc, value) in self.schema.features().iter().zip(instance) {
            match (desc.kind(), value) {
                (FeatureKind::Numerical { min, max, .. }, FeatureValue::Numeric(v)) => {
                    let span = max - min;
                    out[col] = if span > 0.0 { (v - min) / span } else { 0.0 };
                    col += 1;
                }
                (FeatureKind::Categorical { categories }, FeatureValue::Category(cat)) => {
                    let idx = desc.category_index(cat).ok_or_else(|| {
                        Error::Instance(format!(
                            "feature `{}`: unknown category `{cat}`",
                            desc.name()
                        ))
                    })?;
                    out[col + idx] = 1.0;
                    col += categories.len();
                }
                (FeatureKind::Numerical { .. }, FeatureValue::Category(_)) => {
                    return Err(Error::Instance(format!(
                        "feature `{}` is numerical but got a category",
                        desc.name()
                    )));
                }
                (FeatureKind::Categorical { .. }, FeatureValue::Numeric(_)) => {
                    return Err(Error::Instance(format!(
                        "feature `{}` is categorical but got a number",
                        desc.name()
                    )));
                }
            }
        }
        Ok(out)
    }

    /// Encode a batch of raw rows into a (rows × width) matrix.
    pub fn encode_batch(&self, instances: &[Instance]) -> Result<Array2<f32>> {
        let mut out = Array2::zeros((instances.len(), self.encoded_width()));
        for (i, instance) in instances.iter().enumerate() {
            let row = self.encode(instance)?;
            out.row_mut(i).assign(&row);
        }
        Ok(out)
    }

    /// Decode one encoded row back to raw values. Numerical values are
    /// denormalized, snapped to the nearest multiple of the feature's
    /// precision, and clamped into the declared range; categorical dummy
    /// groups collapse to their arg-max category.
    #[must_use]
    pub fn decode(&self, row: ArrayView1<'_, f32>) -> Instance {
        let mut out = Vec::with_capacity(self.schema.len());
        let mut col = 0;
        for desc in self.schema.features() {
            match desc.kind() {
                FeatureKind::Numerical { min, max, precision } => {
                    let raw = min + row[col] * (max - min);
                    let snapped = (raw / precision).round() * precision;
                    out.push(FeatureValue::Numeric(snapped.clamp(*min, *max)));
                    col += 1;
                }
                FeatureKind::Categorical { categories } => {
                    let group = row.slice(ndarray::s![col..col + categories.len()]);
                    let idx = argmax(group);
                    out.push(FeatureValue::Category(categories[idx].clone()));
                    col += categories.len();
                }
            }
        }
        out
    }

    /// Decode a batch of encoded rows.
    #[must_use]
    pub fn decode_batch(&self, rows: &Array2<f32>) -> Vec<Instance> {
        rows.outer_iter().map(|row| self.decode(row)).collect()
    }

    /// Decode→encode round trip: forces dummy groups back onto one-hot
    /// points and numerical columns onto their quantization grid.
    pub fn reload(&self, rows: &Array2<f32>) -> Result<Array2<f32>> {
        self.encode_batch(&self.decode_batch(rows))
    }

    /// The widest admissible range of every feature: full numeric bounds
    /// and complete category lists.
    #[must_use]
    pub fn universal_range(&self) -> RangeMap {
        let mut out = RangeMap::new();
        for desc in self.schema.features() {
            let range = match desc.kind() {
                FeatureKind::Numerical { min, max, .. } => FeatureRange::numeric(*min, *max),
                FeatureKind::Categorical { categories } => {
                    FeatureRange::Categories(categories.clone())
                }
            };
            out.insert(desc.name().to_string(), range);
        }
        out
    }

    /// Select the rows of `data` that fall inside `ranges`. Numerical
    /// bounds are half-open (`min ≤ v < max`); categorical constraints
    /// are membership tests.
    pub fn filter(&self, data: &[Instance], ranges: &RangeMap) -> Result<Vec<Instance>> {
        crate::schema::validate_ranges(&self.schema, ranges)?;
        let mut out = Vec::new();
        'rows: for instance in data {
            if instance.len() != self.schema.len() {
                return Err(Error::Instance(format!(
                    "expected {} features, got {}",
                    self.schema.len(),
                    instance.len()
                )));
            }
            for (desc, value) in self.schema.features().iter().zip(instance) {
                let Some(range) = ranges.get(desc.name()) else {
                    continue;
                };
                match (range, value) {
                    (FeatureRange::Numeric { min, max }, FeatureValue::Numeric(v)) => {
                        if min.is_some_and(|lo| *v < lo) || max.is_some_and(|hi| *v >= hi) {
                            continue 'rows;
                        }
                    }
                    (FeatureRange::Categories(allowed), FeatureValue::Category(cat)) => {
                        if !allowed.contains(cat) {
                            continue 'rows;
                        }
                    }
                    _ => {
                        return Err(Error::Instance(format!(
                            "feature `{}`: value kind does not match range kind",
                            desc.name()
                        )));
                    }
                }
            }
            out.push(instance.clone());
        }
        Ok(out)
    }
}

/// Index of the first maximum in a row.
#[must_use]
pub(crate) fn argmax(row: ArrayView1<'_, f32>) -> usize {
    let mut best = 0;
    let mut best_val = f32::NEG_INFINITY;
    for (i, &v) in row.iter().enumerate() {
        if v > best_val {
            best = i;
            best_val = v;
        }
    }
    best
}

fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
