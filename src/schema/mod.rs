//! Feature schema: per-feature descriptors and their encoded layout
//!
//! A [`FeatureSchema`] describes the raw tabular feature space: each
//! feature is either numerical (with a range and a quantization step) or
//! categorical (with a fixed category list). The schema also fixes the
//! encoded layout — numerical features occupy one normalized column,
//! categorical features expand to one dummy column per category.

mod range;

pub use range::{validate_ranges, FeatureRange, RangeMap};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The kind of a feature, together with its kind-specific metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureKind {
    /// A numerical feature with an inclusive value range and a
    /// quantization step (`precision`). Every valid value lies on the
    /// grid of multiples of `precision` within `[min, max]`.
    Numerical { min: f32, max: f32, precision: f32 },
    /// A categorical feature with a fixed, non-empty category list.
    Categorical { categories: Vec<String> },
}

/// Description of a single feature. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDescriptor {
    name: String,
    kind: FeatureKind,
}

impl FeatureDescriptor {
    /// Describe a numerical feature.
    ///
    /// Fails if `min > max` or `precision` is not strictly positive.
    pub fn numerical(
        name: impl Into<String>,
        min: f32,
        max: f32,
        precision: f32,
    ) -> Result<Self> {
        let name = name.into();
        if min > max {
            return Err(Error::Schema(format!(
                "feature `{name}`: min {min} exceeds max {max}"
            )));
        }
        if !(precision > 0.0) {
            return Err(Error::Schema(format!(
                "feature `{name}`: precision must be positive, got {precision}"
            )));
        }
        Ok(Self {
            name,
            kind: FeatureKind::Numerical { min, max, precision },
        })
    }

    /// Describe a categorical feature.
    ///
    /// Fails on an empty or duplicated category list.
    pub fn categorical<S: Into<String>>(
        name: impl Into<String>,
        categories: impl IntoIterator<Item = S>,
    ) -> Result<Self> {
        let name = name.into();
        let categories: Vec<String> = categories.into_iter().map(Into::into).collect();
        if categories.is_empty() {
            return Err(Error::Schema(format!(
                "feature `{name}`: empty category list"
            )));
        }
        for (i, cat) in categories.iter().enumerate() {
            if categories[..i].contains(cat) {
                return Err(Error::Schema(format!(
                    "feature `{name}`: duplicate category `{cat}`"
                )));
            }
        }
        Ok(Self {
            name,
            kind: FeatureKind::Categorical { categories },
        })
    }

    /// Feature name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind and kind-specific metadata.
    #[must_use]
    pub fn kind(&self) -> &FeatureKind {
        &self.kind
    }

    /// Whether this feature is numerical.
    #[must_use]
    pub fn is_numerical(&self) -> bool {
        matches!(self.kind, FeatureKind::Numerical { .. })
    }

    /// Number of encoded columns this feature occupies.
    #[must_use]
    pub fn width(&self) -> usize {
        match &self.kind {
            FeatureKind::Numerical { .. } => 1,
            FeatureKind::Categorical { categories } => categories.len(),
        }
    }

    /// Category list for categorical features, empty for numerical ones.
    #[must_use]
    pub fn categories(&self) -> &[String] {
        match &self.kind {
            FeatureKind::Numerical { .. } => &[],
            FeatureKind::Categorical { categories } => categories,
        }
    }

    /// Index of a category within this feature's category list.
    #[must_use]
    pub fn category_index(&self, category: &str) -> Option<usize> {
        self.categories().iter().position(|c| c == category)
    }
}

/// One raw feature cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureValue {
    /// Value of a numerical feature.
    Numeric(f32),
    /// Category name of a categorical feature.
    Category(String),
}

/// One raw row, in schema feature order.
pub type Instance = Vec<FeatureValue>;

/// An ordered, validated collection of feature descriptors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    features: Vec<FeatureDescriptor>,
}

impl FeatureSchema {
    /// Build a schema from descriptors.
    ///
    /// Fails on an empty feature list or duplicate feature names.
    pub fn new(features: Vec<FeatureDescriptor>) -> Result<Self> {
        if features.is_empty() {
            return Err(Error::Schema("empty feature list".to_string()));
        }
        for (i, f) in features.iter().enumerate() {
            if features[..i].iter().any(|g| g.name() == f.name()) {
                return Err(Error::Schema(format!(
                    "duplicate feature name `{}`",
                    f.name()
                )));
            }
        }
        Ok(Self { features })
    }

    /// Descriptors in schema order.
    #[must_use]
    pub fn features(&self) -> &[FeatureDescriptor] {
        &self.features
    }

    /// Number of raw features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the schema is empty (never true for a constructed schema).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Position of a feature by name.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.features.iter().position(|f| f.name() == name)
    }

    /// Descriptor lookup by name.
    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<&FeatureDescriptor> {
        self.features.iter().find(|f| f.name() == name)
    }

    /// Total encoded width (normalized numeric columns + dummy columns).
    #[must_use]
    pub fn encoded_width(&self) -> usize {
        self.features.iter().map(FeatureDescriptor::width).sum()
    }

    /// Encoded column range of each feature, in schema order.
    #[must_use]
    pub fn column_ranges(&self) -> Vec<std::ops::Range<usize>> {
        let mut ranges = Vec::with_capacity(self.features.len());
        let mut start = 0;
        for f in &self.features {
            ranges.push(start..start + f.width());
            start += f.width();
        }
        ranges
    }

    /// Feature index owning an encoded column.
    ///
    /// # Panics
    ///
    /// Panics if `column` is out of the encoded width.
    #[must_use]
    pub fn feature_of_column(&self, column: usize) -> usize {
        let mut start = 0;
        for (i, f) in self.features.iter().enumerate() {
            if column < start + f.width() {
                return i;
            }
            start += f.width();
        }
        panic!("column {column} out of encoded width {}", start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> FeatureSchema {
        FeatureSchema::new(vec![
            FeatureDescriptor::numerical("income", 0.0, 100_000.0, 100.0).unwrap(),
            FeatureDescriptor::categorical("job", ["clerk", "manager"]).unwrap(),
            FeatureDescriptor::numerical("age", 18.0, 90.0, 1.0).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn test_numerical_descriptor_validation() {
        assert!(FeatureDescriptor::numerical("x", 1.0, 0.0, 1.0).is_err());
        assert!(FeatureDescriptor::numerical("x", 0.0, 1.0, 0.0).is_err());
        assert!(FeatureDescriptor::numerical("x", 0.0, 1.0, -0.5).is_err());
        assert!(FeatureDescriptor::numerical("x", 0.0, 0.0, 1.0).is_ok());
    }

    #[test]
    fn test_categorical_descriptor_validation() {
        let empty: [&str; 0] = [];
        assert!(FeatureDescriptor::categorical("x", empty).is_err());
        assert!(FeatureDescriptor::categorical("x", ["a", "a"]).is_err());
        assert!(FeatureDescriptor::categorical("x", ["a", "b"]).is_ok());
    }

    #[test]
    fn test_schema_rejects_duplicates() {
        let result = FeatureSchema::new(vec![
            FeatureDescriptor::numerical("x", 0.0, 1.0, 0.1).unwrap(),
            FeatureDescriptor::numerical("x", 0.0, 2.0, 0.1).unwrap(),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_schema_rejects_empty() {
        assert!(FeatureSchema::new(Vec::new()).is_err());
    }

    #[test]
    fn test_encoded_layout() {
        let s = schema();
        assert_eq!(s.encoded_width(), 4);
        assert_eq!(s.column_ranges(), vec![0..1, 1..3, 3..4]);
        assert_eq!(s.feature_of_column(0), 0);
        assert_eq!(s.feature_of_column(1), 1);
        assert_eq!(s.feature_of_column(2), 1);
        assert_eq!(s.feature_of_column(3), 2);
    }

    #[test]
    fn test_lookups() {
        let s = schema();
        assert_eq!(s.index_of("age"), Some(2));
        assert_eq!(s.index_of("missing"), None);
        let job = s.descriptor("job").unwrap();
        assert_eq!(job.category_index("manager"), Some(1));
        assert_eq!(job.category_index("farmer"), None);
        assert!(!job.is_numerical());
        assert_eq!(job.width(), 2);
    }
}
