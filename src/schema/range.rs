//! Per-feature value-range constraints
//!
//! A [`RangeMap`] narrows the values a search may assign (or, for data
//! subsets, select). Numerical features take optional min/max bounds;
//! categorical features take an allowed-category list.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{FeatureKind, FeatureSchema};
use crate::{Error, Result};

/// A constraint on one feature's values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureRange {
    /// Bounds on a numerical feature. A missing side is unconstrained.
    Numeric { min: Option<f32>, max: Option<f32> },
    /// Allowed categories of a categorical feature.
    Categories(Vec<String>),
}

impl FeatureRange {
    /// Bounded-below-and-above numeric range.
    #[must_use]
    pub fn numeric(min: f32, max: f32) -> Self {
        FeatureRange::Numeric {
            min: Some(min),
            max: Some(max),
        }
    }

    /// Numeric range with only a lower bound.
    #[must_use]
    pub fn at_least(min: f32) -> Self {
        FeatureRange::Numeric {
            min: Some(min),
            max: None,
        }
    }

    /// Numeric range with only an upper bound.
    #[must_use]
    pub fn at_most(max: f32) -> Self {
        FeatureRange::Numeric {
            min: None,
            max: Some(max),
        }
    }

    /// Allowed-category constraint.
    #[must_use]
    pub fn categories<S: Into<String>>(allowed: impl IntoIterator<Item = S>) -> Self {
        FeatureRange::Categories(allowed.into_iter().map(Into::into).collect())
    }
}

/// Constraints keyed by feature name. Features absent from the map are
/// unconstrained. Ordered so that serialized forms are stable.
pub type RangeMap = BTreeMap<String, FeatureRange>;

/// Check a range map against a schema: every named feature must exist,
/// the constraint kind must match the feature kind, numeric bounds must
/// be ordered, and category lists must be non-empty subsets of the
/// descriptor's categories.
pub fn validate_ranges(schema: &FeatureSchema, ranges: &RangeMap) -> Result<()> {
    for (name, range) in ranges {
        let desc = schema
            .descriptor(name)
            .ok_or_else(|| Error::InvalidRange(format!("unknown feature `{name}`")))?;
        match (range, desc.kind()) {
            (FeatureRange::Numeric { min, max }, FeatureKind::Numerical { .. }) => {
                if let (Some(lo), Some(hi)) = (min, max) {
                    if lo > hi {
                        return Err(Error::InvalidRange(format!(
                            "feature `{name}`: min {lo} exceeds max {hi}"
                        )));
                    }
                }
            }
            (FeatureRange::Categories(allowed), FeatureKind::Categorical { .. }) => {
                if allowed.is_empty() {
                    return Err(Error::InvalidRange(format!(
                        "feature `{name}`: empty allowed-category list"
                    )));
                }
                for cat in allowed {
                    if desc.category_index(cat).is_none() {
                        return Err(Error::InvalidRange(format!(
                            "feature `{name}`: unknown category `{cat}`"
                        )));
                    }
                }
            }
            (FeatureRange::Numeric { .. }, FeatureKind::Categorical { .. }) => {
                return Err(Error::InvalidRange(format!(
                    "feature `{name}` is categorical but got a numeric range"
                )));
            }
            (FeatureRange::Categories(_), FeatureKind::Numerical { .. }) => {
                return Err(Error::InvalidRange(format!(
                    "feature `{name}` is numerical but got a category set"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FeatureDescriptor;

    fn schema() -> FeatureSchema {
        FeatureSchema::new(vec![
            FeatureDescriptor::numerical("income", 0.0, 1000.0, 1.0).unwrap(),
            FeatureDescriptor::categorical("job", ["clerk", "manager"]).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn test_valid_ranges() {
        let s = schema();
        let mut ranges = RangeMap::new();
        ranges.insert("income".to_string(), FeatureRange::numeric(100.0, 500.0));
        ranges.insert("job".to_string(), FeatureRange::categories(["manager"]));
        assert!(validate_ranges(&s, &ranges).is_ok());
    }

    #[test]
    fn test_unknown_feature() {
        let s = schema();
        let mut ranges = RangeMap::new();
        ranges.insert("salary".to_string(), FeatureRange::at_most(10.0));
        assert!(validate_ranges(&s, &ranges).is_err());
    }

    #[test]
    fn test_kind_mismatch() {
        let s = schema();
        let mut ranges = RangeMap::new();
        ranges.insert("job".to_string(), FeatureRange::numeric(0.0, 1.0));
        assert!(validate_ranges(&s, &ranges).is_err());

        let mut ranges = RangeMap::new();
        ranges.insert("income".to_string(), FeatureRange::categories(["low"]));
        assert!(validate_ranges(&s, &ranges).is_err());
    }

    #[test]
    fn test_inverted_bounds() {
        let s = schema();
        let mut ranges = RangeMap::new();
        ranges.insert("income".to_string(), FeatureRange::numeric(500.0, 100.0));
        assert!(validate_ranges(&s, &ranges).is_err());
    }

    #[test]
    fn test_unknown_category() {
        let s = schema();
        let mut ranges = RangeMap::new();
        ranges.insert("job".to_string(), FeatureRange::categories(["farmer"]));
        assert!(validate_ranges(&s, &ranges).is_err());
    }
}
