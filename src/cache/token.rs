//! Canonical range tokens
//!
//! Two differently-phrased range pairs must hit the same cache slot when
//! they are semantically identical. Canonicalization maps every supplied
//! range onto the universal per-feature range: numerical bounds are
//! clipped into the feature's declared range and rounded to integer
//! multiples of its precision, category lists become ordered sets, and
//! features left unconstrained are filled in with their universal range.
//! Equality of the resulting token is exactly semantic equivalence; a
//! strictly tighter sub-range yields a different token.

use std::collections::{BTreeMap, BTreeSet};

use crate::schema::{validate_ranges, FeatureKind, FeatureRange, FeatureSchema, RangeMap};
use crate::Result;

/// Canonical form of one feature's constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum CanonicalFeatureRange {
    /// Inclusive bounds in integer precision units.
    Numeric { min: i64, max: i64 },
    /// Allowed categories, compared as a set.
    Categories(BTreeSet<String>),
}

/// Canonical form of a (data-range, counterfactual-range) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RangeToken {
    data: BTreeMap<String, CanonicalFeatureRange>,
    cf: BTreeMap<String, CanonicalFeatureRange>,
}

impl RangeToken {
    /// Canonicalize a range pair against a schema.
    pub fn new(schema: &FeatureSchema, data_range: &RangeMap, cf_range: &RangeMap) -> Result<Self> {
        Ok(Self {
            data: canonicalize(schema, data_range)?,
            cf: canonicalize(schema, cf_range)?,
        })
    }
}

/// Canonicalize one range map: every schema feature appears, bounds are
/// clipped against the universal range and snapped to precision units.
pub(crate) fn canonicalize(
    schema: &FeatureSchema,
    ranges: &RangeMap,
) -> Result<BTreeMap<String, CanonicalFeatureRange>> {
    validate_ranges(schema, ranges)?;
    let mut out = BTreeMap::new();
    for desc in schema.features() {
        let canonical = match desc.kind() {
            FeatureKind::Numerical { min, max, precision } => {
                let mut lo = units(*min, *precision);
                let mut hi = units(*max, *precision);
                if let Some(FeatureRange::Numeric { min: r_lo, max: r_hi }) =
                    ranges.get(desc.name())
                {
                    if let Some(v) = r_lo {
                        lo = units(*v, *precision).max(lo);
                    }
                    if let Some(v) = r_hi {
                        hi = units(*v, *precision).min(hi);
                    }
                }
                CanonicalFeatureRange::Numeric { min: lo, max: hi }
            }
            FeatureKind::Categorical { categories } => {
                let allowed: BTreeSet<String> = match ranges.get(desc.name()) {
                    Some(FeatureRange::Categories(allowed)) => {
                        allowed.iter().cloned().collect()
                    }
                    _ => categories.iter().cloned().collect(),
                };
                CanonicalFeatureRange::Categories(allowed)
            }
        };
        out.insert(desc.name().to_string(), canonical);
    }
    Ok(out)
}

fn units(value: f32, precision: f32) -> i64 {
    (value / precision).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FeatureDescriptor;

    fn schema() -> FeatureSchema {
        FeatureSchema::new(vec![
            FeatureDescriptor::numerical("income", 0.0, 1000.0, 1.0).unwrap(),
            FeatureDescriptor::categorical("job", ["clerk", "manager", "engineer"]).unwrap(),
        ])
        .unwrap()
    }

    fn token(data: &RangeMap, cf: &RangeMap) -> RangeToken {
        RangeToken::new(&schema(), data, cf).unwrap()
    }

    #[test]
    fn test_sub_precision_noise_collapses() {
        let mut a = RangeMap::new();
        a.insert("income".to_string(), FeatureRange::at_most(500.0));
        let mut b = RangeMap::new();
        b.insert("income".to_string(), FeatureRange::at_most(500.04));
        let empty = RangeMap::new();
        assert_eq!(token(&empty, &a), token(&empty, &b));
    }

    #[test]
    fn test_tighter_range_stays_distinct() {
        let mut a = RangeMap::new();
        a.insert("income".to_string(), FeatureRange::at_most(500.0));
        let mut b = RangeMap::new();
        b.insert("income".to_string(), FeatureRange::at_most(400.0));
        let empty = RangeMap::new();
        assert_ne!(token(&empty, &a), token(&empty, &b));
    }

    #[test]
    fn test_unconstrained_equals_explicit_universal() {
        let empty = RangeMap::new();
        let mut explicit = RangeMap::new();
        explicit.insert("income".to_string(), FeatureRange::numeric(0.0, 1000.0));
        explicit.insert(
            "job".to_string(),
            FeatureRange::categories(["clerk", "manager", "engineer"]),
        );
        assert_eq!(token(&empty, &empty), token(&explicit, &empty));
    }

    #[test]
    fn test_out_of_range_bounds_clip_to_universal() {
        let empty = RangeMap::new();
        let mut wide = RangeMap::new();
        wide.insert("income".to_string(), FeatureRange::numeric(-500.0, 2000.0));
        assert_eq!(token(&empty, &wide), token(&empty, &empty));
    }

    #[test]
    fn test_category_order_is_irrelevant() {
        let empty = RangeMap::new();
        let mut a = RangeMap::new();
        a.insert(
            "job".to_string(),
            FeatureRange::categories(["manager", "clerk"]),
        );
        let mut b = RangeMap::new();
        b.insert(
            "job".to_string(),
            FeatureRange::categories(["clerk", "manager"]),
        );
        assert_eq!(token(&a, &empty), token(&b, &empty));
    }

    #[test]
    fn test_data_and_cf_sides_are_independent() {
        let empty = RangeMap::new();
        let mut r = RangeMap::new();
        r.insert("income".to_string(), FeatureRange::at_most(500.0));
        assert_ne!(token(&r, &empty), token(&empty, &r));
    }

    #[test]
    fn test_invalid_range_rejected() {
        let mut bad = RangeMap::new();
        bad.insert("salary".to_string(), FeatureRange::at_most(1.0));
        assert!(RangeToken::new(&schema(), &bad, &RangeMap::new()).is_err());
    }
}
