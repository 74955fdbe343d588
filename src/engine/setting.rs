//! Search settings
//!
//! A [`SearchSetting`] fully specifies one counterfactual search request:
//! which features may change, how many may change, how many alternatives
//! to produce per instance, admissible value ranges, and the desired
//! classes. Settings compare by value.

use serde::{Deserialize, Serialize};

use crate::schema::{validate_ranges, FeatureSchema, RangeMap};
use crate::{Error, Result};

/// Which features a search may modify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Changeable {
    /// Every feature is changeable.
    All,
    /// Only the named features are changeable.
    Features(Vec<String>),
}

/// Desired classes of the generated counterfactuals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DesiredClass {
    /// Flip the model's current prediction: the complementary class for
    /// binary tasks, the lowest-scored class otherwise.
    Opposite,
    /// Explicit per-instance target class indices.
    Explicit(Vec<usize>),
}

/// One fully-specified search request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSetting {
    /// Changeable-feature selection. Default: [`Changeable::All`].
    pub changeable: Changeable,
    /// Cap on how many features may differ from the origin; `None`
    /// leaves the count unconstrained.
    pub sparsity: Option<usize>,
    /// Counterfactuals generated per instance. Default: 1.
    pub count: usize,
    /// Admissible value ranges of the counterfactuals.
    pub ranges: RangeMap,
    /// Desired classes. Default: [`DesiredClass::Opposite`].
    pub desired: DesiredClass,
}

impl Default for SearchSetting {
    fn default() -> Self {
        Self {
            changeable: Changeable::All,
            sparsity: None,
            count: 1,
            ranges: RangeMap::new(),
            desired: DesiredClass::Opposite,
        }
    }
}

impl SearchSetting {
    /// Default setting: all features changeable, one unconstrained
    /// counterfactual per instance, opposite class.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the changeable features.
    #[must_use]
    pub fn with_changeable<S: Into<String>>(
        mut self,
        features: impl IntoIterator<Item = S>,
    ) -> Self {
        self.changeable = Changeable::Features(features.into_iter().map(Into::into).collect());
        self
    }

    /// Cap the number of changed features.
    #[must_use]
    pub fn with_sparsity(mut self, k: usize) -> Self {
        self.sparsity = Some(k);
        self
    }

    /// Number of counterfactuals per instance.
    #[must_use]
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    /// Admissible value ranges.
    #[must_use]
    pub fn with_ranges(mut self, ranges: RangeMap) -> Self {
        self.ranges = ranges;
        self
    }

    /// Explicit per-instance target classes.
    #[must_use]
    pub fn with_desired(mut self, labels: Vec<usize>) -> Self {
        self.desired = DesiredClass::Explicit(labels);
        self
    }

    /// Names of the changeable features, in schema order.
    #[must_use]
    pub fn changeable_features(&self, schema: &FeatureSchema) -> Vec<String> {
        match &self.changeable {
            Changeable::All => schema
                .features()
                .iter()
                .map(|f| f.name().to_string())
                .collect(),
            Changeable::Features(names) => schema
                .features()
                .iter()
                .map(|f| f.name().to_string())
                .filter(|name| names.contains(name))
                .collect(),
        }
    }

    /// Whether a sparsity-selection pre-pass is required: the cap must
    /// be tighter than the changeable-feature count.
    #[must_use]
    pub fn needs_sparsity_pass(&self, schema: &FeatureSchema) -> bool {
        match self.sparsity {
            Some(k) => k < self.changeable_features(schema).len(),
            None => false,
        }
    }

    /// Validate the setting against a schema, class count, and batch size.
    pub fn validate(
        &self,
        schema: &FeatureSchema,
        n_classes: usize,
        n_instances: usize,
    ) -> Result<()> {
        if self.count == 0 {
            return Err(Error::Config(
                "counterfactual count must be at least 1".to_string(),
            ));
        }
        if self.sparsity == Some(0) {
            return Err(Error::Config(
                "sparsity cap must be at least 1".to_string(),
            ));
        }
        if let Changeable::Features(names) = &self.changeable {
            if names.is_empty() {
                return Err(Error::Config(
                    "changeable feature list is empty".to_string(),
                ));
            }
            for name in names {
                if schema.index_of(name).is_none() {
                    return Err(Error::InvalidRange(format!(
                        "unknown changeable feature `{name}`"
                    )));
                }
            }
        }
        validate_ranges(schema, &self.ranges)?;
        if let DesiredClass::Explicit(labels) = &self.desired {
            if labels.len() != n_instances {
                return Err(Error::Config(format!(
                    "expected {n_instances} desired labels, got {}",
                    labels.len()
                )));
            }
            if let Some(&bad) = labels.iter().find(|&&l| l >= n_classes) {
                return Err(Error::Config(format!(
                    "desired class {bad} out of range for {n_classes} classes"
                )));
            }
        }
        Ok(())
    }
}
