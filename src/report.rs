//! Result containers for generated counterfactual examples

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::schema::{Instance, RangeMap};

/// One generated counterfactual row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterfactualRecord {
    /// Raw feature values of the counterfactual.
    pub features: Instance,
    /// Class the search was asked to reach.
    pub target: usize,
    /// Class the model actually predicts for `features`.
    pub prediction: usize,
    /// Index of the originating instance in the paired instance table.
    pub origin_index: usize,
}

impl CounterfactualRecord {
    /// Whether the model prediction matches the desired class.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.prediction == self.target
    }
}

/// Append-only table of counterfactual records paired with the instances
/// they were derived from. Each origin instance owns exactly `count`
/// consecutive records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterfactualSet {
    records: Vec<CounterfactualRecord>,
    instances: Vec<Instance>,
    count: usize,
}

impl CounterfactualSet {
    /// Empty set for searches producing `count` alternatives per instance.
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            records: Vec::new(),
            instances: Vec::new(),
            count,
        }
    }

    /// Append one batch worth of records and their origin instances.
    /// Records must arrive in origin order, `count` per instance.
    pub fn append(&mut self, records: Vec<CounterfactualRecord>, instances: Vec<Instance>) {
        debug_assert_eq!(records.len(), instances.len() * self.count);
        self.records.extend(records);
        self.instances.extend(instances);
    }

    /// All records, in generation order.
    #[must_use]
    pub fn records(&self) -> &[CounterfactualRecord] {
        &self.records
    }

    /// Origin instances, indexed by `CounterfactualRecord::origin_index`.
    #[must_use]
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the set holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Alternatives generated per origin instance.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Fraction of records whose prediction reached the desired class.
    /// Non-convergence shows up here rather than as an error.
    #[must_use]
    pub fn validity_rate(&self) -> f32 {
        if self.records.is_empty() {
            return 0.0;
        }
        let valid = self.records.iter().filter(|r| r.is_valid()).count();
        valid as f32 / self.records.len() as f32
    }

    /// Records grouped by origin instance, in generation order within
    /// each group. Every group holds exactly `count` records.
    #[must_use]
    pub fn group_by_origin_index(&self) -> BTreeMap<usize, Vec<&CounterfactualRecord>> {
        let mut groups: BTreeMap<usize, Vec<&CounterfactualRecord>> = BTreeMap::new();
        for record in &self.records {
            groups.entry(record.origin_index).or_default().push(record);
        }
        groups
    }
}

/// Results of a subset search repeated once per feature with that
/// feature's constraint dropped, isolating each feature's marginal
/// effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsetCounterfactuals {
    data_range: RangeMap,
    sets: Vec<(String, CounterfactualSet)>,
}

impl SubsetCounterfactuals {
    /// Empty container for results over the data subset `data_range`.
    #[must_use]
    pub fn new(data_range: RangeMap) -> Self {
        Self {
            data_range,
            sets: Vec::new(),
        }
    }

    /// The range that selected the data subset.
    #[must_use]
    pub fn data_range(&self) -> &RangeMap {
        &self.data_range
    }

    /// Append the result set obtained with `feature` held out of the
    /// counterfactual range.
    pub fn append(&mut self, feature: impl Into<String>, set: CounterfactualSet) {
        self.sets.push((feature.into(), set));
    }

    /// One result set per held-out feature, in append order.
    #[must_use]
    pub fn group_by_fixed_feature(&self) -> &[(String, CounterfactualSet)] {
        &self.sets
    }

    /// Result set for a specific held-out feature.
    #[must_use]
    pub fn get(&self, feature: &str) -> Option<&CounterfactualSet> {
        self.sets
            .iter()
            .find(|(name, _)| name == feature)
            .map(|(_, set)| set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FeatureValue;

    fn record(origin: usize, target: usize, prediction: usize) -> CounterfactualRecord {
        CounterfactualRecord {
            features: vec![FeatureValue::Numeric(origin as f32)],
            target,
            prediction,
            origin_index: origin,
        }
    }

    fn instance(v: f32) -> Instance {
        vec![FeatureValue::Numeric(v)]
    }

    #[test]
    fn test_grouping_by_origin() {
        let mut set = CounterfactualSet::new(2);
        set.append(
            vec![record(0, 1, 1), record(0, 1, 0), record(1, 1, 1), record(1, 1, 1)],
            vec![instance(0.0), instance(1.0)],
        );
        let groups = set.group_by_origin_index();
        assert_eq!(groups.len(), 2);
        for (_, group) in &groups {
            assert_eq!(group.len(), set.count());
        }
    }

    #[test]
    fn test_validity_rate() {
        let mut set = CounterfactualSet::new(1);
        assert_eq!(set.validity_rate(), 0.0);
        set.append(
            vec![record(0, 1, 1), record(1, 1, 0), record(2, 1, 1), record(3, 1, 1)],
            vec![instance(0.0), instance(1.0), instance(2.0), instance(3.0)],
        );
        assert_eq!(set.validity_rate(), 0.75);
    }

    #[test]
    fn test_append_preserves_order() {
        let mut set = CounterfactualSet::new(1);
        set.append(vec![record(0, 1, 1)], vec![instance(0.0)]);
        set.append(vec![record(1, 0, 0)], vec![instance(1.0)]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.records()[0].origin_index, 0);
        assert_eq!(set.records()[1].origin_index, 1);
        assert_eq!(set.instances().len(), 2);
    }

    #[test]
    fn test_subset_container() {
        let mut subset = SubsetCounterfactuals::new(RangeMap::new());
        subset.append("income", CounterfactualSet::new(1));
        subset.append("age", CounterfactualSet::new(1));
        assert_eq!(subset.group_by_fixed_feature().len(), 2);
        assert!(subset.get("income").is_some());
        assert!(subset.get("job").is_none());
    }

    #[test]
    fn test_set_serde_round_trip() {
        let mut set = CounterfactualSet::new(1);
        set.append(vec![record(0, 1, 1)], vec![instance(4.0)]);
        let json = serde_json::to_string(&set).unwrap();
        let back: CounterfactualSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}
