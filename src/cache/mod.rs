//! Range-indexed result cache
//!
//! Stores completed search results keyed by the canonical token of their
//! (data-range, counterfactual-range) pair, so semantically equivalent
//! queries reuse one slot while tighter sub-ranges never conflate with
//! looser cached ones. The backing directory holds `meta.json` — the
//! ordered list of exact range pairs, one per index — and one
//! `cf_<index>.json` record table per stored result, so equivalence
//! checks and replays survive process restarts.
//!
//! Growth is unbounded by design: entries are append-only and an
//! overwrite reuses its index. Concurrent writers are not supported.

mod token;

pub use token::RangeToken;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::report::CounterfactualSet;
use crate::schema::{FeatureSchema, RangeMap};
use crate::{Error, Result};

const META_FILE: &str = "meta.json";

/// The exact range pair that produced a stored result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CacheEntry {
    data_range: RangeMap,
    cf_range: RangeMap,
}

/// Token-indexed persistent store of search results.
#[derive(Debug)]
pub struct RangeCache {
    dir: PathBuf,
    schema: FeatureSchema,
    entries: Vec<CacheEntry>,
    tokens: Vec<RangeToken>,
}

impl RangeCache {
    /// Open a cache directory, creating it if needed and reloading any
    /// previously persisted setting list.
    pub fn open(dir: impl AsRef<Path>, schema: FeatureSchema) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let mut cache = Self {
            dir,
            schema,
            entries: Vec::new(),
            tokens: Vec::new(),
        };
        let meta_path = cache.dir.join(META_FILE);
        if meta_path.exists() {
            let text = fs::read_to_string(&meta_path)?;
            let entries: Vec<CacheEntry> = serde_json::from_str(&text)
                .map_err(|e| Error::Serialization(format!("failed to parse {META_FILE}: {e}")))?;
            for entry in &entries {
                cache.tokens.push(RangeToken::new(
                    &cache.schema,
                    &entry.data_range,
                    &entry.cf_range,
                )?);
            }
            cache.entries = entries;
        }
        Ok(cache)
    }

    /// Number of stored settings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no settings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of a stored result cache-equivalent to the given range
    /// pair, if any. A miss is not an error.
    pub fn find(&self, data_range: &RangeMap, cf_range: &RangeMap) -> Result<Option<usize>> {
        let token = RangeToken::new(&self.schema, data_range, cf_range)?;
        Ok(self.tokens.iter().position(|t| *t == token))
    }

    /// Store a result for a range pair. An equivalent pair stored before
    /// keeps its index and has its result overwritten; otherwise a new
    /// index is appended. Returns the index.
    pub fn save(
        &mut self,
        data_range: &RangeMap,
        cf_range: &RangeMap,
        result: &CounterfactualSet,
    ) -> Result<usize> {
        let token = RangeToken::new(&self.schema, data_range, cf_range)?;
        let index = match self.tokens.iter().position(|t| *t == token) {
            Some(index) => index,
            None => {
                self.entries.push(CacheEntry {
                    data_range: data_range.clone(),
                    cf_range: cf_range.clone(),
                });
                self.tokens.push(token);
                self.write_meta()?;
                self.entries.len() - 1
            }
        };
        let json = serde_json::to_string(result)
            .map_err(|e| Error::Serialization(format!("failed to serialize result: {e}")))?;
        fs::write(self.result_path(index), json)?;
        Ok(index)
    }

    /// Load the result stored at an index. Unknown indices are a hard
    /// lookup failure; callers are expected to `find` first.
    pub fn load(&self, index: usize) -> Result<CounterfactualSet> {
        if index >= self.entries.len() {
            return Err(Error::CacheMiss(index));
        }
        let path = self.result_path(index);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::CacheMiss(index));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&text)
            .map_err(|e| Error::Serialization(format!("failed to parse {}: {e}", path.display())))
    }

    fn result_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("cf_{index}.json"))
    }

    fn write_meta(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| Error::Serialization(format!("failed to serialize {META_FILE}: {e}")))?;
        fs::write(self.dir.join(META_FILE), json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::CounterfactualRecord;
    use crate::schema::{FeatureDescriptor, FeatureRange, FeatureValue};

    fn schema() -> FeatureSchema {
        FeatureSchema::new(vec![
            FeatureDescriptor::numerical("income", 0.0, 1000.0, 1.0).unwrap(),
            FeatureDescriptor::categorical("job", ["clerk", "manager"]).unwrap(),
        ])
        .unwrap()
    }

    fn result_set() -> CounterfactualSet {
        let mut set = CounterfactualSet::new(1);
        set.append(
            vec![CounterfactualRecord {
                features: vec![
                    FeatureValue::Numeric(600.0),
                    FeatureValue::Category("manager".to_string()),
                ],
                target: 1,
                prediction: 1,
                origin_index: 0,
            }],
            vec![vec![
                FeatureValue::Numeric(400.0),
                FeatureValue::Category("clerk".to_string()),
            ]],
        );
        set
    }

    #[test]
    fn test_find_miss_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RangeCache::open(dir.path(), schema()).unwrap();
        assert!(cache.is_empty());
        assert_eq!(
            cache.find(&RangeMap::new(), &RangeMap::new()).unwrap(),
            None
        );
    }

    #[test]
    fn test_save_find_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = RangeCache::open(dir.path(), schema()).unwrap();

        let mut cf_range = RangeMap::new();
        cf_range.insert("income".to_string(), FeatureRange::at_most(500.0));
        let index = cache
            .save(&RangeMap::new(), &cf_range, &result_set())
            .unwrap();

        assert_eq!(cache.find(&RangeMap::new(), &cf_range).unwrap(), Some(index));
        assert_eq!(cache.load(index).unwrap(), result_set());
    }

    #[test]
    fn test_equivalent_pair_reuses_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = RangeCache::open(dir.path(), schema()).unwrap();

        let mut a = RangeMap::new();
        a.insert("income".to_string(), FeatureRange::at_most(500.0));
        let first = cache.save(&RangeMap::new(), &a, &result_set()).unwrap();

        let mut b = RangeMap::new();
        b.insert("income".to_string(), FeatureRange::at_most(500.04));
        let second = cache.save(&RangeMap::new(), &b, &result_set()).unwrap();

        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_tighter_range_gets_new_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = RangeCache::open(dir.path(), schema()).unwrap();

        let mut loose = RangeMap::new();
        loose.insert("income".to_string(), FeatureRange::at_most(500.0));
        let mut tight = RangeMap::new();
        tight.insert("income".to_string(), FeatureRange::at_most(400.0));

        let first = cache.save(&RangeMap::new(), &loose, &result_set()).unwrap();
        let second = cache.save(&RangeMap::new(), &tight, &result_set()).unwrap();
        assert_ne!(first, second);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_load_unknown_index_is_hard_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RangeCache::open(dir.path(), schema()).unwrap();
        assert!(matches!(cache.load(0), Err(Error::CacheMiss(0))));
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut cf_range = RangeMap::new();
        cf_range.insert("job".to_string(), FeatureRange::categories(["manager"]));

        let index = {
            let mut cache = RangeCache::open(dir.path(), schema()).unwrap();
            cache
                .save(&RangeMap::new(), &cf_range, &result_set())
                .unwrap()
        };

        let reopened = RangeCache::open(dir.path(), schema()).unwrap();
        assert_eq!(reopened.len(), 1);
        // the equivalence check works from the reloaded metadata alone,
        // including against a reordered category list
        let mut reordered = RangeMap::new();
        reordered.insert("job".to_string(), FeatureRange::categories(["manager"]));
        assert_eq!(
            reopened.find(&RangeMap::new(), &reordered).unwrap(),
            Some(index)
        );
        assert_eq!(reopened.load(index).unwrap(), result_set());
    }
}
