//! Counterfactual search engine
//!
//! [`Engine`] drives the whole pipeline for a search request: candidate
//! preparation, an optional sparsity-selection pre-pass, the
//! gradient-guided continuous optimization, the discrete refinement
//! pass, and result extraction. Batches are processed strictly
//! sequentially and share no mutable state. [`Engine::search_range`]
//! wraps the pipeline with the range cache so equivalent queries are
//! answered without re-running the optimizer.

mod config;
mod loss;
mod optimize;
mod prepare;
mod refine;
mod setting;
mod sparsity;

pub use config::{DistanceMetric, EngineConfig, Perturbation, WeightMode};
pub use setting::{Changeable, DesiredClass, SearchSetting};

use std::time::Instant;

use ndarray::{Array1, Array2};

use crate::cache::RangeCache;
use crate::model::DifferentiableModel;
use crate::report::{CounterfactualRecord, CounterfactualSet, SubsetCounterfactuals};
use crate::schema::{Instance, RangeMap};
use crate::space::{argmax, TabularSpace};
use crate::{Error, Result};

use loss::MixedLoss;
use optimize::{GradientOptimizer, Outcome};
use refine::DiscreteRefiner;

/// Counterfactual explanation engine over one feature space and model.
pub struct Engine {
    space: TabularSpace,
    model: Box<dyn DifferentiableModel>,
    config: EngineConfig,
    data: Vec<Instance>,
    cache: Option<RangeCache>,
}

impl Engine {
    /// Build an engine. The configuration is validated up front and the
    /// model's class count must match the space's.
    pub fn new(
        space: TabularSpace,
        model: Box<dyn DifferentiableModel>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        if model.n_classes() != space.n_classes() {
            return Err(Error::Config(format!(
                "model predicts {} classes but the space declares {}",
                model.n_classes(),
                space.n_classes()
            )));
        }
        Ok(Self {
            space,
            model,
            config,
            data: Vec::new(),
            cache: None,
        })
    }

    /// Attach the dataset rows range-based searches select from.
    #[must_use]
    pub fn with_data(mut self, data: Vec<Instance>) -> Self {
        self.data = data;
        self
    }

    /// Attach a result cache for range-based searches.
    #[must_use]
    pub fn with_cache(mut self, cache: RangeCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The engine's feature space.
    #[must_use]
    pub fn space(&self) -> &TabularSpace {
        &self.space
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replace the configuration.
    pub fn set_config(&mut self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Generate counterfactual examples for a batch of raw instances.
    ///
    /// Instances are processed in mini-batches of `batch_size`. Every
    /// origin instance yields exactly `setting.count` records, in input
    /// order; records that failed to reach the desired class are still
    /// returned and only lower the set's validity rate.
    pub fn search(
        &self,
        instances: &[Instance],
        setting: &SearchSetting,
    ) -> Result<CounterfactualSet> {
        self.config.validate()?;
        setting.validate(self.space.schema(), self.model.n_classes(), instances.len())?;

        let weights = self.term_weights();
        let loss = MixedLoss::new(&self.config, weights.clone(), setting.count)?;
        let optimizer = GradientOptimizer::new(&self.space, self.model.as_ref(), &loss, &self.config);
        let refiner = DiscreteRefiner::new(&self.space, self.model.as_ref(), &loss, &self.config);

        let (lo, hi) = prepare::bounds(&self.space, setting);
        let base_mask = prepare::change_mask_row(&self.space, setting, None);
        let mut rng = prepare::rng_from_seed(self.config.seed);

        let mut set = CounterfactualSet::new(setting.count);
        let total = instances.len();

        for (batch_index, chunk) in instances.chunks(self.config.batch_size).enumerate() {
            let started = Instant::now();
            let batch_offset = batch_index * self.config.batch_size;

            let encoded = self.space.encode_batch(chunk)?;
            let origin = prepare::replicate(&encoded, setting.count);
            let targets = prepare::target_matrix(self.model.as_ref(), &origin, setting);
            let mut mask = broadcast_rows(&base_mask, origin.nrows());

            // sparsity pre-pass: one full-mask run, then keep only the
            // k most-moved features per row and restart cold
            if let Some(k) = setting.sparsity {
                if setting.needs_sparsity_pass(self.space.schema()) {
                    let init = prepare::init_candidates(
                        &self.space,
                        &origin,
                        &mask,
                        self.config.perturbation,
                        &mut rng,
                    );
                    let first = optimizer.optimize(init, &origin, &targets, &mask, &lo, &hi)?;
                    let selected =
                        sparsity::topk_features(&self.space, &first.candidates, &origin, &weights, k)?;
                    mask = sparsity::masks_for(&self.space, setting, &selected);
                }
            }

            let init = prepare::init_candidates(
                &self.space,
                &origin,
                &mask,
                self.config.perturbation,
                &mut rng,
            );
            let optimized = optimizer.optimize(init, &origin, &targets, &mask, &lo, &hi)?;

            let raw = self.space.decode_batch(&optimized.candidates);
            let raw = refiner.refine(raw, &origin, &targets, &mask, setting)?;

            let final_encoded = self.space.encode_batch(&raw)?;
            let predictions = self.model.forward(&final_encoded);

            let mut records = Vec::with_capacity(raw.len());
            for (i, features) in raw.into_iter().enumerate() {
                records.push(CounterfactualRecord {
                    features,
                    target: argmax(targets.row(i)),
                    prediction: argmax(predictions.row(i)),
                    origin_index: batch_offset + i / setting.count,
                });
            }
            let valid = records.iter().filter(|r| r.is_valid()).count();
            let rate = valid as f32 / records.len().max(1) as f32;
            set.append(records, chunk.to_vec());

            if self.config.verbose {
                let relaxed = prepare::valid_rows(&optimized.predictions, &targets)
                    .into_iter()
                    .filter(|&v| v)
                    .count();
                let outcome = match optimized.outcome {
                    Outcome::Converged => "converged",
                    Outcome::MaxIterReached => "max-iter",
                };
                println!(
                    "[{}/{}] batch {}: {:.3}s, loss {:.3}, {} at iteration {}, \
                     relaxed valid {}/{}, validity rate {:.3}",
                    batch_offset + chunk.len(),
                    total,
                    batch_index,
                    started.elapsed().as_secs_f64(),
                    optimized.loss,
                    outcome,
                    optimized.iterations,
                    relaxed,
                    targets.nrows(),
                    rate,
                );
            }
        }
        Ok(set)
    }

    /// Cached range-based search: select the engine's dataset rows
    /// inside `data_range`, then search for counterfactuals constrained
    /// to `cf_range`. With `use_cache` an equivalent previous result is
    /// returned as stored, without re-invoking the model; with `persist`
    /// the fresh result is written back to the cache.
    pub fn search_range(
        &mut self,
        data_range: &RangeMap,
        cf_range: &RangeMap,
        use_cache: bool,
        persist: bool,
    ) -> Result<CounterfactualSet> {
        if use_cache {
            if let Some(cache) = &self.cache {
                if let Some(index) = cache.find(data_range, cf_range)? {
                    let set = cache.load(index)?;
                    if self.config.verbose {
                        println!(
                            "cache hit [{index}]: {} records, validity rate {:.3}",
                            set.len(),
                            set.validity_rate(),
                        );
                    }
                    return Ok(set);
                }
            }
        }

        let subset = self.space.filter(&self.data, data_range)?;
        let setting = SearchSetting::new().with_ranges(cf_range.clone());
        let set = self.search(&subset, &setting)?;

        if persist {
            if let Some(cache) = &mut self.cache {
                cache.save(data_range, cf_range, &set)?;
            }
        }
        Ok(set)
    }

    /// Subset search repeated once per feature, with that feature's
    /// constraint dropped from the counterfactual range each time, to
    /// isolate each feature's marginal effect.
    pub fn r_counterfactuals(
        &mut self,
        data_range: &RangeMap,
        cf_range: &RangeMap,
        use_cache: bool,
        persist: bool,
    ) -> Result<SubsetCounterfactuals> {
        let names: Vec<String> = self
            .space
            .schema()
            .features()
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        let mut out = SubsetCounterfactuals::new(data_range.clone());
        for name in names {
            let mut by_feature = cf_range.clone();
            by_feature.remove(&name);
            let set = self.search_range(data_range, &by_feature, use_cache, persist)?;
            out.append(name, set);
        }
        Ok(out)
    }

    fn term_weights(&self) -> Array1<f32> {
        match self.config.weight_mode {
            WeightMode::Mad => self.space.distance_weights().clone(),
            WeightMode::Unit => Array1::ones(self.space.encoded_width()),
        }
    }
}

fn broadcast_rows(row: &Array1<f32>, rows: usize) -> Array2<f32> {
    let mut out = Array2::zeros((rows, row.len()));
    for r in 0..rows {
        out.row_mut(r).assign(row);
    }
    out
}
