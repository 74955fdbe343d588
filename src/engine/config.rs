//! Engine configuration

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// How per-column distance weights are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightMode {
    /// Weights fitted from the training distribution (`1 / (1 + MAD)`
    /// per numerical column, unit for dummies).
    Mad,
    /// Unit weight for every column.
    Unit,
}

/// Distance metric for the proximity and diversity terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Weighted absolute difference.
    L1,
    /// Weighted squared difference.
    L2,
    /// Reserved; currently rejected with a not-implemented error.
    Cosine,
}

/// How changeable dummy groups are initialized before optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Perturbation {
    /// Set every dummy in a changeable group to 0.5.
    Unit,
    /// Set each changeable group to a random point on the simplex.
    Random,
    /// Leave the original one-hot values in place.
    None,
}

/// Fully-enumerated search-engine configuration.
///
/// Defaults match the behavior the engine was tuned for: a margin-driven
/// validity term dominating mild proximity/diversity pressure, a few
/// thousand gradient iterations with periodic re-projection, and a short
/// discrete refinement pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Distance-weight source. Default: [`WeightMode::Mad`].
    pub weight_mode: WeightMode,
    /// Weight of the validity (margin) term. Default: 1.0.
    pub validity_weight: f32,
    /// Weight of the proximity term. Default: 0.01.
    pub proximity_weight: f32,
    /// Weight of the diversity term; only active when more than one
    /// counterfactual per instance is requested. Default: 0.01.
    pub diversity_weight: f32,
    /// Metric for proximity/diversity distances. Default: L1.
    pub metric: DistanceMetric,
    /// Gradient-descent learning rate. Default: 0.01.
    pub lr: f32,
    /// Iterations to run before the early-stop check may fire.
    /// Default: 500.
    pub min_iter: usize,
    /// Hard iteration cap; must be positive. Default: 2000.
    pub max_iter: usize,
    /// Clip-and-reload the candidates every this many iterations.
    /// Default: 250.
    pub project_frequency: usize,
    /// Discrete refinement passes after optimization. Default: 10.
    pub post_steps: usize,
    /// Instances per mini-batch. Default: 1024.
    pub batch_size: usize,
    /// Loss-improvement threshold for the early stop. Default: 1e-5.
    pub loss_diff: f32,
    /// Initialization of changeable dummy groups.
    /// Default: [`Perturbation::Unit`].
    pub perturbation: Perturbation,
    /// Seed for the perturbation RNG; `None` draws one from the OS.
    /// Default: `None`.
    pub seed: Option<u64>,
    /// Print a per-batch progress line. Default: false.
    pub verbose: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weight_mode: WeightMode::Mad,
            validity_weight: 1.0,
            proximity_weight: 0.01,
            diversity_weight: 0.01,
            metric: DistanceMetric::L1,
            lr: 0.01,
            min_iter: 500,
            max_iter: 2000,
            project_frequency: 250,
            post_steps: 10,
            batch_size: 1024,
            loss_diff: 1e-5,
            perturbation: Perturbation::Unit,
            seed: None,
            verbose: false,
        }
    }
}

impl EngineConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the learning rate.
    #[must_use]
    pub fn with_lr(mut self, lr: f32) -> Self {
        self.lr = lr;
        self
    }

    /// Set the iteration window.
    #[must_use]
    pub fn with_iterations(mut self, min_iter: usize, max_iter: usize) -> Self {
        self.min_iter = min_iter;
        self.max_iter = max_iter;
        self
    }

    /// Set the projection frequency.
    #[must_use]
    pub fn with_project_frequency(mut self, every: usize) -> Self {
        self.project_frequency = every;
        self
    }

    /// Set the number of discrete refinement passes.
    #[must_use]
    pub fn with_post_steps(mut self, post_steps: usize) -> Self {
        self.post_steps = post_steps;
        self
    }

    /// Set the loss weights.
    #[must_use]
    pub fn with_weights(mut self, validity: f32, proximity: f32, diversity: f32) -> Self {
        self.validity_weight = validity;
        self.proximity_weight = proximity;
        self.diversity_weight = diversity;
        self
    }

    /// Set the mini-batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Seed the perturbation RNG for reproducible searches.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Enable per-batch progress output.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Validate the configuration. Called before any optimization work.
    pub fn validate(&self) -> Result<()> {
        if self.max_iter == 0 {
            return Err(Error::Config(
                "max_iter must be greater than 0".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(Error::Config(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        if self.project_frequency == 0 {
            return Err(Error::Config(
                "project_frequency must be greater than 0".to_string(),
            ));
        }
        if !(self.lr > 0.0) {
            return Err(Error::Config(format!(
                "learning rate must be positive, got {}",
                self.lr
            )));
        }
        Ok(())
    }
}
