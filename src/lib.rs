//! explicar: counterfactual explanations for tabular classifiers
//!
//! Given a trained differentiable model and an input instance, the
//! engine searches for a nearby feature vector the model classifies
//! differently, subject to user constraints: which features may change,
//! admissible value ranges, how many features may change, and how many
//! alternatives to produce. The search runs gradient descent on a
//! continuous relaxation of the mixed numerical/categorical feature
//! space, optionally collapses the changeable set to the most influential
//! features, and repairs residual failures with discrete single-feature
//! edits. Range-based searches are wrapped by a cache that recognizes
//! semantically equivalent queries.
//!
//! # Example
//!
//! ```no_run
//! use explicar::{
//!     Engine, EngineConfig, FeatureDescriptor, FeatureSchema, FeatureValue,
//!     LinearSoftmaxModel, SearchSetting, TabularSpace,
//! };
//! use ndarray::{arr2, Array1};
//!
//! let schema = FeatureSchema::new(vec![
//!     FeatureDescriptor::numerical("income", 0.0, 100_000.0, 100.0)?,
//!     FeatureDescriptor::categorical("job", ["clerk", "manager"])?,
//! ])?;
//! let space = TabularSpace::new(schema, vec!["Bad".into(), "Good".into()])?;
//! let model = LinearSoftmaxModel::new(
//!     arr2(&[[-6.0, 6.0], [0.0, 0.0], [0.0, 0.0]]),
//!     Array1::from(vec![3.0, -3.0]),
//! )?;
//! let engine = Engine::new(space, Box::new(model), EngineConfig::default())?;
//!
//! let instances = vec![vec![
//!     FeatureValue::Numeric(40_000.0),
//!     FeatureValue::Category("clerk".into()),
//! ]];
//! let setting = SearchSetting::new().with_changeable(["income"]);
//! let examples = engine.search(&instances, &setting)?;
//! println!("validity rate: {:.3}", examples.validity_rate());
//! # Ok::<(), explicar::Error>(())
//! ```

pub mod cache;
pub mod engine;
mod error;
pub mod model;
pub mod report;
pub mod schema;
pub mod space;

pub use cache::{RangeCache, RangeToken};
pub use engine::{
    Changeable, DesiredClass, DistanceMetric, Engine, EngineConfig, Perturbation, SearchSetting,
    WeightMode,
};
pub use error::{Error, Result};
pub use model::{DifferentiableModel, LinearSoftmaxModel};
pub use report::{CounterfactualRecord, CounterfactualSet, SubsetCounterfactuals};
pub use schema::{
    FeatureDescriptor, FeatureKind, FeatureRange, FeatureSchema, FeatureValue, Instance, RangeMap,
};
pub use space::TabularSpace;
