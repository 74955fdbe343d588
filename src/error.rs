//! Crate-level error types

use thiserror::Error;

/// Errors produced by schema construction, search configuration, and the
/// result cache.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed feature descriptor or schema (unknown kind, inverted
    /// min/max, empty category list). Raised at construction time.
    #[error("invalid schema: {0}")]
    Schema(String),

    /// An instance does not match the schema it is encoded against.
    #[error("invalid instance: {0}")]
    Instance(String),

    /// A value range or search setting is inconsistent with the schema.
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// Invalid engine configuration, detected before any optimization work.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A requested metric or mode has no implementation.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// `load` was called with an index the cache has never stored.
    #[error("cache index {0} not found")]
    CacheMiss(usize),

    /// Cache record serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Cache file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for all fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;
