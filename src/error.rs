//! Error taxonomy for the post-processing engines.
//!
//! Fatal errors abort the whole run before any output is written; the only
//! recoverable condition (a link present in the current iteration but absent
//! from the previous snapshot) is counted and logged, never raised.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed numeric input or an out-of-range parameter.
    #[error("validation error: {0}")]
    Validation(String),

    /// A flow record could not be matched against static reference data.
    #[error("structural join error: {0}")]
    StructuralJoin(String),

    /// A rate table has no row for a bucket the clamping rules should cover.
    #[error("rate lookup miss in {table}: {key}")]
    RateLookupMiss { table: &'static str, key: String },

    /// A rate table is empty after applying the filter/year selection.
    #[error("no rows in {table} for filter {filter} year {year}")]
    EmptyLookup {
        table: &'static str,
        filter: String,
        year: i32,
    },

    /// iteration > 0 but the previous smoothed snapshot is not on disk.
    /// Treating this as a first iteration would silently discard all prior
    /// smoothing, so it is always fatal.
    #[error("previous snapshot required for iteration {iteration} but not found: {path}")]
    MissingPreviousState { iteration: u32, path: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn join(msg: impl Into<String>) -> Self {
        EngineError::StructuralJoin(msg.into())
    }
}
