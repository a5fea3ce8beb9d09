//! Error taxonomy for the ask pipeline.
//!
//! `ValidationError` covers everything that is locally detectable before any
//! external call (unknown entity, disallowed column, missing date column).
//! These are deterministic for a given catalog state and are never retried.
//! Cache refresh failures are *not* errors at this level: the ticker and
//! vocabulary caches degrade to their last known snapshot and log a warning.
//! Execution/formatting failures come from collaborators and propagate
//! unchanged inside `AskError::Execution`.

use thiserror::Error;

/// Rejected request: the input references something the catalog does not
/// declare. Always detected before touching the executor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("column '{column}' not allowed for {entity}")]
    ColumnNotAllowed { entity: String, column: String },

    #[error("filter '{column}' not allowed for {entity}")]
    FilterNotAllowed { entity: String, column: String },

    #[error("range field '{column}' not allowed for {entity}")]
    RangeFieldNotAllowed { entity: String, column: String },

    #[error("order_by '{column}' not allowed for {entity}")]
    OrderByNotAllowed { entity: String, column: String },

    #[error(
        "date_from/date_to require a date column (*_date|*_until|*_at) or a \
         configured default_date_field on {entity}"
    )]
    NoDateColumn { entity: String },

    #[error("catalog is empty")]
    EmptyCatalog,
}

/// Top-level failure for one routed question.
#[derive(Debug, Error)]
pub enum AskError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Executor or formatter failure, propagated unchanged.
    #[error(transparent)]
    Execution(#[from] anyhow::Error),
}
