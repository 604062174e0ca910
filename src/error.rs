//! Error taxonomy shared by the store, aggregation, and prediction layers.
//!
//! Every failure a caller can act on has its own variant; the boundary maps
//! each variant to an HTTP-style status code when building a response
//! envelope.

use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or out-of-range input (missing field, bad congestion index,
    /// hour outside 0..=23, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The referenced route does not resolve via the route registry.
    #[error("route not found: {0}")]
    NotFound(String),

    /// A sample with the same `(route_id, timestamp)` key already exists.
    #[error("duplicate sample for route {route_id} at {timestamp}")]
    Conflict {
        route_id: String,
        timestamp: DateTime<Utc>,
    },

    /// An aggregation or prediction call exceeded its execution bound.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The backing store or registry is unavailable.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// A bulk batch was rejected as a whole. `index` is the zero-based
    /// position of the first failing record; `valid` counts records that
    /// passed every check. No record of the batch was persisted.
    #[error("bulk ingest rejected: record {index} of {attempted}: {reason}")]
    BulkRejected {
        attempted: usize,
        valid: usize,
        index: usize,
        reason: Box<Error>,
    },
}

impl Error {
    /// Short machine-readable kind, used as the `error` field of the
    /// response envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::NotFound(_) => "not_found",
            Error::Conflict { .. } => "conflict",
            Error::Timeout(_) => "timeout",
            Error::Upstream(_) => "upstream_error",
            Error::BulkRejected { .. } => "bulk_rejected",
        }
    }

    /// HTTP status code the boundary should answer with.
    pub fn status(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::NotFound(_) => 404,
            Error::Conflict { .. } => 409,
            Error::Timeout(_) => 503,
            Error::Upstream(_) => 500,
            Error::BulkRejected { reason, .. } => reason.status(),
        }
    }
}
