//! Error types for the Cascade node.

use cascade_graph::ResolveError;
use thiserror::Error;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in node operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The candidate edge would close a referral cycle. The request
    /// itself is invalid; retrying cannot succeed.
    #[error("Cycle detected: edge would close a referral cycle")]
    Cycle,

    /// A parent-chain walk exceeded the depth cap, meaning the stored
    /// graph already contains a cycle or runaway chain.
    #[error("Graph corruption: parent chain exceeded {limit} links")]
    GraphCorruption { limit: usize },

    /// Structurally invalid request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Webhook transport error
    #[error("Webhook transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// CSV export error
    #[error("Export error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<ResolveError<Error>> for Error {
    fn from(e: ResolveError<Error>) -> Self {
        match e {
            ResolveError::Cycle => Error::Cycle,
            ResolveError::DepthExceeded { limit } => Error::GraphCorruption { limit },
            ResolveError::LevelOverflow => Error::InvalidInput(
                "referrer level is at the maximum; cannot derive a child level".to_string(),
            ),
            ResolveError::Source(inner) => inner,
        }
    }
}
