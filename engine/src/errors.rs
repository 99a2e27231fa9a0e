use backends::BackendError;
use registry::ResolveError;
use thiserror::Error;

/// Errors from the direct-query pipeline.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("only one aggregate method is supported, got {0}")]
    UnsupportedAggregate(usize),

    #[error("dimension \"cluster_id\" must be passed in the query conditions")]
    ClusterDimensionRequired,

    #[error("invalid value in column {column:?}: {message}")]
    InvalidColumn { column: String, message: String },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors surfaced by the federated query entrypoint.
#[derive(Error, Debug)]
pub enum QueryError {
    /// Table or alias resolution failed (unknown table, empty candidate set).
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// A table referenced a storage id with no registered endpoint.
    #[error("storage not found: {0}")]
    StorageNotFound(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}
