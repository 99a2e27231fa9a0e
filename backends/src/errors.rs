use crate::decoder::DecodeError;
use thiserror::Error;

/// Errors raised by the backend clients. Carried endpoint context names the
/// backend instance, never the request payload.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// Built from the response status line only; the body is never echoed
    /// into the error.
    #[error("{endpoint} returned {status}")]
    Status { endpoint: String, status: String },

    #[error("key-value store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("internal backend error: {0}")]
    Internal(String),
}
