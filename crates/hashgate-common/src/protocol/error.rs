use thiserror::Error;

/// Error taxonomy for hashgate.
///
/// Everything a caller can observe is one of these variants; raw transport
/// errors are mapped before they cross the client boundary.
#[derive(Error, Debug)]
pub enum HashgateError {
    /// Bad caller input. Fails fast, no network I/O is attempted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The transport to the backend could not be established.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A malformed frame was received. The owning connection is discarded
    /// since a protocol desync is not recoverable in place.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A connection dropped mid-flight and the retry budget is exhausted.
    #[error("Request failed after retry: {0}")]
    Retryable(String),

    /// The pool is closing; no retries.
    #[error("Pool is shut down")]
    Shutdown,

    /// Caller-supplied deadline elapsed.
    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    /// The backend answered with an error payload in a well-formed frame.
    #[error("Backend error [{code}]: {message}")]
    Backend { code: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HashgateError>;
