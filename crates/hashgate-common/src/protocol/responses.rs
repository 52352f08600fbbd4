//! Response frame types.

use serde::{Deserialize, Serialize};

use super::RequestId;

/// Error payload carried inside a well-formed response frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireError {
    /// Machine-readable error code assigned by the backend
    pub code: String,
    /// Human-readable description
    pub message: String,
}

/// A response frame body received from the hashing backend.
///
/// # Fields
///
/// - `id`: correlation id echoed from the request
/// - `result`: result value (present on success; a digest string for hash,
///   a boolean for compare)
/// - `error`: error payload (present on failure)
/// - `success`: whether the operation succeeded
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub id: RequestId,
    pub result: Option<serde_json::Value>,
    pub error: Option<WireError>,
    pub success: bool,
}

impl Response {
    /// Creates a successful response.
    pub fn success(id: RequestId, result: serde_json::Value) -> Self {
        Response {
            id,
            result: Some(result),
            error: None,
            success: true,
        }
    }

    /// Creates an error response.
    pub fn error(id: RequestId, code: impl Into<String>, message: impl Into<String>) -> Self {
        Response {
            id,
            result: None,
            error: Some(WireError {
                code: code.into(),
                message: message.into(),
            }),
            success: false,
        }
    }
}
