use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Correlation identifier linking a request frame to its response frame.
pub type RequestId = u64;

static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Operation-specific payload of a request frame.
///
/// The `op` tag on the wire selects the operation; the remaining fields are
/// the operation's arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Payload {
    /// Hash a secret; the backend returns the digest.
    Hash { secret: String },
    /// Compare a secret against a digest; the backend returns a boolean.
    Compare { secret: String, digest: String },
}

/// A request frame body sent to the hashing backend.
///
/// The response echoes `id`, which is what allows out-of-order completion
/// over a single multiplexed connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: RequestId,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Request {
    /// Creates a request with a freshly generated correlation id.
    pub fn new(payload: Payload) -> Self {
        Request {
            id: next_request_id(),
            payload,
        }
    }

    /// Creates a request with an explicit correlation id.
    ///
    /// Used when the id was allocated earlier, e.g. when a queued call is
    /// finally dispatched (or re-dispatched after a connection failure).
    pub fn with_id(id: RequestId, payload: Payload) -> Self {
        Request { id, payload }
    }
}

/// Allocates a process-wide unique correlation id.
pub fn next_request_id() -> RequestId {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}
