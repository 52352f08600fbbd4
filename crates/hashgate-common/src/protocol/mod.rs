pub mod error;
pub mod requests;
pub mod responses;

pub use error::{HashgateError, Result};
pub use requests::{next_request_id, Payload, Request, RequestId};
pub use responses::{Response, WireError};
