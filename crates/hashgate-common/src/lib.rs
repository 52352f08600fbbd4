//! Hashgate Common Types and Wire Codec
//!
//! This crate provides the protocol definitions and frame codec shared by the
//! hashgate pooled client and the HTTP gateway.
//!
//! # Overview
//!
//! Hashgate talks to a remote, load-balanced hashing service over persistent
//! TCP connections. Many requests are multiplexed over one connection, so
//! every frame carries a correlation id that ties a response back to the
//! request that produced it. This crate contains the pieces both sides of
//! that conversation need:
//!
//! - **Protocol Layer**: Request/Response types, error taxonomy
//! - **Codec Layer**: length-prefixed framing with incremental decoding
//!
//! # Wire Format
//!
//! `[4-byte length prefix as u32 big-endian] + [JSON body]`
//!
//! Responses may arrive in any order relative to the requests that are
//! in flight on a connection; demultiplexing is done by correlation id.
//!
//! # Example
//!
//! ```
//! use hashgate_common::{Payload, Request, Response};
//! use serde_json::json;
//!
//! let request = Request::new(Payload::Hash { secret: "pw".into() });
//! let response = Response::success(request.id, json!("$2b$10$abc"));
//! assert_eq!(request.id, response.id);
//! ```

pub mod codec;
pub mod protocol;

pub use protocol::*;
