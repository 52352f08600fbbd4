//! Hashgate Gateway
//!
//! Thin HTTP front end for the remote hashing service. The gateway is pure
//! glue: it parses request bodies, calls the pooled [`hashgate_client`] and
//! translates outcomes into HTTP responses. All of the engineering weight
//! lives in the client's connection pool.
//!
//! # Endpoints
//!
//! - `POST /hash {password}` → 200 with the digest, or 404 `Error: <message>`
//! - `POST /compare {password, hash}` → 200 with `true`/`false`, or 404
//! - `GET /health` → 200 `{"status":"OK"}`
//!
//! Bodies may be JSON or form-urlencoded.

pub mod app;
