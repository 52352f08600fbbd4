//! Hashgate Client
//!
//! Connection-pooled RPC client for the remote hashing service.
//!
//! # Overview
//!
//! The backend sits behind a load balancer and speaks a lightweight
//! length-prefixed protocol over persistent TCP connections. This crate
//! multiplexes many concurrent caller requests over a bounded set of those
//! connections:
//!
//! - at most `max_connections` connections are ever open;
//! - no connection carries more than `max_requests_per_connection` in-flight
//!   requests;
//! - requests that find no spare capacity wait in a FIFO queue;
//! - a dropped connection gets its in-flight requests re-submitted once
//!   before a terminal error is surfaced.
//!
//! # Example
//!
//! ```no_run
//! use hashgate_client::{HashClient, PoolConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HashClient::new(PoolConfig {
//!     host: "127.0.0.1".into(),
//!     port: 9485,
//!     ..Default::default()
//! })?;
//!
//! let digest = client.hash("hunter2").await?;
//! assert!(client.compare("hunter2", &digest).await?);
//! # Ok(())
//! # }
//! ```

pub mod client;
mod connection;
pub mod pool;

pub use client::HashClient;
pub use pool::{CallHandle, ConnectionPool, PoolConfig, PoolStats};
