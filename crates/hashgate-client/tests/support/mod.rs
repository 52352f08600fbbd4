//! In-process mock hashing backend for integration tests.
//!
//! Speaks the real frame protocol over TCP and produces deterministic fake
//! digests, so tests can assert end-to-end behavior without the actual
//! hashing service. Counters record how the pool used it: how many
//! connections were open at once and the in-flight high-water mark per
//! connection.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use hashgate_client::PoolConfig;
use hashgate_common::codec::{encode_frame, FrameDecoder};
use hashgate_common::{Payload, Request, Response};

/// Deterministic stand-in for the backend's hashing algorithm.
pub fn fake_digest(secret: &str) -> String {
    format!("$fake$2b${}", secret.chars().rev().collect::<String>())
}

#[derive(Clone)]
pub struct BackendOptions {
    /// Artificial service time per request.
    pub response_delay: Duration,
    /// The first N accepted connections are failure-injected: they respond
    /// to nothing and drop the socket once `fail_after_frames` frames have
    /// been received.
    pub fail_first_connections: usize,
    pub fail_after_frames: usize,
    /// The first N accepted connections answer their first request with an
    /// undecodable frame (an oversized length prefix) and then close.
    pub garbage_first_connections: usize,
    /// Read frames but never respond (for timeout tests).
    pub unresponsive: bool,
    /// Answer every request with an error payload.
    pub reject_all: bool,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            response_delay: Duration::ZERO,
            fail_first_connections: 0,
            fail_after_frames: 1,
            garbage_first_connections: 0,
            unresponsive: false,
            reject_all: false,
        }
    }
}

#[derive(Clone, Default)]
pub struct Counters {
    pub accepted: Arc<AtomicUsize>,
    pub open: Arc<AtomicUsize>,
    pub max_open: Arc<AtomicUsize>,
    /// Highest number of simultaneously in-flight requests on any single
    /// connection.
    pub max_in_flight: Arc<AtomicUsize>,
    pub requests_seen: Arc<AtomicUsize>,
}

pub struct MockBackend {
    pub host: String,
    pub port: u16,
    pub counters: Counters,
    _accept_task: tokio::task::JoinHandle<()>,
}

impl MockBackend {
    pub async fn spawn(opts: BackendOptions) -> MockBackend {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let counters = Counters::default();

        let c = counters.clone();
        let accept_task = tokio::spawn(async move {
            let mut index = 0usize;
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                c.accepted.fetch_add(1, Ordering::SeqCst);
                let now_open = c.open.fetch_add(1, Ordering::SeqCst) + 1;
                c.max_open.fetch_max(now_open, Ordering::SeqCst);
                tokio::spawn(serve_conn(stream, index, opts.clone(), c.clone()));
                index += 1;
            }
        });

        MockBackend {
            host: addr.ip().to_string(),
            port: addr.port(),
            counters,
            _accept_task: accept_task,
        }
    }

    pub fn pool_config(
        &self,
        max_connections: usize,
        max_requests_per_connection: usize,
    ) -> PoolConfig {
        PoolConfig {
            host: self.host.clone(),
            port: self.port,
            max_connections,
            max_requests_per_connection,
            ..Default::default()
        }
    }
}

async fn serve_conn(stream: TcpStream, conn_index: usize, opts: BackendOptions, c: Counters) {
    let (mut read_half, write_half) = stream.into_split();
    let write_half = Arc::new(Mutex::new(write_half));
    let failure_injected = conn_index < opts.fail_first_connections;
    let garbage_injected = conn_index < opts.garbage_first_connections;
    let in_flight = Arc::new(AtomicUsize::new(0));

    let mut decoder = FrameDecoder::new();
    let mut received = 0usize;
    let mut chunk = [0u8; 4096];

    'conn: loop {
        let n = match read_half.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        decoder.extend(&chunk[..n]);

        while let Some(body) = decoder.next_frame().unwrap() {
            received += 1;
            c.requests_seen.fetch_add(1, Ordering::SeqCst);

            if failure_injected {
                if received >= opts.fail_after_frames {
                    break 'conn; // drop the socket, responding to nothing
                }
                continue;
            }
            if garbage_injected {
                // a length prefix far beyond the frame size limit
                let mut w = write_half.lock().await;
                let _ = w.write_all(&[0xff, 0xff, 0xff, 0xff]).await;
                let _ = w.flush().await;
                drop(w);
                break 'conn;
            }
            if opts.unresponsive {
                continue;
            }

            let request: Request = serde_json::from_slice(&body).unwrap();
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            c.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let write = Arc::clone(&write_half);
            let in_flight = Arc::clone(&in_flight);
            let opts = opts.clone();
            tokio::spawn(async move {
                let delay = service_time(&request, &opts);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let response = respond(&request, &opts);
                let frame = encode_frame(&serde_json::to_vec(&response).unwrap());
                let mut w = write.lock().await;
                let _ = w.write_all(&frame).await;
                let _ = w.flush().await;
                drop(w);
                in_flight.fetch_sub(1, Ordering::SeqCst);
            });
        }
    }

    c.open.fetch_sub(1, Ordering::SeqCst);
}

/// Secrets prefixed with `slow` take ten times the configured delay, which
/// lets tests force out-of-order responses on one connection.
fn service_time(request: &Request, opts: &BackendOptions) -> Duration {
    let secret = match &request.payload {
        Payload::Hash { secret } => secret,
        Payload::Compare { secret, .. } => secret,
    };
    if secret.starts_with("slow") {
        opts.response_delay.max(Duration::from_millis(10)) * 10
    } else {
        opts.response_delay
    }
}

fn respond(request: &Request, opts: &BackendOptions) -> Response {
    if opts.reject_all {
        return Response::error(request.id, "EHASH", "hashing rejected by backend");
    }
    match &request.payload {
        Payload::Hash { secret } => Response::success(request.id, json!(fake_digest(secret))),
        Payload::Compare { secret, digest } => {
            Response::success(request.id, json!(*digest == fake_digest(secret)))
        }
    }
}
