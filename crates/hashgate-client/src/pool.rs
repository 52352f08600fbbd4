//! Connection pool: admission control and load spreading.
//!
//! The pool is the only component that knows the two caps: at most
//! `max_connections` connections are ever open, and no connection carries
//! more than `max_requests_per_connection` in-flight requests. Requests that
//! find no spare capacity wait in a FIFO queue and are admitted strictly in
//! arrival order as capacity frees up.
//!
//! All shared state (connection list, wait queue, per-connection pending
//! maps and counters) lives behind one `std::sync::Mutex` per pool. Nothing
//! awaits and no network I/O happens while that lock is held; socket work is
//! done by per-connection tasks that call back into the pool, and completion
//! slots are resolved after the lock is released.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use hashgate_common::{
    next_request_id, HashgateError, Payload, RequestId, Response, Result, WireError,
};

use crate::connection::{self, Call, CallResult, ConnHandle, ConnState, Submit};

/// Automatic re-submissions granted to a request whose connection failed.
const RETRY_LIMIT: u8 = 1;

/// Connection pool configuration.
///
/// The defaults mirror the deployment this gateway fronts: a load-balanced
/// hashing service on port 9485, up to 20 connections with 10 concurrent
/// requests each.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Backend hostname (typically the load balancer)
    pub host: String,
    /// Backend port
    pub port: u16,
    /// Transport scheme identifier; only `"tcp"` is supported
    pub scheme: String,
    /// Maximum number of simultaneously open connections
    pub max_connections: usize,
    /// Maximum in-flight requests per connection
    pub max_requests_per_connection: usize,
    /// Delay before re-attempting a failed connect while demand remains
    pub connect_backoff_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9485,
            scheme: "tcp".to_string(),
            max_connections: 20,
            max_requests_per_connection: 10,
            connect_backoff_ms: 50,
        }
    }
}

impl PoolConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A submitted call: the correlation id plus the receiver half of its
/// completion slot.
pub struct CallHandle {
    pub id: RequestId,
    pub rx: oneshot::Receiver<Result<serde_json::Value>>,
}

/// Point-in-time pool counters, mainly for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub connections: usize,
    pub in_flight: usize,
    pub queued: usize,
}

/// Connection pool over a single logical (load-balanced) backend endpoint.
///
/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

pub(crate) struct PoolShared {
    config: PoolConfig,
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    /// Live connections, Connecting placeholders included (they hold a slot
    /// so the connection cap is never exceeded).
    connections: Vec<ConnHandle>,
    /// Requests waiting for capacity, in admission order.
    queue: VecDeque<Call>,
    next_conn_id: u64,
    shutdown: bool,
}

/// Completion slots to resolve once the pool lock is released.
type Resolutions = Vec<(oneshot::Sender<CallResult>, CallResult)>;

fn deliver(resolutions: Resolutions) {
    for (tx, result) in resolutions {
        // the caller may have stopped waiting; that is fine
        let _ = tx.send(result);
    }
}

/// Least-loaded selection with oldest-first tie-break.
fn pick_connection(connections: &[ConnHandle], max_requests: usize) -> Option<usize> {
    connections
        .iter()
        .enumerate()
        .filter(|(_, conn)| conn.has_capacity(max_requests))
        .min_by_key(|(_, conn)| (conn.in_flight, conn.id))
        .map(|(idx, _)| idx)
}

/// Removes draining connections that have no in-flight work left.
fn reap_drained_locked(inner: &mut PoolInner) {
    inner.connections.retain_mut(|conn| {
        if conn.state == ConnState::Draining && conn.in_flight == 0 {
            debug!(conn = conn.id, "drained connection closed");
            conn.abort_io();
            false
        } else {
            true
        }
    });
}

impl ConnectionPool {
    /// Creates a pool. No connection is opened until the first submit.
    pub fn new(config: PoolConfig) -> Result<Self> {
        if config.scheme != "tcp" {
            return Err(HashgateError::Connection(format!(
                "unsupported transport scheme '{}'",
                config.scheme
            )));
        }
        if config.max_connections == 0 || config.max_requests_per_connection == 0 {
            return Err(HashgateError::Validation(
                "max_connections and max_requests_per_connection must be positive".to_string(),
            ));
        }

        Ok(Self {
            shared: Arc::new(PoolShared {
                config,
                inner: Mutex::new(PoolInner {
                    connections: Vec::new(),
                    queue: VecDeque::new(),
                    next_conn_id: 0,
                    shutdown: false,
                }),
            }),
        })
    }

    /// Submits a call for execution.
    ///
    /// Fails synchronously with [`HashgateError::Shutdown`] once the pool is
    /// closing. Otherwise the call is appended to the wait queue and the
    /// queue is drained, which dispatches it immediately when capacity
    /// exists (FIFO: earlier-queued calls are served first).
    pub fn submit(&self, payload: Payload) -> Result<CallHandle> {
        let id = next_request_id();
        let (tx, rx) = oneshot::channel();
        let call = Call {
            id,
            payload,
            attempts: 0,
            tx,
        };

        let mut resolutions = Vec::new();
        {
            let mut inner = self.shared.lock();
            if inner.shutdown {
                return Err(HashgateError::Shutdown);
            }
            inner.queue.push_back(call);
            self.shared.drain_locked(&mut inner, &mut resolutions);
        }
        deliver(resolutions);

        Ok(CallHandle { id, rx })
    }

    /// Cancels a call after a caller-side timeout: removes it from the wait
    /// queue or from whichever pending map still holds it, so the backend's
    /// eventual response does not resolve a slot no one awaits.
    pub(crate) fn cancel(&self, id: RequestId) {
        let mut resolutions = Vec::new();
        {
            let mut inner = self.shared.lock();
            if let Some(pos) = inner.queue.iter().position(|call| call.id == id) {
                inner.queue.remove(pos);
            } else {
                for conn in inner.connections.iter_mut() {
                    if conn.pending.remove(&id).is_some() {
                        conn.in_flight -= 1;
                        debug!(request = id, conn = conn.id, "cancelled in-flight request");
                        break;
                    }
                }
                reap_drained_locked(&mut inner);
                self.shared.drain_locked(&mut inner, &mut resolutions);
            }
        }
        deliver(resolutions);
    }

    /// Shuts the pool down: queued calls fail with [`HashgateError::Shutdown`],
    /// idle connections close immediately, busy ones drain their in-flight
    /// work and then close. New submits fail synchronously from here on.
    pub fn shutdown(&self) {
        let mut resolutions = Vec::new();
        {
            let mut inner = self.shared.lock();
            if inner.shutdown {
                return;
            }
            inner.shutdown = true;
            info!(queued = inner.queue.len(), "pool shutting down");

            while let Some(call) = inner.queue.pop_front() {
                resolutions.push((call.tx, Err(HashgateError::Shutdown)));
            }
            inner.connections.retain_mut(|conn| {
                if conn.in_flight == 0 {
                    conn.abort_io();
                    false
                } else {
                    conn.state = ConnState::Draining;
                    // dropping the sender lets the writer flush and close
                    conn.outbound = None;
                    true
                }
            });
        }
        deliver(resolutions);
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.shared.lock();
        PoolStats {
            connections: inner.connections.len(),
            in_flight: inner.connections.iter().map(|c| c.in_flight).sum(),
            queued: inner.queue.len(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Assigns queued calls to available capacity in arrival order, opening
    /// new connections while below the cap and demand warrants it.
    ///
    /// Must be called on every capacity event: a response completed, a
    /// connection became ready, a connection failed, a call was cancelled.
    fn drain_locked(self: &Arc<Self>, inner: &mut PoolInner, resolutions: &mut Resolutions) {
        let max_requests = self.config.max_requests_per_connection;
        loop {
            if inner.queue.is_empty() {
                return;
            }

            let Some(idx) = pick_connection(&inner.connections, max_requests) else {
                if inner.shutdown {
                    // nothing left to drain into and nothing will open again
                    for call in inner.queue.drain(..) {
                        resolutions.push((call.tx, Err(HashgateError::Shutdown)));
                    }
                } else {
                    let mut connecting = inner
                        .connections
                        .iter()
                        .filter(|c| c.state == ConnState::Connecting)
                        .count();
                    // one opening connection covers max_requests queued calls
                    while inner.connections.len() < self.config.max_connections
                        && connecting * max_requests < inner.queue.len()
                    {
                        self.spawn_connect_locked(inner, None);
                        connecting += 1;
                    }
                }
                return;
            };

            let Some(call) = inner.queue.pop_front() else {
                return;
            };
            let conn_id = inner.connections[idx].id;
            match inner.connections[idx].submit(call, max_requests) {
                Submit::Accepted => {}
                Submit::Rejected(call) => {
                    // pick_connection guarantees capacity; keep FIFO intact
                    inner.queue.push_front(call);
                    return;
                }
                Submit::EncodeFailed(tx, e) => resolutions.push((tx, Err(e))),
                Submit::Disconnected(call) => {
                    inner.queue.push_front(call);
                    self.fail_connection_locked(
                        inner,
                        conn_id,
                        "outbound channel closed",
                        resolutions,
                    );
                }
            }
        }
    }

    /// Inserts a Connecting placeholder (it occupies a connection slot right
    /// away) and spawns the connect task.
    fn spawn_connect_locked(self: &Arc<Self>, inner: &mut PoolInner, delay: Option<Duration>) {
        let conn_id = inner.next_conn_id;
        inner.next_conn_id += 1;
        inner.connections.push(ConnHandle::connecting(conn_id));
        debug!(conn = conn_id, addr = %self.config.addr(), "opening connection");

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match TcpStream::connect(shared.config.addr()).await {
                Ok(stream) => shared.connection_ready(conn_id, stream),
                Err(e) => shared.connect_failed(conn_id, &e.to_string()),
            }
        });
    }

    /// Connect task callback: the transport is up. Promotes the placeholder
    /// to Ready, wires up the I/O tasks and drains the queue into it.
    fn connection_ready(self: &Arc<Self>, conn_id: u64, stream: TcpStream) {
        let resolutions = {
            let mut inner = self.lock();
            let Some(pos) = inner.connections.iter().position(|c| c.id == conn_id) else {
                // pool shut down while connecting; the stream just drops
                return;
            };

            let (tx, rx) = mpsc::unbounded_channel();
            let io_tasks = connection::spawn_io(conn_id, stream, rx, Arc::clone(self));
            let conn = &mut inner.connections[pos];
            conn.state = ConnState::Ready;
            conn.outbound = Some(tx);
            conn.io_tasks = io_tasks;
            debug!(conn = conn_id, "connection ready");

            let mut resolutions = Vec::new();
            self.drain_locked(&mut inner, &mut resolutions);
            resolutions
        };
        deliver(resolutions);
    }

    /// Connect task callback: the transport could not be established.
    ///
    /// The placeholder is removed and every waiting call is charged one
    /// attempt against its retry budget; exhausted calls surface a
    /// connection error. If demand survives, one more connect is attempted
    /// after a short backoff.
    fn connect_failed(self: &Arc<Self>, conn_id: u64, reason: &str) {
        let resolutions = {
            let mut inner = self.lock();
            let Some(pos) = inner.connections.iter().position(|c| c.id == conn_id) else {
                return;
            };
            inner.connections.remove(pos);
            warn!(conn = conn_id, reason, "connect failed");

            let mut resolutions = Vec::new();
            let mut kept = VecDeque::new();
            while let Some(mut call) = inner.queue.pop_front() {
                if call.attempts < RETRY_LIMIT {
                    call.attempts += 1;
                    kept.push_back(call);
                } else {
                    resolutions.push((
                        call.tx,
                        Err(HashgateError::Connection(format!(
                            "could not reach {}: {}",
                            self.config.addr(),
                            reason
                        ))),
                    ));
                }
            }
            inner.queue = kept;

            if !inner.queue.is_empty()
                && !inner.shutdown
                && inner.connections.len() < self.config.max_connections
            {
                let backoff = Duration::from_millis(self.config.connect_backoff_ms);
                self.spawn_connect_locked(&mut inner, Some(backoff));
            }
            resolutions
        };
        deliver(resolutions);
    }

    /// I/O task callback: a frame arrived. Demultiplexes it to the pending
    /// call with the same correlation id and frees the connection slot.
    pub(crate) fn on_response(self: &Arc<Self>, conn_id: u64, response: Response) {
        let resolutions = {
            let mut inner = self.lock();
            let Some(pos) = inner.connections.iter().position(|c| c.id == conn_id) else {
                return;
            };

            let mut resolutions = Vec::new();
            let conn = &mut inner.connections[pos];
            match conn.pending.remove(&response.id) {
                Some(call) => {
                    conn.in_flight -= 1;
                    let outcome = if response.success {
                        response.result.ok_or_else(|| {
                            HashgateError::Protocol("success response carried no result".to_string())
                        })
                    } else {
                        let err = response.error.unwrap_or_else(|| WireError {
                            code: "unknown".to_string(),
                            message: "backend reported an unspecified error".to_string(),
                        });
                        Err(HashgateError::Backend {
                            code: err.code,
                            message: err.message,
                        })
                    };
                    resolutions.push((call.tx, outcome));
                }
                None => {
                    // cancelled by timeout before the response came back
                    debug!(conn = conn_id, request = response.id, "response for unknown request id");
                }
            }

            reap_drained_locked(&mut inner);
            self.drain_locked(&mut inner, &mut resolutions);
            resolutions
        };
        deliver(resolutions);
    }

    /// I/O task callback: the connection is gone (transport error, EOF or
    /// protocol desync). Pending calls within their retry budget are
    /// re-queued at the FRONT of the wait queue, ahead of newer arrivals;
    /// the rest resolve with a terminal retryable error.
    pub(crate) fn connection_failed(self: &Arc<Self>, conn_id: u64, reason: &str) {
        let resolutions = {
            let mut inner = self.lock();
            let mut resolutions = Vec::new();
            self.fail_connection_locked(&mut inner, conn_id, reason, &mut resolutions);
            self.drain_locked(&mut inner, &mut resolutions);
            resolutions
        };
        deliver(resolutions);
    }

    fn fail_connection_locked(
        self: &Arc<Self>,
        inner: &mut PoolInner,
        conn_id: u64,
        reason: &str,
        resolutions: &mut Resolutions,
    ) {
        let Some(pos) = inner.connections.iter().position(|c| c.id == conn_id) else {
            // already torn down (reader and writer can both report)
            return;
        };
        let mut conn = inner.connections.remove(pos);
        conn.state = ConnState::Failed;
        conn.abort_io();
        warn!(
            conn = conn_id,
            reason,
            pending = conn.pending.len(),
            "connection failed"
        );

        let mut pending: Vec<Call> = conn.pending.drain().map(|(_, call)| call).collect();
        // keep submission order when pushing to the queue front
        pending.sort_by_key(|call| call.id);
        for mut call in pending.into_iter().rev() {
            if inner.shutdown {
                // no connection will ever be opened again; re-queuing would
                // strand the caller
                resolutions.push((call.tx, Err(HashgateError::Shutdown)));
            } else if call.attempts < RETRY_LIMIT {
                call.attempts += 1;
                inner.queue.push_front(call);
            } else {
                resolutions.push((
                    call.tx,
                    Err(HashgateError::Retryable(format!(
                        "connection to {} lost: {}",
                        self.config.addr(),
                        reason
                    ))),
                ));
            }
        }
    }
}
