//! One pooled connection to the hashing backend.
//!
//! A connection is represented two ways: a [`ConnHandle`] owned by the pool
//! (state, in-flight count, pending map, outbound channel) and a pair of
//! spawned I/O tasks that own the socket halves. All pool-visible state lives
//! in the handle and is only touched under the pool lock. The tasks never do
//! network I/O while that lock is held; they talk to the pool through
//! callbacks on [`PoolShared`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use hashgate_common::codec::{decode_response, FrameDecoder};
use hashgate_common::{HashgateError, Payload, Request, RequestId, Result};

use crate::pool::PoolShared;

/// What a resolved call carries back to the caller: the raw result value on
/// success, a taxonomy error otherwise.
pub(crate) type CallResult = Result<serde_json::Value>;

/// Health state of a connection.
///
/// Transitions: `Connecting -> Ready -> Draining` (graceful) or any state
/// `-> Failed` (abrupt). Only `Ready` connections accept submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnState {
    Connecting,
    Ready,
    Draining,
    Failed,
}

/// One caller request: payload, retry budget used so far, and the completion
/// slot that resolves it exactly once.
pub(crate) struct Call {
    pub id: RequestId,
    pub payload: Payload,
    pub attempts: u8,
    pub tx: oneshot::Sender<CallResult>,
}

/// Outcome of offering a call to a connection.
pub(crate) enum Submit {
    /// Frame written to the outbound channel; call registered as pending.
    Accepted,
    /// The connection is at its in-flight cap or not `Ready`.
    Rejected(Call),
    /// The call itself cannot be encoded; resolve it, nothing was sent.
    EncodeFailed(oneshot::Sender<CallResult>, HashgateError),
    /// The outbound channel is gone; the connection is dead.
    Disconnected(Call),
}

/// Pool-side handle for one connection.
pub(crate) struct ConnHandle {
    /// Monotonic id; doubles as age (lower id = older connection).
    pub id: u64,
    pub state: ConnState,
    /// Requests sent but not yet resolved on this connection.
    pub in_flight: usize,
    /// Sender half of the writer task's frame channel. `None` while
    /// connecting and after the pool starts draining the connection.
    pub outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    /// Pending map: correlation id -> the call awaiting that response.
    pub pending: HashMap<RequestId, Call>,
    /// Reader/writer task handles, aborted when the handle is discarded.
    pub io_tasks: Vec<JoinHandle<()>>,
}

impl ConnHandle {
    pub fn connecting(id: u64) -> Self {
        ConnHandle {
            id,
            state: ConnState::Connecting,
            in_flight: 0,
            outbound: None,
            pending: HashMap::new(),
            io_tasks: Vec::new(),
        }
    }

    pub fn has_capacity(&self, max_requests: usize) -> bool {
        self.state == ConnState::Ready && self.in_flight < max_requests
    }

    /// Submits a call to this connection.
    ///
    /// On acceptance the encoded frame goes to the writer task, the call is
    /// registered in the pending map and the in-flight count is incremented.
    pub fn submit(&mut self, call: Call, max_requests: usize) -> Submit {
        if !self.has_capacity(max_requests) {
            return Submit::Rejected(call);
        }

        let request = Request::with_id(call.id, call.payload.clone());
        let frame = match hashgate_common::codec::encode_request(&request) {
            Ok(frame) => frame,
            Err(e) => return Submit::EncodeFailed(call.tx, e),
        };

        let sent = self
            .outbound
            .as_ref()
            .map(|tx| tx.send(frame).is_ok())
            .unwrap_or(false);
        if !sent {
            return Submit::Disconnected(call);
        }

        trace!(conn = self.id, request = call.id, "dispatched request");
        self.in_flight += 1;
        self.pending.insert(call.id, call);
        Submit::Accepted
    }

    /// Aborts the I/O tasks. Idempotent; used when the handle is discarded.
    pub fn abort_io(&mut self) {
        for task in self.io_tasks.drain(..) {
            task.abort();
        }
    }
}

/// Spawns the reader and writer tasks for an established connection.
pub(crate) fn spawn_io(
    conn_id: u64,
    stream: TcpStream,
    outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    shared: Arc<PoolShared>,
) -> Vec<JoinHandle<()>> {
    let (read_half, write_half) = stream.into_split();
    vec![
        tokio::spawn(read_loop(conn_id, read_half, Arc::clone(&shared))),
        tokio::spawn(write_loop(conn_id, write_half, outbound, shared)),
    ]
}

/// Reads frames off the socket and demultiplexes them into the pool.
///
/// Any transport or protocol error fails the whole connection; the pool then
/// decides what happens to the requests that were pending on it.
async fn read_loop(conn_id: u64, mut half: OwnedReadHalf, shared: Arc<PoolShared>) {
    let mut decoder = FrameDecoder::new();
    let mut chunk = [0u8; 4096];

    loop {
        match half.read(&mut chunk).await {
            Ok(0) => {
                shared.connection_failed(conn_id, "closed by remote");
                return;
            }
            Ok(n) => {
                decoder.extend(&chunk[..n]);
                loop {
                    match decoder.next_frame() {
                        Ok(Some(body)) => match decode_response(&body) {
                            Ok(response) => shared.on_response(conn_id, response),
                            Err(e) => {
                                shared.connection_failed(conn_id, &e.to_string());
                                return;
                            }
                        },
                        Ok(None) => break,
                        Err(e) => {
                            shared.connection_failed(conn_id, &e.to_string());
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                shared.connection_failed(conn_id, &format!("read failed: {}", e));
                return;
            }
        }
    }
}

/// Serializes outbound frames onto the socket.
///
/// The channel closing is the graceful path: the pool dropped the sender
/// (drain or teardown), so flush what is left and shut the write half down.
async fn write_loop(
    conn_id: u64,
    mut half: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    shared: Arc<PoolShared>,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = half.write_all(&frame).await {
            shared.connection_failed(conn_id, &format!("write failed: {}", e));
            return;
        }
        if let Err(e) = half.flush().await {
            shared.connection_failed(conn_id, &format!("flush failed: {}", e));
            return;
        }
    }

    debug!(conn = conn_id, "outbound channel closed, shutting down write half");
    let _ = half.shutdown().await;
}
