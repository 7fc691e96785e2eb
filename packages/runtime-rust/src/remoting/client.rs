//! Remoting client: many concurrent calls multiplexed over one connection.
//!
//! Every outbound request gets a fresh correlation id. The pending entry is
//! inserted before the frame is queued, so a reply can never arrive for an id
//! the client does not know yet. Each entry is removed exactly once: by the
//! matching reply, by its deadline, by disconnect, or when the caller drops
//! its future.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use courier_core::{InvokeMessage, NodeAddress, ServiceResult, TransportMessage};

use super::codec::TransportCodec;
use crate::config::CourierConfig;

type Request = TransportMessage<InvokeMessage>;
type Reply = TransportMessage<ServiceResult>;

// ---------------------------------------------------------------------------
// ClientOptions
// ---------------------------------------------------------------------------

/// Per-connection settings for a [`RemotingClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub invoke_timeout: Duration,
    pub disconnect_grace: Duration,
    pub outbound_channel_capacity: usize,
    pub max_frame_length: usize,
}

impl ClientOptions {
    #[must_use]
    pub fn from_config(config: &CourierConfig) -> Self {
        Self {
            invoke_timeout: config.client.invoke_timeout(),
            disconnect_grace: config.client.disconnect_grace(),
            outbound_channel_capacity: config.client.outbound_channel_capacity.max(1),
            max_frame_length: config.max_frame_length(),
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from_config(&CourierConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Pending calls
// ---------------------------------------------------------------------------

struct PendingCall {
    tx: oneshot::Sender<ServiceResult>,
    deadline: Instant,
}

/// Correlation table shared by the callers and the reader task.
#[derive(Default)]
struct PendingCalls {
    calls: DashMap<String, PendingCall>,
}

impl PendingCalls {
    fn complete(&self, reply: Reply) {
        match self.calls.remove(&reply.id) {
            Some((id, call)) => {
                trace!(
                    id = %id,
                    late = call.deadline <= Instant::now(),
                    status = ?reply.body.status,
                    "reply matched"
                );
                // The caller may have given up between the remove and now.
                let _ = call.tx.send(reply.body);
            }
            None => {
                warn!(id = %reply.id, "dropping reply with no pending call");
            }
        }
    }

    fn cancel_all(&self, reason: &str) -> usize {
        let ids: Vec<String> = self.calls.iter().map(|e| e.key().clone()).collect();
        let mut cancelled = 0;
        for id in ids {
            if let Some((_, call)) = self.calls.remove(&id) {
                let _ = call.tx.send(ServiceResult::cancelled(reason));
                cancelled += 1;
            }
        }
        cancelled
    }
}

/// Removes the caller's entry when `send` returns or is dropped.
struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.calls.remove(self.id);
    }
}

// ---------------------------------------------------------------------------
// RemotingClient
// ---------------------------------------------------------------------------

/// Client side of one connection to a remote node.
pub struct RemotingClient {
    peer: NodeAddress,
    options: ClientOptions,
    pending: Arc<PendingCalls>,
    outbound: mpsc::Sender<Request>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RemotingClient {
    /// Takes ownership of `io` and starts the reader and writer tasks.
    #[must_use]
    pub fn spawn<IO>(io: IO, peer: NodeAddress, options: ClientOptions) -> Arc<Self>
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let frames_in = FramedRead::new(
            read_half,
            TransportCodec::<Request, Reply>::new(options.max_frame_length),
        );
        let frames_out = FramedWrite::new(
            write_half,
            TransportCodec::<Request, Reply>::new(options.max_frame_length),
        );

        let (outbound, outbound_rx) = mpsc::channel(options.outbound_channel_capacity);
        let pending = Arc::new(PendingCalls::default());
        let cancel = CancellationToken::new();

        let writer = tokio::spawn(write_loop(
            frames_out,
            outbound_rx,
            Arc::clone(&pending),
            cancel.clone(),
            peer.clone(),
        ));
        let reader = tokio::spawn(read_loop(
            frames_in,
            Arc::clone(&pending),
            cancel.clone(),
            peer.clone(),
        ));

        debug!(peer = %peer, "remoting client connected");
        Arc::new(Self {
            peer,
            options,
            pending,
            outbound,
            cancel,
            tasks: Mutex::new(vec![writer, reader]),
        })
    }

    #[must_use]
    pub fn peer(&self) -> &NodeAddress {
        &self.peer
    }

    /// Sends one request and waits for its reply.
    ///
    /// Never fails outright: a missed deadline yields a `Timeout` result and a
    /// closed connection yields a `TransportFailure` result.
    pub async fn send(&self, invoke: InvokeMessage) -> ServiceResult {
        if self.cancel.is_cancelled() {
            return ServiceResult::cancelled(format!("connection to {} is closed", self.peer));
        }

        let id = Uuid::new_v4().simple().to_string();
        let deadline = Instant::now() + self.options.invoke_timeout;
        let (tx, rx) = oneshot::channel();
        match self.pending.calls.entry(id.clone()) {
            Entry::Occupied(_) => {
                return ServiceResult::fault(format!("correlation id {id} already in use"));
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingCall { tx, deadline });
            }
        }
        let _guard = PendingGuard {
            pending: &self.pending,
            id: &id,
        };
        // A disconnect that ran between the first check and the insert has
        // already swept the table and would never resolve this entry.
        if self.cancel.is_cancelled() {
            return ServiceResult::cancelled(format!("connection to {} is closed", self.peer));
        }

        trace!(id = %id, route = %invoke.route, peer = %self.peer, "sending request");
        let frame = TransportMessage::new(id.clone(), invoke);
        let exchange = async {
            self.outbound.send(frame).await.map_err(|_| ())?;
            rx.await.map_err(|_| ())
        };

        match tokio::time::timeout_at(deadline, exchange).await {
            Ok(Ok(result)) => result,
            Ok(Err(())) => {
                ServiceResult::cancelled(format!("connection to {} closed before reply", self.peer))
            }
            Err(_) => {
                trace!(id = %id, peer = %self.peer, "request timed out");
                ServiceResult::timeout("remoting invoke timeout")
            }
        }
    }

    /// Resolves the pending call matching `reply`. Unknown ids are logged and
    /// dropped.
    pub fn on_received(&self, reply: TransportMessage<ServiceResult>) {
        self.pending.complete(reply);
    }

    /// Closes the connection.
    ///
    /// Every pending call is resolved as cancelled. The reader and writer
    /// tasks get the configured grace period to stop and are aborted after.
    pub async fn disconnect(&self) {
        self.cancel.cancel();
        let cancelled = self.pending.cancel_all("client disconnected");
        debug!(peer = %self.peer, cancelled, "remoting client disconnecting");

        let handles = std::mem::take(&mut *self.tasks.lock());
        let deadline = Instant::now() + self.options.disconnect_grace;
        for handle in handles {
            let abort = handle.abort_handle();
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                warn!(peer = %self.peer, "connection task did not stop in time, aborting");
                abort.abort();
            }
        }
    }

    /// `false` once the connection has failed or been disconnected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.calls.len()
    }
}

impl fmt::Debug for RemotingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemotingClient")
            .field("peer", &self.peer)
            .field("connected", &self.is_connected())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl Drop for RemotingClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn write_loop<W>(
    mut frames: FramedWrite<W, TransportCodec<Request, Reply>>,
    mut outbound: mpsc::Receiver<Request>,
    pending: Arc<PendingCalls>,
    cancel: CancellationToken,
    peer: NodeAddress,
) where
    W: AsyncWrite + Send + Unpin,
{
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            next = outbound.recv() => {
                let Some(frame) = next else { break };
                if let Err(err) = frames.send(frame).await {
                    warn!(peer = %peer, error = %err, "failed to write request frame");
                    cancel.cancel();
                    pending.cancel_all("connection write failed");
                    break;
                }
            }
        }
    }
    let _ = frames.close().await;
}

async fn read_loop<R>(
    mut frames: FramedRead<R, TransportCodec<Request, Reply>>,
    pending: Arc<PendingCalls>,
    cancel: CancellationToken,
    peer: NodeAddress,
) where
    R: AsyncRead + Send + Unpin,
{
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            frame = frames.next() => match frame {
                Some(Ok(reply)) => pending.complete(reply),
                Some(Err(err)) => {
                    warn!(peer = %peer, error = %err, "failed to read reply frame");
                    break;
                }
                None => {
                    debug!(peer = %peer, "connection closed by peer");
                    break;
                }
            }
        }
    }
    cancel.cancel();
    let cancelled = pending.cancel_all("connection closed");
    if cancelled > 0 {
        debug!(peer = %peer, cancelled, "cancelled pending calls after connection loss");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
