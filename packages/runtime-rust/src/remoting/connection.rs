//! Inbound connection tracking for the remoting server.
//!
//! Each accepted connection gets a bounded outbound channel drained by its
//! writer task, so a slow peer applies backpressure to the calls replying to
//! it instead of growing memory without bound.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use courier_core::{ServiceResult, TransportMessage};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Identifier assigned by the registry. Starts at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Frame queued for a connection's writer task.
#[derive(Debug)]
pub enum OutboundFrame {
    Reply(TransportMessage<ServiceResult>),
    /// Flush what is queued, then close the write side.
    Close,
}

/// Failure to queue a frame on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("outbound channel stayed full past the send timeout")]
    Timeout,
    #[error("connection closed")]
    Disconnected,
    #[error("outbound channel full")]
    Full,
}

/// Sender side of one inbound connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    /// Remote address as reported by the transport.
    pub peer: String,
    pub connected_at: Instant,
    tx: mpsc::Sender<OutboundFrame>,
}

impl ConnectionHandle {
    /// Queues a frame without waiting.
    ///
    /// # Errors
    ///
    /// [`SendError::Full`] when the channel is at capacity,
    /// [`SendError::Disconnected`] when the writer task has exited.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<(), SendError> {
        self.tx.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Disconnected,
        })
    }

    /// Queues a frame, waiting up to `timeout` for channel capacity.
    ///
    /// # Errors
    ///
    /// [`SendError::Timeout`] if the channel stays full,
    /// [`SendError::Disconnected`] if the writer task has exited.
    pub async fn send_timeout(
        &self,
        frame: OutboundFrame,
        timeout: Duration,
    ) -> Result<(), SendError> {
        match tokio::time::timeout(timeout, self.tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SendError::Disconnected),
            Err(_) => Err(SendError::Timeout),
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// All live inbound connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a connection and returns its handle plus the receiver its
    /// writer task drains.
    pub fn register(
        &self,
        peer: impl Into<String>,
        capacity: usize,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundFrame>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Arc::new(ConnectionHandle {
            id,
            peer: peer.into(),
            connected_at: Instant::now(),
            tx,
        });
        self.connections.insert(id, Arc::clone(&handle));
        (handle, rx)
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.remove(&id).map(|(_, handle)| handle)
    }

    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&id).map(|r| Arc::clone(r.value()))
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Removes every connection and asks each writer to close.
    ///
    /// Returns the number of connections that were open.
    pub fn close_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();
        let mut closed = 0;
        for id in ids {
            if let Some((_, handle)) = self.connections.remove(&id) {
                // A full channel still closes once the reader stops.
                let _ = handle.try_send(OutboundFrame::Close);
                closed += 1;
            }
        }
        closed
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
