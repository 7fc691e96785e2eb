//! One shared [`RemotingClient`] per remote node.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::net::TcpStream;
use tracing::{debug, info};

use courier_core::{NodeAddress, RpcError};

use super::client::{ClientOptions, RemotingClient};

/// Caches connections by node address and reconnects when one has failed.
pub struct RemotingClientFactory {
    clients: DashMap<NodeAddress, Arc<RemotingClient>>,
    options: ClientOptions,
    connect_timeout: Duration,
}

impl RemotingClientFactory {
    #[must_use]
    pub fn new(options: ClientOptions, connect_timeout: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            options,
            connect_timeout,
        }
    }

    /// Returns the live client for `node`, connecting first if there is none
    /// or the cached one has disconnected.
    ///
    /// # Errors
    ///
    /// [`RpcError::TransportFailure`] if the TCP connect fails or does not
    /// finish within the connect timeout.
    pub async fn get_or_connect(&self, node: &NodeAddress) -> Result<Arc<RemotingClient>, RpcError> {
        if let Some(client) = self.clients.get(node) {
            if client.is_connected() {
                return Ok(Arc::clone(client.value()));
            }
        }

        let stream = match tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((node.host.as_str(), node.port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                return Err(RpcError::TransportFailure {
                    message: format!("connect to {node} failed: {err}"),
                })
            }
            Err(_) => {
                return Err(RpcError::TransportFailure {
                    message: format!("connect to {node} timed out"),
                })
            }
        };
        if let Err(err) = stream.set_nodelay(true) {
            debug!(node = %node, error = %err, "could not set TCP_NODELAY");
        }
        let fresh = RemotingClient::spawn(stream, node.clone(), self.options.clone());

        // Another caller may have connected while this one was connecting.
        match self.clients.entry(node.clone()) {
            Entry::Occupied(mut slot) => {
                if slot.get().is_connected() {
                    let winner = Arc::clone(slot.get());
                    drop(slot);
                    tokio::spawn(async move { fresh.disconnect().await });
                    Ok(winner)
                } else {
                    slot.insert(Arc::clone(&fresh));
                    info!(node = %node, "reconnected");
                    Ok(fresh)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&fresh));
                info!(node = %node, "connected");
                Ok(fresh)
            }
        }
    }

    /// Drops the cached client for `node` and closes it.
    pub async fn remove(&self, node: &NodeAddress) {
        if let Some((_, client)) = self.clients.remove(node) {
            client.disconnect().await;
        }
    }

    /// Drops the cached client for `node` only if it is still `stale`, then
    /// closes `stale`. A client that replaced it in the meantime is kept.
    ///
    /// Returns whether the cache entry was removed.
    pub async fn remove_if_same(&self, node: &NodeAddress, stale: &Arc<RemotingClient>) -> bool {
        let removed = self
            .clients
            .remove_if(node, |_, cached| Arc::ptr_eq(cached, stale))
            .is_some();
        stale.disconnect().await;
        removed
    }

    #[must_use]
    pub fn get(&self, node: &NodeAddress) -> Option<Arc<RemotingClient>> {
        self.clients.get(node).map(|c| Arc::clone(c.value()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Closes every cached connection.
    pub async fn disconnect_all(&self) {
        let nodes: Vec<NodeAddress> = self.clients.iter().map(|e| e.key().clone()).collect();
        for node in nodes {
            self.remove(&node).await;
        }
    }
}
