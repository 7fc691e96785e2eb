//! Remoting server with deferred startup.
//!
//! `new()` allocates shared state, `start()` binds the TCP listener and
//! `serve()` accepts connections until shutdown. Each connection gets one
//! reader loop, one writer task and one task per inbound request, so a slow
//! handler never blocks other calls on the same connection.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tower::ServiceExt;
use tracing::{debug, info, warn};

use courier_core::{InvokeMessage, ServiceResult, TransportMessage};

use super::codec::TransportCodec;
use super::connection::{ConnectionHandle, ConnectionRegistry, OutboundFrame};
use super::dispatcher::Dispatcher;
use super::middleware::{build_dispatch_pipeline, DispatchPipeline};
use super::shutdown::ShutdownController;
use crate::config::ServerSettings;

type Request = TransportMessage<InvokeMessage>;
type Reply = TransportMessage<ServiceResult>;

/// Inbound side of a node.
pub struct RemotingServer {
    settings: ServerSettings,
    max_frame_length: usize,
    dispatcher: Arc<Dispatcher>,
    listener: Option<TcpListener>,
    connections: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownController>,
}

impl RemotingServer {
    /// Creates the server without binding any port.
    #[must_use]
    pub fn new(settings: ServerSettings, dispatcher: Arc<Dispatcher>, max_frame_length: usize) -> Self {
        Self {
            settings,
            max_frame_length,
            dispatcher,
            listener: None,
            connections: Arc::new(ConnectionRegistry::new()),
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    #[must_use]
    pub fn connections(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.connections)
    }

    /// Triggering this controller stops `serve()` just like its shutdown
    /// future does.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Binds the listener and returns the bound port, which differs from the
    /// configured one when that is 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.settings.host, self.settings.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        info!(host = %self.settings.host, port, "remoting listener bound");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Accepts connections until `shutdown` resolves or the controller is
    /// triggered, then drains.
    ///
    /// Drain order: stop reading new requests, wait up to the shutdown grace
    /// for in-flight calls to queue their replies, then close every
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first.
    pub async fn serve(mut self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let Some(listener) = self.listener.take() else {
            anyhow::bail!("start() must be called before serve()");
        };
        let context = self.connection_context();

        let controller = Arc::clone(&self.shutdown);
        let mut triggered = controller.subscribe();
        controller.set_serving();
        tokio::pin!(shutdown);

        if !controller.is_shutting_down() {
            loop {
                tokio::select! {
                    () = &mut shutdown => break,
                    _ = triggered.changed() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, addr)) => {
                            if let Err(err) = stream.set_nodelay(true) {
                                debug!(peer = %addr, error = %err, "could not set TCP_NODELAY");
                            }
                            tokio::spawn(serve_connection(stream, addr.to_string(), context.clone()));
                        }
                        Err(err) => warn!(error = %err, "accept failed"),
                    }
                }
            }
        }

        info!(in_flight = controller.in_flight(), "remoting server draining");
        controller.trigger_shutdown();
        drop(listener);

        if !controller.wait_for_drain(self.settings.shutdown_grace()).await {
            warn!(
                in_flight = controller.in_flight(),
                "shutdown grace elapsed with calls still in flight"
            );
        }
        let closed = self.connections.close_all();
        controller.set_stopped();
        info!(closed, "remoting server stopped");
        Ok(())
    }

    fn connection_context(&self) -> ConnectionContext {
        ConnectionContext {
            pipeline: build_dispatch_pipeline(
                Arc::clone(&self.dispatcher),
                self.settings.max_concurrent_calls as usize,
            ),
            connections: Arc::clone(&self.connections),
            shutdown: Arc::clone(&self.shutdown),
            outbound_capacity: self.settings.outbound_channel_capacity,
            send_timeout: self.settings.send_timeout(),
            max_frame_length: self.max_frame_length,
        }
    }

    /// Serves one already-established stream until the peer closes it or the
    /// server shuts down.
    pub async fn serve_stream<IO>(&self, io: IO, peer: impl Into<String>)
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        serve_connection(io, peer.into(), self.connection_context()).await;
    }
}

// ---------------------------------------------------------------------------
// Per-connection tasks
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct ConnectionContext {
    pipeline: DispatchPipeline,
    connections: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownController>,
    outbound_capacity: usize,
    send_timeout: Duration,
    max_frame_length: usize,
}

async fn serve_connection<IO>(io: IO, peer: String, ctx: ConnectionContext)
where
    IO: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(io);
    let mut frames_in = FramedRead::new(
        read_half,
        TransportCodec::<Reply, Request>::new(ctx.max_frame_length),
    );
    let frames_out = FramedWrite::new(
        write_half,
        TransportCodec::<Reply, Request>::new(ctx.max_frame_length),
    );

    let (handle, outbound) = ctx.connections.register(peer.clone(), ctx.outbound_capacity);
    let writer = tokio::spawn(write_replies(frames_out, outbound, peer.clone()));
    debug!(id = handle.id.0, peer = %peer, "connection opened");

    let mut triggered = ctx.shutdown.subscribe();
    if !ctx.shutdown.is_shutting_down() {
        loop {
            tokio::select! {
                _ = triggered.changed() => break,
                frame = frames_in.next() => match frame {
                    Some(Ok(request)) => spawn_call(request, &handle, &ctx),
                    Some(Err(err)) => {
                        warn!(peer = %peer, error = %err, "dropping connection after bad frame");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    // In-flight calls keep their own handle; the writer ends after the last
    // of them has queued its reply.
    ctx.connections.remove(handle.id);
    drop(handle);
    let _ = writer.await;
    debug!(peer = %peer, "connection closed");
}

fn spawn_call(request: Request, handle: &Arc<ConnectionHandle>, ctx: &ConnectionContext) {
    let guard = ctx.shutdown.track_call();
    let pipeline = ctx.pipeline.clone();
    let handle = Arc::clone(handle);
    let send_timeout = ctx.send_timeout;

    tokio::spawn(async move {
        let _guard = guard;
        let id = request.id.clone();
        let result = match pipeline.oneshot(request).await {
            Ok(result) => result,
            Err(err) => ServiceResult::fault(err.to_string()),
        };
        let reply = OutboundFrame::Reply(TransportMessage::new(id.clone(), result));
        if let Err(err) = handle.send_timeout(reply, send_timeout).await {
            warn!(id = %id, peer = %handle.peer, error = %err, "reply dropped");
        }
    });
}

async fn write_replies<W>(
    mut frames: FramedWrite<W, TransportCodec<Reply, Request>>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    peer: String,
) where
    W: AsyncWrite + Send + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        match frame {
            OutboundFrame::Reply(reply) => {
                if let Err(err) = frames.send(reply).await {
                    warn!(peer = %peer, error = %err, "failed to write reply frame");
                    break;
                }
            }
            OutboundFrame::Close => break,
        }
    }
    let _ = frames.close().await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
