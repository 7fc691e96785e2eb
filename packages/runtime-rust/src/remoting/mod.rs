//! Network side of the runtime.
//!
//! - [`codec`]: length-delimited MessagePack framing
//! - [`client`]: request/response correlation over one connection
//! - [`factory`]: one shared client per remote node
//! - [`dispatcher`]: inbound route resolution and server pipeline
//! - [`middleware`]: tower layers around the dispatcher
//! - [`connection`]: live inbound connections and their outbound queues
//! - [`shutdown`]: server lifecycle and in-flight tracking
//! - [`server`]: TCP accept loop with deferred startup

pub mod client;
pub mod codec;
pub mod connection;
pub mod dispatcher;
pub mod factory;
pub mod middleware;
pub mod server;
pub mod shutdown;

pub use client::{ClientOptions, RemotingClient};
pub use codec::{FrameError, TransportCodec};
pub use connection::{ConnectionHandle, ConnectionId, ConnectionRegistry, OutboundFrame, SendError};
pub use dispatcher::{DispatchError, DispatchService, Dispatcher, LocalInvocation};
pub use factory::RemotingClientFactory;
pub use server::RemotingServer;
pub use shutdown::{CallGuard, ServerState, ShutdownController};
