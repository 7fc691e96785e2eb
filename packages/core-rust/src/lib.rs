//! Courier core: wire messages, route keys, node addresses and the codec.

pub mod codec;
pub mod error;
pub mod messages;
pub mod route;
pub mod types;

pub use codec::{Codec, MsgPackCodec};
pub use error::{CodecError, RpcError};
pub use messages::{InvokeMessage, RemotingStatus, ServiceResult, TransportMessage};
pub use route::{join_route, RouteKey};
pub use types::{Metadata, NodeAddress, Value};
