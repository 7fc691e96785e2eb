//! Wire message schemas for the Courier remoting protocol.
//!
//! All types use named `MsgPack` serialization (`rmp_serde::to_vec_named()`)
//! with camelCase field names.

pub mod result;
pub mod transport;

pub use result::{RemotingStatus, ServiceResult};
pub use transport::{InvokeMessage, TransportMessage};
