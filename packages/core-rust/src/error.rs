//! Error types shared across the framework.

use crate::messages::RemotingStatus;

/// Errors surfaced to typed callers and registration code.
///
/// Each non-`Ok` [`RemotingStatus`] has a matching variant so that a failed
/// [`ServiceResult`](crate::messages::ServiceResult) can be turned into a
/// `Result` without losing its kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error("duplicate route: {route}")]
    DuplicateRoute { route: String },
    #[error("route not found: {route}")]
    NotFoundRoute { route: String },
    #[error("remoting invoke timed out: {message}")]
    Timeout { message: String },
    #[error("circuit open: {message}")]
    CircuitOpen { message: String },
    #[error("transport failure: {message}")]
    TransportFailure { message: String },
    #[error("remote fault: {message}")]
    Fault { message: String },
    #[error("invalid node address: {address}")]
    InvalidAddress { address: String },
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl RpcError {
    /// Maps a failed status and its message to the matching error variant.
    ///
    /// `route` is used for the route-keyed variants. `Ok` has no error
    /// counterpart and maps to `Fault`.
    #[must_use]
    pub fn from_status(status: RemotingStatus, route: &str, message: String) -> Self {
        match status {
            RemotingStatus::DuplicateRoute => Self::DuplicateRoute {
                route: route.to_string(),
            },
            RemotingStatus::NotFound => Self::NotFoundRoute {
                route: route.to_string(),
            },
            RemotingStatus::Timeout => Self::Timeout { message },
            RemotingStatus::CircuitOpen => Self::CircuitOpen { message },
            RemotingStatus::TransportFailure => Self::TransportFailure { message },
            RemotingStatus::Ok | RemotingStatus::Fault => Self::Fault { message },
        }
    }

    /// The wire status that corresponds to this error.
    #[must_use]
    pub fn status(&self) -> RemotingStatus {
        match self {
            Self::DuplicateRoute { .. } => RemotingStatus::DuplicateRoute,
            Self::NotFoundRoute { .. } => RemotingStatus::NotFound,
            Self::Timeout { .. } => RemotingStatus::Timeout,
            Self::CircuitOpen { .. } => RemotingStatus::CircuitOpen,
            Self::TransportFailure { .. } => RemotingStatus::TransportFailure,
            Self::Fault { .. } | Self::InvalidAddress { .. } | Self::Codec(_) => {
                RemotingStatus::Fault
            }
        }
    }
}

/// Errors from encoding or decoding wire payloads and values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode: {0}")]
    Encode(String),
    #[error("failed to decode: {0}")]
    Decode(String),
}

impl From<rmp_serde::encode::Error> for CodecError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for CodecError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
