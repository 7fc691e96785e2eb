//! Server-to-client result payload.

use serde::{Deserialize, Serialize};

use crate::error::RpcError;
use crate::types::Value;

/// Outcome kind of a remote invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RemotingStatus {
    Ok,
    Timeout,
    CircuitOpen,
    NotFound,
    DuplicateRoute,
    TransportFailure,
    Fault,
}

impl RemotingStatus {
    /// Returns `true` for outcomes that indicate an unhealthy target.
    ///
    /// These are the outcomes the circuit breaker counts and retries.
    /// `NotFound` and `DuplicateRoute` are deterministic and excluded.
    #[must_use]
    pub fn is_transient_failure(self) -> bool {
        matches!(self, Self::Timeout | Self::TransportFailure | Self::Fault)
    }
}

/// Result of invoking a route: a status plus either a value or an error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResult {
    pub status: RemotingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ServiceResult {
    /// A successful result carrying `value`.
    #[must_use]
    pub fn ok(value: Value) -> Self {
        Self {
            status: RemotingStatus::Ok,
            value: Some(value),
            message: None,
        }
    }

    /// A failed result of the given kind.
    #[must_use]
    pub fn failure(status: RemotingStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            value: None,
            message: Some(message.into()),
        }
    }

    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::failure(RemotingStatus::Timeout, message)
    }

    #[must_use]
    pub fn not_found(route: &str) -> Self {
        Self::failure(RemotingStatus::NotFound, format!("route not found: {route}"))
    }

    /// A pending call released because its connection went away.
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::failure(RemotingStatus::TransportFailure, message)
    }

    #[must_use]
    pub fn fault(message: impl Into<String>) -> Self {
        Self::failure(RemotingStatus::Fault, message)
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == RemotingStatus::Ok
    }

    /// Converts into the carried value, or the matching [`RpcError`].
    ///
    /// A successful result without a value yields `Value::Nil`.
    ///
    /// # Errors
    ///
    /// Returns the `RpcError` variant corresponding to a non-`Ok` status.
    pub fn into_result(self, route: &str) -> Result<Value, RpcError> {
        match self.status {
            RemotingStatus::Ok => Ok(self.value.unwrap_or(Value::Nil)),
            status => Err(RpcError::from_status(
                status,
                route,
                self.message.unwrap_or_default(),
            )),
        }
    }
}

impl From<RpcError> for ServiceResult {
    fn from(err: RpcError) -> Self {
        Self::failure(err.status(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failures() {
        assert!(RemotingStatus::Timeout.is_transient_failure());
        assert!(RemotingStatus::TransportFailure.is_transient_failure());
        assert!(RemotingStatus::Fault.is_transient_failure());
        assert!(!RemotingStatus::Ok.is_transient_failure());
        assert!(!RemotingStatus::NotFound.is_transient_failure());
        assert!(!RemotingStatus::CircuitOpen.is_transient_failure());
    }

    #[test]
    fn into_result_ok_without_value_is_nil() {
        let result = ServiceResult {
            status: RemotingStatus::Ok,
            value: None,
            message: None,
        };
        assert_eq!(result.into_result("Calc/Reset").unwrap(), Value::Nil);
    }

    #[test]
    fn into_result_maps_failure_kind() {
        let err = ServiceResult::timeout("remoting invoke timeout")
            .into_result("Calc/Add")
            .unwrap_err();
        assert_eq!(
            err,
            RpcError::Timeout {
                message: "remoting invoke timeout".to_string()
            }
        );
    }
}
