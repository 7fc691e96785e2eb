//! Shared value types used by both the remoting client and server.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RpcError;

/// Argument and return values carried on the wire.
///
/// `MsgPack` values keep the framework independent of the concrete argument
/// types; typed encoding happens at the proxy and handler edges.
pub type Value = rmpv::Value;

/// String-keyed call metadata propagated from client to server.
pub type Metadata = std::collections::HashMap<String, String>;

/// Network address of a service node.
///
/// Ordered by host then port so discovery can return a stable, ordered set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = RpcError;

    /// Parses `host:port`, splitting on the last `:`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| RpcError::InvalidAddress {
            address: s.to_string(),
        })?;
        if host.is_empty() {
            return Err(RpcError::InvalidAddress {
                address: s.to_string(),
            });
        }
        let port = port.parse::<u16>().map_err(|_| RpcError::InvalidAddress {
            address: s.to_string(),
        })?;
        Ok(Self::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_agree() {
        let addr = NodeAddress::new("10.0.0.7", 5730);
        assert_eq!(addr.to_string(), "10.0.0.7:5730");
        assert_eq!("10.0.0.7:5730".parse::<NodeAddress>().unwrap(), addr);
    }

    #[test]
    fn parse_rejects_missing_port() {
        assert!("localhost".parse::<NodeAddress>().is_err());
        assert!("localhost:notaport".parse::<NodeAddress>().is_err());
        assert!(":80".parse::<NodeAddress>().is_err());
    }

    #[test]
    fn ordering_is_host_then_port() {
        let mut nodes = vec![
            NodeAddress::new("b", 1),
            NodeAddress::new("a", 9),
            NodeAddress::new("a", 2),
        ];
        nodes.sort();
        assert_eq!(
            nodes,
            vec![
                NodeAddress::new("a", 2),
                NodeAddress::new("a", 9),
                NodeAddress::new("b", 1),
            ]
        );
    }
}
