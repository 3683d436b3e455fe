use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use wirepool_common::PoolError;

/// One addressable remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub host: String,
    pub port: u16,
}

impl Node {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Address string in `host:port` form, as used by the transport.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Node {
    type Err = PoolError;

    /// Parses `HOST:PORT`, the format used by the environment override.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| {
            PoolError::InvalidConfig(format!("expected HOST:PORT, got '{}'", s))
        })?;
        if host.is_empty() {
            return Err(PoolError::InvalidConfig(format!(
                "empty host in '{}'",
                s
            )));
        }
        let port: u16 = port.parse().map_err(|_| {
            PoolError::InvalidConfig(format!("invalid port in '{}'", s))
        })?;
        if port == 0 {
            return Err(PoolError::InvalidConfig(format!(
                "port must be 1-65535, got 0 in '{}'",
                s
            )));
        }
        Ok(Node::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_addr() {
        let node = Node::new("127.0.0.1", 9502);
        assert_eq!(node.addr(), "127.0.0.1:9502");
        assert_eq!(node.to_string(), "127.0.0.1:9502");
    }

    #[test]
    fn test_parse_host_port() {
        let node: Node = "10.0.0.5:8000".parse().unwrap();
        assert_eq!(node, Node::new("10.0.0.5", 8000));
    }

    #[test]
    fn test_parse_rejects_missing_port() {
        assert!("localhost".parse::<Node>().is_err());
    }

    #[test]
    fn test_parse_rejects_port_zero() {
        assert!("localhost:0".parse::<Node>().is_err());
    }

    #[test]
    fn test_parse_rejects_empty_host() {
        assert!(":9502".parse::<Node>().is_err());
    }

    #[test]
    fn test_parse_rejects_non_numeric_port() {
        assert!("localhost:abc".parse::<Node>().is_err());
    }
}
