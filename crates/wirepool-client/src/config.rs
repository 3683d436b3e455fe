//! Consumer configuration.
//!
//! The deserializable shape ([`RawConsumerConfig`]) mirrors one consumer
//! entry as applications declare it: float-second timeouts, millisecond
//! retry interval, nullable heartbeat seconds and a nested `pool` block.
//! [`RawConsumerConfig::validate`] converts it into the immutable runtime
//! form ([`ConsumerConfig`]) with `Duration` fields, failing fast at
//! startup on any invariant violation.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use wirepool_common::{Framing, PoolError, Result};

use crate::balancer::Strategy;
use crate::node::Node;

/// Service protocol spoken to the nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// JSON-RPC over HTTP. Not supported by the pooled transporter.
    JsonRpcHttp,
    /// JSON-RPC over TCP with CRLF-delimited frames.
    JsonRpc,
    /// JSON-RPC over TCP with a 4-byte length prefix.
    JsonRpcTcpLengthCheck,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::JsonRpcHttp => "jsonrpc-http",
            Protocol::JsonRpc => "jsonrpc",
            Protocol::JsonRpcTcpLengthCheck => "jsonrpc-tcp-length-check",
        }
    }

    /// The wire framing for this protocol, if the pooled transporter
    /// supports it.
    pub fn framing(&self) -> Option<Framing> {
        match self {
            Protocol::JsonRpcHttp => None,
            Protocol::JsonRpc => Some(Framing::CrlfDelimited),
            Protocol::JsonRpcTcpLengthCheck => Some(Framing::LengthPrefixed),
        }
    }
}

impl FromStr for Protocol {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "jsonrpc-http" => Ok(Protocol::JsonRpcHttp),
            "jsonrpc" => Ok(Protocol::JsonRpc),
            "jsonrpc-tcp-length-check" => Ok(Protocol::JsonRpcTcpLengthCheck),
            other => Err(PoolError::InvalidConfig(format!(
                "unknown protocol '{}'",
                other
            ))),
        }
    }
}

/// Raw consumer entry as deserialized from configuration input.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConsumerConfig {
    /// Consumer name; must match the provider's name. Also the key into
    /// the environment-override table.
    pub name: String,
    /// Service interface id; defaults to `name`.
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_load_balancer")]
    pub load_balancer: String,
    pub nodes: Vec<RawNode>,
    #[serde(default)]
    pub options: RawOptions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawNode {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawOptions {
    /// Transporter connect timeout, seconds. Also bounds heartbeat probes.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: f64,
    /// Receive timeout for one call, seconds.
    #[serde(default = "default_recv_timeout")]
    pub recv_timeout: f64,
    /// Transport-level retries after the initial attempt.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Delay between retries, milliseconds.
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,
    /// Heartbeat interval, seconds; null or <= 0 disables probing.
    #[serde(default = "default_heartbeat")]
    pub heartbeat: Option<i64>,
    #[serde(default)]
    pub pool: RawPool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPool {
    #[serde(default = "default_min_connections")]
    pub min_connections: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Connect timeout for pool-created connections, seconds.
    #[serde(default = "default_pool_connect_timeout")]
    pub connect_timeout: f64,
    /// How long an acquire may wait for a free connection, seconds.
    #[serde(default = "default_pool_wait_timeout")]
    pub wait_timeout: f64,
    /// Pool-level heartbeat interval, seconds; overrides the consumer
    /// option when > 0, <= 0 defers to it.
    #[serde(default = "default_pool_heartbeat")]
    pub heartbeat: i64,
    /// Idle time before a connection becomes eligible for eviction, seconds.
    #[serde(default = "default_pool_max_idle_time")]
    pub max_idle_time: f64,
}

fn default_protocol() -> String {
    "jsonrpc-tcp-length-check".to_string()
}

fn default_load_balancer() -> String {
    "random".to_string()
}

fn default_connect_timeout() -> f64 {
    5.0
}

fn default_recv_timeout() -> f64 {
    5.0
}

const fn default_retry_count() -> u32 {
    2
}

const fn default_retry_interval() -> u64 {
    100
}

const fn default_heartbeat() -> Option<i64> {
    Some(30)
}

const fn default_min_connections() -> usize {
    1
}

const fn default_max_connections() -> usize {
    32
}

fn default_pool_connect_timeout() -> f64 {
    10.0
}

fn default_pool_wait_timeout() -> f64 {
    3.0
}

const fn default_pool_heartbeat() -> i64 {
    -1
}

fn default_pool_max_idle_time() -> f64 {
    60.0
}

impl Default for RawOptions {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            recv_timeout: default_recv_timeout(),
            retry_count: default_retry_count(),
            retry_interval: default_retry_interval(),
            heartbeat: default_heartbeat(),
            pool: RawPool::default(),
        }
    }
}

impl Default for RawPool {
    fn default() -> Self {
        Self {
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            connect_timeout: default_pool_connect_timeout(),
            wait_timeout: default_pool_wait_timeout(),
            heartbeat: default_pool_heartbeat(),
            max_idle_time: default_pool_max_idle_time(),
        }
    }
}

impl RawConsumerConfig {
    pub fn from_json(input: &str) -> Result<Self> {
        Ok(serde_json::from_str(input)?)
    }

    /// Applies a host/port override from the environment, at load time
    /// only. `env_keys` maps consumer names to environment variable names;
    /// when the variable for this consumer holds `HOST:PORT`, it replaces
    /// the configured node list with that single node.
    pub fn apply_env_override(&mut self, env_keys: &HashMap<String, String>) -> Result<()> {
        let Some(var) = env_keys.get(&self.name) else {
            return Ok(());
        };
        let Ok(value) = std::env::var(var) else {
            return Ok(());
        };
        let node: Node = value.parse().map_err(|_| {
            PoolError::InvalidConfig(format!(
                "env var {} must hold HOST:PORT, got '{}'",
                var, value
            ))
        })?;
        tracing::info!(consumer = %self.name, node = %node, "node overridden from environment");
        self.nodes = vec![RawNode {
            host: node.host,
            port: node.port,
        }];
        Ok(())
    }

    /// Validates and converts to the immutable runtime config.
    pub fn validate(self) -> Result<ConsumerConfig> {
        let protocol: Protocol = self.protocol.parse()?;
        if protocol.framing().is_none() {
            return Err(PoolError::InvalidConfig(format!(
                "protocol '{}' is not supported by the pooled transporter",
                protocol.as_str()
            )));
        }

        let strategy: Strategy = self.load_balancer.parse()?;

        if self.nodes.is_empty() {
            return Err(PoolError::InvalidConfig(format!(
                "consumer '{}' has no nodes",
                self.name
            )));
        }
        let mut nodes = Vec::with_capacity(self.nodes.len());
        for raw in &self.nodes {
            if raw.port == 0 {
                return Err(PoolError::InvalidConfig(format!(
                    "node {}: port must be 1-65535",
                    raw.host
                )));
            }
            nodes.push(Node::new(raw.host.clone(), raw.port));
        }

        let opts = &self.options;
        let pool = &opts.pool;
        if pool.max_connections == 0 {
            return Err(PoolError::InvalidConfig(
                "pool.max_connections must be at least 1".to_string(),
            ));
        }
        if pool.max_connections < pool.min_connections {
            return Err(PoolError::InvalidConfig(format!(
                "pool.max_connections ({}) < pool.min_connections ({})",
                pool.max_connections, pool.min_connections
            )));
        }
        // The eviction monitor ticks on this cadence when heartbeat is
        // disabled, so it must be a real interval.
        if pool.max_idle_time <= 0.0 {
            return Err(PoolError::InvalidConfig(format!(
                "pool.max_idle_time must be positive, got {}",
                pool.max_idle_time
            )));
        }

        // Pool-level heartbeat wins when set; either level <= 0 means
        // "defer" (pool) or "disabled" (consumer).
        let heartbeat_secs = if pool.heartbeat > 0 {
            Some(pool.heartbeat)
        } else {
            opts.heartbeat.filter(|secs| *secs > 0)
        };

        Ok(ConsumerConfig {
            service: self.service.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            protocol,
            strategy,
            nodes,
            connect_timeout: secs_f64("connect_timeout", opts.connect_timeout)?,
            recv_timeout: secs_f64("recv_timeout", opts.recv_timeout)?,
            retry_count: opts.retry_count,
            retry_interval: Duration::from_millis(opts.retry_interval),
            heartbeat: heartbeat_secs.map(|secs| Duration::from_secs(secs as u64)),
            pool: PoolSettings {
                min_connections: pool.min_connections,
                max_connections: pool.max_connections,
                connect_timeout: secs_f64("pool.connect_timeout", pool.connect_timeout)?,
                wait_timeout: secs_f64("pool.wait_timeout", pool.wait_timeout)?,
                max_idle_time: secs_f64("pool.max_idle_time", pool.max_idle_time)?,
            },
        })
    }
}

/// Converts a float-second config field, rejecting negative, non-finite
/// or overflowing values.
fn secs_f64(field: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        PoolError::InvalidConfig(format!(
            "{} must be a finite, non-negative number of seconds, got {}",
            field, secs
        ))
    })
}

/// Sizing and timing of one per-node connection pool.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub min_connections: usize,
    pub max_connections: usize,
    pub connect_timeout: Duration,
    pub wait_timeout: Duration,
    pub max_idle_time: Duration,
}

/// Validated, immutable description of one RPC consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub name: String,
    pub service: String,
    pub protocol: Protocol,
    pub strategy: Strategy,
    pub nodes: Vec<Node>,
    pub connect_timeout: Duration,
    pub recv_timeout: Duration,
    pub retry_count: u32,
    pub retry_interval: Duration,
    /// Effective heartbeat interval; `None` when probing is disabled.
    pub heartbeat: Option<Duration>,
    pub pool: PoolSettings,
}
