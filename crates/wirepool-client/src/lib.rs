//! Wirepool RPC Consumer
//!
//! Client-side connection management for calling a remote RPC service:
//! per-node bounded connection pools, heartbeat-driven liveness checks,
//! transport-level retries and pluggable node selection.
//!
//! # Overview
//!
//! A [`Consumer`] is built once at startup from a validated
//! [`ConsumerConfig`] and owns everything below it:
//!
//! - [`ConnectionPool`]: one per node, bounded by
//!   `pool.min_connections`/`pool.max_connections`, with idle eviction
//!   and wait-timeout semantics.
//! - [`HeartbeatMonitor`]: one background task per pool, probing idle
//!   connections and evicting stale ones.
//! - [`RetryingInvoker`]: retries transient transport failures up to
//!   `retry_count` times with a fixed delay.
//! - [`LoadBalancer`]: random or round-robin node selection per call.
//!
//! # Example
//!
//! ```no_run
//! use wirepool_client::{Consumer, RawConsumerConfig};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let raw = RawConsumerConfig::from_json(r#"{
//!     "name": "user-service",
//!     "protocol": "jsonrpc-tcp-length-check",
//!     "load_balancer": "round_robin",
//!     "nodes": [{"host": "127.0.0.1", "port": 9502}]
//! }"#)?;
//! let consumer = Consumer::start(raw.validate()?)?;
//!
//! let response = consumer.call("user.get", json!({"id": 42})).await?;
//! consumer.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod balancer;
pub mod config;
pub mod consumer;
pub mod heartbeat;
pub mod invoker;
pub mod node;
pub mod pool;

pub use balancer::{LoadBalancer, Strategy};
pub use config::{ConsumerConfig, PoolSettings, Protocol, RawConsumerConfig};
pub use consumer::Consumer;
pub use heartbeat::HeartbeatMonitor;
pub use invoker::RetryingInvoker;
pub use node::Node;
pub use pool::{ConnectionPool, ConnectionState, PooledConnection};
