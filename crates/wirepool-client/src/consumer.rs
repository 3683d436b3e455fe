//! Consumer assembly and entry point.
//!
//! [`Consumer::start`] is the explicit startup function: it takes a
//! validated [`ConsumerConfig`], builds one connection pool per node,
//! spawns the per-pool heartbeat monitors and returns a handle the
//! application composes wherever it needs it. There is no process-wide
//! mutable configuration store and no event-dispatcher registration.

use std::collections::HashMap;
use std::sync::Arc;

use wirepool_common::{PoolError, Request, Response, Result};

use crate::balancer::LoadBalancer;
use crate::config::ConsumerConfig;
use crate::heartbeat::HeartbeatMonitor;
use crate::invoker::RetryingInvoker;
use crate::node::Node;
use crate::pool::ConnectionPool;

/// A running RPC consumer for one remote service.
pub struct Consumer {
    config: Arc<ConsumerConfig>,
    pools: HashMap<Node, Arc<ConnectionPool>>,
    balancer: LoadBalancer,
    invoker: RetryingInvoker,
    monitors: Vec<tokio::task::JoinHandle<()>>,
}

impl Consumer {
    /// Builds pools and monitors for every configured node and returns
    /// the running consumer. Must be called from within a tokio runtime.
    pub fn start(config: ConsumerConfig) -> Result<Self> {
        let framing = config.protocol.framing().ok_or_else(|| {
            PoolError::InvalidConfig(format!(
                "protocol '{}' is not supported by the pooled transporter",
                config.protocol.as_str()
            ))
        })?;

        let config = Arc::new(config);
        let mut pools = HashMap::with_capacity(config.nodes.len());
        let mut monitors = Vec::with_capacity(config.nodes.len());

        for node in &config.nodes {
            let pool = Arc::new(ConnectionPool::new(
                node.clone(),
                framing,
                config.pool.clone(),
            ));
            let monitor = match config.heartbeat {
                Some(interval) => {
                    HeartbeatMonitor::new(Arc::clone(&pool), interval, config.connect_timeout)
                }
                None => HeartbeatMonitor::eviction_only(
                    Arc::clone(&pool),
                    config.pool.max_idle_time,
                ),
            };
            monitors.push(monitor.spawn());
            pools.insert(node.clone(), pool);
        }

        tracing::info!(
            service = %config.service,
            nodes = config.nodes.len(),
            protocol = config.protocol.as_str(),
            heartbeat = ?config.heartbeat,
            "rpc consumer started"
        );

        Ok(Self {
            balancer: LoadBalancer::new(config.strategy),
            invoker: RetryingInvoker::new(&config),
            config,
            pools,
            monitors,
        })
    }

    /// Performs one RPC call: picks a node, then runs the retrying
    /// invoker against that node's pool.
    pub async fn call(&self, method: impl Into<String>, params: serde_json::Value) -> Result<Response> {
        let node = self.balancer.select(&self.config.nodes)?;
        let pool = self
            .pools
            .get(node)
            .ok_or(PoolError::NoNodesAvailable)?;
        let request = Request::new(method, params);
        self.invoker.invoke(pool, &request).await
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Pool for a specific node; mainly useful for introspection.
    pub fn pool(&self, node: &Node) -> Option<&Arc<ConnectionPool>> {
        self.pools.get(node)
    }

    /// Stops the heartbeat monitors and closes all pooled connections.
    pub fn shutdown(&self) {
        for handle in &self.monitors {
            handle.abort();
        }
        for pool in self.pools.values() {
            pool.shutdown();
        }
        tracing::info!(service = %self.config.service, "rpc consumer stopped");
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        // Monitors hold Arc references to the pools; without this they
        // would outlive a consumer that was never shut down.
        for handle in &self.monitors {
            handle.abort();
        }
    }
}
