use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use wirepool_common::{PoolError, Result};

use crate::node::Node;

/// Node selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Random,
    RoundRobin,
}

impl FromStr for Strategy {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "random" => Ok(Strategy::Random),
            "round_robin" => Ok(Strategy::RoundRobin),
            other => Err(PoolError::InvalidConfig(format!(
                "unknown load balancer '{}'",
                other
            ))),
        }
    }
}

/// Picks a node per call.
///
/// Round-robin keeps a shared atomic cursor so concurrent callers never
/// race on the advance; random draws uniformly each call.
pub struct LoadBalancer {
    strategy: Strategy,
    cursor: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn select<'a>(&self, nodes: &'a [Node]) -> Result<&'a Node> {
        if nodes.is_empty() {
            return Err(PoolError::NoNodesAvailable);
        }
        let index = match self.strategy {
            Strategy::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed) % nodes.len(),
            Strategy::Random => rand::thread_rng().gen_range(0..nodes.len()),
        };
        Ok(&nodes[index])
    }
}
