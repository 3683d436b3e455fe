//! Background liveness monitoring for one pool.
//!
//! Each pool gets its own monitor task. On every tick the monitor probes
//! idle connections that have been idle longer than half the heartbeat
//! interval, then runs idle eviction. Probes reuse the transporter connect
//! timeout as their deadline. In-use connections are never probed:
//! in-flight calls are authoritative liveness evidence, and the pool only
//! exposes its idle set to the probe path.
//!
//! Probe failures invalidate the connection and are logged at warn level.
//! They are never surfaced to callers and never abort the monitor.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use wirepool_common::{PoolError, Request};

use crate::pool::ConnectionPool;

/// Method name for the lightweight liveness probe.
pub const PROBE_METHOD: &str = "_ping";

pub struct HeartbeatMonitor {
    pool: Arc<ConnectionPool>,
    interval: Duration,
    probe_timeout: Duration,
    probe_enabled: bool,
}

impl HeartbeatMonitor {
    /// A monitor that probes on `interval` and evicts idle connections
    /// every tick.
    pub fn new(pool: Arc<ConnectionPool>, interval: Duration, probe_timeout: Duration) -> Self {
        Self {
            pool,
            interval,
            probe_timeout,
            probe_enabled: true,
        }
    }

    /// A monitor that only runs idle eviction; used when the heartbeat is
    /// disabled so stale connections still age out on the `max_idle_time`
    /// cadence.
    pub fn eviction_only(pool: Arc<ConnectionPool>, interval: Duration) -> Self {
        Self {
            pool,
            interval,
            probe_timeout: Duration::ZERO,
            probe_enabled: false,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(self) {
        // tokio's interval panics on a zero period.
        let period = self.interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of tokio's interval fires immediately; skip it so
        // a fresh pool is not probed at startup.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if self.probe_enabled {
                self.probe_idle().await;
            }
            self.pool.evict_idle();
        }
    }

    /// Probes idle connections older than half the heartbeat interval,
    /// in parallel. Survivors go back to the idle set; failures are
    /// invalidated.
    async fn probe_idle(&self) {
        let stale = self.pool.take_stale_idle(self.interval / 2);
        if stale.is_empty() {
            return;
        }

        let probes: Vec<_> = stale
            .into_iter()
            .map(|mut conn| {
                let probe_timeout = self.probe_timeout;
                async move {
                    let request = Request::new(PROBE_METHOD, serde_json::json!({}));
                    let result =
                        match tokio::time::timeout(probe_timeout, conn.call(&request)).await {
                            // Any well-formed response proves liveness,
                            // including an application-level error.
                            Ok(Ok(_)) => Ok(()),
                            Ok(Err(e)) => Err(e),
                            Err(_) => Err(PoolError::RecvTimeout(
                                probe_timeout.as_millis() as u64,
                            )),
                        };
                    (conn, result)
                }
            })
            .collect();

        for (conn, result) in futures::future::join_all(probes).await {
            match result {
                Ok(()) => self.pool.release(conn),
                Err(e) => {
                    tracing::warn!(
                        node = %self.pool.node(),
                        error = %e,
                        "heartbeat probe failed, invalidating connection"
                    );
                    self.pool.invalidate(conn);
                }
            }
        }
    }
}
