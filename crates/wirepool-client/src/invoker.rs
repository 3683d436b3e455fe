//! Retry wrapper around a single RPC call.
//!
//! `retry_count` bounds transport-level retries after the initial attempt,
//! so a persistently failing node sees at most `retry_count + 1` attempts.
//! Only transient transport failures are retried; a well-formed
//! application error response is returned to the caller untouched, and a
//! receive timeout invalidates the connection but is surfaced without
//! retry (the response may still be in flight, so a replay could execute
//! the call twice).

use std::time::Duration;

use wirepool_common::{PoolError, Request, Response, Result};

use crate::config::ConsumerConfig;
use crate::pool::ConnectionPool;

pub struct RetryingInvoker {
    recv_timeout: Duration,
    retry_count: u32,
    retry_interval: Duration,
}

impl RetryingInvoker {
    pub fn new(config: &ConsumerConfig) -> Self {
        Self {
            recv_timeout: config.recv_timeout,
            retry_count: config.retry_count,
            retry_interval: config.retry_interval,
        }
    }

    /// Performs one call against the given node's pool, retrying transient
    /// transport failures with a fixed inter-retry delay. Fails with
    /// [`PoolError::Exhausted`] once `retry_count + 1` attempts have been
    /// spent.
    pub async fn invoke(&self, pool: &ConnectionPool, request: &Request) -> Result<Response> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.attempt(pool, request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() => {
                    if attempt > self.retry_count {
                        return Err(PoolError::Exhausted {
                            attempts: attempt,
                            last: Box::new(e),
                        });
                    }
                    tracing::warn!(
                        node = %pool.node(),
                        method = %request.method,
                        attempt,
                        error = %e,
                        retry_in_ms = self.retry_interval.as_millis() as u64,
                        "transport attempt failed, retrying"
                    );
                    tokio::time::sleep(self.retry_interval).await;
                }
                // Pool exhaustion, recv timeouts and config errors are
                // surfaced immediately.
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(&self, pool: &ConnectionPool, request: &Request) -> Result<Response> {
        let mut conn = pool.acquire().await?;
        match tokio::time::timeout(self.recv_timeout, conn.call(request)).await {
            Ok(Ok(response)) => {
                pool.release(conn);
                Ok(response)
            }
            Ok(Err(e)) => {
                pool.invalidate(conn);
                Err(e)
            }
            Err(_) => {
                // The connection has an unconsumed response in flight;
                // it cannot be reused.
                pool.invalidate(conn);
                Err(PoolError::RecvTimeout(self.recv_timeout.as_millis() as u64))
            }
        }
    }
}
