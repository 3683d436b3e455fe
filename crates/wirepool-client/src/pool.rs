//! Bounded per-node connection pool.
//!
//! The pool owns every connection it creates. Idle connections sit in a
//! LIFO stack inside the pool; an acquired connection is moved out to the
//! caller, which makes it impossible for the heartbeat monitor or another
//! caller to touch a connection that is in use. The caller must hand the
//! connection back through [`ConnectionPool::release`] or
//! [`ConnectionPool::invalidate`].
//!
//! Slot accounting: `total` counts idle + in-use + in-flight connects.
//! A connect attempt reserves its slot before dropping the lock and gives
//! it back through a drop guard, so a failed or cancelled connect never
//! leaks capacity.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use wirepool_common::transport::FramedStream;
use wirepool_common::{Framing, PoolError, Request, Response, Result};

use crate::config::PoolSettings;
use crate::node::Node;

/// Connection lifecycle states.
///
/// Idle -> (acquire) -> InUse -> (release) -> Idle;
/// InUse/Idle -> (invalidate/evict) -> Closed, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    InUse,
    Closed,
}

/// One live transport connection owned by a pool.
pub struct PooledConnection {
    stream: FramedStream,
    state: ConnectionState,
    created_at: Instant,
    last_used_at: Instant,
}

impl PooledConnection {
    fn new(stream: FramedStream) -> Self {
        let now = Instant::now();
        Self {
            stream,
            state: ConnectionState::InUse,
            created_at: now,
            last_used_at: now,
        }
    }

    /// Sends one request and awaits the response frame.
    pub async fn call(&mut self, request: &Request) -> Result<Response> {
        self.stream.call(request).await
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }
}

struct PoolInner {
    idle: VecDeque<PooledConnection>,
    /// Idle + in-use + in-flight connects.
    total: usize,
    closed: bool,
}

/// Bounded connection pool for exactly one node.
pub struct ConnectionPool {
    node: Node,
    framing: Framing,
    settings: PoolSettings,
    inner: Mutex<PoolInner>,
    /// Wakes one waiter per freed slot or released connection.
    notify: Notify,
}

enum Acquired {
    Reuse(PooledConnection),
    Create,
    Wait,
}

impl ConnectionPool {
    pub fn new(node: Node, framing: Framing, settings: PoolSettings) -> Self {
        Self {
            node,
            framing,
            settings,
            inner: Mutex::new(PoolInner {
                idle: VecDeque::new(),
                total: 0,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Hands out a connection: an idle one if available (LIFO for cache
    /// locality), a fresh one while below `max_connections`, otherwise
    /// waits up to `wait_timeout` for a release before failing with
    /// [`PoolError::PoolExhausted`].
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let deadline = Instant::now() + self.settings.wait_timeout;

        loop {
            let action = {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return Err(PoolError::PoolClosed);
                }
                if let Some(mut conn) = inner.idle.pop_back() {
                    conn.state = ConnectionState::InUse;
                    Acquired::Reuse(conn)
                } else if inner.total < self.settings.max_connections {
                    inner.total += 1;
                    Acquired::Create
                } else {
                    Acquired::Wait
                }
            };

            match action {
                Acquired::Reuse(conn) => return Ok(conn),
                Acquired::Create => return self.connect_reserved().await,
                Acquired::Wait => {
                    let Some(remaining) = deadline.checked_duration_since(Instant::now())
                    else {
                        return Err(PoolError::PoolExhausted(
                            self.settings.wait_timeout.as_millis() as u64,
                        ));
                    };
                    if tokio::time::timeout(remaining, self.notify.notified())
                        .await
                        .is_err()
                    {
                        return Err(PoolError::PoolExhausted(
                            self.settings.wait_timeout.as_millis() as u64,
                        ));
                    }
                }
            }
        }
    }

    /// Opens a connection for an already-reserved slot. The guard returns
    /// the slot if the connect fails or the future is dropped mid-flight.
    async fn connect_reserved(&self) -> Result<PooledConnection> {
        let guard = SlotGuard { pool: self };
        let stream = FramedStream::connect(
            &self.node.addr(),
            self.framing,
            self.settings.connect_timeout,
        )
        .await?;
        std::mem::forget(guard);
        Ok(PooledConnection::new(stream))
    }

    /// Returns a connection to the idle set and wakes one waiter.
    pub fn release(&self, mut conn: PooledConnection) {
        {
            let mut inner = self.inner.lock();
            if inner.closed || conn.state == ConnectionState::Closed {
                // Closed connections never re-enter the idle set.
                inner.total -= 1;
            } else {
                conn.state = ConnectionState::Idle;
                conn.last_used_at = Instant::now();
                inner.idle.push_back(conn);
            }
        }
        self.notify.notify_one();
    }

    /// Removes a failed connection from the pool, freeing its slot. A
    /// replacement may be created lazily by the next acquire.
    pub fn invalidate(&self, mut conn: PooledConnection) {
        conn.state = ConnectionState::Closed;
        {
            let mut inner = self.inner.lock();
            inner.total -= 1;
        }
        tracing::debug!(node = %self.node, "removed invalid connection from pool");
        self.notify.notify_one();
    }

    /// Closes idle connections older than `max_idle_time`, oldest first,
    /// never reducing the idle count below `min_connections`.
    pub fn evict_idle(&self) {
        let mut evicted = Vec::new();
        {
            let mut inner = self.inner.lock();
            // Front of the deque is the longest-idle connection.
            while inner.idle.len() > self.settings.min_connections {
                match inner.idle.front() {
                    Some(conn) if conn.idle_for() > self.settings.max_idle_time => {}
                    _ => break,
                }
                if let Some(mut conn) = inner.idle.pop_front() {
                    conn.state = ConnectionState::Closed;
                    inner.total -= 1;
                    evicted.push(conn);
                }
            }
        }
        if !evicted.is_empty() {
            tracing::debug!(
                node = %self.node,
                count = evicted.len(),
                "evicted idle connections"
            );
            for _ in &evicted {
                self.notify.notify_one();
            }
        }
    }

    /// Moves idle connections that have been idle at least `older_than`
    /// out of the pool for probing. The heartbeat monitor either releases
    /// them back or invalidates them; connections currently in use are
    /// never visible here.
    pub(crate) fn take_stale_idle(&self, older_than: Duration) -> Vec<PooledConnection> {
        let mut inner = self.inner.lock();
        let mut taken = Vec::new();
        let mut keep = VecDeque::with_capacity(inner.idle.len());
        while let Some(mut conn) = inner.idle.pop_front() {
            if conn.idle_for() >= older_than {
                conn.state = ConnectionState::InUse;
                taken.push(conn);
            } else {
                keep.push_back(conn);
            }
        }
        inner.idle = keep;
        taken
    }

    /// Closes all idle connections and fails subsequent acquires. In-use
    /// connections are closed as they come back through `release`.
    pub fn shutdown(&self) {
        let drained: Vec<PooledConnection> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.total -= inner.idle.len();
            inner.idle.drain(..).collect()
        };
        tracing::debug!(node = %self.node, closed = drained.len(), "pool shut down");
        self.notify.notify_waiters();
    }

    pub fn idle_count(&self) -> usize {
        self.inner.lock().idle.len()
    }

    pub fn total_count(&self) -> usize {
        self.inner.lock().total
    }
}

/// Returns a reserved slot when a connect attempt does not complete.
struct SlotGuard<'a> {
    pool: &'a ConnectionPool,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.pool.inner.lock();
        inner.total -= 1;
        drop(inner);
        self.pool.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use wirepool_common::transport::{read_frame, write_frame};

    fn settings(min: usize, max: usize, wait_ms: u64, max_idle_ms: u64) -> PoolSettings {
        PoolSettings {
            min_connections: min,
            max_connections: max,
            connect_timeout: Duration::from_secs(1),
            wait_timeout: Duration::from_millis(wait_ms),
            max_idle_time: Duration::from_millis(max_idle_ms),
        }
    }

    /// Accepts connections and answers every request with a success
    /// response echoing the params.
    async fn spawn_echo_server() -> Node {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    loop {
                        let Ok(frame) =
                            read_frame(&mut socket, Framing::LengthPrefixed, &mut buf).await
                        else {
                            break;
                        };
                        let req: Request = match serde_json::from_slice(&frame) {
                            Ok(req) => req,
                            Err(_) => break,
                        };
                        let resp = Response::success(req.id, req.params);
                        let encoded = serde_json::to_vec(&resp).unwrap();
                        if write_frame(&mut socket, Framing::LengthPrefixed, &encoded)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                });
            }
        });
        Node::new("127.0.0.1", port)
    }

    fn pool_for(node: Node, settings: PoolSettings) -> ConnectionPool {
        ConnectionPool::new(node, Framing::LengthPrefixed, settings)
    }

    #[tokio::test]
    async fn test_acquire_release_round_trip_keeps_idle_count() {
        let node = spawn_echo_server().await;
        let pool = pool_for(node, settings(0, 4, 500, 60_000));

        let conn = pool.acquire().await.unwrap();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.total_count(), 1);
        pool.release(conn);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.total_count(), 1);

        // Round trip leaves the idle count unchanged.
        let conn = pool.acquire().await.unwrap();
        pool.release(conn);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.total_count(), 1);
    }

    #[tokio::test]
    async fn test_acquired_connection_serves_calls() {
        let node = spawn_echo_server().await;
        let pool = pool_for(node, settings(0, 1, 500, 60_000));

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::InUse);
        let request = Request::new("echo", json!({"k": "v"}));
        let response = conn.call(&request).await.unwrap();
        assert!(response.success);
        assert_eq!(response.result, Some(json!({"k": "v"})));
        pool.release(conn);
    }

    #[tokio::test]
    async fn test_exhausted_pool_fails_after_wait_timeout() {
        let node = spawn_echo_server().await;
        let pool = pool_for(node, settings(1, 2, 100, 60_000));

        let _held1 = pool.acquire().await.unwrap();
        let _held2 = pool.acquire().await.unwrap();

        let start = Instant::now();
        let result = pool.acquire().await;
        let elapsed = start.elapsed();

        assert!(matches!(result, Err(PoolError::PoolExhausted(100))));
        assert!(elapsed >= Duration::from_millis(90), "returned too early: {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(1), "waited too long: {:?}", elapsed);
        assert_eq!(pool.total_count(), 2);
    }

    #[tokio::test]
    async fn test_saturated_acquires_hold_exactly_max() {
        let node = spawn_echo_server().await;
        let pool = Arc::new(pool_for(node, settings(0, 3, 100, 60_000)));

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.acquire().await.map(|conn| (pool, conn)) })
            })
            .collect();

        let mut held = Vec::new();
        let mut exhausted = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok((_, conn)) => held.push(conn),
                Err(PoolError::PoolExhausted(_)) => exhausted += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(held.len(), 3);
        assert_eq!(exhausted, 2);
        assert_eq!(pool.total_count(), 3);
    }

    #[tokio::test]
    async fn test_release_wakes_waiter() {
        let node = spawn_echo_server().await;
        let pool = Arc::new(pool_for(node, settings(0, 1, 1_000, 60_000)));

        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.release(held);

        let conn = waiter.await.unwrap().unwrap();
        assert_eq!(conn.state(), ConnectionState::InUse);
        pool.release(conn);
    }

    #[tokio::test]
    async fn test_evict_idle_keeps_min_connections() {
        let node = spawn_echo_server().await;
        let pool = pool_for(node, settings(1, 4, 500, 0));

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        let c = pool.acquire().await.unwrap();
        pool.release(a);
        pool.release(b);
        pool.release(c);
        assert_eq!(pool.idle_count(), 3);

        // max_idle_time is zero, so everything beyond the floor is stale.
        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.evict_idle();

        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.total_count(), 1);
    }

    #[tokio::test]
    async fn test_evict_idle_spares_fresh_connections() {
        let node = spawn_echo_server().await;
        let pool = pool_for(node, settings(0, 4, 500, 60_000));

        let a = pool.acquire().await.unwrap();
        pool.release(a);
        pool.evict_idle();
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_frees_slot_for_replacement() {
        let node = spawn_echo_server().await;
        let pool = pool_for(node, settings(0, 1, 200, 60_000));

        let conn = pool.acquire().await.unwrap();
        pool.invalidate(conn);
        assert_eq!(pool.total_count(), 0);
        assert_eq!(pool.idle_count(), 0);

        // The slot freed by invalidation allows a lazy replacement.
        let replacement = pool.acquire().await.unwrap();
        assert_eq!(pool.total_count(), 1);
        pool.release(replacement);
    }

    #[tokio::test]
    async fn test_invalidated_connection_never_returns_to_idle() {
        let node = spawn_echo_server().await;
        let pool = pool_for(node, settings(0, 2, 200, 60_000));

        let conn = pool.acquire().await.unwrap();
        pool.invalidate(conn);
        assert_eq!(pool.idle_count(), 0);

        // A connection marked closed while out of the pool is dropped on
        // release instead of re-entering the idle set.
        let mut conn = pool.acquire().await.unwrap();
        conn.state = ConnectionState::Closed;
        pool.release(conn);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.total_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_releases_reserved_slot() {
        // Bind then drop, so the port refuses connections.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let pool = pool_for(Node::new("127.0.0.1", port), settings(0, 1, 100, 60_000));

        let first = pool.acquire().await;
        assert!(first.is_err());
        assert_eq!(pool.total_count(), 0);

        // The slot was not leaked: the next acquire attempts a fresh
        // connect instead of failing with PoolExhausted.
        let second = pool.acquire().await;
        assert!(matches!(second, Err(PoolError::Connection(_) | PoolError::ConnectTimeout { .. })));
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_and_rejects_acquire() {
        let node = spawn_echo_server().await;
        let pool = pool_for(node, settings(0, 2, 200, 60_000));

        let conn = pool.acquire().await.unwrap();
        pool.release(conn);
        assert_eq!(pool.idle_count(), 1);

        pool.shutdown();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.total_count(), 0);
        assert!(matches!(pool.acquire().await, Err(PoolError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_release_after_shutdown_closes_connection() {
        let node = spawn_echo_server().await;
        let pool = pool_for(node, settings(0, 2, 200, 60_000));

        let conn = pool.acquire().await.unwrap();
        pool.shutdown();
        pool.release(conn);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.total_count(), 0);
    }

    #[tokio::test]
    async fn test_take_stale_idle_skips_in_use() {
        let node = spawn_echo_server().await;
        let pool = pool_for(node, settings(0, 2, 200, 60_000));

        let held = pool.acquire().await.unwrap();
        let idle = pool.acquire().await.unwrap();
        pool.release(idle);

        // Only the idle connection is visible to the probe path.
        let taken = pool.take_stale_idle(Duration::ZERO);
        assert_eq!(taken.len(), 1);
        for conn in taken {
            pool.release(conn);
        }
        pool.release(held);
        assert_eq!(pool.idle_count(), 2);
    }
}
