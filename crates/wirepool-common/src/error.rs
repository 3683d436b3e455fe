use thiserror::Error;

/// Errors surfaced by the consumer, pool and transport layers.
#[derive(Error, Debug)]
pub enum PoolError {
    /// Establishing a transport connection exceeded its timeout.
    #[error("connect to {addr} timed out after {timeout_ms}ms")]
    ConnectTimeout { addr: String, timeout_ms: u64 },

    /// No connection became available within the pool wait timeout.
    #[error("no connection available within {0}ms")]
    PoolExhausted(u64),

    /// No response arrived within the receive timeout.
    #[error("no response within {0}ms")]
    RecvTimeout(u64),

    /// Mid-call network failure (reset, refused, unexpected EOF).
    #[error("connection error: {0}")]
    Connection(String),

    /// A frame violated the wire format (oversized, malformed prefix).
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The node list was empty at selection time.
    #[error("no nodes available")]
    NoNodesAvailable,

    /// Retries exhausted; carries the total attempt count and last failure.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<PoolError> },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The pool has been shut down.
    #[error("pool is closed")]
    PoolClosed,

    #[error("serialization error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PoolError {
    /// Whether the retry layer may re-attempt the call.
    ///
    /// Transient failures are network-level errors presumed recoverable:
    /// connect timeouts and connection errors (refused, reset, EOF).
    /// Receive timeouts are deliberately *not* transient: the connection
    /// state is unknown, so the connection is invalidated, but the call
    /// is surfaced to the caller without retry. Pool exhaustion is a
    /// capacity signal, not a node failure, and is never retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PoolError::ConnectTimeout { .. } | PoolError::Connection(_)
        )
    }
}

/// Map IO errors into the pool taxonomy.
///
/// Timeouts and connection-level failures become transient
/// [`PoolError::Connection`] values; anything else stays an IO error.
pub fn map_io_error(err: std::io::Error, context: &str) -> PoolError {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            PoolError::Connection(format!("{}: timed out", context))
        }
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::ConnectionRefused
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::UnexpectedEof
        | std::io::ErrorKind::NotConnected => {
            PoolError::Connection(format!("{}: connection lost", context))
        }
        _ => PoolError::Io(err),
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
