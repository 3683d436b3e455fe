//! Request/response carrier types.
//!
//! The consumer treats payloads as opaque: a request carries a method name
//! and a JSON params value, a response carries either a result or an
//! application-level error. Application errors travel inside a well-formed
//! [`Response`] and are never confused with transport failures.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

pub type RequestId = u64;

static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// An RPC request sent from the consumer to a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: serde_json::Value,
}

impl Request {
    pub fn new(method: impl Into<String>, params: serde_json::Value) -> Self {
        Request {
            id: generate_request_id(),
            method: method.into(),
            params,
        }
    }
}

/// An RPC response returned from a node.
///
/// `success == false` marks an application-level error response. Such a
/// response is a valid outcome of a call: the transport worked, the remote
/// service rejected the request. It is returned to the caller as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    /// Request identifier this response corresponds to.
    pub id: RequestId,
    /// Result value (present on success).
    pub result: Option<serde_json::Value>,
    /// Error message (present on failure).
    pub error: Option<String>,
    /// Whether the request succeeded.
    pub success: bool,
}

impl Response {
    pub fn success(id: RequestId, result: serde_json::Value) -> Self {
        Response {
            id,
            result: Some(result),
            error: None,
            success: true,
        }
    }

    pub fn error(id: RequestId, error: impl Into<String>) -> Self {
        Response {
            id,
            result: None,
            error: Some(error.into()),
            success: false,
        }
    }
}

/// Unique request id: upper bits from the wall clock, lower bits from a
/// process-wide counter, so ids stay unique across restarts and under
/// concurrent generation.
fn generate_request_id() -> RequestId {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let counter = REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst);

    (timestamp & 0xFFFF_FFFF_0000_0000) | (counter & 0xFFFF_FFFF)
}
