//! Wirepool Common Types and Transport
//!
//! Shared infrastructure for the wirepool RPC consumer:
//!
//! - **Protocol carrier**: opaque [`Request`]/[`Response`] envelopes with
//!   process-wide unique request ids. No JSON-RPC semantics are enforced
//!   here; the envelope only carries payloads between caller and node.
//! - **Error taxonomy**: [`PoolError`] with a transient/permanent
//!   classification used by the retry layer.
//! - **Transport**: framed async TCP with two framings, a 4-byte
//!   big-endian length prefix and CRLF-delimited frames.

pub mod error;
pub mod protocol;
pub mod transport;

pub use error::{PoolError, Result};
pub use protocol::{Request, RequestId, Response};
pub use transport::{FramedStream, Framing};
