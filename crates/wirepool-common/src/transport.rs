//! Framed async TCP transport.
//!
//! The consumer talks to nodes over plain TCP with one of two framings:
//!
//! - [`Framing::LengthPrefixed`]: `[4-byte length as u32 big-endian] + [data]`
//! - [`Framing::CrlfDelimited`]: `[data] + "\r\n"`
//!
//! Which framing applies is decided by the consumer protocol option. The
//! payload bytes are opaque to this layer; callers encode/decode the
//! [`Request`]/[`Response`] envelope with JSON.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{map_io_error, PoolError, Result};
use crate::protocol::{Request, Response};

/// Maximum accepted frame size; prevents allocation of absurd buffers
/// when a peer sends a corrupt length prefix.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const CRLF: &[u8] = b"\r\n";

/// Wire framing applied on top of the TCP byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// 4-byte big-endian length prefix before each frame.
    LengthPrefixed,
    /// Frames terminated by `\r\n`.
    CrlfDelimited,
}

/// Writes one frame to the stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    framing: Framing,
    data: &[u8],
) -> Result<()> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(PoolError::InvalidFrame(format!(
            "frame too large: {} bytes (max {})",
            data.len(),
            MAX_FRAME_SIZE
        )));
    }

    match framing {
        Framing::LengthPrefixed => {
            let len = data.len() as u32;
            writer
                .write_all(&len.to_be_bytes())
                .await
                .map_err(|e| map_io_error(e, "writing length prefix"))?;
            writer
                .write_all(data)
                .await
                .map_err(|e| map_io_error(e, "writing frame"))?;
        }
        Framing::CrlfDelimited => {
            writer
                .write_all(data)
                .await
                .map_err(|e| map_io_error(e, "writing frame"))?;
            writer
                .write_all(CRLF)
                .await
                .map_err(|e| map_io_error(e, "writing frame terminator"))?;
        }
    }

    writer
        .flush()
        .await
        .map_err(|e| map_io_error(e, "flushing stream"))?;
    Ok(())
}

/// Reads one frame from the stream.
///
/// `buf` carries bytes read past a CRLF terminator over to the next call;
/// with request/response ping-pong there is at most one response in flight,
/// but a peer is free to flush terminator and next frame together.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    framing: Framing,
    buf: &mut Vec<u8>,
) -> Result<Vec<u8>> {
    match framing {
        Framing::LengthPrefixed => {
            let mut len_buf = [0u8; 4];
            reader
                .read_exact(&mut len_buf)
                .await
                .map_err(|e| map_io_error(e, "reading length prefix"))?;

            let len = u32::from_be_bytes(len_buf) as usize;
            if len > MAX_FRAME_SIZE {
                return Err(PoolError::InvalidFrame(format!(
                    "frame too large: {} bytes (max {})",
                    len, MAX_FRAME_SIZE
                )));
            }

            let mut data = vec![0u8; len];
            reader
                .read_exact(&mut data)
                .await
                .map_err(|e| map_io_error(e, "reading frame"))?;
            Ok(data)
        }
        Framing::CrlfDelimited => loop {
            if let Some(pos) = find_crlf(buf) {
                let frame = buf[..pos].to_vec();
                buf.drain(..pos + CRLF.len());
                return Ok(frame);
            }
            if buf.len() > MAX_FRAME_SIZE {
                return Err(PoolError::InvalidFrame(format!(
                    "unterminated frame exceeds {} bytes",
                    MAX_FRAME_SIZE
                )));
            }

            let mut chunk = [0u8; 4096];
            let n = reader
                .read(&mut chunk)
                .await
                .map_err(|e| map_io_error(e, "reading frame"))?;
            if n == 0 {
                return Err(PoolError::Connection(
                    "reading frame: connection closed".to_string(),
                ));
            }
            buf.extend_from_slice(&chunk[..n]);
        },
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(CRLF.len()).position(|w| w == CRLF)
}

/// A TCP connection with its framing and read carry-over buffer.
///
/// One `FramedStream` serves one request/response exchange at a time; the
/// pool hands it out exclusively, so no internal locking is needed.
pub struct FramedStream {
    stream: TcpStream,
    framing: Framing,
    read_buf: Vec<u8>,
}

impl FramedStream {
    /// Connects to `addr`, failing with [`PoolError::ConnectTimeout`] when
    /// the attempt exceeds `timeout`.
    pub async fn connect(addr: &str, framing: Framing, timeout: Duration) -> Result<Self> {
        let connect = TcpStream::connect(addr);
        let stream = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| PoolError::ConnectTimeout {
                addr: addr.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })?
            .map_err(|e| map_io_error(e, "connecting"))?;
        stream.set_nodelay(true).map_err(PoolError::Io)?;
        tracing::trace!(addr, ?framing, "connection established");

        Ok(Self {
            stream,
            framing,
            read_buf: Vec::new(),
        })
    }

    /// Sends a request and waits for the matching response frame.
    pub async fn call(&mut self, request: &Request) -> Result<Response> {
        let encoded = serde_json::to_vec(request)?;
        write_frame(&mut self.stream, self.framing, &encoded).await?;

        let frame = read_frame(&mut self.stream, self.framing, &mut self.read_buf).await?;
        let response: Response = serde_json::from_slice(&frame)?;
        Ok(response)
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_length_prefixed_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, Framing::LengthPrefixed, b"hello")
            .await
            .unwrap();

        let mut buf = Vec::new();
        let frame = read_frame(&mut server, Framing::LengthPrefixed, &mut buf)
            .await
            .unwrap();
        assert_eq!(frame, b"hello");
    }

    #[tokio::test]
    async fn test_crlf_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, Framing::CrlfDelimited, b"{\"a\":1}")
            .await
            .unwrap();

        let mut buf = Vec::new();
        let frame = read_frame(&mut server, Framing::CrlfDelimited, &mut buf)
            .await
            .unwrap();
        assert_eq!(frame, b"{\"a\":1}");
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_crlf_carries_over_extra_bytes() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        // Two frames flushed together.
        client.write_all(b"first\r\nsecond\r\n").await.unwrap();
        client.flush().await.unwrap();

        let mut buf = Vec::new();
        let first = read_frame(&mut server, Framing::CrlfDelimited, &mut buf)
            .await
            .unwrap();
        assert_eq!(first, b"first");

        let second = read_frame(&mut server, Framing::CrlfDelimited, &mut buf)
            .await
            .unwrap();
        assert_eq!(second, b"second");
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_rejected() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let len = (MAX_FRAME_SIZE as u32) + 1;
        client.write_all(&len.to_be_bytes()).await.unwrap();
        client.flush().await.unwrap();

        let mut buf = Vec::new();
        let result = read_frame(&mut server, Framing::LengthPrefixed, &mut buf).await;
        assert!(matches!(result, Err(PoolError::InvalidFrame(_))));
    }

    #[tokio::test]
    async fn test_closed_stream_is_connection_error() {
        let (client, mut server) = tokio::io::duplex(1024);
        drop(client);

        let mut buf = Vec::new();
        let result = read_frame(&mut server, Framing::CrlfDelimited, &mut buf).await;
        assert!(matches!(result, Err(PoolError::Connection(_))));
    }

    #[tokio::test]
    async fn test_connect_timeout_or_refused_is_transient() {
        // TEST-NET address, not routable; either times out or is rejected
        // quickly depending on the environment. Both are transient.
        let result = FramedStream::connect(
            "192.0.2.1:9502",
            Framing::LengthPrefixed,
            Duration::from_millis(100),
        )
        .await;
        match result {
            Err(e) => assert!(e.is_transient(), "unexpected error class: {}", e),
            Ok(_) => panic!("connect to TEST-NET address should not succeed"),
        }
    }

    #[tokio::test]
    async fn test_call_roundtrip_over_tcp() {
        use crate::protocol::{Request, Response};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let frame = read_frame(&mut socket, Framing::LengthPrefixed, &mut buf)
                .await
                .unwrap();
            let req: Request = serde_json::from_slice(&frame).unwrap();
            let resp = Response::success(req.id, req.params);
            let encoded = serde_json::to_vec(&resp).unwrap();
            write_frame(&mut socket, Framing::LengthPrefixed, &encoded)
                .await
                .unwrap();
        });

        let mut stream =
            FramedStream::connect(&addr, Framing::LengthPrefixed, Duration::from_secs(1))
                .await
                .unwrap();
        let request = Request::new("echo", json!({"n": 42}));
        let response = stream.call(&request).await.unwrap();
        assert!(response.success);
        assert_eq!(response.id, request.id);
        assert_eq!(response.result, Some(json!({"n": 42})));
    }
}
