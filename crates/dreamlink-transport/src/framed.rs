//! Terminator-framed TCP transport.
//!
//! The legacy match service has no length prefixes: a frame is simply all
//! bytes up to and including a fixed terminator sequence. The transport
//! scans for the terminator, enforces the frame-size cap, and hands whole
//! frames (terminator included) to the protocol layer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::{Connection, ConnectionId, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Framing parameters. The terminator belongs to the wire dialect, so the
/// server passes it in rather than the transport hard-coding it.
#[derive(Debug, Clone, Copy)]
pub struct FrameConfig {
    /// The byte sequence that ends every frame.
    pub terminator: &'static [u8],
    /// Frames growing past this many bytes without a terminator are
    /// rejected and the connection is dropped.
    pub max_frame_len: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            terminator: b"\\final\\",
            max_frame_len: 4096,
        }
    }
}

/// A TCP [`Transport`] producing terminator-framed connections.
pub struct FrameTransport {
    listener: TcpListener,
    config: FrameConfig,
}

impl FrameTransport {
    /// Binds a new framed transport to the given address.
    pub async fn bind(addr: &str, config: FrameConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "frame transport listening");
        Ok(Self { listener, config })
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for FrameTransport {
    type Connection = FrameConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        // The match dialect is chatty with small frames.
        let _ = stream.set_nodelay(true);

        let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%id, %addr, "accepted connection");

        let (read_half, write_half) = stream.into_split();
        Ok(FrameConnection {
            id,
            config: self.config,
            reader: Arc::new(Mutex::new(Reader {
                half: read_half,
                buf: Vec::new(),
            })),
            writer: Arc::new(Mutex::new(write_half)),
        })
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

struct Reader {
    half: OwnedReadHalf,
    /// Bytes received but not yet consumed; a pipelining client may put
    /// the start of the next frame behind the current terminator.
    buf: Vec<u8>,
}

/// A single framed TCP connection.
pub struct FrameConnection {
    id: ConnectionId,
    config: FrameConfig,
    reader: Arc<Mutex<Reader>>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl Connection for FrameConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(data)
            .await
            .map_err(TransportError::SendFailed)?;
        writer.flush().await.map_err(TransportError::SendFailed)
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut reader = self.reader.lock().await;
        loop {
            if let Some(end) = find_terminator(&reader.buf, self.config.terminator) {
                let rest = reader.buf.split_off(end);
                let frame = std::mem::replace(&mut reader.buf, rest);
                return Ok(Some(frame));
            }
            if reader.buf.len() > self.config.max_frame_len {
                return Err(TransportError::FrameTooLarge {
                    max: self.config.max_frame_len,
                });
            }

            let mut chunk = [0u8; 1024];
            let n = reader
                .half
                .read(&mut chunk)
                .await
                .map_err(TransportError::ReceiveFailed)?;
            if n == 0 {
                if reader.buf.is_empty() {
                    return Ok(None);
                }
                // Bytes without a terminator and then EOF: a torn frame.
                return Err(TransportError::ReceiveFailed(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed mid-frame",
                )));
            }
            reader.buf.extend_from_slice(&chunk[..n]);
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.writer
            .lock()
            .await
            .shutdown()
            .await
            .map_err(TransportError::SendFailed)
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Returns the end offset (exclusive, past the terminator) of the first
/// complete frame in `buf`.
fn find_terminator(buf: &[u8], terminator: &[u8]) -> Option<usize> {
    buf.windows(terminator.len())
        .position(|w| w == terminator)
        .map(|i| i + terminator.len())
}

// =========================================================================
// Tests
// =========================================================================
