//! Transport-neutral duplex channel carrying opaque frames.
//!
//! The serving layer adapts WebSockets to these traits; [`memory_channel`] provides an
//! in-process implementation.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Prefix reserved for out-of-band resize requests: `__RESIZE:<cols>:<rows>`.
pub const RESIZE_PREFIX: &[u8] = b"__RESIZE:";

/// Receiving half of a duplex channel.
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Next frame, or `None` once the peer closed the channel.
    async fn recv(&mut self) -> Option<io::Result<Bytes>>;
}

/// Sending half of a duplex channel.
#[async_trait]
pub trait FrameSink: Send + 'static {
    async fn send(&mut self, frame: Bytes) -> io::Result<()>;

    /// Close the channel towards the peer. Errors are ignored.
    async fn close(&mut self);
}

/// A connection that can be split into independently driven halves.
pub trait DuplexChannel: Send + 'static {
    type Sink: FrameSink;
    type Source: FrameSource;

    fn split(self) -> (Self::Sink, Self::Source);
}

/// Control frames recognized inside the inbound flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFrame {
    Resize { cols: u16, rows: u16 },
}

impl ControlFrame {
    /// Parse a control frame. Anything malformed is `None` and treated as input.
    pub fn parse(frame: &[u8]) -> Option<Self> {
        let rest = frame.strip_prefix(RESIZE_PREFIX)?;
        let rest = std::str::from_utf8(rest).ok()?;
        let (cols, rows) = rest.split_once(':')?;
        Some(ControlFrame::Resize {
            cols: cols.trim().parse().ok()?,
            rows: rows.trim().parse().ok()?,
        })
    }
}

/// Create an in-process channel and the client end talking to it.
pub fn memory_channel(capacity: usize) -> (MemoryChannel, MemoryClient) {
    let (to_client, from_session) = mpsc::channel(capacity);
    let (to_session, from_client) = mpsc::channel(capacity);
    (
        MemoryChannel {
            sink: MemorySink {
                tx: Some(to_client),
            },
            source: MemorySource { rx: from_client },
        },
        MemoryClient {
            tx: Some(to_session),
            rx: from_session,
        },
    )
}

pub struct MemoryChannel {
    sink: MemorySink,
    source: MemorySource,
}

impl DuplexChannel for MemoryChannel {
    type Sink = MemorySink;
    type Source = MemorySource;

    fn split(self) -> (MemorySink, MemorySource) {
        (self.sink, self.source)
    }
}

pub struct MemorySink {
    tx: Option<mpsc::Sender<Bytes>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Bytes) -> io::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "channel closed"))?;
        tx.send(frame)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"))
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}

pub struct MemorySource {
    rx: mpsc::Receiver<Bytes>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Option<io::Result<Bytes>> {
        self.rx.recv().await.map(Ok)
    }
}

/// The peer side of a [`MemoryChannel`].
pub struct MemoryClient {
    tx: Option<mpsc::Sender<Bytes>>,
    rx: mpsc::Receiver<Bytes>,
}

impl MemoryClient {
    /// Send a frame. Returns false once the session side is gone.
    pub async fn send(&self, frame: impl Into<Bytes>) -> bool {
        match &self.tx {
            Some(tx) => tx.send(frame.into()).await.is_ok(),
            None => false,
        }
    }

    /// Next frame from the session, `None` once it closed the channel.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Close the client's sending direction, as a disconnecting peer would.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }

    /// Collect output until it contains `needle`. Returns everything read so far,
    /// or `None` if the channel closed or `limit` expired first.
    pub async fn read_until(&mut self, needle: &[u8], limit: Duration) -> Option<Vec<u8>> {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if seen.windows(needle.len().max(1)).any(|w| w == needle) {
                return Some(seen);
            }
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(frame)) => seen.extend_from_slice(&frame),
                Ok(None) | Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resize() {
        assert_eq!(
            ControlFrame::parse(b"__RESIZE:120:40"),
            Some(ControlFrame::Resize {
                cols: 120,
                rows: 40
            })
        );
        assert_eq!(ControlFrame::parse(b"__RESIZE:abc"), None);
        assert_eq!(ControlFrame::parse(b"__RESIZE:1:2:3"), None);
        assert_eq!(ControlFrame::parse(b"ls -la\n"), None);
    }

    #[tokio::test]
    async fn test_memory_channel_round_trip() {
        let (channel, mut client) = memory_channel(4);
        let (mut sink, mut source) = channel.split();

        assert!(client.send("ping").await);
        let frame = source.recv().await.unwrap().unwrap();
        assert_eq!(&frame[..], b"ping");

        sink.send(Bytes::from_static(b"pong")).await.unwrap();
        assert_eq!(client.recv().await.unwrap(), Bytes::from_static(b"pong"));

        sink.close().await;
        assert!(client.recv().await.is_none());
        assert!(sink.send(Bytes::from_static(b"late")).await.is_err());

        client.hang_up();
        assert!(source.recv().await.is_none());
    }
}
