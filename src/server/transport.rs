//! Message-framed duplex streams
//!
//! The relay core never touches sockets directly. A transport hands each
//! accepted stream over as a [`FrameReader`] / [`FrameWriter`] pair; the
//! WebSocket adapter lives in [`super::websocket`] and an in-memory pair for
//! tests and embedding lives in [`memory`].

use crate::error::{RecvError, TransportError};
use async_trait::async_trait;
use axum::extract::ws::Utf8Bytes;
use bytes::Bytes;

/// One opaque message frame. The relay passes it through unchanged.
///
/// Both payloads are reference counted, so cloning a frame per recipient
/// never copies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(Utf8Bytes),
    Binary(Bytes),
}

impl Frame {
    /// Build a text frame
    pub fn text(text: impl Into<Utf8Bytes>) -> Self {
        Frame::Text(text.into())
    }

    /// Build a binary frame
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Frame::Binary(data.into())
    }

    /// The text payload, if this is a text frame
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Text(text) => Some(text.as_str()),
            Frame::Binary(_) => None,
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Inbound half of a duplex stream
#[async_trait]
pub trait FrameReader: Send + 'static {
    /// Wait for the next data frame.
    ///
    /// Control traffic (ping/pong) is the transport's business and never
    /// surfaces here. Must be cancel safe: the lifecycle drops the future
    /// when the connection is closed locally.
    async fn next_frame(&mut self) -> Result<Frame, RecvError>;
}

/// Outbound half of a duplex stream
#[async_trait]
pub trait FrameWriter: Send + 'static {
    /// Write one frame to the peer
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Close the stream, releasing the underlying handle
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// In-memory duplex streams
pub mod memory {
    use super::*;
    use tokio::sync::mpsc;

    /// Create a connected stream pair.
    ///
    /// The [`MemoryPeer`] plays the remote client; the reader and writer are
    /// what a transport would hand to the relay.
    pub fn pair(buffer: usize) -> (MemoryPeer, MemoryReader, MemoryWriter) {
        let (to_relay, from_peer) = mpsc::channel(buffer);
        let (to_peer, from_relay) = mpsc::channel(buffer);

        let peer = MemoryPeer {
            outbox: Some(to_relay),
            inbox: Some(from_relay),
        };
        (
            peer,
            MemoryReader { rx: from_peer },
            MemoryWriter { tx: Some(to_peer) },
        )
    }

    /// The remote end of an in-memory stream
    pub struct MemoryPeer {
        outbox: Option<mpsc::Sender<Result<Frame, RecvError>>>,
        inbox: Option<mpsc::Receiver<Frame>>,
    }

    impl MemoryPeer {
        /// Send a frame to the relay. Returns `false` if the relay side is gone.
        pub async fn send(&self, frame: Frame) -> bool {
            match &self.outbox {
                Some(tx) => tx.send(Ok(frame)).await.is_ok(),
                None => false,
            }
        }

        /// Make the relay's next read fail with a transport error
        pub async fn fail(&self, reason: impl Into<String>) -> bool {
            match &self.outbox {
                Some(tx) => tx.send(Err(RecvError::Transport(reason.into()))).await.is_ok(),
                None => false,
            }
        }

        /// Close the peer's sending side; the relay reads end of stream
        pub fn hang_up(&mut self) {
            self.outbox = None;
        }

        /// Stop accepting frames; the relay's next write fails
        pub fn break_inbound(&mut self) {
            self.inbox = None;
        }

        /// Receive the next frame the relay wrote, `None` once the relay closed the stream
        pub async fn recv(&mut self) -> Option<Frame> {
            match &mut self.inbox {
                Some(rx) => rx.recv().await,
                None => None,
            }
        }

        /// Receive without waiting
        pub fn try_recv(&mut self) -> Option<Frame> {
            self.inbox.as_mut().and_then(|rx| rx.try_recv().ok())
        }
    }

    /// Relay-side reader of an in-memory stream
    pub struct MemoryReader {
        rx: mpsc::Receiver<Result<Frame, RecvError>>,
    }

    #[async_trait]
    impl FrameReader for MemoryReader {
        async fn next_frame(&mut self) -> Result<Frame, RecvError> {
            match self.rx.recv().await {
                Some(result) => result,
                None => Err(RecvError::RemoteClosed),
            }
        }
    }

    /// Relay-side writer of an in-memory stream
    pub struct MemoryWriter {
        tx: Option<mpsc::Sender<Frame>>,
    }

    #[async_trait]
    impl FrameWriter for MemoryWriter {
        async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
            let tx = self
                .tx
                .as_ref()
                .ok_or_else(|| TransportError("stream closed".to_string()))?;
            tx.send(frame)
                .await
                .map_err(|_| TransportError("peer went away".to_string()))
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.tx = None;
            Ok(())
        }
    }
}
