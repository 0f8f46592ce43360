//! Per-connection lifecycle
//!
//! Each accepted stream gets a receive loop (the task calling
//! [`ConnectionLifecycle::accept`]) and a writer task draining the
//! connection's outbound queue. Whichever side stops first cancels the
//! connection; the receive loop then unregisters it and waits for the writer
//! to release the stream.

use crate::error::RecvError;
use crate::server::connections::{CloseReason, Connection, ConnectionRegistry, ConnectionState};
use crate::server::events::{EventSink, RelayEvent};
use crate::server::relay::BroadcastRelay;
use crate::server::transport::{Frame, FrameReader, FrameWriter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Upper bound on the closing handshake once a connection is done
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Drives connections from accept to close
#[derive(Clone)]
pub struct ConnectionLifecycle {
    registry: Arc<ConnectionRegistry>,
    relay: BroadcastRelay,
    events: Arc<dyn EventSink>,
    outbound_buffer: usize,
}

impl ConnectionLifecycle {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        relay: BroadcastRelay,
        events: Arc<dyn EventSink>,
        outbound_buffer: usize,
    ) -> Self {
        Self {
            registry,
            relay,
            events,
            outbound_buffer,
        }
    }

    /// Run a freshly accepted stream until it closes
    pub async fn accept<R, W>(&self, reader: R, writer: W, remote_addr: Option<SocketAddr>) -> CloseReason
    where
        R: FrameReader,
        W: FrameWriter,
    {
        let (tx, rx) = mpsc::channel(self.outbound_buffer);
        let conn = Arc::new(Connection::new(remote_addr, tx));
        self.drive(conn, rx, reader, writer).await
    }

    /// Run an already constructed connection until it closes.
    ///
    /// `outbound` must be the receiving end of the connection's queue.
    pub async fn drive<R, W>(
        &self,
        conn: Arc<Connection>,
        outbound: mpsc::Receiver<Frame>,
        mut reader: R,
        mut writer: W,
    ) -> CloseReason
    where
        R: FrameReader,
        W: FrameWriter,
    {
        let id = conn.id();

        if self.registry.register(conn.clone()).is_err() {
            self.events.emit(&RelayEvent::RegistryInconsistency { id });
            conn.close(CloseReason::Rejected);
            conn.advance(ConnectionState::Closed);
            if let Err(e) = writer.close().await {
                debug!(conn_id = %id, error = %e, "Failed to close rejected stream");
            }
            return CloseReason::Rejected;
        }

        self.events.emit(&RelayEvent::Connected {
            id,
            remote_addr: conn.remote_addr(),
        });

        let writer_task = tokio::spawn(write_loop(conn.clone(), outbound, writer));

        let reason = loop {
            tokio::select! {
                biased;

                _ = conn.closed() => {
                    break conn.close_reason().unwrap_or(CloseReason::LocalClose);
                }
                next = reader.next_frame() => match next {
                    Ok(frame) => {
                        self.relay.broadcast(id, frame).await;
                    }
                    Err(RecvError::RemoteClosed) => break CloseReason::RemoteClosed,
                    Err(RecvError::Transport(e)) => {
                        debug!(conn_id = %id, error = %e, "Read error");
                        break CloseReason::ReadFailure(e);
                    }
                },
            }
        };

        // Stop the writer, then leave the registry (no-op if already evicted)
        conn.close(reason);
        self.registry.unregister(id);
        conn.advance(ConnectionState::Closing);

        if let Err(e) = writer_task.await {
            warn!(conn_id = %id, error = %e, "Writer task failed");
        }
        conn.advance(ConnectionState::Closed);

        let reason = conn.close_reason().unwrap_or(CloseReason::LocalClose);
        self.events.emit(&RelayEvent::Disconnected {
            id,
            reason: reason.clone(),
        });
        reason
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}

async fn write_loop<W: FrameWriter>(conn: Arc<Connection>, mut outbound: mpsc::Receiver<Frame>, mut writer: W) {
    loop {
        let frame = tokio::select! {
            biased;

            _ = conn.closed() => break,
            next = outbound.recv() => match next {
                Some(frame) => frame,
                None => break,
            },
        };

        // A peer that stopped reading can block a write forever
        tokio::select! {
            biased;

            _ = conn.closed() => break,
            written = writer.write_frame(frame) => {
                if let Err(e) = written {
                    debug!(conn_id = %conn.id(), error = %e, "Write error");
                    conn.close(CloseReason::WriteFailure(e.0));
                    break;
                }
            }
        }
    }

    match timeout(CLOSE_TIMEOUT, writer.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(conn_id = %conn.id(), error = %e, "Failed to close stream"),
        Err(_) => debug!(conn_id = %conn.id(), "Timed out closing stream, dropping it"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::connections::ConnectionId;
    use crate::server::events::testing::RecordingSink;
    use crate::error::SendError;
    use crate::server::transport::memory::{self, MemoryPeer};
    use tokio::task::JoinHandle;

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        registry: Arc<ConnectionRegistry>,
        lifecycle: ConnectionLifecycle,
        recorder: Arc<RecordingSink>,
    }

    impl Harness {
        fn new() -> Self {
            let registry = Arc::new(ConnectionRegistry::new());
            let recorder = Arc::new(RecordingSink::default());
            let relay = BroadcastRelay::new(registry.clone(), Duration::from_millis(200), recorder.clone());
            let lifecycle = ConnectionLifecycle::new(registry.clone(), relay, recorder.clone(), 16);
            Self {
                registry,
                lifecycle,
                recorder,
            }
        }

        /// Connect a peer and wait until it is registered
        async fn connect(&self) -> (MemoryPeer, JoinHandle<CloseReason>) {
            self.connect_with(16).await
        }

        /// Connect a peer whose inbox holds at most `buffer` frames
        async fn connect_with(&self, buffer: usize) -> (MemoryPeer, JoinHandle<CloseReason>) {
            let before = self.registry.len();
            let (peer, reader, writer) = memory::pair(buffer);
            let lifecycle = self.lifecycle.clone();
            let handle = tokio::spawn(async move { lifecycle.accept(reader, writer, None).await });
            timeout(WAIT, async {
                while self.registry.len() <= before {
                    tokio::task::yield_now().await;
                }
            })
            .await
            .unwrap();
            (peer, handle)
        }
    }

    #[tokio::test]
    async fn test_relays_between_peers() {
        let h = Harness::new();
        let (a, _ha) = h.connect().await;
        let (mut b, _hb) = h.connect().await;
        let (mut c, _hc) = h.connect().await;

        a.send(Frame::text("offer:123")).await;

        assert_eq!(timeout(WAIT, b.recv()).await.unwrap(), Some(Frame::text("offer:123")));
        assert_eq!(timeout(WAIT, c.recv()).await.unwrap(), Some(Frame::text("offer:123")));
    }

    #[tokio::test]
    async fn test_sender_does_not_hear_itself() {
        let h = Harness::new();
        let (mut a, _ha) = h.connect().await;
        let (mut b, _hb) = h.connect().await;

        a.send(Frame::text("hello")).await;
        assert_eq!(timeout(WAIT, b.recv()).await.unwrap(), Some(Frame::text("hello")));

        // b answers; a sees only the answer, never its own frame
        b.send(Frame::text("answer")).await;
        assert_eq!(timeout(WAIT, a.recv()).await.unwrap(), Some(Frame::text("answer")));
        assert!(a.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_remote_close_unregisters() {
        let h = Harness::new();
        let (mut a, ha) = h.connect().await;
        let (_b, _hb) = h.connect().await;

        a.hang_up();
        let reason = timeout(WAIT, ha).await.unwrap().unwrap();

        assert_eq!(reason, CloseReason::RemoteClosed);
        assert_eq!(h.registry.len(), 1);
        assert_eq!(
            h.recorder.count(|e| matches!(
                e,
                RelayEvent::Disconnected { reason: CloseReason::RemoteClosed, .. }
            )),
            1
        );
    }

    #[tokio::test]
    async fn test_read_failure_is_terminal() {
        let h = Harness::new();
        let (a, ha) = h.connect().await;

        a.fail("connection reset").await;
        let reason = timeout(WAIT, ha).await.unwrap().unwrap();

        assert_eq!(reason, CloseReason::ReadFailure("connection reset".to_string()));
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_local_close_only_stops_that_connection() {
        let h = Harness::new();
        let (mut a, ha) = h.connect().await;
        let (b, _hb) = h.connect().await;
        let (mut c, _hc) = h.connect().await;

        let a_conn = h.registry.snapshot()[0].clone();
        a_conn.close(CloseReason::LocalClose);

        let reason = timeout(WAIT, ha).await.unwrap().unwrap();
        assert_eq!(reason, CloseReason::LocalClose);
        assert_eq!(a_conn.state(), ConnectionState::Closed);
        // Stream was released
        assert_eq!(timeout(WAIT, a.recv()).await.unwrap(), None);

        b.send(Frame::text("still here")).await;
        assert_eq!(timeout(WAIT, c.recv()).await.unwrap(), Some(Frame::text("still here")));
        assert_eq!(h.registry.len(), 2);
    }

    #[tokio::test]
    async fn test_broken_write_side_evicts_only_that_peer() {
        let h = Harness::new();
        let (a, _ha) = h.connect().await;
        let (mut b, hb) = h.connect().await;
        let (mut c, _hc) = h.connect().await;

        b.break_inbound();
        a.send(Frame::text("offer")).await;

        assert_eq!(timeout(WAIT, c.recv()).await.unwrap(), Some(Frame::text("offer")));
        let reason = timeout(WAIT, hb).await.unwrap().unwrap();
        assert!(matches!(reason, CloseReason::WriteFailure(_)));
        assert_eq!(h.registry.len(), 2);
    }

    #[tokio::test]
    async fn test_evicted_peer_with_blocked_write_shuts_down() {
        let h = Harness::new();
        let (talker, _ht) = h.connect().await;
        // Never reads, so the writer blocks on its second frame
        let (mut stalled, hs) = h.connect_with(1).await;
        let stalled_conn = h.registry.snapshot()[1].clone();

        for i in 0..20 {
            talker.send(Frame::text(i.to_string())).await;
        }

        let reason = timeout(WAIT, hs).await.unwrap().unwrap();
        assert!(matches!(reason, CloseReason::Evicted(SendError::Timeout(_))));
        assert_eq!(stalled_conn.state(), ConnectionState::Closed);
        assert_eq!(h.registry.len(), 1);
        assert_eq!(
            h.recorder.count(|e| matches!(e, RelayEvent::Disconnected { reason: CloseReason::Evicted(_), .. })),
            1
        );

        // The stream was released after the frame that did get through
        assert_eq!(stalled.recv().await, Some(Frame::text("0")));
        assert_eq!(timeout(WAIT, stalled.recv()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let h = Harness::new();
        let id = ConnectionId::new();

        let (tx1, rx1) = mpsc::channel(4);
        let first = Arc::new(Connection::with_id(id, None, tx1));
        let (_p1, r1, w1) = memory::pair(4);
        let lifecycle = h.lifecycle.clone();
        let _h1 = tokio::spawn(async move { lifecycle.drive(first, rx1, r1, w1).await });
        timeout(WAIT, async {
            while !h.registry.contains(id) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let (tx2, rx2) = mpsc::channel(4);
        let second = Arc::new(Connection::with_id(id, None, tx2));
        let (mut p2, r2, w2) = memory::pair(4);
        let reason = h.lifecycle.drive(second.clone(), rx2, r2, w2).await;

        assert_eq!(reason, CloseReason::Rejected);
        assert_eq!(second.state(), ConnectionState::Closed);
        assert_eq!(p2.recv().await, None);
        assert_eq!(h.registry.len(), 1);
        assert_eq!(
            h.recorder.count(|e| matches!(e, RelayEvent::RegistryInconsistency { .. })),
            1
        );
    }
}
