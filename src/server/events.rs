//! Relay lifecycle events
//!
//! The core reports state transitions to an injected [`EventSink`] instead of
//! logging directly. [`TracingEventSink`] is the default and turns each event
//! into a structured `tracing` record.

use crate::error::SendError;
use crate::server::connections::{CloseReason, ConnectionId};
use std::net::SocketAddr;
use tracing::{debug, error, info, trace, warn};

/// Something the relay did or observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A connection was registered and is open
    Connected {
        id: ConnectionId,
        remote_addr: Option<SocketAddr>,
    },
    /// A connection finished tearing down
    Disconnected { id: ConnectionId, reason: CloseReason },
    /// A broadcast failed to deliver and removed the recipient
    Evicted { id: ConnectionId, error: SendError },
    /// The transport could not complete the upgrade handshake
    HandshakeFailed { error: String },
    /// Registration hit an id that is already present
    RegistryInconsistency { id: ConnectionId },
    /// A frame was fanned out
    Broadcast {
        sender: ConnectionId,
        recipients: usize,
        delivered: usize,
    },
}

/// Receives relay events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &RelayEvent);
}

/// Writes events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &RelayEvent) {
        match event {
            RelayEvent::Connected { id, remote_addr } => match remote_addr {
                Some(addr) => info!(conn_id = %id, remote_addr = %addr, "Peer connected"),
                None => info!(conn_id = %id, "Peer connected"),
            },
            RelayEvent::Disconnected { id, reason } => {
                info!(conn_id = %id, reason = %reason, "Peer disconnected")
            }
            RelayEvent::Evicted { id, error } => {
                warn!(conn_id = %id, error = %error, "Evicted peer after failed send")
            }
            RelayEvent::HandshakeFailed { error } => {
                debug!(error = %error, "WebSocket upgrade failed")
            }
            RelayEvent::RegistryInconsistency { id } => {
                error!(conn_id = %id, "Connection id already registered, dropping connection")
            }
            RelayEvent::Broadcast {
                sender,
                recipients,
                delivered,
            } => trace!(
                sender = %sender,
                recipients = *recipients,
                delivered = *delivered,
                "Relayed frame"
            ),
        }
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: &RelayEvent) {}
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;

    #[test]
    fn test_tracing_sink_accepts_every_event() {
        let id = ConnectionId::new();
        let sink = TracingEventSink;
        sink.emit(&RelayEvent::Connected { id, remote_addr: None });
        sink.emit(&RelayEvent::Connected {
            id,
            remote_addr: Some("127.0.0.1:5000".parse().unwrap()),
        });
        sink.emit(&RelayEvent::Evicted { id, error: SendError::Closed });
        sink.emit(&RelayEvent::HandshakeFailed { error: "bad upgrade".to_string() });
        sink.emit(&RelayEvent::RegistryInconsistency { id });
        sink.emit(&RelayEvent::Broadcast { sender: id, recipients: 2, delivered: 2 });
        sink.emit(&RelayEvent::Disconnected { id, reason: CloseReason::RemoteClosed });
    }

    #[test]
    fn test_recording_sink_collects_in_order() {
        let sink = RecordingSink::default();
        let id = ConnectionId::new();
        sink.emit(&RelayEvent::Connected { id, remote_addr: None });
        sink.emit(&RelayEvent::Disconnected { id, reason: CloseReason::LocalClose });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], RelayEvent::Connected { .. }));
        assert_eq!(sink.count(|e| matches!(e, RelayEvent::Disconnected { .. })), 1);
    }
}
