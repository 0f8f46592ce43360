//! Message fan-out to every other connected peer

use crate::error::SendError;
use crate::server::connections::{CloseReason, Connection, ConnectionId, ConnectionRegistry};
use crate::server::events::{EventSink, RelayEvent};
use crate::server::transport::Frame;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Outcome of one broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peers the frame was addressed to
    pub recipients: usize,
    /// Peers the frame was queued for
    pub delivered: usize,
    /// Peers removed because the send failed
    pub evicted: Vec<ConnectionId>,
}

/// Relays frames from one peer to all others
#[derive(Clone)]
pub struct BroadcastRelay {
    registry: Arc<ConnectionRegistry>,
    send_timeout: Duration,
    events: Arc<dyn EventSink>,
}

impl BroadcastRelay {
    pub fn new(registry: Arc<ConnectionRegistry>, send_timeout: Duration, events: Arc<dyn EventSink>) -> Self {
        Self {
            registry,
            send_timeout,
            events,
        }
    }

    /// Send `frame` to every registered connection except `sender`.
    ///
    /// Works on a snapshot of the registry, so the registry lock is never held
    /// while sending. Sends run concurrently, each bounded by the send
    /// timeout. A failed recipient is unregistered and asked to close; the
    /// failure is not reported to the sender beyond the returned report.
    pub async fn broadcast(&self, sender: ConnectionId, frame: Frame) -> BroadcastReport {
        let recipients: Vec<Arc<Connection>> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|conn| conn.id() != sender)
            .collect();

        if recipients.is_empty() {
            debug!(sender = %sender, "No peers to relay to");
            self.events.emit(&RelayEvent::Broadcast {
                sender,
                recipients: 0,
                delivered: 0,
            });
            return BroadcastReport::default();
        }

        let sends = recipients.iter().map(|conn| {
            let frame = frame.clone();
            async move {
                match conn.send(frame, self.send_timeout).await {
                    Ok(()) => None,
                    Err(e) => {
                        self.evict(conn, e);
                        Some(conn.id())
                    }
                }
            }
        });
        let evicted: Vec<ConnectionId> = join_all(sends).await.into_iter().flatten().collect();

        let report = BroadcastReport {
            recipients: recipients.len(),
            delivered: recipients.len() - evicted.len(),
            evicted,
        };
        self.events.emit(&RelayEvent::Broadcast {
            sender,
            recipients: report.recipients,
            delivered: report.delivered,
        });
        report
    }

    fn evict(&self, conn: &Connection, error: SendError) {
        // A recipient that was already on its way out is not worth an event
        if self.registry.unregister(conn.id()) {
            self.events.emit(&RelayEvent::Evicted {
                id: conn.id(),
                error: error.clone(),
            });
        }
        conn.close(CloseReason::Evicted(error));
    }

    /// Number of registered connections
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }
}
