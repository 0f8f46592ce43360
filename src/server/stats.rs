//! Relay counters, fed from the event stream

use crate::server::events::{EventSink, RelayEvent};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counts relay events and forwards them to an inner sink
pub struct RelayStats {
    inner: Arc<dyn EventSink>,
    connections_total: AtomicU64,
    frames_received: AtomicU64,
    deliveries: AtomicU64,
    evictions: AtomicU64,
    handshake_failures: AtomicU64,
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Currently open connections
    pub connections: usize,
    /// Connections opened since start
    pub connections_total: u64,
    /// Frames received from peers
    pub frames_received: u64,
    /// Frames queued to recipients
    pub deliveries: u64,
    /// Recipients removed after a failed send
    pub evictions: u64,
    pub handshake_failures: u64,
}

impl RelayStats {
    pub fn new(inner: Arc<dyn EventSink>) -> Self {
        Self {
            inner,
            connections_total: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            handshake_failures: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self, connections: usize) -> StatsSnapshot {
        StatsSnapshot {
            connections,
            connections_total: self.connections_total.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
        }
    }
}

impl EventSink for RelayStats {
    fn emit(&self, event: &RelayEvent) {
        match event {
            RelayEvent::Connected { .. } => {
                self.connections_total.fetch_add(1, Ordering::Relaxed);
            }
            RelayEvent::Broadcast { delivered, .. } => {
                self.frames_received.fetch_add(1, Ordering::Relaxed);
                self.deliveries.fetch_add(*delivered as u64, Ordering::Relaxed);
            }
            RelayEvent::Evicted { .. } => {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
            RelayEvent::HandshakeFailed { .. } => {
                self.handshake_failures.fetch_add(1, Ordering::Relaxed);
            }
            RelayEvent::Disconnected { .. } | RelayEvent::RegistryInconsistency { .. } => {}
        }
        self.inner.emit(event);
    }
}
