//! Connection state and the connection registry

use crate::error::{RegistryError, SendError};
use crate::server::transport::Frame;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique connection identifier. Time ordered, so sorting by id sorts by
/// registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a connection. Transitions only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The remote peer closed the stream
    RemoteClosed,
    /// Reading from the stream failed
    ReadFailure(String),
    /// Writing to the stream failed
    WriteFailure(String),
    /// A broadcast could not deliver to this connection
    Evicted(SendError),
    /// Closed on local request
    LocalClose,
    /// The server is shutting down
    Shutdown,
    /// Registration was refused (id collision)
    Rejected,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::RemoteClosed => write!(f, "remote closed"),
            CloseReason::ReadFailure(e) => write!(f, "read failure: {}", e),
            CloseReason::WriteFailure(e) => write!(f, "write failure: {}", e),
            CloseReason::Evicted(e) => write!(f, "evicted: {}", e),
            CloseReason::LocalClose => write!(f, "local close"),
            CloseReason::Shutdown => write!(f, "shutdown"),
            CloseReason::Rejected => write!(f, "rejected"),
        }
    }
}

/// A connected peer
pub struct Connection {
    id: ConnectionId,
    /// Peer address, when the transport knows it
    remote_addr: Option<SocketAddr>,
    state: AtomicU8,
    /// Outbound queue, drained into the stream by the connection's writer task
    tx: mpsc::Sender<Frame>,
    /// Cancelled when the connection should stop, from any side
    shutdown: CancellationToken,
    close_reason: Mutex<Option<CloseReason>>,
}

impl Connection {
    pub fn new(remote_addr: Option<SocketAddr>, tx: mpsc::Sender<Frame>) -> Self {
        Self::with_id(ConnectionId::new(), remote_addr, tx)
    }

    pub fn with_id(id: ConnectionId, remote_addr: Option<SocketAddr>, tx: mpsc::Sender<Frame>) -> Self {
        Self {
            id,
            remote_addr,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            tx,
            shutdown: CancellationToken::new(),
            close_reason: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move the state forward to `next`.
    ///
    /// Returns `false` (and leaves the state alone) if the connection is
    /// already at or past `next`.
    pub(crate) fn advance(&self, next: ConnectionState) -> bool {
        let next = next as u8;
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= next {
                return false;
            }
            match self
                .state
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Queue a frame for this peer, waiting at most `timeout` for queue space
    pub async fn send(&self, frame: Frame, timeout: Duration) -> Result<(), SendError> {
        if self.is_closing() {
            return Err(SendError::Closed);
        }
        match self.tx.send_timeout(frame, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(SendError::Timeout(timeout)),
            Err(SendTimeoutError::Closed(_)) => Err(SendError::Closed),
        }
    }

    /// Ask the connection to stop.
    ///
    /// Only the first reason is kept. The connection's own lifecycle does the
    /// teardown; this never blocks.
    pub fn close(&self, reason: CloseReason) {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.shutdown.cancel();
    }

    /// Whether a close has been requested
    pub fn is_closing(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once a close has been requested
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.lock().clone()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("state", &self.state())
            .finish()
    }
}

/// The set of open connections
///
/// All three operations take the same lock, so a snapshot sees a connection
/// either fully registered or not at all.
#[derive(Default)]
pub struct ConnectionRegistry {
    members: RwLock<BTreeMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and mark it open
    pub fn register(&self, conn: Arc<Connection>) -> Result<(), RegistryError> {
        let mut members = self.members.write();
        if members.contains_key(&conn.id()) {
            return Err(RegistryError::AlreadyRegistered(conn.id()));
        }
        conn.advance(ConnectionState::Open);
        members.insert(conn.id(), conn);
        Ok(())
    }

    /// Remove a connection, marking it closing.
    ///
    /// Idempotent: returns `false` if the id was not registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.members.write().remove(&id);
        match removed {
            Some(conn) => {
                conn.advance(ConnectionState::Closing);
                true
            }
            None => false,
        }
    }

    /// Point-in-time copy of the members, in registration order
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.members.read().values().cloned().collect()
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.members.read().get(&id).cloned()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Request close of every member. Entries are removed by their lifecycles.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let members = self.snapshot();
        for conn in &members {
            conn.close(reason.clone());
        }
        members.len()
    }
}
