//! Relay server implementation
//!
//! Handles WebSocket connections, the connection registry, and message fan-out.

mod connections;
pub mod events;
mod lifecycle;
mod relay;
mod stats;
pub mod transport;
pub mod websocket;

pub use connections::{CloseReason, Connection, ConnectionId, ConnectionRegistry, ConnectionState};
pub use events::{EventSink, NullEventSink, RelayEvent, TracingEventSink};
pub use lifecycle::ConnectionLifecycle;
pub use relay::{BroadcastReport, BroadcastRelay};
pub use stats::{RelayStats, StatsSnapshot};
pub use transport::{Frame, FrameReader, FrameWriter};
pub use websocket::{create_router, RelayServer, WsState};
