//! Switchboard - WebSocket signaling relay
//!
//! Accepts many concurrent WebSocket connections and forwards every inbound
//! frame, unchanged, to every other connected peer. Peers use it to exchange
//! session negotiation payloads (offers, answers, candidates) before they
//! connect to each other directly.

pub mod config;
pub mod error;
pub mod server;

pub use config::RelayConfig;
pub use error::{ConfigError, RecvError, RegistryError, SendError, TransportError};
pub use server::{BroadcastRelay, ConnectionLifecycle, ConnectionRegistry, Frame, RelayServer};
