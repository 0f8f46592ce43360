//! WebSocket transport and HTTP surface
//!
//! Upgrades requests on the relay path into duplex streams and hands them to
//! the connection lifecycle. Also serves the health and stats endpoints and,
//! when configured, the static browser client.

use crate::config::RelayConfig;
use crate::error::{RecvError, TransportError};
use crate::server::connections::{CloseReason, ConnectionRegistry};
use crate::server::events::{EventSink, RelayEvent, TracingEventSink};
use crate::server::lifecycle::ConnectionLifecycle;
use crate::server::relay::BroadcastRelay;
use crate::server::stats::{RelayStats, StatsSnapshot};
use crate::server::transport::{Frame, FrameReader, FrameWriter};

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Reading half of an axum WebSocket
pub struct WsReader {
    inner: SplitStream<WebSocket>,
}

impl WsReader {
    pub fn new(inner: SplitStream<WebSocket>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl FrameReader for WsReader {
    async fn next_frame(&mut self) -> Result<Frame, RecvError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Frame::Text(text)),
                Some(Ok(Message::Binary(data))) => return Ok(Frame::Binary(data)),
                // Handled automatically by axum
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Err(RecvError::RemoteClosed),
                Some(Err(e)) => return Err(RecvError::Transport(e.to_string())),
            }
        }
    }
}

/// Writing half of an axum WebSocket
pub struct WsWriter {
    inner: SplitSink<WebSocket, Message>,
}

impl WsWriter {
    pub fn new(inner: SplitSink<WebSocket, Message>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        let msg = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data),
        };
        self.inner
            .send(msg)
            .await
            .map_err(|e| TransportError(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner
            .close()
            .await
            .map_err(|e| TransportError(e.to_string()))
    }
}

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct WsState {
    pub lifecycle: ConnectionLifecycle,
    pub registry: Arc<ConnectionRegistry>,
    pub stats: Arc<RelayStats>,
    pub max_message_size: usize,
}

/// Create the HTTP router
pub fn create_router(state: WsState, config: &RelayConfig) -> Router {
    let mut router = Router::new()
        .route(&config.ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/favicon.ico", get(favicon_handler));

    router = match &config.static_dir {
        Some(dir) => router
            .route_service("/", ServeFile::new(dir.join("index.html")))
            .nest_service("/static", ServeDir::new(dir)),
        None => router.route("/", get(root_handler)),
    };

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "switchboard relay is running" }))
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn favicon_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn stats_handler(State(state): State<WsState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot(state.registry.len()))
}

// Peer addresses are only known when served with connect info
async fn ws_handler(
    ws: WebSocketUpgrade,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    State(state): State<WsState>,
) -> impl IntoResponse {
    let remote_addr = connect_info.map(|Extension(ConnectInfo(addr))| addr);
    let stats = state.stats.clone();
    ws.max_message_size(state.max_message_size)
        .on_failed_upgrade(move |e: axum::Error| {
            stats.emit(&RelayEvent::HandshakeFailed { error: e.to_string() });
        })
        .on_upgrade(move |socket| handle_socket(socket, remote_addr, state))
}

async fn handle_socket(socket: WebSocket, remote_addr: Option<SocketAddr>, state: WsState) {
    let (sender, receiver) = socket.split();
    state
        .lifecycle
        .accept(WsReader::new(receiver), WsWriter::new(sender), remote_addr)
        .await;
}

/// The relay server
pub struct RelayServer {
    config: RelayConfig,
    registry: Arc<ConnectionRegistry>,
    lifecycle: ConnectionLifecycle,
    stats: Arc<RelayStats>,
}

impl RelayServer {
    /// Create a server that logs events through `tracing`
    pub fn new(config: RelayConfig) -> Self {
        Self::with_event_sink(config, Arc::new(TracingEventSink))
    }

    /// Create a server reporting events to `events`
    pub fn with_event_sink(config: RelayConfig, events: Arc<dyn EventSink>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let stats = Arc::new(RelayStats::new(events));
        let relay = BroadcastRelay::new(registry.clone(), config.send_timeout, stats.clone());
        let lifecycle = ConnectionLifecycle::new(registry.clone(), relay, stats.clone(), config.outbound_buffer);

        Self {
            config,
            registry,
            lifecycle,
            stats,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// Lifecycle driver, for accepting streams from other transports
    pub fn lifecycle(&self) -> ConnectionLifecycle {
        self.lifecycle.clone()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.registry.len())
    }

    /// Build the HTTP router.
    ///
    /// Serve it with `into_make_service_with_connect_info::<SocketAddr>()` to
    /// record peer addresses; without it connections are accepted anonymously.
    pub fn router(&self) -> Router {
        let state = WsState {
            lifecycle: self.lifecycle.clone(),
            registry: self.registry.clone(),
            stats: self.stats.clone(),
            max_message_size: self.config.max_message_size,
        };
        create_router(state, &self.config)
    }

    /// Bind and serve in the background, returning the bound address
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>)> {
        self.config.validate()?;

        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.bind_addr))?;
        let addr = listener.local_addr()?;
        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();

        info!(addr = %addr, path = %self.config.ws_path, "Relay listening");

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "Relay server stopped");
            }
        });
        Ok((addr, handle))
    }

    /// Serve until `shutdown` resolves, then close every open connection
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.config.validate()?;

        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.bind_addr))?;
        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();

        info!(addr = %self.config.bind_addr, path = %self.config.ws_path, "Relay listening");

        let registry = self.registry.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                let closed = registry.close_all(CloseReason::Shutdown);
                info!(connections = closed, "Closing open connections");
            })
            .await
            .context("Relay server failed")?;

        Ok(())
    }

    /// Request close of every open connection
    pub fn close_all(&self) -> usize {
        self.registry.close_all(CloseReason::Shutdown)
    }
}
