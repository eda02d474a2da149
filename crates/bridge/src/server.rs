//! HTTP front end and server lifecycle.
//!
//! Serves the WebSocket exec endpoint and a health probe, and owns the root
//! cancellation token every session scope derives from.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::StreamExt;
use protocol::ErrorResponse;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::exec::{ExecClientProvider, ExecTarget};
use crate::session::{run_session, SessionContext, SessionId, SessionRegistry, SessionScope};

/// Exec endpoint route.
pub const EXEC_ROUTE: &str = "/api/pod/{pod_name}/{container_name}/exec";

/// How long `stop` waits for sessions to unregister.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll period while draining sessions.
const SHUTDOWN_DRAIN_POLL: Duration = Duration::from_millis(20);

/// Broadcast channel capacity for server events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Server lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Initial state, not started.
    Stopped,
    /// Binding the listener.
    Starting,
    /// Running and accepting connections.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Events emitted by the server.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Server state changed.
    StateChanged(ServerState),
    /// A session was admitted and its socket upgraded.
    SessionOpened {
        session_id: SessionId,
        target: ExecTarget,
    },
    /// A session ended.
    SessionClosed {
        session_id: SessionId,
        error: Option<String>,
    },
}

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    provider: Arc<dyn ExecClientProvider>,
    registry: Arc<SessionRegistry>,
    root: CancellationToken,
    events: broadcast::Sender<ServerEvent>,
}

impl AppState {
    /// Creates handler state.
    pub fn new(
        config: Arc<Config>,
        provider: Arc<dyn ExecClientProvider>,
        registry: Arc<SessionRegistry>,
        root: CancellationToken,
        events: broadcast::Sender<ServerEvent>,
    ) -> Self {
        Self {
            config,
            provider,
            registry,
            root,
            events,
        }
    }
}

/// Builds the HTTP router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(EXEC_ROUTE, get(exec_handler))
        .route("/health", get(health_handler))
        .fallback(fallback_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.registry.count(),
    })
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorResponse::new(status.as_u16(), message))).into_response()
}

fn invalid_container() -> Response {
    error_response(StatusCode::BAD_REQUEST, "Invalid container")
}

/// Exec paths with an empty identifier segment never match the exec route;
/// they get the same 400 as whitespace identifiers.
async fn fallback_handler(uri: Uri) -> Response {
    let path = uri.path();
    if path.starts_with("/api/pod/") && path.ends_with("/exec") {
        invalid_container()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn exec_handler(
    State(state): State<AppState>,
    Path((pod, container)): Path<(String, String)>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if pod.trim().is_empty() || container.trim().is_empty() {
        debug!(pod = %pod, container = %container, "Rejecting exec request with empty identifier");
        return invalid_container();
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(error = %rejection, "WebSocket upgrade rejected");
            return rejection.into_response();
        }
    };

    let target = ExecTarget::new(state.config.exec.namespace.clone(), pod, container);
    let Some(info) = state.registry.try_register(target.clone()) else {
        warn!(
            limit = state.registry.max_sessions(),
            "Session limit reached, rejecting exec request"
        );
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Too many sessions");
    };

    let session_id = info.id;
    let failed_registry = Arc::clone(&state.registry);
    let failed_id = session_id.clone();

    ws.on_failed_upgrade(move |e| {
        debug!(session_id = %failed_id, error = %e, "WebSocket upgrade failed");
        failed_registry.remove(&failed_id);
    })
    .on_upgrade(move |socket| serve_session(socket, state, session_id, target))
}

async fn serve_session(
    socket: WebSocket,
    state: AppState,
    session_id: SessionId,
    target: ExecTarget,
) {
    let _ = state.events.send(ServerEvent::SessionOpened {
        session_id: session_id.clone(),
        target: target.clone(),
    });

    let ctx = SessionContext {
        id: session_id.clone(),
        target,
        command: state.config.exec.command.clone(),
        config: state.config.session.clone(),
        provider: Arc::clone(&state.provider),
    };
    let scope = Arc::new(SessionScope::child_of(&state.root));
    let (sink, stream) = socket.split();

    let result = run_session(sink, stream, ctx, scope).await;

    state.registry.remove(&session_id);
    let _ = state.events.send(ServerEvent::SessionClosed {
        session_id,
        error: result.err().map(|e| e.to_string()),
    });
}

/// The bridge server: listener, router and session lifetime owner.
pub struct BridgeServer {
    config: Arc<Config>,
    provider: Arc<dyn ExecClientProvider>,
    registry: Arc<SessionRegistry>,
    state: Arc<RwLock<ServerState>>,
    shutdown_token: CancellationToken,
    event_tx: broadcast::Sender<ServerEvent>,
    local_addr: Option<SocketAddr>,
    serve_task: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
}

impl BridgeServer {
    /// Creates a server. Nothing is bound until [`BridgeServer::start`].
    pub fn new(config: Config, provider: Arc<dyn ExecClientProvider>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let registry = Arc::new(SessionRegistry::new(config.session.max_sessions));

        Self {
            config: Arc::new(config),
            provider,
            registry,
            state: Arc::new(RwLock::new(ServerState::Stopped)),
            shutdown_token: CancellationToken::new(),
            event_tx,
            local_addr: None,
            serve_task: Mutex::new(None),
        }
    }

    /// Returns the current state.
    pub async fn state(&self) -> ServerState {
        *self.state.read().await
    }

    /// Subscribes to server events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.event_tx.subscribe()
    }

    /// Returns the session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Returns the root cancellation token.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Binds the configured address and starts serving.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        {
            let mut state = self.state.write().await;
            if *state != ServerState::Stopped {
                anyhow::bail!("Server is already running");
            }
            if self.shutdown_token.is_cancelled() {
                anyhow::bail!("Server has been stopped and cannot be restarted");
            }
            *state = ServerState::Starting;
        }
        self.emit_event(ServerEvent::StateChanged(ServerState::Starting));

        let listener = match TcpListener::bind(&self.config.server.bind).await {
            Ok(listener) => listener,
            Err(e) => {
                *self.state.write().await = ServerState::Stopped;
                self.emit_event(ServerEvent::StateChanged(ServerState::Stopped));
                return Err(e)
                    .with_context(|| format!("Failed to bind {}", self.config.server.bind));
            }
        };
        let addr = listener
            .local_addr()
            .context("Failed to read listener address")?;
        self.local_addr = Some(addr);

        let app = router(AppState::new(
            Arc::clone(&self.config),
            Arc::clone(&self.provider),
            Arc::clone(&self.registry),
            self.shutdown_token.clone(),
            self.event_tx.clone(),
        ));

        let token = self.shutdown_token.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
        });
        *self.serve_task.lock().await = Some(task);

        *self.state.write().await = ServerState::Running;
        self.emit_event(ServerEvent::StateChanged(ServerState::Running));

        info!(addr = %addr, "Bridge server listening");
        Ok(addr)
    }

    /// Stops the server gracefully.
    ///
    /// Cancels every session, waits for the listener to shut down and gives
    /// sessions a bounded time to unregister.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == ServerState::Stopped {
                return Ok(());
            }
            if *state == ServerState::ShuttingDown {
                anyhow::bail!("Server is already shutting down");
            }
            *state = ServerState::ShuttingDown;
        }
        self.emit_event(ServerEvent::StateChanged(ServerState::ShuttingDown));

        info!(sessions = self.registry.count(), "Stopping bridge server...");
        self.shutdown_token.cancel();

        if let Some(task) = self.serve_task.lock().await.take() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Server error during shutdown: {}", e),
                Err(e) => warn!("Server task failed: {}", e),
            }
        }

        let drained = tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, async {
            while self.registry.count() > 0 {
                tokio::time::sleep(SHUTDOWN_DRAIN_POLL).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                sessions = self.registry.count(),
                "Sessions still active after shutdown timeout"
            );
        }

        *self.state.write().await = ServerState::Stopped;
        self.emit_event(ServerEvent::StateChanged(ServerState::Stopped));

        info!("Bridge server stopped");
        Ok(())
    }

    fn emit_event(&self, event: ServerEvent) {
        let _ = self.event_tx.send(event);
    }
}
