//! HTTP and WebSocket front end of the cloud relay.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

use crate::config::CloudConfig;
use crate::sessions::SessionRegistry;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    registry: Arc<SessionRegistry>,
    viewer_queue: usize,
    shutdown: watch::Receiver<bool>,
}

/// Query parameters of a WebSocket connection.
#[derive(Debug, Default, Deserialize)]
struct ConnectParams {
    role: Option<String>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    /// Accepted for compatibility; not checked.
    #[allow(dead_code)]
    token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Bridge,
    Viewer,
}

impl ConnectParams {
    fn role(&self) -> Role {
        match self.role.as_deref() {
            Some("bridge") => Role::Bridge,
            _ => Role::Viewer,
        }
    }

    fn session_id(&self) -> String {
        match self.session_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => "default".to_string(),
        }
    }
}

fn cors_layer(config: &CloudConfig) -> CorsLayer {
    if config.allows_any_origin() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET])
}

/// Create the HTTP router.
fn create_router(
    registry: Arc<SessionRegistry>,
    config: &CloudConfig,
    shutdown: watch::Receiver<bool>,
) -> Router {
    let state = AppState {
        registry,
        viewer_queue: config.viewer_queue,
        shutdown,
    };

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .fallback(not_found_handler)
        .layer(cors_layer(config))
        .with_state(state)
}

/// WebSocket upgrade on `/`, or the usage banner for plain requests.
async fn root_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    match ws {
        Some(ws) => ws.on_upgrade(move |socket| handle_socket(socket, state, params)),
        None => {
            let body = format!(
                "SkyRelay Cloud Relay Server\n\n\
                 Active sessions: {}\n\
                 Connect as bridge: ws://<server>/?role=bridge&sessionId=<id>\n\
                 Connect as client: ws://<server>/?role=client&sessionId=<id>",
                state.registry.session_count()
            );
            (StatusCode::OK, [("content-type", "text/plain")], body).into_response()
        }
    }
}

/// Handler for the /health endpoint.
async fn health_handler(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({
        "status": "ok",
        "activeSessions": state.registry.session_count(),
        "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    }))
    .into_response()
}

async fn not_found_handler() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState, params: ConnectParams) {
    let role = params.role();
    let session_id = params.session_id();
    let registry = state.registry;
    let mut shutdown = state.shutdown;

    info!(role = ?role, session = %session_id, "Connection");

    let (tx, mut outbox) = mpsc::channel(state.viewer_queue);
    let conn = match role {
        Role::Bridge => registry.join_bridge(&session_id, tx),
        Role::Viewer => registry.join_viewer(&session_id, tx),
    };

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            out = outbox.recv() => match out {
                Some(text) => {
                    if sink.send(Message::Text(text.to_string())).await.is_err() {
                        break;
                    }
                }
                // Dropped by the registry.
                None => break,
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) if role == Role::Bridge => {
                    if let Err(e) = registry.bridge_message(&session_id, &text) {
                        tracing::warn!(session = %session_id, error = %e, "Dropping bridge message");
                    }
                }
                Some(Ok(Message::Binary(bytes))) if role == Role::Bridge => {
                    if let Err(e) = registry.bridge_binary(&session_id, &bytes) {
                        tracing::warn!(session = %session_id, error = %e, "Dropping bridge message");
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::warn!(role = ?role, session = %session_id, error = %e, "Connection error");
                    break;
                }
                Some(Ok(_)) => {}
            },
            _ = shutdown.changed() => break,
        }
    }

    let _ = sink.send(Message::Close(None)).await;

    let empty = match role {
        Role::Bridge => registry.leave_bridge(&session_id, conn),
        Role::Viewer => registry.leave_viewer(&session_id, conn),
    };
    if empty {
        registry.schedule_cleanup(&session_id);
    }
    info!(role = ?role, session = %session_id, "Disconnected");
}

/// The relay's listening server.
pub struct CloudServer {
    listener: TcpListener,
    router: Router,
    registry: Arc<SessionRegistry>,
}

impl CloudServer {
    /// Bind the listening socket.
    pub async fn bind(
        config: &CloudConfig,
        registry: Arc<SessionRegistry>,
        shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(&config.listen).await?;
        let router = create_router(registry.clone(), config, shutdown);
        Ok(Self {
            listener,
            router,
            registry,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> std::io::Result<()> {
        info!(addr = %self.local_addr()?, "Cloud relay listening");

        let registry = self.registry.clone();
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                // Wait for shutdown signal
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("Cloud relay shutting down");
            })
            .await?;

        registry.close_all();
        info!("Cloud relay stopped");
        Ok(())
    }
}
