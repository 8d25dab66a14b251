use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::{header, HeaderValue, Method};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use chitchat_core::ids::RoomId;
use chitchat_identity::IdentityProvider;
use chitchat_store::Database;

use crate::channel::RoomChannel;
use crate::connection;
use crate::handlers::{self, HandlerState};
use crate::registry::{self, ConnectionRegistry};

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
    pub sweep_interval_secs: u64,
    /// Origins allowed for cross-origin requests. Explicit allow-list.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            max_send_queue: 256,
            sweep_interval_secs: 60,
            allowed_origins: vec![
                "http://localhost:3000".into(),
                "https://chitchat-ce06a.web.app".into(),
            ],
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handlers: Arc<HandlerState>,
    pub registry: Arc<ConnectionRegistry>,
    pub channel: Arc<RoomChannel>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        .route("/ws/chat/{chatroom_id}", get(ws_handler))
        .route("/user/login", post(handlers::user_login))
        .route("/user/new-chat/search", post(handlers::search_contacts))
        .route("/chatroom/list", post(handlers::list_chatrooms))
        .route("/chatroom/create", post(handlers::create_chatroom))
        .route("/message/list", post(handlers::list_messages))
        .route("/message/send", post(handlers::send_message))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Create and start the server. Returns a handle that keeps the background
/// tasks alive.
pub async fn start(
    config: ServerConfig,
    db: Database,
    identity: Arc<dyn IdentityProvider>,
) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(ConnectionRegistry::new(config.max_send_queue));
    let channel = Arc::new(RoomChannel::new(Arc::clone(&registry)));

    let sweep = registry::start_sweep_task(
        Arc::clone(&registry),
        Duration::from_secs(config.sweep_interval_secs),
    );

    let handlers = Arc::new(HandlerState::new(db, identity));

    let state = AppState {
        handlers,
        registry,
        channel,
    };

    let router = build_router(state, &config.allowed_origins);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "chitchat server started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server,
        _sweep: sweep,
    })
}

/// Handle returned by `start()` — keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _sweep: tokio::task::JoinHandle<()>,
}

/// WebSocket upgrade for the live chat endpoint. The connection is scoped
/// to the chatroom in the path. No credential check happens here; the
/// upgrade accepts whatever room id the client names.
async fn ws_handler(
    Path(chatroom_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let room_id = RoomId::from_raw(chatroom_id);
    ws.on_upgrade(move |socket| {
        connection::serve_socket(socket, room_id, state.registry, state.channel)
    })
}
