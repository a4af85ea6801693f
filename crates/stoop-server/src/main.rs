use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use stoop_api::messages;
use stoop_api::middleware::{decode_token, require_auth};
use stoop_api::state::{AppState, AppStateInner};
use stoop_api::unread;
use stoop_gateway::push::{HttpPushProvider, NoopPushProvider};
use stoop_gateway::{
    DispatchEngine, MembershipProvider, PushProvider, Registry, UnreadAggregator, connection,
};

#[derive(Clone)]
struct ServerState {
    app: AppState,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stoop=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("STOOP_DB_PATH").unwrap_or_else(|_| "stoop.db".into());
    let host = std::env::var("STOOP_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("STOOP_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let push_endpoint = std::env::var("STOOP_PUSH_ENDPOINT").ok();

    // Stores and engine
    let db = Arc::new(stoop_db::Database::open(&PathBuf::from(&db_path))?);
    let membership: Arc<dyn MembershipProvider> = db.clone();
    let registry = Registry::new(membership.clone());
    let push: Arc<dyn PushProvider> = match push_endpoint {
        Some(endpoint) => {
            info!("push provider: http gateway at {endpoint}");
            Arc::new(HttpPushProvider::new(endpoint))
        }
        None => {
            info!("push provider: disabled");
            Arc::new(NoopPushProvider)
        }
    };
    let engine = DispatchEngine::new(db.clone(), membership.clone(), registry, push);
    let aggregator = UnreadAggregator::new(db.clone(), membership);

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        engine,
        unread: aggregator,
    });
    let state = ServerState { app: app_state.clone() };

    // Routes
    let protected_routes = Router::new()
        .route("/surfaces/{kind}/{id}/messages", get(messages::get_messages))
        .route("/surfaces/{kind}/{id}/messages", post(messages::send_message))
        .route("/surfaces/{kind}/{id}/announcements", post(messages::announce))
        .route("/surfaces/{kind}/{id}/read", post(messages::mark_read))
        .route("/messages/{message_id}", delete(messages::delete_message))
        .route("/unread", get(unread::badge))
        .route("/unread/surfaces", get(unread::overview))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    info!("stoop server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Deserialize)]
struct WsQuery {
    token: String,
}

/// Validate the JWT at the upgrade layer; the connection loop receives a
/// resolved user id and never sees credentials.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let claims = decode_token(&query.token)?;
    let engine = state.app.engine.clone();
    let aggregator = state.app.unread.clone();

    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, engine, aggregator, claims.sub)
    }))
}
