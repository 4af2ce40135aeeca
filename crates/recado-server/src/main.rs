use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use recado_api::auth::{self, AppState, AppStateInner};
use recado_api::bridge;
use recado_api::broadcast::NoteBroadcaster;
use recado_api::conversations;
use recado_api::middleware::require_session;
use recado_api::notes;
use recado_api::reconcile;
use recado_gateway::connection;
use recado_gateway::dispatcher::Dispatcher;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recado=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret = std::env::var("RECADO_JWT_SECRET").unwrap_or_default();
    if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
        eprintln!("FATAL: RECADO_JWT_SECRET is unset or still a placeholder.");
        eprintln!("       Session cookies and gateway tokens are signed with it.");
        eprintln!("       Set it in your .env file and restart.");
        std::process::exit(1);
    }
    let db_path = std::env::var("RECADO_DB_PATH").unwrap_or_else(|_| "recado.db".into());
    let host = std::env::var("RECADO_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("RECADO_PORT")
        .unwrap_or_else(|_| "8080".into())
        .parse()?;

    // Init database
    let db = Arc::new(recado_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let notes = NoteBroadcaster::new();
    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret,
        dispatcher,
        notes,
    });

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/auth/logout", post(auth::logout))
        .route("/realtime/token", get(bridge::bridge_token))
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations", post(conversations::create_conversation))
        .route(
            "/conversations/{conversation_id}/messages",
            get(conversations::get_messages),
        )
        .route("/conversations/read", post(reconcile::reconcile_read))
        .route("/notes", get(notes::list_notes))
        .route("/notes", post(notes::create_note))
        .route("/notes/stream", get(notes::note_stream))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Recado server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            state.dispatcher.clone(),
            state.db.clone(),
            state.jwt_secret.clone(),
        )
    })
}

async fn shutdown_signal(state: AppState) {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutting down, closing note streams");
    state.notes.clear();
}
