mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use pawlink_api::routes;
use pawlink_api::state::{AppState, AppStateInner};
use pawlink_gateway::connection;
use pawlink_gateway::rooms::RoomRouter;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pawlink=debug,pawlink_api=debug,pawlink_gateway=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = pawlink_db::Database::open(&config.db_path)?;

    // Shared state: the room router is both the live channel's registry and
    // the REST layer's fan-out target.
    let rooms = RoomRouter::new();
    let app_state: AppState = Arc::new(
        AppStateInner::new(db, Arc::new(rooms.clone())).with_history_limit(config.history_limit),
    );

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(rooms);

    let app = Router::new()
        .merge(routes::router(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.bind_addr()?;
    info!("PawLink chat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(rooms): State<RoomRouter>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, rooms))
}
