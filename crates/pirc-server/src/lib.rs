pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use pirc_api::{AppState, AppStateInner};
use pirc_db::Database;
use pirc_gateway::connection;
use pirc_gateway::{Dispatcher, SessionRegistry};

#[derive(Clone)]
struct GatewayState {
    dispatcher: Dispatcher,
}

#[derive(Debug, Deserialize)]
struct WsParams {
    username: Option<String>,
}

/// Wire the query surface and the `/ws` gateway onto one router sharing a
/// single store and session registry.
pub fn build_app(db: Arc<Database>) -> Router {
    let dispatcher = Dispatcher::new(SessionRegistry::new(), db.clone());
    let api_state: AppState = Arc::new(AppStateInner { db });

    let ws_route = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(GatewayState { dispatcher });

    Router::new()
        .merge(pirc_api::router(api_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let requested_nick = params
        .username
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty());

    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, requested_nick)
    })
}
