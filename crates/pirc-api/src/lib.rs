pub mod channels;
pub mod error;
pub mod users;

use std::sync::Arc;

use axum::{Router, routing::get};

use pirc_db::Database;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
}

/// The `/api` query surface. Handlers read the store only, never the live
/// session registry.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/channels",
            get(channels::list_channels).post(channels::create_channel),
        )
        .route("/api/channels/{name}/messages", get(channels::get_history))
        .route("/api/users", get(users::list_online_users))
        .with_state(state)
}

/// Run a blocking store call off the async runtime.
pub(crate) async fn with_db<F, T>(state: &AppState, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))?
}
