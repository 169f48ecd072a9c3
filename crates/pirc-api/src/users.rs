use axum::{Json, extract::State};

use pirc_types::models::User;

use crate::error::ApiError;
use crate::{AppState, with_db};

/// GET /api/users: records currently flagged online. The flag trails the
/// live registry by however long a connect/disconnect write takes.
pub async fn list_online_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, ApiError> {
    let users = with_db(&state, |db| db.online_users()).await?;
    Ok(Json(users))
}
