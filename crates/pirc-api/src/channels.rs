use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::Value;
use tracing::info;

use pirc_db::queries::{DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT};
use pirc_types::api::{CreateChannelRequest, HistoryQuery};
use pirc_types::models::{Channel, Message};

use crate::error::ApiError;
use crate::{AppState, with_db};

/// GET /api/channels: every persisted channel, no pagination.
pub async fn list_channels(State(state): State<AppState>) -> Result<Json<Vec<Channel>>, ApiError> {
    let channels = with_db(&state, |db| db.list_channels()).await?;
    Ok(Json(channels))
}

/// POST /api/channels: idempotent upsert by name. Always 201 with the
/// stored record, whether it was just created or already existed.
pub async fn create_channel(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = payload.map_err(|e| ApiError::Validation {
        field: None,
        message: e.body_text(),
    })?;
    let req = parse_create(&body)?;

    let channel = with_db(&state, move |db| {
        db.create_channel(&req.name, req.topic.as_deref())
    })
    .await?;
    info!("Channel {} ready (id {})", channel.name, channel.id);

    Ok((StatusCode::CREATED, Json(channel)))
}

/// GET /api/channels/{name}/messages: oldest first. Unknown channels
/// simply have no messages.
pub async fn get_history(
    State(state): State<AppState>,
    Path(name): Path<String>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::validation("limit", e.body_text()))?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);

    let messages = with_db(&state, move |db| db.channel_history(&name, limit)).await?;
    Ok(Json(messages))
}

/// Check fields in declaration order and cite the first bad one.
fn parse_create(body: &Value) -> Result<CreateChannelRequest, ApiError> {
    let name = match body.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
        Some(Value::String(_)) => {
            return Err(ApiError::validation("name", "Channel name must not be empty"));
        }
        Some(_) => return Err(ApiError::validation("name", "Channel name must be a string")),
        None => return Err(ApiError::validation("name", "Channel name is required")),
    };

    let topic = match body.get("topic") {
        None | Some(Value::Null) => None,
        Some(Value::String(topic)) if topic.is_empty() => None,
        Some(Value::String(topic)) => Some(topic.clone()),
        Some(_) => return Err(ApiError::validation("topic", "Topic must be a string")),
    };

    Ok(CreateChannelRequest { name, topic })
}
