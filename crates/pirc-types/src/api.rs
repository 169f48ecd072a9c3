use serde::{Deserialize, Serialize};

// -- Channels --

/// Validated body of `POST /api/channels`. Built field by field so each
/// rejection can name the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateChannelRequest {
    pub name: String,
    pub topic: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

// -- Errors --

/// Error body shared by every non-2xx REST response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}
