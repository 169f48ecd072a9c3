//! Database row types. These map directly to SQLite rows.
//! Distinct from pirc-types models to keep the DB layer independent;
//! conversion parses timestamps and the message kind.
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use tracing::warn;

use pirc_types::models::{Channel, Message, MessageKind, User};

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub is_online: bool,
    pub last_seen: String,
}

pub struct ChannelRow {
    pub id: i64,
    pub name: String,
    pub topic: Option<String>,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: i64,
    pub channel_id: Option<String>,
    pub user_id: Option<String>,
    pub content: String,
    pub kind: String,
    pub created_at: String,
}

/// Insert payload for [`crate::Database::insert_message`].
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub channel: Option<&'a str>,
    pub sender: Option<&'a str>,
    pub content: &'a str,
    pub kind: MessageKind,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            last_seen: parse_timestamp(&row.last_seen),
            id: row.id,
            username: row.username,
            is_online: row.is_online,
        }
    }
}

impl From<ChannelRow> for Channel {
    fn from(row: ChannelRow) -> Self {
        Channel {
            created_at: parse_timestamp(&row.created_at),
            id: row.id,
            name: row.name,
            topic: row.topic,
        }
    }
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        let kind = row.kind.parse().unwrap_or_else(|e| {
            warn!("Corrupt type on message {}: {}", row.id, e);
            MessageKind::Notice
        });
        Message {
            created_at: parse_timestamp(&row.created_at),
            id: row.id,
            channel_id: row.channel_id,
            user_id: row.user_id,
            content: row.content,
            kind,
        }
    }
}

/// Fixed-width UTC text so that lexical order is chronological order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn parse_timestamp(text: &str) -> DateTime<Utc> {
    text.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Rows written by SQLite's datetime('now') have no timezone.
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", text, e);
            DateTime::default()
        })
}
