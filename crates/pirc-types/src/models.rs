use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Persisted presence record. Survives disconnects; only `is_online` flips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub topic: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One append-only chat record. Channel and sender are loose text references,
/// `None` for system-scoped messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub channel_id: Option<String>,
    pub user_id: Option<String>,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Privmsg,
    Action,
    Notice,
    Join,
    Part,
    Quit,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Privmsg => "privmsg",
            Self::Action => "action",
            Self::Notice => "notice",
            Self::Join => "join",
            Self::Part => "part",
            Self::Quit => "quit",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown message kind '{0}'")]
pub struct UnknownMessageKind(pub String);

impl FromStr for MessageKind {
    type Err = UnknownMessageKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "privmsg" => Ok(Self::Privmsg),
            "action" => Ok(Self::Action),
            "notice" => Ok(Self::Notice),
            "join" => Ok(Self::Join),
            "part" => Ok(Self::Part),
            "quit" => Ok(Self::Quit),
            other => Err(UnknownMessageKind(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_kind_text_matches_serde() {
        for kind in [
            MessageKind::Privmsg,
            MessageKind::Action,
            MessageKind::Notice,
            MessageKind::Join,
            MessageKind::Part,
            MessageKind::Quit,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            assert_eq!(kind.as_str().parse::<MessageKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_is_a_descriptive_error() {
        let err = "shout".parse::<MessageKind>().unwrap_err();
        assert_eq!(err, UnknownMessageKind("shout".into()));

        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert_eq!(boxed.to_string(), "unknown message kind 'shout'");
    }

    #[test]
    fn records_use_camel_case_keys() {
        let msg = Message {
            id: 7,
            channel_id: Some("#general".into()),
            user_id: None,
            content: "hi".into(),
            kind: MessageKind::Privmsg,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["channelId"], "#general");
        assert!(value["userId"].is_null());
        assert_eq!(value["type"], "privmsg");
        assert!(value.get("createdAt").is_some());
    }
}
