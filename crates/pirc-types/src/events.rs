use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pseudo-channel for announcements that reach every live connection
/// regardless of membership. Clients cannot join, part or message it.
pub const SYSTEM_CHANNEL: &str = "System";

/// Sender name on frames the server addresses to a single connection.
pub const SERVER_USER: &str = "Server";

/// Sender name on server-wide announcements.
pub const SYSTEM_USER: &str = "System";

pub const WELCOME_TEXT: &str =
    "Welcome to pIRC! /nick <name> to change nickname, /join #channel to join.";

/// Commands sent FROM client TO server over the WebSocket.
///
/// Unknown fields (older clients also send `user`) are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Nick { content: String },
    Join { channel: String },
    Part { channel: String },
    Message { channel: String, content: String },
}

impl ClientFrame {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Nick { .. } => "nick",
            Self::Join { .. } => "join",
            Self::Part { .. } => "part",
            Self::Message { .. } => "message",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Message,
    Join,
    Part,
    Error,
}

/// Events sent FROM server TO client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFrame {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    pub channel: String,
    pub user: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ServerFrame {
    pub fn welcome() -> Self {
        Self::from_server(FrameKind::Message, WELCOME_TEXT.to_string())
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::from_server(FrameKind::Error, content.into())
    }

    pub fn nick_change(old: &str, new: &str) -> Self {
        Self {
            kind: FrameKind::Message,
            channel: SYSTEM_CHANNEL.to_string(),
            user: SYSTEM_USER.to_string(),
            content: format!("*** {} is now known as {}", old, new),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn joined(channel: &str, nickname: &str) -> Self {
        Self::in_channel(FrameKind::Join, channel, nickname, format!("has joined {}", channel))
    }

    pub fn parted(channel: &str, nickname: &str) -> Self {
        Self::in_channel(FrameKind::Part, channel, nickname, format!("has left {}", channel))
    }

    pub fn disconnected(channel: &str, nickname: &str) -> Self {
        Self::in_channel(FrameKind::Part, channel, nickname, "has disconnected".to_string())
    }

    pub fn chat(channel: &str, nickname: &str, content: &str, at: DateTime<Utc>) -> Self {
        Self {
            kind: FrameKind::Message,
            channel: channel.to_string(),
            user: nickname.to_string(),
            content: content.to_string(),
            timestamp: Some(at),
        }
    }

    fn from_server(kind: FrameKind, content: String) -> Self {
        Self {
            kind,
            channel: SYSTEM_CHANNEL.to_string(),
            user: SERVER_USER.to_string(),
            content,
            timestamp: Some(Utc::now()),
        }
    }

    fn in_channel(kind: FrameKind, channel: &str, nickname: &str, content: String) -> Self {
        Self {
            kind,
            channel: channel.to_string(),
            user: nickname.to_string(),
            content,
            timestamp: Some(Utc::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_every_inbound_type() {
        let nick: ClientFrame = serde_json::from_str(r#"{"type":"nick","content":"alice"}"#).unwrap();
        assert_eq!(nick, ClientFrame::Nick { content: "alice".into() });

        let join: ClientFrame =
            serde_json::from_str(r##"{"type":"join","channel":"#general","user":"alice"}"##).unwrap();
        assert_eq!(join, ClientFrame::Join { channel: "#general".into() });

        let part: ClientFrame = serde_json::from_str(r##"{"type":"part","channel":"#general"}"##).unwrap();
        assert_eq!(part, ClientFrame::Part { channel: "#general".into() });

        let msg: ClientFrame =
            serde_json::from_str(r##"{"type":"message","channel":"#general","content":"hi"}"##).unwrap();
        assert_eq!(
            msg,
            ClientFrame::Message { channel: "#general".into(), content: "hi".into() }
        );
    }

    #[test]
    fn rejects_malformed_inbound() {
        assert!(serde_json::from_str::<ClientFrame>(r##"{"type":"kick","channel":"#a"}"##).is_err());
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"part"}"#).is_err());
        assert!(serde_json::from_str::<ClientFrame>(r##"{"channel":"#a"}"##).is_err());
        assert!(serde_json::from_str::<ClientFrame>("not json").is_err());
    }

    #[test]
    fn outbound_frame_shape() {
        let frame = ServerFrame::joined("#general", "alice");
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "join");
        assert_eq!(value["channel"], "#general");
        assert_eq!(value["user"], "alice");
        assert_eq!(value["content"], "has joined #general");

        let nick = ServerFrame::nick_change("Guest1", "bob");
        assert_eq!(nick.channel, SYSTEM_CHANNEL);
        assert_eq!(nick.content, "*** Guest1 is now known as bob");

        let err = serde_json::to_value(ServerFrame::error("channel: must not be empty")).unwrap();
        assert_eq!(err["type"], "error");
        assert_eq!(err["user"], SERVER_USER);
    }
}
