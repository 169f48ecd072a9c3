use crate::Database;
use crate::models::{ChannelRow, MessageRow, NewMessage, UserRow, now_timestamp};
use anyhow::{Result, anyhow};
use rusqlite::{Connection, Row};

use pirc_types::models::{Channel, Message, User};

pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
pub const MAX_HISTORY_LIMIT: u32 = 200;

impl Database {
    // -- Users --

    /// Upsert by username and set the online flag, bumping `last_seen`.
    pub fn set_user_online(&self, username: &str, online: bool) -> Result<User> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (username, is_online, last_seen) VALUES (?1, ?2, ?3)
                 ON CONFLICT(username) DO UPDATE
                     SET is_online = excluded.is_online, last_seen = excluded.last_seen",
                rusqlite::params![username, online, now_timestamp()],
            )?;
            query_user(conn, username)?
                .ok_or_else(|| anyhow!("User vanished after upsert: {}", username))
        })
    }

    pub fn get_user(&self, username: &str) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, username))
    }

    pub fn online_users(&self) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, is_online, last_seen FROM users
                 WHERE is_online = 1
                 ORDER BY username",
            )?;
            let rows = stmt
                .query_map([], user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows.into_iter().map(User::from).collect())
        })
    }

    // -- Channels --

    pub fn list_channels(&self) -> Result<Vec<Channel>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, topic, created_at FROM channels ORDER BY id")?;
            let rows = stmt
                .query_map([], channel_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows.into_iter().map(Channel::from).collect())
        })
    }

    pub fn get_channel(&self, name: &str) -> Result<Option<Channel>> {
        self.with_conn(|conn| query_channel(conn, name))
    }

    /// Idempotent create: returns the existing record (topic untouched) when
    /// the name is already taken.
    pub fn create_channel(&self, name: &str, topic: Option<&str>) -> Result<Channel> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO channels (name, topic, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO NOTHING",
                rusqlite::params![name, topic, now_timestamp()],
            )?;
            query_channel(conn, name)?
                .ok_or_else(|| anyhow!("Channel vanished after insert: {}", name))
        })
    }

    /// Create the given channels only when the store has none at all.
    /// Returns how many were created.
    pub fn seed_channels(&self, seeds: &[(String, Option<String>)]) -> Result<usize> {
        let existing: i64 = self.with_conn_mut(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM channels", [], |r| r.get(0))?)
        })?;
        if existing > 0 {
            return Ok(0);
        }

        for (name, topic) in seeds {
            self.create_channel(name, topic.as_deref())?;
        }
        Ok(seeds.len())
    }

    // -- Messages --

    pub fn insert_message(&self, message: &NewMessage<'_>) -> Result<Message> {
        self.with_conn_mut(|conn| {
            let created_at = now_timestamp();
            conn.execute(
                "INSERT INTO messages (channel_id, user_id, content, type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    message.channel,
                    message.sender,
                    message.content,
                    message.kind.as_str(),
                    created_at
                ],
            )?;
            let id = conn.last_insert_rowid();

            Ok(Message::from(MessageRow {
                id,
                channel_id: message.channel.map(str::to_string),
                user_id: message.sender.map(str::to_string),
                content: message.content.to_string(),
                kind: message.kind.as_str().to_string(),
                created_at,
            }))
        })
    }

    /// The most recent `limit` messages of a channel, oldest first.
    /// An unknown channel yields an empty list.
    pub fn channel_history(&self, channel: &str, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| query_history(conn, channel, limit))
    }
}

fn user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        is_online: row.get(2)?,
        last_seen: row.get(3)?,
    })
}

fn channel_row(row: &Row<'_>) -> rusqlite::Result<ChannelRow> {
    Ok(ChannelRow {
        id: row.get(0)?,
        name: row.get(1)?,
        topic: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn query_user(conn: &Connection, username: &str) -> Result<Option<User>> {
    let mut stmt =
        conn.prepare("SELECT id, username, is_online, last_seen FROM users WHERE username = ?1")?;
    let row = stmt.query_row([username], user_row).optional()?;
    Ok(row.map(User::from))
}

fn query_channel(conn: &Connection, name: &str) -> Result<Option<Channel>> {
    let mut stmt =
        conn.prepare("SELECT id, name, topic, created_at FROM channels WHERE name = ?1")?;
    let row = stmt.query_row([name], channel_row).optional()?;
    Ok(row.map(Channel::from))
}

fn query_history(conn: &Connection, channel: &str, limit: u32) -> Result<Vec<Message>> {
    // Newest N by recency, flipped to chronological below
    let mut stmt = conn.prepare(
        "SELECT id, channel_id, user_id, content, type, created_at
         FROM messages
         WHERE channel_id = ?1
         ORDER BY created_at DESC, id DESC
         LIMIT ?2",
    )?;

    let mut rows = stmt
        .query_map(rusqlite::params![channel, limit], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                channel_id: row.get(1)?,
                user_id: row.get(2)?,
                content: row.get(3)?,
                kind: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.reverse();
    Ok(rows.into_iter().map(Message::from).collect())
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pirc_types::models::MessageKind;

    fn chat<'a>(channel: &'a str, sender: &'a str, content: &'a str) -> NewMessage<'a> {
        NewMessage {
            channel: Some(channel),
            sender: Some(sender),
            content,
            kind: MessageKind::Privmsg,
        }
    }

    #[test]
    fn create_channel_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let first = db.create_channel("#general", Some("General chat")).unwrap();
        let second = db.create_channel("#general", Some("ignored")).unwrap();

        assert_eq!(first, second);
        assert_eq!(second.topic.as_deref(), Some("General chat"));
        assert_eq!(db.list_channels().unwrap().len(), 1);
    }

    #[test]
    fn history_is_oldest_first_and_bounded() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..60 {
            db.insert_message(&chat("#general", "alice", &format!("msg {}", i)))
                .unwrap();
        }
        db.insert_message(&chat("#random", "bob", "elsewhere")).unwrap();

        let history = db
            .channel_history("#general", DEFAULT_HISTORY_LIMIT)
            .unwrap();
        assert_eq!(history.len(), 50);
        assert_eq!(history.first().unwrap().content, "msg 10");
        assert_eq!(history.last().unwrap().content, "msg 59");
        assert!(history.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        assert!(history.iter().all(|m| m.channel_id.as_deref() == Some("#general")));
    }

    #[test]
    fn history_of_unknown_channel_is_empty() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.channel_history("#nowhere", 50).unwrap().is_empty());
    }

    #[test]
    fn system_messages_have_no_channel_or_sender() {
        let db = Database::open_in_memory().unwrap();
        let msg = db
            .insert_message(&NewMessage {
                channel: None,
                sender: None,
                content: "server restarting",
                kind: MessageKind::Notice,
            })
            .unwrap();
        assert!(msg.channel_id.is_none());
        assert!(msg.user_id.is_none());
        assert_eq!(msg.kind, MessageKind::Notice);
    }

    #[test]
    fn user_online_flag_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let created = db.set_user_online("alice", true).unwrap();
        assert!(created.is_online);
        db.set_user_online("bob", true).unwrap();

        let offline = db.set_user_online("alice", false).unwrap();
        assert_eq!(offline.id, created.id);
        assert!(!offline.is_online);

        let online: Vec<String> = db
            .online_users()
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(online, vec!["bob".to_string()]);
        assert!(db.get_user("carol").unwrap().is_none());
    }

    #[test]
    fn seeding_only_touches_an_empty_store() {
        let db = Database::open_in_memory().unwrap();
        let seeds = vec![
            ("#general".to_string(), Some("General chat for everyone".to_string())),
            ("#help".to_string(), None),
        ];
        assert_eq!(db.seed_channels(&seeds).unwrap(), 2);
        assert_eq!(db.seed_channels(&seeds).unwrap(), 0);
        assert_eq!(db.list_channels().unwrap().len(), 2);
    }

    #[test]
    fn file_database_reads_see_committed_writes() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("store.db")).unwrap();
        db.create_channel("#general", None).unwrap();
        db.insert_message(&chat("#general", "alice", "hello")).unwrap();

        // More reads than pooled readers, so every reader is exercised
        for _ in 0..8 {
            assert_eq!(db.channel_history("#general", 50).unwrap().len(), 1);
        }
    }
}
