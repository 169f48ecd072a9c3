use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (users, channels, messages)");
        // Messages reference channels and users by name as plain text;
        // there is deliberately no foreign key between them.
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                username    TEXT NOT NULL UNIQUE,
                is_online   INTEGER NOT NULL DEFAULT 1,
                last_seen   TEXT NOT NULL
            );

            CREATE TABLE channels (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                name        TEXT NOT NULL UNIQUE,
                topic       TEXT,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE messages (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_id  TEXT,
                user_id     TEXT,
                content     TEXT NOT NULL,
                type        TEXT NOT NULL DEFAULT 'privmsg',
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_messages_channel
                ON messages(channel_id, created_at);

            CREATE INDEX idx_users_online
                ON users(is_online);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_rerunnable() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }
}
