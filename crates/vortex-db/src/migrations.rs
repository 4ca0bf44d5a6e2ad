use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS accounts (
            id          TEXT PRIMARY KEY,
            email       TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS password_resets (
            id            TEXT PRIMARY KEY,
            account_id    TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
            requested_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS profiles (
            id            TEXT PRIMARY KEY,
            user_id       TEXT NOT NULL UNIQUE,
            username      TEXT NOT NULL UNIQUE COLLATE NOCASE,
            display_name  TEXT,
            avatar_url    TEXT,
            bio           TEXT,
            status        TEXT,
            is_online     INTEGER NOT NULL DEFAULT 0,
            last_seen     TEXT,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chats (
            id          TEXT PRIMARY KEY,
            created_by  TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chat_memberships (
            id           TEXT PRIMARY KEY,
            chat_id      TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
            user_id      TEXT NOT NULL,
            is_pinned    INTEGER NOT NULL DEFAULT 0,
            is_archived  INTEGER NOT NULL DEFAULT 0,
            joined_at    TEXT NOT NULL,
            UNIQUE(chat_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_memberships_user
            ON chat_memberships(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id            TEXT PRIMARY KEY,
            chat_id       TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
            sender_id     TEXT NOT NULL,
            content       TEXT NOT NULL,
            reply_to      TEXT,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL,
            is_delivered  INTEGER NOT NULL DEFAULT 0,
            is_read       INTEGER NOT NULL DEFAULT 0,
            is_pinned     INTEGER NOT NULL DEFAULT 0,
            reaction      TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_chat
            ON messages(chat_id, created_at);

        CREATE TABLE IF NOT EXISTS blocks (
            id          TEXT PRIMARY KEY,
            blocker_id  TEXT NOT NULL,
            blocked_id  TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(blocker_id, blocked_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
