//! v001 -- Initial schema creation.
//!
//! Creates the three core tables: `users`, `chat_requests`, and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    display_name  TEXT NOT NULL,
    password_hash TEXT NOT NULL,              -- opaque, written by the auth collaborator
    avatar_url    TEXT,
    created_at    TEXT NOT NULL               -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Chat requests
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_requests (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    sender_id   TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    status      TEXT NOT NULL CHECK (status IN ('pending', 'accepted', 'rejected')),
    pair_key    TEXT NOT NULL,                -- min(sender,receiver) || ':' || max(...)
    created_at  TEXT NOT NULL
);

-- At most one active (pending or accepted) request per unordered pair.
-- Insert races resolve here, at the moment of write.
CREATE UNIQUE INDEX IF NOT EXISTS idx_requests_active_pair
    ON chat_requests(pair_key) WHERE status != 'rejected';

CREATE INDEX IF NOT EXISTS idx_requests_receiver_status
    ON chat_requests(receiver_id, status);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    sender_id   TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    pair_key    TEXT NOT NULL,
    ciphertext  BLOB,                         -- nonce || ct, NULL for image-only
    image_url   TEXT,
    seen        INTEGER NOT NULL DEFAULT 0,   -- reserved, no writer yet
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_pair_ts
    ON messages(pair_key, created_at ASC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
