use rusqlite::Connection;
use tracing::info;

use stoop_types::ChatError;

use crate::DbResultExt;

pub fn run(conn: &Connection) -> Result<(), ChatError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            display_name  TEXT NOT NULL,
            push_token    TEXT,
            created_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS events (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            title       TEXT NOT NULL DEFAULT '',
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS communities (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL DEFAULT '',
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            participant_a  INTEGER NOT NULL REFERENCES users(id),
            participant_b  INTEGER NOT NULL REFERENCES users(id),
            created_at     TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(participant_a, participant_b)
        );

        CREATE TABLE IF NOT EXISTS event_participants (
            event_id  INTEGER NOT NULL REFERENCES events(id),
            user_id   INTEGER NOT NULL REFERENCES users(id),
            role      TEXT NOT NULL DEFAULT 'member',
            PRIMARY KEY (event_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS community_members (
            community_id  INTEGER NOT NULL REFERENCES communities(id),
            user_id       INTEGER NOT NULL REFERENCES users(id),
            role          TEXT NOT NULL DEFAULT 'member',
            PRIMARY KEY (community_id, user_id)
        );

        -- Append-only message log for all three surfaces. AUTOINCREMENT ids
        -- are strictly increasing, which private read markers and the
        -- (created_at, id) tie-break both rely on.
        CREATE TABLE IF NOT EXISTS messages (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            surface_kind  TEXT NOT NULL,
            surface_id    INTEGER NOT NULL,
            sender_id     INTEGER NOT NULL REFERENCES users(id),
            kind          TEXT NOT NULL DEFAULT 'chat',
            body          TEXT NOT NULL,
            reply_to      INTEGER REFERENCES messages(id),
            deleted       INTEGER NOT NULL DEFAULT 0,
            created_at    INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_surface
            ON messages(surface_kind, surface_id, created_at, id);

        -- One marker per (user, surface). `position` is unix milliseconds
        -- for event/community surfaces and a message id for private ones.
        CREATE TABLE IF NOT EXISTS read_markers (
            user_id       INTEGER NOT NULL REFERENCES users(id),
            surface_kind  TEXT NOT NULL,
            surface_id    INTEGER NOT NULL,
            position      INTEGER NOT NULL,
            updated_at    TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (user_id, surface_kind, surface_id)
        );
        ",
    )
    .db()?;

    info!("database migrations complete");
    Ok(())
}
