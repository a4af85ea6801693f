pub mod membership;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod read_markers;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use stoop_types::ChatError;

/// Durable store handle. A single connection behind a mutex: every store
/// access is a short bounded operation, and the mutex serializes compound
/// read-compare-write sequences (marker advancement) per process.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, ChatError> {
        let conn = Connection::open(path).db()?;

        // WAL mode for concurrent readers
        conn.pragma_update(None, "journal_mode", "WAL").db()?;
        conn.pragma_update(None, "foreign_keys", "ON").db()?;

        migrations::run(&conn)?;

        info!("database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, ChatError> {
        let conn = Connection::open_in_memory().db()?;
        conn.pragma_update(None, "foreign_keys", "ON").db()?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T, ChatError>
    where
        F: FnOnce(&Connection) -> Result<T, ChatError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ChatError::storage(format!("db lock poisoned: {e}")))?;
        f(&conn)
    }
}

/// Extension trait folding driver errors into the core taxonomy.
pub(crate) trait DbResultExt<T> {
    fn db(self) -> Result<T, ChatError>;
}

impl<T> DbResultExt<T> for std::result::Result<T, rusqlite::Error> {
    fn db(self) -> Result<T, ChatError> {
        self.map_err(ChatError::storage)
    }
}
