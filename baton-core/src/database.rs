//! SQLite connection bootstrap shared by the persistent stores.

use rusqlite::Connection;
use std::time::Duration;

/// How long a writer waits on a locked database before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Path of the SQLite file (`sqlite:` prefix accepted).
    pub url: String,
    pub busy_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// The filesystem path, with any `sqlite:` prefix stripped.
    pub fn path(&self) -> &str {
        self.url.strip_prefix("sqlite:").unwrap_or(&self.url)
    }
}

/// Open (or create) the database and apply the connection pragmas.
///
/// Uses WAL mode so readers polling the queue do not block the writer.
pub fn connect(config: &DatabaseConfig) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(config.path())?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(config.busy_timeout)?;

    tracing::info!(path = config.path(), "💾 Database connected");
    Ok(conn)
}
