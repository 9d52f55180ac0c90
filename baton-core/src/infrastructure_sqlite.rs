//! SQLite-backed TicketStore implementation.
//! Every process that opens the same database file shares the queue.
//!
//! Enable with the `sqlite` feature flag:
//! ```toml
//! baton-core = { path = "../baton-core", features = ["sqlite"] }
//! ```

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, PoisonError};

use crate::database::{self, DatabaseConfig};
use crate::error::StoreError;
use crate::infrastructure::TicketStore;
use crate::types::{NewTicket, Ticket};

// Millisecond wall clock as seen by the database, not by the caller.
const NOW_MS: &str = "CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)";

/// A persistent ticket queue backed by SQLite.
///
/// Several named queues can live in one database; each store only sees
/// rows of its own queue. Queries run on tokio's blocking pool, so a busy
/// database never stalls the runtime's workers.
pub struct SqliteTicketStore {
    conn: Arc<Mutex<Connection>>,
    queue: Arc<str>,
}

impl SqliteTicketStore {
    /// Open (or create) the ticket table in the configured database.
    pub fn open(config: &DatabaseConfig, queue: impl Into<String>) -> Result<Self, StoreError> {
        let conn = database::connect(config)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tickets (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                queue       TEXT NOT NULL,
                id          TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL,
                diagnostic  TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_tickets_seq ON tickets(queue, seq);
            CREATE INDEX IF NOT EXISTS idx_tickets_id ON tickets(queue, id);",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            queue: Arc::from(queue.into()),
        })
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &str) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let queue = Arc::clone(&self.queue);
        let outcome = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&conn, &queue)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?;
        Ok(outcome?)
    }

    fn row_to_ticket(row: &rusqlite::Row) -> rusqlite::Result<Ticket> {
        Ok(Ticket {
            seq: row.get(0)?,
            id: row.get(1)?,
            enqueued_at: row.get(2)?,
            diagnostic: row.get(3)?,
        })
    }
}

#[async_trait]
impl TicketStore for SqliteTicketStore {
    async fn insert(&self, ticket: NewTicket) -> Result<Ticket, StoreError> {
        let sql = format!(
            "INSERT INTO tickets (queue, id, enqueued_at, diagnostic)
             VALUES (?1, ?2, {NOW_MS}, ?3)
             RETURNING seq, id, enqueued_at, diagnostic"
        );
        self.with_conn(move |conn, queue| {
            conn.query_row(
                &sql,
                params![queue, ticket.id, ticket.diagnostic],
                Self::row_to_ticket,
            )
        })
        .await
    }

    async fn find_earliest(&self) -> Result<Option<Ticket>, StoreError> {
        self.with_conn(|conn, queue| {
            conn.query_row(
                "SELECT seq, id, enqueued_at, diagnostic FROM tickets
                 WHERE queue = ?1
                 ORDER BY seq ASC
                 LIMIT 1",
                params![queue],
                Self::row_to_ticket,
            )
            .optional()
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        let rows = self
            .with_conn(move |conn, queue| {
                conn.execute(
                    "DELETE FROM tickets WHERE queue = ?1 AND id = ?2",
                    params![queue, id],
                )
            })
            .await?;
        Ok(rows > 0)
    }

    async fn list(&self) -> Result<Vec<Ticket>, StoreError> {
        self.with_conn(|conn, queue| {
            let mut stmt = conn.prepare(
                "SELECT seq, id, enqueued_at, diagnostic FROM tickets
                 WHERE queue = ?1
                 ORDER BY seq ASC",
            )?;
            let rows = stmt.query_map(params![queue], Self::row_to_ticket)?;
            rows.collect()
        })
        .await
    }
}
