use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{NewTicket, Ticket};

/// Defines the contract for ticket storage backends.
///
/// A store is the arbitration medium of a [`TicketLock`](crate::lock::TicketLock):
/// every competing process inserts into it and reads its head. Correctness
/// relies on the backend's consistency model: a read that follows a
/// completed insert must observe it, and every insert must receive a `seq`
/// greater than any already handed out on that queue.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Append a ticket. The store assigns `enqueued_at` and `seq`.
    async fn insert(&self, ticket: NewTicket) -> Result<Ticket, StoreError>;

    /// The ticket with the smallest `seq`, if any.
    async fn find_earliest(&self) -> Result<Option<Ticket>, StoreError>;

    /// Delete every ticket with the given ID. Returns false if none existed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// All queued tickets, head first.
    async fn list(&self) -> Result<Vec<Ticket>, StoreError>;
}
