use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::StoreError;
use crate::infrastructure::TicketStore;
use crate::types::{NewTicket, Ticket};

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Default)]
struct Queue {
    // seq -> Ticket
    tickets: BTreeMap<u64, Ticket>,
    next_seq: u64,
}

/// A process-local ticket store.
///
/// Serializes guarded calls between tasks of one process. Share it through
/// an `Arc` to give several locks the same queue.
pub struct InMemoryTicketStore {
    queue: Mutex<Queue>,
    clock: fn() -> u64,
}

impl Default for InMemoryTicketStore {
    fn default() -> Self {
        Self::with_clock(now_ms)
    }
}

impl InMemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store stamping `enqueued_at` from `clock` instead of the system time.
    pub fn with_clock(clock: fn() -> u64) -> Self {
        Self {
            queue: Mutex::new(Queue::default()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.queue().tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn queue(&self) -> MutexGuard<'_, Queue> {
        // Ticket bookkeeping stays consistent even if a holder panicked.
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TicketStore for InMemoryTicketStore {
    async fn insert(&self, ticket: NewTicket) -> Result<Ticket, StoreError> {
        let mut queue = self.queue();
        queue.next_seq += 1;
        let ticket = Ticket {
            id: ticket.id,
            enqueued_at: (self.clock)(),
            seq: queue.next_seq,
            diagnostic: ticket.diagnostic,
        };
        queue.tickets.insert(ticket.order_key(), ticket.clone());
        Ok(ticket)
    }

    async fn find_earliest(&self) -> Result<Option<Ticket>, StoreError> {
        Ok(self.queue().tickets.values().next().cloned())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut queue = self.queue();
        let before = queue.tickets.len();
        queue.tickets.retain(|_, t| t.id != id);
        Ok(queue.tickets.len() < before)
    }

    async fn list(&self) -> Result<Vec<Ticket>, StoreError> {
        Ok(self.queue().tickets.values().cloned().collect())
    }
}
