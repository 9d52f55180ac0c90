use serde::{Deserialize, Serialize};

/// A ticket as handed to a store, before the store stamps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    /// Per-call unique ticket ID
    pub id: String,
    /// Call site that queued the ticket (advisory only)
    pub diagnostic: Option<String>,
}

impl NewTicket {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            diagnostic: None,
        }
    }

    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }
}

/// A queued claim on the critical section.
///
/// Tickets are totally ordered by `seq`; the head of the queue is the
/// ticket allowed to run. `enqueued_at` is informational: wall clocks step
/// backwards, so it never decides the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Per-call unique ticket ID
    pub id: String,
    /// Store-assigned enqueue time (ms since epoch)
    pub enqueued_at: u64,
    /// Store-assigned insertion sequence, strictly increasing per store
    pub seq: u64,
    /// Call site that queued the ticket (advisory only)
    pub diagnostic: Option<String>,
}

impl Ticket {
    /// Ordering key used by every store to find the head.
    pub fn order_key(&self) -> u64 {
        self.seq
    }
}
