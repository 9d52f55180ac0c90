//! Cross-process critical section over an ordered ticket queue.
//!
//! Each guarded call appends a ticket to a shared [`TicketStore`] and polls
//! until its ticket is the head of the queue. It then runs the operation and
//! deletes the ticket, whatever the outcome. A caller that sees the same head
//! for longer than `max_wait` treats the lock as jammed and recovers according
//! to [`JamRecovery`].
//!
//! ```ignore
//! let lock = TicketLock::new(Arc::new(InMemoryTicketStore::new()));
//! let increment = lock.guard(|by: u64| async move { bump_counter(by).await });
//! increment.call(1).await?;
//! ```

use futures::FutureExt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::error::{LockError, StoreError};
use crate::ids;
use crate::infrastructure::TicketStore;
use crate::types::{NewTicket, Ticket};

/// Default delay between two reads of the queue head.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Default time a waiter tolerates the same blocked queue before recovering.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30);

/// What a waiter does once it has polled for `max_wait` without reaching the head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JamRecovery {
    /// Delete the head ticket, presuming its owner crashed or hung.
    ///
    /// Guarantees progress, but breaks mutual exclusion if the owner is in
    /// fact still running its operation.
    #[default]
    Evict,
    /// Log the jam and keep waiting. Never breaks mutual exclusion.
    WarnOnly,
}

#[derive(Debug, Clone)]
pub struct TicketLockConfig {
    pub poll_interval: Duration,
    pub max_wait: Duration,
    pub jam_recovery: JamRecovery,
}

impl Default for TicketLockConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
            jam_recovery: JamRecovery::default(),
        }
    }
}

impl TicketLockConfig {
    /// Number of polls that make up `max_wait` (150 with the defaults).
    pub fn max_tries(&self) -> u32 {
        let poll = self.poll_interval.as_millis().max(1);
        let tries = self.max_wait.as_millis().div_ceil(poll);
        u32::try_from(tries).unwrap_or(u32::MAX).max(1)
    }
}

/// Why a waiter is stuck once its retry ceiling is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Jam {
    /// The queue is empty: our own ticket was lost.
    Empty,
    /// Someone else's ticket has sat at the head for the whole wait.
    StaleOwner(Ticket),
}

impl Jam {
    fn diagnose(head: Option<Ticket>) -> Self {
        match head {
            None => Jam::Empty,
            Some(ticket) => Jam::StaleOwner(ticket),
        }
    }
}

/// A distributed mutex: at most one guarded operation per queue runs at a time.
pub struct TicketLock<S: TicketStore + ?Sized = dyn TicketStore> {
    store: Arc<S>,
    config: TicketLockConfig,
}

impl<S: TicketStore + ?Sized> Clone for TicketLock<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S: TicketStore + ?Sized + 'static> TicketLock<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, TicketLockConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: TicketLockConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &TicketLockConfig {
        &self.config
    }

    /// Wrap `operation` so every call goes through this lock.
    pub fn guard<F>(&self, operation: F) -> Guarded<F, S> {
        Guarded {
            lock: self.clone(),
            operation,
        }
    }

    /// Run `operation` once the lock is held, then release it.
    ///
    /// The operation future is not polled before the ticket reaches the head.
    /// Its ticket is deleted on success, on failure and on panic; a panic is
    /// resumed after the release. Dropping the returned future while it waits
    /// or runs deletes the ticket on a background task.
    #[track_caller]
    pub fn run<T, E, Fut>(&self, operation: Fut) -> impl Future<Output = Result<T, LockError<E>>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let caller = Location::caller();
        async move {
            let queued = self
                .store
                .insert(NewTicket::new(ids::ticket_id()).with_diagnostic(caller.to_string()))
                .await?;
            let pending = PendingTicket::new(Arc::clone(&self.store), &queued.id);

            self.wait_for_head(&queued).await?;

            let outcome = AssertUnwindSafe(operation).catch_unwind().await;
            let released = self.release(&queued).await;
            pending.disarm();

            match outcome {
                Err(payload) => {
                    if let Err(e) = released {
                        error!(ticket = %queued.id, error = %e, "Failed to release ticket after panic");
                    }
                    panic::resume_unwind(payload)
                }
                Ok(Err(e)) => {
                    if let Err(release_err) = released {
                        error!(ticket = %queued.id, error = %release_err, "Failed to release ticket");
                    }
                    Err(LockError::Operation(e))
                }
                Ok(Ok(value)) => {
                    released?;
                    Ok(value)
                }
            }
        }
    }

    /// Poll until `ours` is the head. Tries count time spent behind one
    /// head: any change of head, and any recovery, starts a new count.
    async fn wait_for_head(&self, ours: &Ticket) -> Result<(), StoreError> {
        let max_tries = self.config.max_tries();
        let mut tries = 0u32;
        let mut behind: Option<String> = None;

        loop {
            let head = self.store.find_earliest().await?;
            if head.as_ref().is_some_and(|h| h.id == ours.id) {
                debug!(ticket = %ours.id, "Ticket reached head of queue");
                return Ok(());
            }

            let head_id = head.as_ref().map(|h| h.id.clone());
            if head_id != behind {
                behind = head_id;
                tries = 0;
            }

            if tries >= max_tries {
                self.recover(ours, Jam::diagnose(head), max_tries).await?;
                behind = None;
                tries = 0;
            }
            tries += 1;

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn recover(&self, ours: &Ticket, jam: Jam, max_tries: u32) -> Result<(), StoreError> {
        match jam {
            Jam::Empty => {
                warn!(
                    ticket = %ours.id,
                    max_tries,
                    "Max tries exceeded on an empty queue, re-inserting ticket"
                );
                let mut again = NewTicket::new(ours.id.clone());
                again.diagnostic = ours.diagnostic.clone();
                self.store.insert(again).await?;
            }
            Jam::StaleOwner(stale) => match self.config.jam_recovery {
                JamRecovery::Evict => {
                    warn!(
                        ticket = %ours.id,
                        stuck_on = %stale.id,
                        stuck_since = stale.enqueued_at,
                        queued_at = stale.diagnostic.as_deref().unwrap_or("unknown"),
                        max_tries,
                        "Max tries exceeded, evicting stale ticket"
                    );
                    self.store.delete(&stale.id).await?;
                }
                JamRecovery::WarnOnly => {
                    warn!(
                        ticket = %ours.id,
                        stuck_on = %stale.id,
                        max_tries,
                        "Max tries exceeded, still waiting on ticket"
                    );
                }
            },
        }
        Ok(())
    }

    async fn release(&self, ticket: &Ticket) -> Result<(), StoreError> {
        if !self.store.delete(&ticket.id).await? {
            // Evicted by a competitor's jam recovery while we were running.
            warn!(ticket = %ticket.id, "Ticket was already gone at release");
        }
        Ok(())
    }
}

/// A queued ticket not yet released. Dropped while armed, it deletes the
/// ticket on a background task so a cancelled call does not block the queue.
struct PendingTicket<S: TicketStore + ?Sized + 'static> {
    store: Arc<S>,
    id: Option<String>,
}

impl<S: TicketStore + ?Sized + 'static> PendingTicket<S> {
    fn new(store: Arc<S>, id: &str) -> Self {
        Self {
            store,
            id: Some(id.to_string()),
        }
    }

    fn disarm(mut self) {
        self.id = None;
    }
}

impl<S: TicketStore + ?Sized + 'static> Drop for PendingTicket<S> {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(ticket = %id, "No runtime to release abandoned ticket");
            return;
        };
        let store = Arc::clone(&self.store);
        runtime.spawn(async move {
            match store.delete(&id).await {
                Ok(_) => debug!(ticket = %id, "Abandoned ticket released"),
                Err(e) => error!(ticket = %id, error = %e, "Failed to release abandoned ticket"),
            }
        });
    }
}

/// An operation bound to a [`TicketLock`]; see [`TicketLock::guard`].
pub struct Guarded<F, S: TicketStore + ?Sized = dyn TicketStore> {
    lock: TicketLock<S>,
    operation: F,
}

impl<F, S: TicketStore + ?Sized + 'static> Guarded<F, S> {
    #[track_caller]
    pub fn call<A, T, E, Fut>(&self, args: A) -> impl Future<Output = Result<T, LockError<E>>>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.lock.run((self.operation)(args))
    }

    pub fn lock(&self) -> &TicketLock<S> {
        &self.lock
    }
}
