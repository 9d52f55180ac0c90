//! High-level client that bundles a ticket store and an event bus.
//! The CLI and server delegate to this.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::bus::{EventBus, InMemoryBus, Subscriber, Subscription};
use crate::emit::{self, Emitted};
use crate::error::{BusError, StoreError};
use crate::exchange::{Exchanger, DEFAULT_EXCHANGE_TIMEOUT};
use crate::infrastructure::TicketStore;
use crate::infrastructure_in_memory::InMemoryTicketStore;
use crate::lock::{TicketLock, TicketLockConfig};
use crate::types::Ticket;

/// The main entry point: one queue, one bus, and the primitives built on them.
#[derive(Clone)]
pub struct BatonClient {
    store: Arc<dyn TicketStore>,
    bus: Arc<dyn EventBus>,
    lock_config: TicketLockConfig,
    exchange_timeout: Duration,
}

impl BatonClient {
    /// In-memory queue and bus. Coordination stays within this process.
    pub fn new() -> Self {
        Self::with_parts(
            Arc::new(InMemoryTicketStore::new()),
            Arc::new(InMemoryBus::new()),
        )
    }

    /// Queue backed by SQLite at `path`. Every process opening the same
    /// file and queue name shares the lock.
    #[cfg(feature = "sqlite")]
    pub fn with_sqlite(path: &str, queue: &str) -> Result<Self, StoreError> {
        let config = crate::database::DatabaseConfig::new(path);
        let store = crate::infrastructure_sqlite::SqliteTicketStore::open(&config, queue)?;
        Ok(Self::with_parts(Arc::new(store), Arc::new(InMemoryBus::new())))
    }

    pub fn with_parts(store: Arc<dyn TicketStore>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            store,
            bus,
            lock_config: TicketLockConfig::default(),
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
        }
    }

    pub fn with_lock_config(mut self, config: TicketLockConfig) -> Self {
        self.lock_config = config;
        self
    }

    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    pub fn lock(&self) -> TicketLock {
        TicketLock::with_config(Arc::clone(&self.store), self.lock_config.clone())
    }

    pub fn exchanger(&self) -> Exchanger {
        Exchanger::with_default_timeout(Arc::clone(&self.bus), self.exchange_timeout)
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    pub async fn emit(&self, event: &str, fields: Map<String, Value>) -> Result<Emitted, BusError> {
        emit::emit(&*self.bus, event, fields).await
    }

    pub async fn subscribe(&self, event: &str, subscriber: Subscriber) -> Result<Subscription, BusError> {
        self.bus.subscribe(event, subscriber).await
    }

    /// Pending tickets, head first.
    pub async fn tickets(&self) -> Result<Vec<Ticket>, StoreError> {
        self.store.list().await
    }

    /// Delete a ticket regardless of its owner. Returns false if it was not queued.
    pub async fn force_release(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self.store.delete(id).await?;
        if removed {
            tracing::warn!(ticket = %id, "Ticket force-released");
        }
        Ok(removed)
    }
}

impl Default for BatonClient {
    fn default() -> Self {
        Self::new()
    }
}
