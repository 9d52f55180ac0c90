//! # Event Bus
//!
//! Fire-and-forget publish of named events with JSON payloads, and
//! named subscribers with optional filters.
//!
//! Subscribers live in a [`SubscriberRegistry`]: an owned map from event
//! name to the ordered set of listeners for that event. Registering a
//! subscriber hands back a [`Subscription`]; dropping it (or calling
//! [`Subscription::unsubscribe`]) removes the listener.
//!
//! Delivery rules:
//! - callbacks for one event fire in subscription order, message by message;
//! - callbacks run after the registry lock is released, so a callback may
//!   subscribe or unsubscribe freely;
//! - a failing or panicking callback is logged and stays subscribed.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tracing::{debug, error};

use crate::error::{BusError, CallbackError};
use crate::types::Payload;

/// Predicate deciding whether a subscriber sees a payload.
pub type Filter = Arc<dyn Fn(&Payload) -> bool + Send + Sync>;

/// Handler invoked with every payload that passes the filter.
pub type Callback = Arc<dyn Fn(Payload) -> Result<(), CallbackError> + Send + Sync>;

/// Trait for publishing to and subscribing on the bus.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish `payload` under `event`.
    ///
    /// Returns the number of subscribers registered for the event.
    async fn publish(&self, event: &str, payload: Payload) -> Result<usize, BusError>;

    /// Register `subscriber` for `event`.
    ///
    /// Completes only once the listener is armed: a publish issued after
    /// this returns is guaranteed to reach it.
    async fn subscribe(&self, event: &str, subscriber: Subscriber) -> Result<Subscription, BusError>;
}

/// A named listener: optional filter plus callback.
#[derive(Clone)]
pub struct Subscriber {
    name: String,
    filter: Option<Filter>,
    callback: Callback,
}

impl Subscriber {
    pub fn new<C>(name: impl Into<String>, callback: C) -> Self
    where
        C: Fn(Payload) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            filter: None,
            callback: Arc::new(callback),
        }
    }

    /// Only deliver payloads for which `filter` returns true.
    pub fn with_filter<P>(mut self, filter: P) -> Self
    where
        P: Fn(&Payload) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, payload: &Payload) -> bool {
        self.filter.as_ref().is_none_or(|f| f(payload))
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("name", &self.name)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

#[derive(Default)]
struct Listeners {
    // event -> subscription id -> subscriber; ids grow, so BTreeMap order is subscription order
    by_event: HashMap<String, BTreeMap<u64, Arc<Subscriber>>>,
    next_id: u64,
}

/// Owned fan-out table shared by a bus and its subscription handles.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<RwLock<Listeners>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Listeners> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Listeners> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `subscriber` for `event` and return its handle.
    pub fn add(&self, event: &str, subscriber: Subscriber) -> Subscription {
        let name = subscriber.name.clone();
        let id = {
            let mut listeners = self.write();
            listeners.next_id += 1;
            let id = listeners.next_id;
            listeners
                .by_event
                .entry(event.to_string())
                .or_default()
                .insert(id, Arc::new(subscriber));
            id
        };

        debug!(event, subscriber = %name, "Subscriber registered");

        Subscription {
            event: event.to_string(),
            name,
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `payload` to every subscriber of `event`, in subscription order.
    ///
    /// Returns how many subscribers accepted the payload.
    pub fn dispatch(&self, event: &str, payload: &Payload) -> usize {
        let snapshot: Vec<Arc<Subscriber>> = match self.read().by_event.get(event) {
            Some(subs) => subs.values().cloned().collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for subscriber in snapshot {
            if !subscriber.accepts(payload) {
                continue;
            }
            delivered += 1;
            debug!(event, subscriber = %subscriber.name, "Triggering subscriber");

            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(payload.clone())));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(event, subscriber = %subscriber.name, error = %e, "Subscriber callback failed");
                }
                Err(panic) => {
                    error!(
                        event,
                        subscriber = %subscriber.name,
                        panic = panic_message(&*panic),
                        "Subscriber callback panicked"
                    );
                }
            }
        }
        delivered
    }

    /// Number of live subscriptions for `event`.
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.read().by_event.get(event).map_or(0, BTreeMap::len)
    }

    /// Events that currently have at least one subscriber.
    pub fn events(&self) -> Vec<String> {
        let mut events: Vec<String> = self.read().by_event.keys().cloned().collect();
        events.sort();
        events
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Ownership handle of one registered subscriber.
///
/// When dropped, the subscriber is removed from its registry.
#[must_use = "dropping a Subscription unsubscribes it immediately"]
pub struct Subscription {
    event: String,
    name: String,
    id: u64,
    registry: Weak<RwLock<Listeners>>,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the subscriber now. Same as dropping the handle.
    pub fn unsubscribe(self) {}
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .field("name", &self.name)
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Registry already gone: nothing left to clean up.
        let Some(inner) = self.registry.upgrade() else {
            return;
        };
        let mut listeners = inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(subs) = listeners.by_event.get_mut(&self.event) {
            subs.remove(&self.id);
            if subs.is_empty() {
                listeners.by_event.remove(&self.event);
            }
        }
        debug!(event = %self.event, subscriber = %self.name, "Subscription dropped");
    }
}

/// Process-local bus: publishing dispatches straight into the registry.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    registry: SubscriberRegistry,
    published: Arc<AtomicU64>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    pub fn subscriber_count(&self, event: &str) -> usize {
        self.registry.subscriber_count(event)
    }

    /// Total publishes issued on this bus.
    pub fn events_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, event: &str, payload: Payload) -> Result<usize, BusError> {
        self.published.fetch_add(1, Ordering::Relaxed);
        let receivers = self.registry.subscriber_count(event);
        let delivered = self.registry.dispatch(event, &payload);
        debug!(event, receivers, delivered, "Event published");
        Ok(receivers)
    }

    async fn subscribe(&self, event: &str, subscriber: Subscriber) -> Result<Subscription, BusError> {
        Ok(self.registry.add(event, subscriber))
    }
}
