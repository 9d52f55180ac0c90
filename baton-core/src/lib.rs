//! # baton-core
//!
//! Coordination primitives for services that share a store and an event bus.
//! Provides a cross-process ticket lock over an ordered queue, a correlated
//! request/response exchange over publish/subscribe, and the small helpers
//! around them (emit, cache-aside, crypto, logging).

pub mod bus;
pub mod cache;
pub mod client;
pub mod crypto;
#[cfg(feature = "sqlite")]
pub mod database;
pub mod emit;
pub mod error;
pub mod exchange;
pub mod ids;
pub mod infrastructure;
#[path = "infrastructure_in_memory.rs"]
pub mod infrastructure_in_memory;
#[cfg(feature = "sqlite")]
#[path = "infrastructure_sqlite.rs"]
pub mod infrastructure_sqlite;
pub mod lock;
pub mod logging;
pub mod types;

#[cfg(test)]
mod exchange_test;
#[cfg(test)]
mod cache_test;
