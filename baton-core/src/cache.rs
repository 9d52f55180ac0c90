//! Fixed-TTL cache-aside wrapper.
//!
//! Entries are written with a lifetime of `ttl + refresh_buffer`. For the
//! first `ttl` they are fresh. During the trailing `refresh_buffer` they are
//! stale: still served, but [`Cache::wrap`] refreshes them in the background.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::CacheError;

/// Separator between the parts of a composed cache key.
pub const KEY_SEPARATOR: &str = "__";

/// Key/value backend the cache writes through.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Remaining lifetime of `key`, `None` if it does not exist.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Live keys containing `pattern`.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    /// Delete `keys`; returns how many existed.
    async fn del(&self, keys: &[String]) -> Result<usize, CacheError>;
}

/// Process-local backend with per-key expiry on the tokio clock.
#[derive(Default)]
pub struct InMemoryCacheBackend {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, (String, Instant)>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        entries
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries().get(key).map(|(value, _)| value.clone()))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let now = Instant::now();
        Ok(self
            .entries()
            .get(key)
            .map(|(_, expires_at)| expires_at.saturating_duration_since(now)))
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.entries()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        Ok(self
            .entries()
            .keys()
            .filter(|k| k.contains(pattern))
            .cloned()
            .collect())
    }

    async fn del(&self, keys: &[String]) -> Result<usize, CacheError> {
        let mut entries = self.entries();
        Ok(keys.iter().filter(|k| entries.remove(*k).is_some()).count())
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long an entry counts as fresh
    pub ttl: Duration,
    /// Extra lifetime during which a stale entry is still served
    pub refresh_buffer: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            refresh_buffer: Duration::from_secs(60),
        }
    }
}

/// A cached value with its freshness.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    /// Time left before the entry turns stale; zero once stale.
    pub fresh_for: Duration,
}

impl<T> Cached<T> {
    pub fn is_stale(&self) -> bool {
        self.fresh_for.is_zero()
    }
}

/// Compose a cache key: strings verbatim, everything else as JSON.
pub fn create_key(parts: &[Value]) -> String {
    parts
        .iter()
        .map(|part| match part {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(KEY_SEPARATOR)
}

pub struct Cache<B: CacheBackend + ?Sized = dyn CacheBackend> {
    backend: Arc<B>,
    config: CacheConfig,
}

impl<B: CacheBackend + ?Sized> Clone for Cache<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
        }
    }
}

impl<B: CacheBackend + ?Sized> Cache<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_config(backend, CacheConfig::default())
    }

    pub fn with_config(backend: Arc<B>, config: CacheConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Cached<T>>, CacheError> {
        let Some(raw) = self.backend.get(key).await? else {
            return Ok(None);
        };
        let value = serde_json::from_str(&raw)?;
        let remaining = self.backend.ttl(key).await?.unwrap_or_default();

        Ok(Some(Cached {
            value,
            fresh_for: remaining.saturating_sub(self.config.refresh_buffer),
        }))
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let raw = serde_json::to_string(value)?;
        self.put_raw(key, raw).await
    }

    async fn put_raw(&self, key: &str, raw: String) -> Result<(), CacheError> {
        self.backend
            .set_ex(key, raw, self.config.ttl + self.config.refresh_buffer)
            .await
    }

    /// Delete keys containing `pattern` whose `__`-separated parts cover
    /// every term in `search`. Returns how many keys were removed.
    pub async fn flush(&self, pattern: &str, search: &[&str]) -> Result<usize, CacheError> {
        let keys: Vec<String> = self
            .backend
            .keys(pattern)
            .await?
            .into_iter()
            .filter(|key| {
                let parts: Vec<&str> = key.split(KEY_SEPARATOR).collect();
                search.iter().all(|s| parts.iter().any(|p| p.contains(s)))
            })
            .collect();

        if keys.is_empty() {
            return Ok(0);
        }
        debug!(pattern, flushed = keys.len(), "Flushing cache keys");
        self.backend.del(&keys).await
    }

    /// Cache-aside read of `load()` keyed by `parts`.
    ///
    /// Misses call `load` and store its result. Stale hits return the cached
    /// value at once and refresh it on a background task. Fresh hits never
    /// call `load`.
    pub async fn wrap<T, E, F, Fut>(&self, parts: &[Value], load: F) -> Result<T, CacheError<E>>
    where
        B: 'static,
        T: Serialize + DeserializeOwned + Send + 'static,
        E: Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let key = create_key(parts);

        match self.get::<T>(&key).await.map_err(CacheError::widen)? {
            None => {
                let value = load().await.map_err(CacheError::Loader)?;
                let raw = serde_json::to_string(&value)?;
                if let Err(e) = self.put_raw(&key, raw).await {
                    warn!(key = %key, error = %e, "Failed to store loaded value");
                }
                Ok(value)
            }
            Some(cached) if cached.is_stale() => {
                let cache = self.clone();
                tokio::spawn(async move {
                    let raw = match load().await {
                        Ok(value) => serde_json::to_string(&value),
                        Err(e) => {
                            warn!(key = %key, error = %e, "Background refresh failed");
                            return;
                        }
                    };
                    let stored = match raw {
                        Ok(raw) => cache.put_raw(&key, raw).await,
                        Err(e) => Err(e.into()),
                    };
                    if let Err(e) = stored {
                        warn!(key = %key, error = %e, "Failed to refresh stale entry");
                    }
                });
                Ok(cached.value)
            }
            Some(cached) => Ok(cached.value),
        }
    }
}
