//! Error types for the ticket lock, the bus, the exchanger and the helpers.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// The ticket store could not be reached or refused an operation.
///
/// Fatal for the call that hit it: the lock never retries store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend failure (I/O, SQL, lost connection).
    #[error("ticket store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be decoded.
    #[error("corrupted ticket row: {0}")]
    Corrupted(String),
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..) => StoreError::Corrupted(e.to_string()),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Result of a guarded call.
#[derive(Debug, Error)]
pub enum LockError<E> {
    /// The store failed while acquiring, polling or releasing.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The guarded operation itself failed. Its ticket was released first.
    #[error("guarded operation failed: {0}")]
    Operation(E),
}

impl<E> LockError<E> {
    /// Returns the operation's own error, if that is what failed.
    pub fn into_operation(self) -> Option<E> {
        match self {
            LockError::Operation(e) => Some(e),
            LockError::Store(_) => None,
        }
    }
}

/// Errors raised by a bus implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The transport behind the bus is gone.
    #[error("event bus closed")]
    Closed,

    /// The transport rejected a publish or subscribe.
    #[error("event bus transport error: {0}")]
    Transport(String),
}

/// Error returned by a subscriber callback. Logged, never propagated.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// How a correlated exchange can fail.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Neither the success nor the failure event arrived in time.
    #[error(
        "no success/failure message received for signal [{signal}] \
         (watching [{success}], [{}]; correlationId {correlation_id}) within {timeout:?}",
        .failure.as_deref().unwrap_or("-")
    )]
    Timeout {
        signal: String,
        success: String,
        failure: Option<String>,
        correlation_id: String,
        timeout: Duration,
    },

    /// The failure event fired; the remote payload is carried verbatim.
    #[error("failure reply received: {0}")]
    FailureReply(Value),

    /// Exchange payloads must be JSON objects so the correlation ID can be merged in.
    #[error("exchange payload for signal [{0}] must be a JSON object")]
    InvalidPayload(String),

    /// The bus failed while arming or publishing.
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Errors from the cache-aside wrapper.
#[derive(Debug, Error)]
pub enum CacheError<E = std::convert::Infallible> {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The wrapped loader failed on a cache miss.
    #[error("cache loader failed: {0}")]
    Loader(E),
}

impl CacheError {
    /// Re-types a loader-free cache error so it can flow out of `wrap`.
    pub fn widen<F>(self) -> CacheError<F> {
        match self {
            CacheError::Backend(msg) => CacheError::Backend(msg),
            CacheError::Serialization(e) => CacheError::Serialization(e),
            CacheError::Loader(never) => match never {},
        }
    }
}

/// Errors from the symmetric encryption helper.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("crypto secret must be at least 8 bytes")]
    ShortSecret,

    #[error("salt must be at least 8 bytes")]
    ShortSalt,

    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    /// Wrong key, wrong salt or tampered ciphertext.
    #[error("decryption failed")]
    Decrypt,

    #[error("encryption failed")]
    Encrypt,
}

/// Logging could not be installed.
#[derive(Debug, Error)]
#[error("failed to install tracing subscriber: {0}")]
pub struct LoggingError(pub String);
