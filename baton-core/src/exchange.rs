//! One-shot request/response over the event bus.
//!
//! An exchange emits `signal` with a fresh correlation ID and waits for
//! the first of three terminal transitions:
//!
//! ```text
//!            ┌── success event (matching id) ──▶ Ok(payload)
//!  emit ─────┼── failure event (matching id) ──▶ Err(FailureReply(payload))
//!            └── deadline ─────────────────────▶ Err(Timeout { .. })
//! ```
//!
//! Both listeners are registered before the signal is published, and both
//! are owned by the exchange future: they are released on every exit path,
//! including when the caller drops the future early.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::bus::{EventBus, Subscriber, Subscription};
use crate::emit::emit;
use crate::error::{BusError, ExchangeError};
use crate::ids;
use crate::types::{correlation_id_of, Payload, CORRELATION_ID_FIELD};

/// Deadline applied when an exchange does not set its own.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Parameters of one exchange.
#[derive(Debug, Clone)]
pub struct ExchangeOptions {
    /// Event emitted to start the exchange
    pub signal: String,
    /// Signal payload; must be a JSON object
    pub payload: Payload,
    /// Event that resolves the exchange
    pub success: String,
    /// Event that rejects the exchange
    pub failure: Option<String>,
    /// Overrides the exchanger's default deadline
    pub timeout: Option<Duration>,
}

impl ExchangeOptions {
    pub fn new(signal: impl Into<String>, payload: Payload, success: impl Into<String>) -> Self {
        Self {
            signal: signal.into(),
            payload,
            success: success.into(),
            failure: None,
            timeout: None,
        }
    }

    pub fn failure(mut self, event: impl Into<String>) -> Self {
        self.failure = Some(event.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

enum Reply {
    Success(Payload),
    Failure(Payload),
}

/// The listeners of one in-flight exchange. Dropping this is the teardown.
struct Armed {
    _success: Subscription,
    _failure: Option<Subscription>,
}

/// Issues correlated exchanges over a bus.
pub struct Exchanger<B: EventBus + ?Sized = dyn EventBus> {
    bus: Arc<B>,
    default_timeout: Duration,
}

impl<B: EventBus + ?Sized> Clone for Exchanger<B> {
    fn clone(&self) -> Self {
        Self {
            bus: Arc::clone(&self.bus),
            default_timeout: self.default_timeout,
        }
    }
}

impl<B: EventBus + ?Sized> Exchanger<B> {
    pub fn new(bus: Arc<B>) -> Self {
        Self::with_default_timeout(bus, DEFAULT_EXCHANGE_TIMEOUT)
    }

    pub fn with_default_timeout(bus: Arc<B>, default_timeout: Duration) -> Self {
        Self {
            bus,
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Positional form of [`Exchanger::exchange`] using the default deadline.
    pub async fn request(
        &self,
        signal: &str,
        payload: Payload,
        success: &str,
        failure: Option<&str>,
    ) -> Result<Payload, ExchangeError> {
        let mut options = ExchangeOptions::new(signal, payload, success);
        options.failure = failure.map(str::to_string);
        self.exchange(options).await
    }

    /// Emit the signal and wait for its correlated reply.
    pub async fn exchange(&self, options: ExchangeOptions) -> Result<Payload, ExchangeError> {
        let ExchangeOptions {
            signal,
            payload,
            success,
            failure,
            timeout,
        } = options;

        let Value::Object(mut fields) = payload else {
            return Err(ExchangeError::InvalidPayload(signal));
        };
        let timeout = timeout.unwrap_or(self.default_timeout);
        let correlation_id = ids::correlation_id();
        let deadline = Instant::now() + timeout;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let armed = Armed {
            _success: self
                .watch(&success, &signal, &correlation_id, tx.clone(), Reply::Success)
                .await?,
            _failure: match &failure {
                Some(event) => Some(
                    self.watch(event, &signal, &correlation_id, tx.clone(), Reply::Failure)
                        .await?,
                ),
                None => None,
            },
        };
        drop(tx);

        fields.insert(
            CORRELATION_ID_FIELD.to_string(),
            Value::String(correlation_id.clone()),
        );
        emit(&*self.bus, &signal, fields).await?;

        let reply = tokio::select! {
            biased;
            reply = rx.recv() => Some(reply.ok_or(BusError::Closed)?),
            _ = time::sleep_until(deadline) => None,
        };
        drop(armed);

        match reply {
            Some(Reply::Success(payload)) => {
                debug!(signal = %signal, correlation_id = %correlation_id, "Exchange resolved");
                Ok(payload)
            }
            Some(Reply::Failure(payload)) => {
                debug!(signal = %signal, correlation_id = %correlation_id, "Exchange rejected");
                Err(ExchangeError::FailureReply(payload))
            }
            None => Err(ExchangeError::Timeout {
                signal,
                success,
                failure,
                correlation_id,
                timeout,
            }),
        }
    }

    async fn watch(
        &self,
        event: &str,
        signal: &str,
        correlation_id: &str,
        tx: mpsc::UnboundedSender<Reply>,
        wrap: fn(Payload) -> Reply,
    ) -> Result<Subscription, BusError> {
        let expected = correlation_id.to_string();
        let subscriber = Subscriber::new(signal, move |payload| {
            // Receiver gone means the exchange already terminated.
            let _ = tx.send(wrap(payload));
            Ok(())
        })
        .with_filter(move |payload| correlation_id_of(payload) == Some(expected.as_str()));

        self.bus.subscribe(event, subscriber).await
    }
}
