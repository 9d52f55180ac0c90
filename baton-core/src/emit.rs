//! Publishing helper used by application code and by the exchanger.
//!
//! `emit` stamps every payload with a correlation ID (keeping one the caller
//! already set) and turns an `error` field into the application error shape
//! subscribers expect.

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::error::BusError;
use crate::ids;
use crate::types::{CORRELATION_ID_FIELD, ERROR_FIELD};

/// Outcome of one emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emitted {
    /// Correlation ID the payload went out with.
    pub correlation_id: String,
    /// Subscribers registered for the event at publish time.
    pub receivers: usize,
}

pub async fn emit<B: EventBus + ?Sized>(
    bus: &B,
    event: &str,
    mut fields: Map<String, Value>,
) -> Result<Emitted, BusError> {
    if let Some(error) = fields.get_mut(ERROR_FIELD) {
        if is_truthy(error) {
            *error = normalize_error(error);
        }
    }

    let correlation_id = match fields.get(CORRELATION_ID_FIELD).and_then(Value::as_str) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
            let id = ids::correlation_id();
            fields.insert(CORRELATION_ID_FIELD.to_string(), Value::String(id.clone()));
            id
        }
    };

    debug!(event, correlation_id = %correlation_id, "Emitting event");
    let receivers = bus.publish(event, Value::Object(fields)).await?;

    Ok(Emitted {
        correlation_id,
        receivers,
    })
}

fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

/// Convert an arbitrary error value into `{code, status, ...}`.
///
/// - validator output (`details: [{path, message}]`) becomes a 400
///   `ValidationError` with one entry per dotted path;
/// - a value already carrying `code` and `status` is kept as is;
/// - anything else becomes a 500 `UnknownError`.
pub fn normalize_error(error: &Value) -> Value {
    if let Some(details) = validation_details(error) {
        let mut errors = Map::new();
        for detail in details {
            let path = detail
                .get("path")
                .and_then(Value::as_array)
                .map(|segments| {
                    segments
                        .iter()
                        .map(|s| match s {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect::<Vec<_>>()
                        .join(".")
                })
                .unwrap_or_default();
            let message = detail.get("message").cloned().unwrap_or(Value::Null);
            errors.insert(path, message);
        }
        return json!({
            "code": "ValidationError",
            "status": 400,
            "errors": errors,
        });
    }

    if error.get("code").is_some() && error.get("status").is_some() {
        return error.clone();
    }

    warn!(error = %error, "Emitting unrecognised error shape as UnknownError");
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());

    json!({
        "code": "UnknownError",
        "status": 500,
        "message": message,
    })
}

fn validation_details(error: &Value) -> Option<&Vec<Value>> {
    let details = error.get("details")?.as_array()?;
    details.first()?.get("message")?;
    Some(details)
}
