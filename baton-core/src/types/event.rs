use serde_json::Value;

/// Field carrying the correlation ID inside every exchanged payload.
pub const CORRELATION_ID_FIELD: &str = "correlationId";

/// Field carrying an application error inside an emitted payload.
pub const ERROR_FIELD: &str = "error";

/// Bus payloads are plain JSON values.
pub type Payload = Value;

/// Reads the correlation ID of a payload, if it carries one.
pub fn correlation_id_of(payload: &Payload) -> Option<&str> {
    payload.get(CORRELATION_ID_FIELD).and_then(Value::as_str)
}
