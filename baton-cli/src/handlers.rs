use serde::{Deserialize, Serialize};

use baton_core::emit::Emitted;
use baton_core::types::Ticket;

// ─── Validation ─────────────────────────────────────────────────────────────

const MAX_EVENT_NAME_LEN: usize = 128;

/// Event names are dotted identifiers such as `user.create.failed`.
pub fn validate_event_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("event name is required".to_string());
    }
    if name.len() > MAX_EVENT_NAME_LEN {
        return Err(format!(
            "event name must be at most {} characters",
            MAX_EVENT_NAME_LEN
        ));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ':')))
    {
        return Err(format!("Invalid character '{}' in event name '{}'", bad, name));
    }
    Ok(())
}

// ─── Request Types ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct EmitQuery {
    /// Reuse a caller-supplied correlation id instead of generating one
    pub correlation_id: Option<String>,
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub queued_tickets: usize,
    pub version: String,
}

#[derive(Serialize)]
pub struct TicketInfo {
    pub id: String,
    pub enqueued_at: u64,
    pub position: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<String>,
}

impl TicketInfo {
    pub fn from_queue(tickets: Vec<Ticket>) -> Vec<Self> {
        tickets
            .into_iter()
            .enumerate()
            .map(|(position, t)| Self {
                id: t.id,
                enqueued_at: t.enqueued_at,
                position,
                queued_at: t.diagnostic,
            })
            .collect()
    }
}

#[derive(Serialize)]
pub struct ReleaseResponse {
    pub ticket_id: String,
    pub released: bool,
}

#[derive(Serialize)]
pub struct EmitResponse {
    pub event: String,
    pub correlation_id: String,
    pub receivers: usize,
}

impl EmitResponse {
    pub fn new(event: String, emitted: Emitted) -> Self {
        Self {
            event,
            correlation_id: emitted.correlation_id,
            receivers: emitted.receivers,
        }
    }
}
