use std::time::Duration;

use serde_json::Value;

// Header projection bounds.
pub const MAX_HEADER_BYTES: usize = 2048;
pub const MAX_HEADER_FACTS: usize = 10;
pub const MAX_HEADER_CONSTRAINTS: usize = 5;
pub const MAX_HEADER_QUESTIONS: usize = 5;
pub const MAX_HEADER_PLAN_STEPS: usize = 5;
pub const MAX_HEADER_ARTIFACTS: usize = 10;
pub const MAX_HEADER_ACTIONS: usize = 5;

// Artifact previews and prompt bundles.
pub const MAX_PREVIEW_BYTES: usize = 2048;
pub const MAX_PREVIEWS: usize = 10;

// Compaction.
pub const MAX_ACTIONS_KEEP: usize = 50;
pub const MAX_ARTIFACTS_KEEP: usize = 200;

// Cache.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

// Invocation policy.
pub const MAX_PAYLOAD_BYTES: usize = 16 * 1024;
pub const MAX_NOTE_LEN: usize = 280;
pub const MAX_HOPS: i64 = 50;
pub const DEFAULT_TENANT: &str = "local";

// Outbound fetch.
pub const HTTP_FETCH_BODY_CAP: usize = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum LimitError {
    #[error("hop limit exceeded: {hops}/{max}")]
    HopLimitExceeded { hops: i64, max: i64 },

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("payload exceeds max size of {max} bytes")]
    PayloadTooLarge { max: usize },

    #[error("note exceeds max length of {max} chars")]
    NoteTooLong { max: usize },

    #[error("invalid message type: {0}")]
    InvalidMessageType(String),
}

/// Reject invocations once a thread has used up its hop allowance.
pub fn check_hop_limit(hop_count: i64, max_hops: i64) -> Result<(), LimitError> {
    if hop_count >= max_hops {
        return Err(LimitError::HopLimitExceeded {
            hops: hop_count,
            max: max_hops,
        });
    }
    Ok(())
}

const ENVELOPE_REQUIRED: &[&str] = &["msg_id", "thread_id", "from", "type", "schema", "payload"];
const ENVELOPE_TYPES: &[&str] = &["request", "response", "event", "command", "error"];

/// Validate an agent-to-agent message envelope before it is recorded.
pub fn validate_envelope(env: &Value, max_payload_bytes: usize) -> Result<(), LimitError> {
    for field in ENVELOPE_REQUIRED {
        if env.get(field).is_none() {
            return Err(LimitError::MissingField(field));
        }
    }

    if let Some(payload) = env.get("payload").and_then(Value::as_str) {
        if payload.len() > max_payload_bytes {
            return Err(LimitError::PayloadTooLarge {
                max: max_payload_bytes,
            });
        }
    }

    if let Some(note) = env.get("note").and_then(Value::as_str) {
        if note.len() > MAX_NOTE_LEN {
            return Err(LimitError::NoteTooLong { max: MAX_NOTE_LEN });
        }
    }

    if let Some(msg_type) = env.get("type").and_then(Value::as_str) {
        if !ENVELOPE_TYPES.contains(&msg_type) {
            return Err(LimitError::InvalidMessageType(msg_type.to_string()));
        }
    }

    Ok(())
}
