//! Structural input checks, run before any store access.

use crate::error::{EngineError, Result};
use crate::ids::is_public_id;

/// Maximum root payload size in bytes.
pub const MAX_ROOT_PAYLOAD_BYTES: usize = 64 * 1024;
/// Maximum child payload size in bytes.
pub const MAX_CHILD_PAYLOAD_BYTES: usize = 16 * 1024;
/// Maximum admin token length accepted for hashing.
pub const MAX_TOKEN_BYTES: usize = 256;
/// Maximum participant key length in characters.
pub const MAX_PARTICIPANT_CHARS: usize = 64;
/// Bounds for `extend` and for explicit expiry on `create`.
pub const MIN_EXTEND_DAYS: i64 = 1;
pub const MAX_EXTEND_DAYS: i64 = 365;

pub fn id(value: &str, length: usize) -> Result<()> {
    if is_public_id(value, length) {
        Ok(())
    } else {
        Err(EngineError::InvalidArgument(format!(
            "id must be {} characters from the public alphabet",
            length
        )))
    }
}

pub fn payload(value: &str, max_bytes: usize) -> Result<()> {
    if value.is_empty() {
        return Err(EngineError::InvalidArgument(
            "payload must not be empty".to_string(),
        ));
    }
    if value.len() > max_bytes {
        return Err(EngineError::InvalidArgument(format!(
            "payload exceeds {} bytes",
            max_bytes
        )));
    }
    Ok(())
}

pub fn token(value: &str) -> Result<()> {
    if value.is_empty() || value.len() > MAX_TOKEN_BYTES {
        return Err(EngineError::InvalidArgument(
            "admin token must be 1-256 bytes".to_string(),
        ));
    }
    Ok(())
}

pub fn extend_days(days: i64) -> Result<()> {
    if (MIN_EXTEND_DAYS..=MAX_EXTEND_DAYS).contains(&days) {
        Ok(())
    } else {
        Err(EngineError::InvalidArgument(format!(
            "days must be between {} and {}",
            MIN_EXTEND_DAYS, MAX_EXTEND_DAYS
        )))
    }
}

/// Normalize a participant key: trimmed, non-empty, bounded, no control characters.
pub fn participant(value: &str) -> Result<String> {
    let trimmed = value.trim();
    let chars = trimmed.chars().count();
    if chars == 0 || chars > MAX_PARTICIPANT_CHARS {
        return Err(EngineError::InvalidArgument(format!(
            "participant must be 1-{} characters",
            MAX_PARTICIPANT_CHARS
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(EngineError::InvalidArgument(
            "participant must not contain control characters".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}
