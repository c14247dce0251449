use chrono::Utc;
use uuid::Uuid;

use crate::{AppError, AppResult};

/// Current wall clock time as epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Time-ordered identifier used for every row the service creates.
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Final element of a slice, `None` when empty.
pub fn last_of<T>(items: &[T]) -> Option<&T> {
    items.last()
}

/// Trims `value` and rejects it when nothing is left.
pub fn require_non_empty(field: &str, value: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::empty_field(field));
    }
    Ok(trimmed.to_string())
}
