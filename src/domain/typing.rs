use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How long a typing indicator stays visible without a refresh or an
/// explicit stop.
pub const TYPING_TIMEOUT_MS: i64 = 3_000;

/// A user currently composing in a conversation. Created on a local or
/// remote `TYPING_START`, removed on `TYPING_STOP`, on that user's message
/// arriving, or after [`TYPING_TIMEOUT_MS`] of inactivity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicator {
    pub conversation_id: String,
    pub user_id: String,
    pub user_name: String,
    pub timestamp: DateTime<Utc>,
}

impl TypingIndicator {
    /// Whether this indicator is still within its inactivity window at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.timestamp) < Duration::milliseconds(TYPING_TIMEOUT_MS)
    }
}
