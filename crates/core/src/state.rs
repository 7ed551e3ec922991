//! Usage metadata shared by every ticket kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamps and use-count evaluated by expiration policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketState {
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    /// `last_used_at` as it was before the most recent use.
    pub previous_used_at: Option<DateTime<Utc>>,
    pub count_of_uses: u32,
}

impl TicketState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            last_used_at: now,
            previous_used_at: None,
            count_of_uses: 0,
        }
    }

    /// Record one validated use at `now`.
    pub fn record_use(&mut self, now: DateTime<Utc>) {
        self.previous_used_at = Some(self.last_used_at);
        self.last_used_at = now;
        self.count_of_uses = self.count_of_uses.saturating_add(1);
    }
}
