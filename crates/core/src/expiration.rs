//! Expiration policies.
//!
//! Each variant is a pure function of a ticket's [`TicketState`], its remember-me flag
//! and the evaluation instant. Policies never mutate tickets.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::state::TicketState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ExpirationPolicy {
    NeverExpires,
    AlwaysExpires,
    /// Fixed lifetime from creation.
    HardTimeout { time_to_kill_secs: i64 },
    /// Idle timeout since the last use.
    Timeout { max_idle_secs: i64 },
    /// Session policy: absolute lifetime plus idle timeout.
    TicketGranting {
        max_time_to_live_secs: i64,
        time_to_kill_secs: i64,
    },
    /// Bounded number of uses within a lifetime.
    MultiUseOrTimeout {
        number_of_uses: u32,
        time_to_kill_secs: i64,
    },
    /// Lifetime plus a minimum interval between two consecutive uses.
    ThrottledUseAndTimeout {
        time_to_kill_secs: i64,
        time_in_between_uses_secs: i64,
    },
    /// Picks `remember_me` for long-term sessions and `session` otherwise.
    RememberMeDelegating {
        session: Box<ExpirationPolicy>,
        remember_me: Box<ExpirationPolicy>,
    },
}

impl ExpirationPolicy {
    pub fn hard_timeout(time_to_kill_secs: i64) -> Self {
        Self::HardTimeout { time_to_kill_secs }
    }

    pub fn timeout(max_idle_secs: i64) -> Self {
        Self::Timeout { max_idle_secs }
    }

    pub fn ticket_granting(max_time_to_live_secs: i64, time_to_kill_secs: i64) -> Self {
        Self::TicketGranting {
            max_time_to_live_secs,
            time_to_kill_secs,
        }
    }

    pub fn multi_use_or_timeout(number_of_uses: u32, time_to_kill_secs: i64) -> Self {
        Self::MultiUseOrTimeout {
            number_of_uses,
            time_to_kill_secs,
        }
    }

    pub fn throttled(time_to_kill_secs: i64, time_in_between_uses_secs: i64) -> Self {
        Self::ThrottledUseAndTimeout {
            time_to_kill_secs,
            time_in_between_uses_secs,
        }
    }

    pub fn remember_me_delegating(session: ExpirationPolicy, remember_me: ExpirationPolicy) -> Self {
        Self::RememberMeDelegating {
            session: Box::new(session),
            remember_me: Box::new(remember_me),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NeverExpires => "never_expires",
            Self::AlwaysExpires => "always_expires",
            Self::HardTimeout { .. } => "hard_timeout",
            Self::Timeout { .. } => "timeout",
            Self::TicketGranting { .. } => "ticket_granting",
            Self::MultiUseOrTimeout { .. } => "multi_use_or_timeout",
            Self::ThrottledUseAndTimeout { .. } => "throttled_use_and_timeout",
            Self::RememberMeDelegating { .. } => "remember_me_delegating",
        }
    }

    pub fn is_expired(&self, state: &TicketState, remember_me: bool, now: DateTime<Utc>) -> bool {
        match self {
            Self::NeverExpires => false,
            Self::AlwaysExpires => true,
            Self::HardTimeout { time_to_kill_secs } => {
                elapsed_beyond(state.created_at, now, *time_to_kill_secs)
            }
            Self::Timeout { max_idle_secs } => elapsed_beyond(state.last_used_at, now, *max_idle_secs),
            Self::TicketGranting {
                max_time_to_live_secs,
                time_to_kill_secs,
            } => {
                elapsed_beyond(state.created_at, now, *max_time_to_live_secs)
                    || elapsed_beyond(state.last_used_at, now, *time_to_kill_secs)
            }
            Self::MultiUseOrTimeout {
                number_of_uses,
                time_to_kill_secs,
            } => {
                state.count_of_uses >= *number_of_uses
                    || elapsed_beyond(state.created_at, now, *time_to_kill_secs)
            }
            Self::ThrottledUseAndTimeout {
                time_to_kill_secs,
                time_in_between_uses_secs,
            } => {
                if elapsed_beyond(state.created_at, now, *time_to_kill_secs) {
                    return true;
                }
                // Two uses closer together than the allowed interval look like a replay.
                // The first use is measured against nothing: creation is not a use.
                state.count_of_uses > 1
                    && state.previous_used_at.is_some_and(|previous| {
                        state.last_used_at - previous < seconds(*time_in_between_uses_secs)
                    })
            }
            Self::RememberMeDelegating {
                session,
                remember_me: long_term,
            } => {
                if remember_me {
                    long_term.is_expired(state, remember_me, now)
                } else {
                    session.is_expired(state, remember_me, now)
                }
            }
        }
    }

    /// Upper bound on a ticket's remaining life in seconds, for backends with native key expiry.
    ///
    /// `None` means unbounded.
    pub fn time_to_live(&self, remember_me: bool) -> Option<i64> {
        match self {
            Self::NeverExpires | Self::Timeout { .. } => None,
            Self::AlwaysExpires => Some(0),
            Self::HardTimeout { time_to_kill_secs }
            | Self::MultiUseOrTimeout {
                time_to_kill_secs, ..
            }
            | Self::ThrottledUseAndTimeout {
                time_to_kill_secs, ..
            } => Some(*time_to_kill_secs),
            Self::TicketGranting {
                max_time_to_live_secs,
                ..
            } => Some(*max_time_to_live_secs),
            Self::RememberMeDelegating {
                session,
                remember_me: long_term,
            } => {
                if remember_me {
                    long_term.time_to_live(remember_me)
                } else {
                    session.time_to_live(remember_me)
                }
            }
        }
    }
}

fn elapsed_beyond(since: DateTime<Utc>, now: DateTime<Utc>, secs: i64) -> bool {
    now - since > seconds(secs)
}

/// `secs` as a duration, saturating at the representable range.
fn seconds(secs: i64) -> Duration {
    Duration::try_seconds(secs).unwrap_or(if secs < 0 { Duration::MIN } else { Duration::MAX })
}
