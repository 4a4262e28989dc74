use serde::{Deserialize, Serialize};

use crate::models::TimerView;

/// Snapshots pushed over a user's channel. Each one is complete on its own;
/// clients replace their state rather than merge.
///
/// Wire form: `{"type":"all_timers","timers":[...]}` and
/// `{"type":"active_timers","timers":[...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    /// Every timer the user owns. Sent on connect and after each mutation.
    AllTimers { timers: Vec<TimerView> },

    /// Only running timers. Sent on every tick.
    ActiveTimers { timers: Vec<TimerView> },
}

impl PushEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AllTimers { .. } => "all_timers",
            Self::ActiveTimers { .. } => "active_timers",
        }
    }

    pub fn timers(&self) -> &[TimerView] {
        match self {
            Self::AllTimers { timers } | Self::ActiveTimers { timers } => timers,
        }
    }
}
