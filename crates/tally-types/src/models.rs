use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored time entry. `end` is `None` while the timer is running and is
/// set exactly once, by a stop, to a value no earlier than `start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    pub id: Uuid,
    pub user_id: Uuid,
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl Timer {
    /// A fresh running timer owned by `user_id`.
    pub fn started(user_id: Uuid, description: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            description: description.into(),
            start: at,
            end: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.end.is_none()
    }
}

/// Client-facing view of a timer with elapsed fields derived at projection
/// time. Exactly one of `progress` / `duration` is set, selected by
/// `is_active`. Both are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub description: String,
    pub start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}
