//! The two persistence seams the core depends on, and their SQLite
//! implementations.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use tally_db::Database;
use tally_db::models::TimerRow;
use tally_types::models::Timer;

/// Timer repository. Implementations must make `stop_timer` a single
/// conditional write (owner + still running), not a read followed by a write.
pub trait TimerStore: Send + Sync {
    fn insert_timer(&self, timer: &Timer) -> Result<()>;

    /// True if the timer existed, belonged to `user_id` and was running.
    fn stop_timer(&self, user_id: Uuid, timer_id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    fn timers_for_user(&self, user_id: Uuid) -> Result<Vec<Timer>>;

    fn active_timers_for_user(&self, user_id: Uuid) -> Result<Vec<Timer>>;
}

/// Maps a session token to the user it was issued to.
pub trait SessionResolver: Send + Sync {
    fn resolve(&self, token: &str, now: DateTime<Utc>) -> Result<Option<Uuid>>;
}

impl TimerStore for Database {
    fn insert_timer(&self, timer: &Timer) -> Result<()> {
        Database::insert_timer(self, &to_row(timer))
    }

    fn stop_timer(&self, user_id: Uuid, timer_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        Database::stop_timer(
            self,
            &timer_id.to_string(),
            &user_id.to_string(),
            at.timestamp_millis(),
        )
    }

    fn timers_for_user(&self, user_id: Uuid) -> Result<Vec<Timer>> {
        self.get_timers_for_user(&user_id.to_string())?
            .into_iter()
            .map(from_row)
            .collect()
    }

    fn active_timers_for_user(&self, user_id: Uuid) -> Result<Vec<Timer>> {
        self.get_active_timers_for_user(&user_id.to_string())?
            .into_iter()
            .map(from_row)
            .collect()
    }
}

impl SessionResolver for Database {
    fn resolve(&self, token: &str, now: DateTime<Utc>) -> Result<Option<Uuid>> {
        self.resolve_session(token, now.timestamp_millis())?
            .map(|id| id.parse::<Uuid>().with_context(|| format!("corrupt user id on session: {id}")))
            .transpose()
    }
}

fn to_row(timer: &Timer) -> TimerRow {
    TimerRow {
        id: timer.id.to_string(),
        user_id: timer.user_id.to_string(),
        description: timer.description.clone(),
        start_ms: timer.start.timestamp_millis(),
        end_ms: timer.end.map(|end| end.timestamp_millis()),
    }
}

fn from_row(row: TimerRow) -> Result<Timer> {
    Ok(Timer {
        id: row.id.parse::<Uuid>().with_context(|| format!("corrupt timer id '{}'", row.id))?,
        user_id: row
            .user_id
            .parse::<Uuid>()
            .with_context(|| format!("corrupt user_id on timer '{}'", row.id))?,
        start: from_millis(row.start_ms)?,
        end: row.end_ms.map(from_millis).transpose()?,
        description: row.description,
    })
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {ms}"))
}
