//! Timer projection: stored [`Timer`] records to client-facing [`TimerView`]s.
//!
//! Both functions are pure. The current time is always a parameter so a
//! projection is reproducible in tests and never reads a global clock.

use chrono::{DateTime, Utc};

use tally_types::models::{Timer, TimerView};

/// Projects a stored timer as seen at `now`.
///
/// Running timers get `progress = now - start`; finished ones get
/// `duration = end - start`. A `now` before `start` (clock skew between
/// writers) yields a progress of zero rather than a negative value.
pub fn project(timer: &Timer, now: DateTime<Utc>) -> TimerView {
    let (is_active, progress, duration) = match timer.end {
        None => (true, Some(elapsed_ms(timer.start, now)), None),
        Some(end) => (false, None, Some(elapsed_ms(timer.start, end))),
    };

    TimerView {
        id: timer.id,
        user_id: timer.user_id,
        description: timer.description.clone(),
        start: timer.start,
        end: timer.end,
        is_active,
        progress,
        duration,
    }
}

/// Turns an active view into the finished view it becomes when stopped at
/// `at`, without re-reading the store. Finished views are returned as-is.
///
/// Applies the same rule as the store's conditional stop (an end never
/// earlier than `start`). The command path re-reads and pushes a full
/// snapshot instead, so nothing in this workspace calls it outside tests;
/// it is kept for callers that hold a view and want the stopped form.
pub fn stop(view: TimerView, at: DateTime<Utc>) -> TimerView {
    if !view.is_active {
        return view;
    }

    let end = at.max(view.start);
    TimerView {
        end: Some(end),
        is_active: false,
        progress: None,
        duration: Some(elapsed_ms(view.start, end)),
        ..view
    }
}

fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_milliseconds().max(0)
}
