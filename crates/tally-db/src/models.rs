//! Database row types. These map directly to SQLite rows and are kept
//! independent of tally-types; ids are stored as UUID text and instants as
//! Unix epoch milliseconds.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

pub struct TimerRow {
    pub id: String,
    pub user_id: String,
    pub description: String,
    pub start_ms: i64,
    pub end_ms: Option<i64>,
}
