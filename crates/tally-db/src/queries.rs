use crate::Database;
use crate::models::{TimerRow, UserRow};
use crate::tokens;
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row};

const TIMER_COLUMNS: &str = "id, user_id, description, start_ms, end_ms";

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id, username, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Sessions --

    /// Creates a session for `user_id` and returns its plaintext token.
    pub fn issue_session(&self, user_id: &str, expires_ms: i64) -> Result<String> {
        let token = tokens::generate();
        let token_hash = tokens::digest(&token);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (token_hash, user_id, expires_ms) VALUES (?1, ?2, ?3)",
                rusqlite::params![token_hash, user_id, expires_ms],
            )?;
            Ok(())
        })?;
        Ok(token)
    }

    /// Owner of an unexpired session, if any.
    pub fn resolve_session(&self, token: &str, now_ms: i64) -> Result<Option<String>> {
        let token_hash = tokens::digest(token);
        self.with_conn(|conn| {
            let user_id = conn
                .query_row(
                    "SELECT user_id FROM sessions WHERE token_hash = ?1 AND expires_ms > ?2",
                    rusqlite::params![token_hash, now_ms],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(user_id)
        })
    }

    /// Returns false if there was no such session.
    pub fn revoke_session(&self, token: &str) -> Result<bool> {
        let token_hash = tokens::digest(token);
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM sessions WHERE token_hash = ?1", [token_hash])?;
            Ok(n > 0)
        })
    }

    pub fn purge_expired_sessions(&self, now_ms: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM sessions WHERE expires_ms <= ?1", [now_ms])?;
            Ok(n)
        })
    }

    // -- Timers --

    pub fn insert_timer(&self, timer: &TimerRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO timers (id, user_id, description, start_ms, end_ms) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    timer.id,
                    timer.user_id,
                    timer.description,
                    timer.start_ms,
                    timer.end_ms
                ],
            )?;
            Ok(())
        })
    }

    /// Sets `end_ms` on a timer only if `user_id` owns it and it is still
    /// running. The check and the write are a single statement, so two
    /// concurrent stops cannot both succeed. An `end_ms` earlier than the
    /// start is clamped to the start.
    pub fn stop_timer(&self, id: &str, user_id: &str, end_ms: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE timers SET end_ms = MAX(?1, start_ms)
                 WHERE id = ?2 AND user_id = ?3 AND end_ms IS NULL",
                rusqlite::params![end_ms, id, user_id],
            )?;
            Ok(n == 1)
        })
    }

    /// All timers owned by `user_id`, newest first.
    pub fn get_timers_for_user(&self, user_id: &str) -> Result<Vec<TimerRow>> {
        self.with_conn(|conn| query_timers(conn, user_id, false))
    }

    /// Running timers owned by `user_id`, newest first.
    pub fn get_active_timers_for_user(&self, user_id: &str) -> Result<Vec<TimerRow>> {
        self.with_conn(|conn| query_timers(conn, user_id, true))
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT id, username, password, created_at FROM users WHERE {column} = ?1");
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_timers(conn: &Connection, user_id: &str, active_only: bool) -> Result<Vec<TimerRow>> {
    let filter = if active_only { "AND end_ms IS NULL" } else { "" };
    let sql = format!(
        "SELECT {TIMER_COLUMNS} FROM timers
         WHERE user_id = ?1 {filter}
         ORDER BY start_ms DESC, id"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user_id], timer_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn timer_from_row(row: &Row<'_>) -> rusqlite::Result<TimerRow> {
    Ok(TimerRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        description: row.get(2)?,
        start_ms: row.get(3)?,
        end_ms: row.get(4)?,
    })
}
