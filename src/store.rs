use chrono::{DateTime, Utc};
use rusqlite::{Connection, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Persisted countdown for one user's elevation.
///
/// At most one record exists per user. The deadline is fixed at creation:
/// re-observing the same elevation never moves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountdownRecord {
    pub user: String,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// Opens (or creates) the countdown database at the given path.
///
/// Creates the countdowns table if it doesn't already exist. Returns an
/// open connection ready for use.
pub fn open_or_create(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;

    // WAL so a status reader never blocks the monitor mid-tick; a short
    // busy timeout covers an operator command racing the monitor
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS countdowns (
            user       TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            deadline   TEXT NOT NULL
        );",
    )?;

    Ok(conn)
}

/// Persist a new countdown unless one already exists for the user.
///
/// First elevation wins: an existing row is left untouched and `false` is
/// returned, so repeated elevation events cannot extend the deadline.
pub fn begin(conn: &Connection, record: &CountdownRecord) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO countdowns (user, started_at, deadline) VALUES (?1, ?2, ?3)",
        rusqlite::params![
            record.user,
            record.started_at.to_rfc3339(),
            record.deadline.to_rfc3339()
        ],
    )?;
    Ok(inserted > 0)
}

/// Fetch the countdown for a user, if any.
pub fn get(conn: &Connection, user: &str) -> Result<Option<CountdownRecord>> {
    let mut stmt =
        conn.prepare("SELECT user, started_at, deadline FROM countdowns WHERE user = ?1")?;
    let mut rows = stmt.query_map([user], map_record)?;
    rows.next().transpose()
}

/// Remove a user's countdown. Returns whether a record existed.
pub fn clear(conn: &Connection, user: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM countdowns WHERE user = ?1", [user])?;
    Ok(deleted > 0)
}

/// All persisted countdowns, ordered by deadline.
pub fn list(conn: &Connection) -> Result<Vec<CountdownRecord>> {
    let mut stmt =
        conn.prepare("SELECT user, started_at, deadline FROM countdowns ORDER BY deadline ASC")?;
    let rows = stmt.query_map([], map_record)?;
    rows.collect()
}

fn map_record(row: &rusqlite::Row) -> Result<CountdownRecord> {
    Ok(CountdownRecord {
        user: row.get(0)?,
        started_at: parse_timestamp(1, row.get::<_, String>(1)?)?,
        deadline: parse_timestamp(2, row.get::<_, String>(2)?)?,
    })
}

fn parse_timestamp(idx: usize, raw: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
