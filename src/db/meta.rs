//! Small persisted key/value facts about sync progress

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::error::{Error, Result};

const LAST_SYNCED_AT: &str = "last_synced_at";
const PENDING_COUNT: &str = "pending_count";

pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT value FROM sync_meta WHERE key = ?1")?;
    let mut rows = stmt.query(params![key])?;
    if let Some(row) = rows.next()? {
        Ok(Some(row.get(0)?))
    } else {
        Ok(None)
    }
}

pub fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

pub fn get_last_synced_at(conn: &Connection) -> Result<Option<DateTime<Utc>>> {
    get_meta(conn, LAST_SYNCED_AT)?
        .map(|raw| parse_timestamp(&raw))
        .transpose()
}

pub fn set_last_synced_at(conn: &Connection, at: DateTime<Utc>) -> Result<()> {
    set_meta(conn, LAST_SYNCED_AT, &at.to_rfc3339())
}

/// Pending count as last written by the queue
pub fn get_cached_pending_count(conn: &Connection) -> Result<u64> {
    Ok(get_meta(conn, PENDING_COUNT)?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0))
}

pub fn set_cached_pending_count(conn: &Connection, count: u64) -> Result<()> {
    set_meta(conn, PENDING_COUNT, &count.to_string())
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::DateParse(format!("{raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::run_migrations;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn test_last_synced_at_starts_empty() {
        let conn = conn();
        assert!(get_last_synced_at(&conn).unwrap().is_none());
    }

    #[test]
    fn test_last_synced_at_persists() {
        let conn = conn();
        let now = Utc::now();
        set_last_synced_at(&conn, now).unwrap();
        let stored = get_last_synced_at(&conn).unwrap().unwrap();
        assert_eq!(stored, now);
    }

    #[test]
    fn test_cached_pending_count_defaults_to_zero() {
        let conn = conn();
        assert_eq!(get_cached_pending_count(&conn).unwrap(), 0);
        set_cached_pending_count(&conn, 4).unwrap();
        assert_eq!(get_cached_pending_count(&conn).unwrap(), 4);
    }

    #[test]
    fn test_bad_timestamp_is_an_error() {
        let conn = conn();
        set_meta(&conn, "last_synced_at", "yesterday").unwrap();
        assert!(matches!(get_last_synced_at(&conn), Err(Error::DateParse(_))));
    }
}
