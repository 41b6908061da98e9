//! Local copies of progress and XP, applied before the remote confirms them.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::meta::parse_timestamp;
use crate::domain::{Confirmation, ProgressRecord};
use crate::error::Result;

/// A cached progress record and whether the remote has acknowledged it
#[derive(Debug, Clone, PartialEq)]
pub struct CachedProgress {
    pub item_id: String,
    pub progress: ProgressRecord,
    pub confirmation: Confirmation,
}

pub fn get_progress(conn: &Connection, user_id: &str, item_id: &str) -> Result<Option<CachedProgress>> {
    let row = conn
        .query_row(
            r#"
    SELECT item_id, ease_factor, interval_days, repetitions, next_review, confirmed
    FROM progress_cache WHERE user_id = ?1 AND item_id = ?2
    "#,
            params![user_id, item_id],
            raw_progress_row,
        )
        .optional()?;
    row.map(RawProgress::decode).transpose()
}

pub fn list_progress(conn: &Connection, user_id: &str) -> Result<Vec<CachedProgress>> {
    let mut stmt = conn.prepare(
        r#"
    SELECT item_id, ease_factor, interval_days, repetitions, next_review, confirmed
    FROM progress_cache WHERE user_id = ?1
    ORDER BY next_review ASC
    "#,
    )?;
    let rows = stmt
        .query_map(params![user_id], raw_progress_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(RawProgress::decode).collect()
}

pub fn upsert_progress(
    conn: &Connection,
    user_id: &str,
    item_id: &str,
    progress: &ProgressRecord,
    confirmation: Confirmation,
) -> Result<()> {
    conn.execute(
        r#"
    INSERT INTO progress_cache (user_id, item_id, ease_factor, interval_days, repetitions, next_review, confirmed)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT(user_id, item_id) DO UPDATE SET
      ease_factor = ?3,
      interval_days = ?4,
      repetitions = ?5,
      next_review = ?6,
      confirmed = ?7
    "#,
        params![
            user_id,
            item_id,
            progress.ease_factor,
            progress.interval_days,
            progress.repetitions,
            progress.next_review_at.to_rfc3339(),
            confirmation.is_confirmed(),
        ],
    )?;
    Ok(())
}

/// Flag a cached record as confirmed, but only if it still holds the
/// value that was written remotely. A newer local rating stays pending.
pub fn confirm_progress(
    conn: &Connection,
    user_id: &str,
    item_id: &str,
    written: &ProgressRecord,
) -> Result<bool> {
    let updated = conn.execute(
        r#"
    UPDATE progress_cache SET confirmed = 1
    WHERE user_id = ?1 AND item_id = ?2
      AND repetitions = ?3 AND interval_days = ?4 AND next_review = ?5
    "#,
        params![
            user_id,
            item_id,
            written.repetitions,
            written.interval_days,
            written.next_review_at.to_rfc3339(),
        ],
    )?;
    Ok(updated > 0)
}

/// Cached XP total, `(0, Confirmed)` for users never seen
pub fn get_xp(conn: &Connection, user_id: &str) -> Result<(u64, Confirmation)> {
    let row: Option<(i64, bool)> = conn
        .query_row(
            "SELECT total_xp, confirmed FROM xp_cache WHERE user_id = ?1",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(row
        .map(|(total, confirmed)| (total.max(0) as u64, Confirmation::from_flag(confirmed)))
        .unwrap_or((0, Confirmation::Confirmed)))
}

pub fn set_xp(conn: &Connection, user_id: &str, total_xp: u64, confirmation: Confirmation) -> Result<()> {
    conn.execute(
        r#"
    INSERT INTO xp_cache (user_id, total_xp, confirmed) VALUES (?1, ?2, ?3)
    ON CONFLICT(user_id) DO UPDATE SET total_xp = ?2, confirmed = ?3
    "#,
        params![user_id, clamp_to_sql(total_xp), confirmation.is_confirmed()],
    )?;
    Ok(())
}

/// Accept the remote total. The local value never moves backwards, so a
/// remote total lower than what is cached leaves the cache pending.
pub fn confirm_xp(conn: &Connection, user_id: &str, remote_total: u64) -> Result<()> {
    let (local, _) = get_xp(conn, user_id)?;
    if remote_total >= local {
        set_xp(conn, user_id, remote_total, Confirmation::Confirmed)
    } else {
        set_xp(conn, user_id, local, Confirmation::Pending)
    }
}

fn clamp_to_sql(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

struct RawProgress {
    item_id: String,
    ease_factor: f64,
    interval_days: i64,
    repetitions: i64,
    next_review: String,
    confirmed: bool,
}

impl RawProgress {
    fn decode(self) -> Result<CachedProgress> {
        let next_review_at: DateTime<Utc> = parse_timestamp(&self.next_review)?;
        Ok(CachedProgress {
            item_id: self.item_id,
            progress: ProgressRecord {
                ease_factor: self.ease_factor,
                interval_days: self.interval_days,
                repetitions: self.repetitions,
                next_review_at,
            },
            confirmation: Confirmation::from_flag(self.confirmed),
        })
    }
}

fn raw_progress_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawProgress> {
    Ok(RawProgress {
        item_id: row.get(0)?,
        ease_factor: row.get(1)?,
        interval_days: row.get(2)?,
        repetitions: row.get(3)?,
        next_review: row.get(4)?,
        confirmed: row.get(5)?,
    })
}
