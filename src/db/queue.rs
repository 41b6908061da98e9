//! Durable FIFO queue of mutations waiting for the remote store.
//!
//! Ids come from SQLite `AUTOINCREMENT`, so they are strictly increasing and
//! never reused, even after the newest entry is removed. Entries leave the
//! queue only through [`MutationQueue::remove`] (confirmed remote success) or
//! [`MutationQueue::dead_letter`]. Logically identical mutations are not
//! deduplicated; each one is applied on its own.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::meta::{parse_timestamp, set_cached_pending_count};
use super::{try_lock, DbPool, LogOnError};
use crate::domain::{DeadLetter, Mutation, MutationKind, QueuedMutation};
use crate::error::{Error, Result};

#[derive(Clone)]
pub struct MutationQueue {
    pool: DbPool,
}

/// Raw queue row before payload decoding
struct QueueRow {
    id: i64,
    kind: String,
    payload: String,
    created_at: String,
    attempts: u32,
    last_error: Option<String>,
}

impl QueueRow {
    fn decode(self) -> Result<QueuedMutation> {
        Ok(QueuedMutation {
            mutation: decode_payload(self.id, &self.kind, &self.payload)?,
            id: self.id,
            created_at: parse_timestamp(&self.created_at)?,
            attempts: self.attempts,
            last_error: self.last_error,
        })
    }
}

fn decode_payload(id: i64, kind: &str, payload: &str) -> Result<Mutation> {
    let kind = MutationKind::parse(kind)?;
    let mutation: Mutation = serde_json::from_str(payload).map_err(|e| Error::CorruptEntry {
        id,
        reason: e.to_string(),
    })?;
    if mutation.kind() != kind {
        return Err(Error::CorruptEntry {
            id,
            reason: format!("kind column {:?} does not match payload", kind.as_str()),
        });
    }
    Ok(mutation)
}

impl MutationQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append a mutation and return its sequence id. Never touches the network.
    pub fn enqueue(&self, mutation: &Mutation) -> Result<i64> {
        self.enqueue_at(mutation, Utc::now())
    }

    pub fn enqueue_at(&self, mutation: &Mutation, created_at: DateTime<Utc>) -> Result<i64> {
        let payload = serde_json::to_string(mutation)?;
        let conn = try_lock(&self.pool)?;
        conn.execute(
            "INSERT INTO mutation_queue (kind, payload, created_at, attempts) VALUES (?1, ?2, ?3, 0)",
            params![mutation.kind().as_str(), payload, created_at.to_rfc3339()],
        )?;
        let id = conn.last_insert_rowid();
        refresh_pending_count(&conn)?;
        tracing::debug!(id, kind = mutation.kind().as_str(), "Queued mutation");
        Ok(id)
    }

    /// Up to `max` oldest entries, oldest first. Entries stay queued.
    ///
    /// Rows that cannot be decoded are moved to dead letters and skipped, so
    /// a single bad row never blocks the entries behind it.
    pub fn dequeue_batch(&self, max: usize) -> Result<Vec<QueuedMutation>> {
        loop {
            let rows = self.peek_rows(max)?;
            if rows.is_empty() {
                return Ok(Vec::new());
            }

            let mut batch = Vec::with_capacity(rows.len());
            for row in rows {
                let id = row.id;
                match row.decode() {
                    Ok(entry) => batch.push(entry),
                    Err(e) => {
                        tracing::warn!(id, error = %e, "Setting aside undecodable queue entry");
                        self.dead_letter(id, &e.to_string())?;
                    }
                }
            }
            // An all-corrupt batch was fully removed; look further down the queue
            if !batch.is_empty() {
                return Ok(batch);
            }
        }
    }

    fn peek_rows(&self, max: usize) -> Result<Vec<QueueRow>> {
        let conn = try_lock(&self.pool)?;
        let mut stmt = conn.prepare(
            r#"
    SELECT id, kind, payload, created_at, attempts, last_error
    FROM mutation_queue
    ORDER BY id ASC
    LIMIT ?1
    "#,
        )?;

        let rows = stmt
            .query_map(params![max as i64], |row| {
                Ok(QueueRow {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    payload: row.get(2)?,
                    created_at: row.get(3)?,
                    attempts: row.get(4)?,
                    last_error: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Remove an entry. Unknown ids are ignored.
    pub fn remove(&self, id: i64) -> Result<()> {
        let conn = try_lock(&self.pool)?;
        conn.execute("DELETE FROM mutation_queue WHERE id = ?1", params![id])?;
        refresh_pending_count(&conn)?;
        Ok(())
    }

    /// Number of entries currently queued, read from durable storage
    pub fn count(&self) -> Result<u64> {
        let conn = try_lock(&self.pool)?;
        count_pending(&conn)
    }

    /// Bump the attempt counter after a failed apply.
    ///
    /// Returns the new attempt count, or `None` if the entry is gone.
    pub fn record_failure(&self, id: i64, error: &str) -> Result<Option<u32>> {
        let conn = try_lock(&self.pool)?;
        conn.execute(
            "UPDATE mutation_queue SET attempts = attempts + 1, last_error = ?1 WHERE id = ?2",
            params![error, id],
        )?;
        let attempts = conn
            .query_row(
                "SELECT attempts FROM mutation_queue WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(attempts)
    }

    /// Move an entry to the dead-letter table.
    ///
    /// Returns false if the entry was no longer queued.
    pub fn dead_letter(&self, id: i64, reason: &str) -> Result<bool> {
        let mut conn = try_lock(&self.pool)?;
        let tx = conn.transaction()?;
        let moved = tx.execute(
            r#"
    INSERT INTO dead_letters (id, kind, payload, created_at, attempts, last_error, dead_lettered_at)
    SELECT id, kind, payload, created_at, attempts, ?1, ?2
    FROM mutation_queue WHERE id = ?3
    "#,
            params![reason, Utc::now().to_rfc3339(), id],
        )?;
        tx.execute("DELETE FROM mutation_queue WHERE id = ?1", params![id])?;
        refresh_pending_count(&tx)?;
        tx.commit()?;

        if moved > 0 {
            tracing::warn!(id, reason, "Mutation moved to dead letters");
        }
        Ok(moved > 0)
    }

    pub fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let conn = try_lock(&self.pool)?;
        let mut stmt = conn.prepare(
            r#"
    SELECT id, kind, payload, created_at, attempts, last_error, dead_lettered_at
    FROM dead_letters
    ORDER BY id ASC
    "#,
        )?;

        let rows = stmt
            .query_map([], |row| {
                let queued = QueueRow {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    payload: row.get(2)?,
                    created_at: row.get(3)?,
                    attempts: row.get(4)?,
                    last_error: row.get(5)?,
                };
                let dead_lettered_at: String = row.get(6)?;
                Ok((queued, dead_lettered_at))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(row, at)| {
                let dead_lettered_at = parse_timestamp(&at)?;
                let QueueRow {
                    id,
                    kind,
                    payload,
                    created_at,
                    attempts,
                    last_error,
                } = row;
                let mutation = decode_payload(id, &kind, &payload).log_warn("Undecodable dead letter");
                Ok(DeadLetter {
                    id,
                    created_at: parse_timestamp(&created_at)
                        .log_warn("Dead letter timestamp")
                        .unwrap_or(dead_lettered_at),
                    raw_payload: mutation.is_none().then_some(payload),
                    mutation,
                    kind,
                    attempts,
                    last_error,
                    dead_lettered_at,
                })
            })
            .collect()
    }

    pub fn dead_letter_count(&self) -> Result<u64> {
        let conn = try_lock(&self.pool)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM dead_letters", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn count_pending(conn: &Connection) -> Result<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM mutation_queue", [], |row| row.get(0))?;
    Ok(count as u64)
}

/// Mirror the queue size into `sync_meta` so it is readable without a scan
fn refresh_pending_count(conn: &Connection) -> Result<()> {
    let count = count_pending(conn)?;
    set_cached_pending_count(conn, count)
}
