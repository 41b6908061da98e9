//! Drains the offline mutation queue against the remote store.
//!
//! A drain walks the queue oldest-first and stops at the first retryable
//! failure so later mutations never overtake earlier ones. Retries are not
//! scheduled here; the next reconnect, foreground or manual trigger starts a
//! new drain.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use super::state::{SyncHandle, SyncState};
use crate::config::SyncConfig;
use crate::db::{cache, meta, try_lock, DbPool, LogOnError, MutationQueue};
use crate::domain::{Mutation, QueuedMutation};
use crate::error::Result;
use crate::remote::{RemoteError, RemoteStore};

/// What started a drain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Reconnected,
    Foreground,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadySyncing,
    Offline,
    /// The signal did not call for a drain (e.g. going offline)
    NotTriggered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DrainOutcome {
    Skipped { reason: SkipReason },
    /// The queue was emptied
    Completed { applied: usize, dead_lettered: usize },
    /// Stopped at a retryable failure; `failed_id` and everything after it stay queued
    Halted {
        applied: usize,
        dead_lettered: usize,
        failed_id: i64,
        attempts: u32,
    },
}

pub struct SyncRunner<R> {
    pool: DbPool,
    queue: MutationQueue,
    remote: Arc<R>,
    handle: Arc<SyncHandle>,
    config: SyncConfig,
}

impl<R> Clone for SyncRunner<R> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            queue: self.queue.clone(),
            remote: self.remote.clone(),
            handle: self.handle.clone(),
            config: self.config,
        }
    }
}

impl<R: RemoteStore> SyncRunner<R> {
    /// Build a runner, seeding [`SyncState`] from what is persisted locally
    pub fn new(pool: DbPool, remote: Arc<R>, config: SyncConfig, online: bool) -> Result<Self> {
        let queue = MutationQueue::new(pool.clone());
        // The queue mirrors its size into sync_meta on every change
        let (pending_count, last_synced_at) = {
            let conn = try_lock(&pool)?;
            (meta::get_cached_pending_count(&conn)?, meta::get_last_synced_at(&conn)?)
        };

        let handle = Arc::new(SyncHandle::new(SyncState {
            is_online: online,
            pending_count,
            last_synced_at,
            ..Default::default()
        }));

        Ok(Self {
            pool,
            queue,
            remote,
            handle,
            config,
        })
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub fn handle(&self) -> &Arc<SyncHandle> {
        &self.handle
    }

    pub fn state(&self) -> SyncState {
        self.handle.snapshot()
    }

    pub fn is_syncing(&self) -> bool {
        self.handle.is_syncing()
    }

    /// Connectivity signal. Only an offline → online transition drains.
    pub async fn on_connectivity_changed(&self, online: bool) -> Result<DrainOutcome> {
        let was_online = self.handle.set_online(online);
        tracing::info!(online, was_online, "Connectivity changed");
        if online && !was_online {
            self.trigger(SyncTrigger::Reconnected).await
        } else {
            Ok(DrainOutcome::Skipped {
                reason: SkipReason::NotTriggered,
            })
        }
    }

    /// App came back to the foreground
    pub async fn on_app_foreground(&self) -> Result<DrainOutcome> {
        self.trigger(SyncTrigger::Foreground).await
    }

    pub fn on_app_background(&self) {
        tracing::debug!("App moved to background");
    }

    /// Start a drain unless offline or one is already running
    pub async fn trigger(&self, trigger: SyncTrigger) -> Result<DrainOutcome> {
        if !self.handle.is_online() {
            tracing::debug!(?trigger, "Skipping sync while offline");
            return Ok(DrainOutcome::Skipped {
                reason: SkipReason::Offline,
            });
        }

        let Some(_guard) = self.handle.try_begin_drain() else {
            tracing::debug!(?trigger, "Sync already in progress");
            return Ok(DrainOutcome::Skipped {
                reason: SkipReason::AlreadySyncing,
            });
        };

        tracing::info!(?trigger, "Starting sync");
        let outcome = self.drain().await;
        self.refresh_pending_count();
        outcome
    }

    async fn drain(&self) -> Result<DrainOutcome> {
        let mut applied = 0;
        let mut dead_lettered = 0;

        loop {
            let batch = self.queue.dequeue_batch(self.config.batch_size)?;
            if batch.is_empty() {
                let now = Utc::now();
                {
                    let conn = try_lock(&self.pool)?;
                    meta::set_last_synced_at(&conn, now)?;
                }
                self.handle.mark_synced(now);
                tracing::info!(applied, dead_lettered, "Sync complete");
                return Ok(DrainOutcome::Completed {
                    applied,
                    dead_lettered,
                });
            }

            for entry in batch {
                match self.apply(&entry.mutation).await {
                    Ok(()) => {
                        self.queue.remove(entry.id)?;
                        applied += 1;
                        self.refresh_pending_count();
                    }
                    Err(err) if !err.is_retryable() => {
                        // Remote will never accept it; set aside and keep going
                        self.queue.dead_letter(entry.id, &err.to_string())?;
                        dead_lettered += 1;
                    }
                    Err(err) => {
                        let attempts = self.handle_retryable_failure(&entry, &err)?;
                        return Ok(DrainOutcome::Halted {
                            applied,
                            dead_lettered,
                            failed_id: entry.id,
                            attempts,
                        });
                    }
                }
            }
        }
    }

    fn handle_retryable_failure(&self, entry: &QueuedMutation, err: &RemoteError) -> Result<u32> {
        let attempts = self
            .queue
            .record_failure(entry.id, &err.to_string())?
            .unwrap_or(entry.attempts + 1);
        tracing::warn!(id = entry.id, attempts, error = %err, "Mutation failed, halting sync");

        if attempts >= self.config.max_attempts {
            let reason = format!("gave up after {} attempts: {}", attempts, err);
            self.queue.dead_letter(entry.id, &reason)?;
        }
        Ok(attempts)
    }

    /// Send one mutation to the remote and confirm the local cache on success
    async fn apply(&self, mutation: &Mutation) -> Result<(), RemoteError> {
        match mutation {
            Mutation::ProgressUpdate {
                user_id,
                item_id,
                progress,
            } => {
                self.remote.write_progress(user_id, item_id, progress).await?;
                if let Some(conn) = try_lock(&self.pool).log_warn("Confirming progress") {
                    cache::confirm_progress(&conn, user_id, item_id, progress)
                        .log_warn("Confirming progress");
                }
            }
            Mutation::XpAward { user_id, amount } => {
                let total = self.remote.write_xp_award(user_id, *amount).await?;
                if let Some(conn) = try_lock(&self.pool).log_warn("Confirming XP") {
                    cache::confirm_xp(&conn, user_id, total).log_warn("Confirming XP");
                }
            }
        }
        Ok(())
    }

    /// Re-read the durable queue size into [`SyncState`]
    pub fn refresh_pending_count(&self) {
        if let Some(count) = self.queue.count().log_warn("Counting pending mutations") {
            self.handle.set_pending_count(count);
        }
    }
}
