//! Study session service: the entry point for review and XP actions.
//!
//! Every action updates the local cache first and reports success right
//! away. The remote write is attempted afterwards; if it cannot happen (or
//! fails) the change is queued for the sync runner. Cached values carry a
//! `Pending`/`Confirmed` flag until the remote acknowledges them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::SyncConfig;
use crate::db::{cache, try_lock, DbPool, LogOnError, MutationQueue};
use crate::domain::{Confirmation, LearningState, Mutation, ProgressRecord, Quality, RatingEvent};
use crate::error::Result;
use crate::remote::RemoteStore;
use crate::srs::{self, StateCounts};
use crate::sync::{SyncRunner, SyncState};
use crate::xp;

/// Result of rating an item
#[derive(Debug, Clone, Serialize)]
pub struct RatedItem {
  pub item_id: String,
  pub progress: ProgressRecord,
  pub state: LearningState,
  /// e.g. "Tomorrow", "in 6 days"
  pub next_review_label: String,
  pub confirmed: bool,
}

/// Result of an XP award
#[derive(Debug, Clone, Copy, Serialize)]
pub struct XpAwarded {
  pub awarded: u64,
  pub total_xp: u64,
  pub confirmed: bool,
}

/// Per-item view for the UI
#[derive(Debug, Clone, Serialize)]
pub struct ItemView {
  pub item_id: String,
  pub state: LearningState,
  pub progress: Option<ProgressRecord>,
  pub due: bool,
  pub confirmed: bool,
}

/// Everything the home screen shows, in one read
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
  pub user_id: String,
  pub due_count: u64,
  pub next_review_at: Option<DateTime<Utc>>,
  pub states: StateCounts,
  pub total_xp: u64,
  pub xp_confirmed: bool,
  pub dead_letter_count: u64,
  #[serde(flatten)]
  pub sync: SyncState,
}

pub struct StudySession<R> {
  pool: DbPool,
  queue: MutationQueue,
  remote: Arc<R>,
  sync: SyncRunner<R>,
  /// Held from the direct-write decision until the write lands or is queued
  direct_writes: Arc<Mutex<()>>,
}

impl<R> Clone for StudySession<R> {
  fn clone(&self) -> Self {
    Self {
      pool: self.pool.clone(),
      queue: self.queue.clone(),
      remote: self.remote.clone(),
      sync: self.sync.clone(),
      direct_writes: self.direct_writes.clone(),
    }
  }
}

impl<R: RemoteStore> StudySession<R> {
  pub fn new(pool: DbPool, remote: Arc<R>, config: SyncConfig, online: bool) -> Result<Self> {
    let sync = SyncRunner::new(pool.clone(), remote.clone(), config, online)?;
    Ok(Self {
      queue: sync.queue().clone(),
      pool,
      remote,
      sync,
      direct_writes: Arc::new(Mutex::new(())),
    })
  }

  pub fn sync(&self) -> &SyncRunner<R> {
    &self.sync
  }

  // ==================== Actions ====================

  /// Rate an item now and schedule its next review
  pub async fn rate_item(&self, user_id: &str, item_id: &str, quality: Quality) -> Result<RatedItem> {
    let event = RatingEvent {
      item_id: item_id.to_string(),
      quality,
      occurred_at: Utc::now(),
    };
    self.apply_rating(user_id, &event).await
  }

  /// Schedule from a rating captured at `event.occurred_at`
  pub async fn apply_rating(&self, user_id: &str, event: &RatingEvent) -> Result<RatedItem> {
    let (item_id, quality) = (event.item_id.as_str(), event.quality);
    let prior = self.prior_progress(user_id, item_id).await?;
    let progress = srs::compute_next_review_at(prior.as_ref(), quality, event.occurred_at);

    {
      let conn = try_lock(&self.pool)?;
      cache::upsert_progress(&conn, user_id, item_id, &progress, Confirmation::Pending)?;
    }

    // A later action must not write directly while this one may still be queued
    let writing = self.direct_writes.lock().await;
    let mut confirmed = false;
    if self.can_write_directly() {
      match self.remote.write_progress(user_id, item_id, &progress).await {
        Ok(()) => {
          let conn = try_lock(&self.pool)?;
          confirmed = cache::confirm_progress(&conn, user_id, item_id, &progress)?;
        }
        Err(e) => tracing::warn!(user_id, item_id, error = %e, "Progress write failed, queueing"),
      }
    }

    if !confirmed {
      self.queue.enqueue(&Mutation::ProgressUpdate {
        user_id: user_id.to_string(),
        item_id: item_id.to_string(),
        progress: progress.clone(),
      })?;
      self.sync.refresh_pending_count();
    }
    drop(writing);

    tracing::debug!(user_id, item_id, quality = quality.as_str(), interval = progress.interval_days, "Rated item");

    Ok(RatedItem {
      item_id: item_id.to_string(),
      state: srs::classify(Some(&progress)),
      next_review_label: srs::format_interval(progress.interval_days),
      progress,
      confirmed,
    })
  }

  pub async fn complete_lesson(&self, user_id: &str) -> Result<XpAwarded> {
    self.award_xp(user_id, xp::lesson_xp()).await
  }

  pub async fn award_review_xp(&self, user_id: &str, words_reviewed: f64) -> Result<XpAwarded> {
    self.award_xp(user_id, xp::review_xp(words_reviewed)).await
  }

  async fn award_xp(&self, user_id: &str, amount: u64) -> Result<XpAwarded> {
    let total_xp = {
      let conn = try_lock(&self.pool)?;
      let (current, confirmation) = cache::get_xp(&conn, user_id)?;
      if amount == 0 {
        return Ok(XpAwarded {
          awarded: 0,
          total_xp: current,
          confirmed: confirmation.is_confirmed(),
        });
      }
      let total = xp::apply_xp_award(current, i64::try_from(amount).unwrap_or(i64::MAX));
      cache::set_xp(&conn, user_id, total, Confirmation::Pending)?;
      total
    };

    let writing = self.direct_writes.lock().await;
    if self.can_write_directly() {
      match self.remote.write_xp_award(user_id, amount).await {
        Ok(remote_total) => {
          let conn = try_lock(&self.pool)?;
          cache::confirm_xp(&conn, user_id, remote_total)?;
          let (total_xp, confirmation) = cache::get_xp(&conn, user_id)?;
          return Ok(XpAwarded {
            awarded: amount,
            total_xp,
            confirmed: confirmation.is_confirmed(),
          });
        }
        Err(e) => tracing::warn!(user_id, amount, error = %e, "XP award failed, queueing"),
      }
    }

    self.queue.enqueue(&Mutation::XpAward {
      user_id: user_id.to_string(),
      amount,
    })?;
    self.sync.refresh_pending_count();
    drop(writing);

    Ok(XpAwarded {
      awarded: amount,
      total_xp,
      confirmed: false,
    })
  }

  /// Reconcile the cached XP total with the remote one and return the
  /// cached total. A remote total below the local one never lowers it.
  ///
  /// Skipped while mutations are queued, since the remote total does not
  /// include them yet.
  pub async fn hydrate_xp(&self, user_id: &str) -> Result<Option<u64>> {
    if self.queue.count()? > 0 || !self.sync.state().is_online {
      return Ok(None);
    }
    match self.remote.read_xp(user_id).await {
      Ok(total) => {
        let conn = try_lock(&self.pool)?;
        cache::confirm_xp(&conn, user_id, total)?;
        Ok(Some(cache::get_xp(&conn, user_id)?.0))
      }
      Err(e) => {
        tracing::warn!(user_id, error = %e, "Could not read remote XP");
        Ok(None)
      }
    }
  }

  /// A direct write must never overtake queued mutations
  fn can_write_directly(&self) -> bool {
    let state = self.sync.state();
    state.is_online && !state.is_syncing && self.queue.count().log_warn_default("Counting queue") == 0
  }

  /// Local progress, falling back to the remote on first sight of an item
  async fn prior_progress(&self, user_id: &str, item_id: &str) -> Result<Option<ProgressRecord>> {
    let cached = {
      let conn = try_lock(&self.pool)?;
      cache::get_progress(&conn, user_id, item_id)?
    };
    if let Some(cached) = cached {
      return Ok(Some(cached.progress));
    }
    if !self.sync.state().is_online {
      return Ok(None);
    }
    Ok(self
      .remote
      .read_progress(user_id, item_id)
      .await
      .log_warn("Reading remote progress")
      .flatten())
  }

  // ==================== Projections ====================

  pub fn due_count(&self, user_id: &str) -> Result<u64> {
    let records = self.cached_records(user_id)?;
    Ok(srs::due_count(&records, Utc::now()))
  }

  pub fn next_review_time(&self, user_id: &str) -> Result<Option<DateTime<Utc>>> {
    let records = self.cached_records(user_id)?;
    Ok(srs::next_review_time(&records, Utc::now()))
  }

  pub fn item_state(&self, user_id: &str, item_id: &str) -> Result<LearningState> {
    Ok(self.item_view(user_id, item_id)?.state)
  }

  pub fn item_view(&self, user_id: &str, item_id: &str) -> Result<ItemView> {
    let cached = {
      let conn = try_lock(&self.pool)?;
      cache::get_progress(&conn, user_id, item_id)?
    };
    let progress = cached.as_ref().map(|c| c.progress.clone());
    Ok(ItemView {
      item_id: item_id.to_string(),
      state: srs::classify(progress.as_ref()),
      due: progress.as_ref().is_none_or(|p| p.is_due(Utc::now())),
      confirmed: cached.is_some_and(|c| c.confirmation.is_confirmed()),
      progress,
    })
  }

  pub fn total_xp(&self, user_id: &str) -> Result<u64> {
    let conn = try_lock(&self.pool)?;
    Ok(cache::get_xp(&conn, user_id)?.0)
  }

  pub fn pending_count(&self) -> u64 {
    self.sync.state().pending_count
  }

  pub fn is_syncing(&self) -> bool {
    self.sync.is_syncing()
  }

  pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
    self.sync.state().last_synced_at
  }

  /// Combined projection. Reading it consumes the transient sync-success flag.
  pub fn snapshot(&self, user_id: &str) -> Result<StatusView> {
    let records = self.cached_records(user_id)?;
    let now = Utc::now();
    let (total_xp, xp_confirmation) = {
      let conn = try_lock(&self.pool)?;
      cache::get_xp(&conn, user_id)?
    };

    let mut sync = self.sync.state();
    sync.sync_succeeded = self.sync.handle().take_sync_success();

    Ok(StatusView {
      user_id: user_id.to_string(),
      due_count: srs::due_count(&records, now),
      next_review_at: srs::next_review_time(&records, now),
      states: StateCounts::tally(&records),
      total_xp,
      xp_confirmed: xp_confirmation.is_confirmed(),
      dead_letter_count: self.queue.dead_letter_count().log_warn_default("Counting dead letters"),
      sync,
    })
  }

  fn cached_records(&self, user_id: &str) -> Result<Vec<ProgressRecord>> {
    let conn = try_lock(&self.pool)?;
    Ok(cache::list_progress(&conn, user_id)?
      .into_iter()
      .map(|c| c.progress)
      .collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::open_in_memory;
  use crate::remote::{MemoryRemote, RemoteCall, RemoteError};
  use crate::sync::{DrainOutcome, SyncTrigger};
  use std::time::Duration;

  fn session(online: bool) -> (StudySession<MemoryRemote>, Arc<MemoryRemote>) {
    let remote = Arc::new(MemoryRemote::new());
    let session = StudySession::new(open_in_memory().unwrap(), remote.clone(), SyncConfig::default(), online).unwrap();
    (session, remote)
  }

  #[tokio::test]
  async fn test_online_rating_is_confirmed_directly() {
    let (session, remote) = session(true);
    let rated = session.rate_item("u1", "apple", Quality::Good).await.unwrap();
    assert_eq!(rated.progress.repetitions, 1);
    assert_eq!(rated.progress.interval_days, 1);
    assert_eq!(rated.next_review_label, "Tomorrow");
    assert_eq!(rated.state, LearningState::Learning);
    assert!(rated.confirmed);

    assert_eq!(session.pending_count(), 0);
    assert_eq!(remote.stored_progress("u1", "apple"), Some(rated.progress));
  }

  #[tokio::test]
  async fn test_good_three_times_end_to_end() {
    let (session, _remote) = session(true);
    let first = session.rate_item("u1", "apple", Quality::Good).await.unwrap();
    let second = session.rate_item("u1", "apple", Quality::Good).await.unwrap();
    let third = session.rate_item("u1", "apple", Quality::Good).await.unwrap();

    assert_eq!((first.progress.repetitions, first.progress.interval_days), (1, 1));
    assert_eq!((second.progress.repetitions, second.progress.interval_days), (2, 6));
    assert_eq!(
      third.progress.interval_days,
      (6.0 * third.progress.ease_factor).round() as i64
    );
    assert_eq!(session.item_state("u1", "apple").unwrap(), LearningState::Mastered);
  }

  #[tokio::test]
  async fn test_failed_write_is_queued_but_rating_succeeds() {
    let (session, remote) = session(true);
    remote.fail_next_write(RemoteError::Transient("502".into()));

    let rated = session.rate_item("u1", "apple", Quality::Easy).await.unwrap();
    assert!(!rated.confirmed);
    assert_eq!(session.pending_count(), 1);
    assert!(!session.item_view("u1", "apple").unwrap().confirmed);

    session.sync().trigger(SyncTrigger::Manual).await.unwrap();
    assert_eq!(session.pending_count(), 0);
    assert!(session.item_view("u1", "apple").unwrap().confirmed);
  }

  #[tokio::test]
  async fn test_direct_write_never_overtakes_queue() {
    let (session, remote) = session(true);
    remote.fail_next_write(RemoteError::Transient("502".into()));
    session.complete_lesson("u1").await.unwrap();

    // Remote is healthy again, but the earlier award is still queued
    session.rate_item("u1", "apple", Quality::Good).await.unwrap();
    assert_eq!(session.pending_count(), 2);
    assert!(remote.applied().is_empty());

    session.sync().trigger(SyncTrigger::Manual).await.unwrap();
    let applied = remote.applied();
    assert!(matches!(applied[0], RemoteCall::XpAward { amount: 10, .. }));
    assert!(matches!(applied[1], RemoteCall::WriteProgress { .. }));
  }

  #[tokio::test]
  async fn test_offline_lesson_and_review_sync_on_reconnect() {
    let (session, remote) = session(true);
    session.sync().on_connectivity_changed(false).await.unwrap();
    remote.set_online(false);

    let lesson = session.complete_lesson("u1").await.unwrap();
    assert_eq!(lesson.awarded, 10);
    let review = session.award_review_xp("u1", 12.0).await.unwrap();
    assert_eq!(review.awarded, 17);
    assert_eq!(review.total_xp, 27);
    assert!(!review.confirmed);
    assert_eq!(session.pending_count(), 2);
    assert_eq!(session.total_xp("u1").unwrap(), 27);

    remote.set_online(true);
    let outcome = session.sync().on_connectivity_changed(true).await.unwrap();
    assert!(matches!(outcome, DrainOutcome::Completed { applied: 2, .. }));

    assert_eq!(
      remote.applied(),
      vec![
        RemoteCall::XpAward { user_id: "u1".into(), amount: 10 },
        RemoteCall::XpAward { user_id: "u1".into(), amount: 17 },
      ]
    );
    assert_eq!(remote.read_xp("u1").await.unwrap(), 27);
    assert_eq!(session.total_xp("u1").unwrap(), 27);
    assert_eq!(session.pending_count(), 0);
    assert!(session.last_synced_at().is_some());

    let status = session.snapshot("u1").unwrap();
    assert!(status.xp_confirmed);
    assert!(status.sync.sync_succeeded);
    // Success flag is shown once
    assert!(!session.snapshot("u1").unwrap().sync.sync_succeeded);
  }

  #[tokio::test]
  async fn test_unknown_connectivity_failure_still_queues() {
    // Session believes it is online, the remote is not reachable
    let (session, remote) = session(true);
    remote.set_online(false);
    session.complete_lesson("u1").await.unwrap();
    session.award_review_xp("u1", 12.0).await.unwrap();

    assert_eq!(session.pending_count(), 2);
    assert_eq!(remote.write_attempts(), 1);

    remote.set_online(true);
    session.sync().on_app_foreground().await.unwrap();
    assert_eq!(remote.read_xp("u1").await.unwrap(), 27);
    assert_eq!(session.pending_count(), 0);
  }

  #[tokio::test]
  async fn test_zero_word_review_awards_nothing() {
    let (session, remote) = session(true);
    let awarded = session.award_review_xp("u1", f64::NAN).await.unwrap();
    assert_eq!(awarded.awarded, 0);
    assert_eq!(awarded.total_xp, 0);
    assert_eq!(remote.write_attempts(), 0);
    assert_eq!(session.pending_count(), 0);
  }

  #[tokio::test]
  async fn test_first_rating_starts_from_remote_progress() {
    let (session, remote) = session(true);
    let existing = srs::compute_next_review(None, Quality::Good);
    remote.write_progress("u1", "apple", &existing).await.unwrap();

    let rated = session.rate_item("u1", "apple", Quality::Good).await.unwrap();
    assert_eq!(rated.progress.repetitions, 2);
    assert_eq!(rated.progress.interval_days, 6);
  }

  #[tokio::test]
  async fn test_status_projection() {
    let (session, _remote) = session(true);
    session.rate_item("u1", "apple", Quality::Good).await.unwrap();
    session.rate_item("u1", "pear", Quality::Again).await.unwrap();
    session.complete_lesson("u1").await.unwrap();

    let status = session.snapshot("u1").unwrap();
    assert_eq!(status.due_count, 0);
    assert!(status.next_review_at.is_some());
    assert_eq!(status.states.learning, 1);
    assert_eq!(status.states.new, 1);
    assert_eq!(status.total_xp, 10);
    assert!(status.xp_confirmed);
    assert_eq!(status.sync.pending_count, 0);
    assert!(status.sync.is_online);
    assert_eq!(status.dead_letter_count, 0);

    let unseen = session.item_view("u1", "plum").unwrap();
    assert_eq!(unseen.state, LearningState::New);
    assert!(unseen.due);
    assert!(unseen.progress.is_none());
  }

  #[tokio::test]
  async fn test_hydrate_xp_waits_for_empty_queue() {
    let (session, remote) = session(true);
    remote.write_xp_award("u1", 40).await.unwrap();
    assert_eq!(session.hydrate_xp("u1").await.unwrap(), Some(40));
    assert_eq!(session.total_xp("u1").unwrap(), 40);

    remote.set_online(false);
    session.complete_lesson("u1").await.unwrap();
    assert_eq!(session.hydrate_xp("u1").await.unwrap(), None);
    assert_eq!(session.total_xp("u1").unwrap(), 50);
  }

  #[tokio::test]
  async fn test_hydrate_never_lowers_local_xp() {
    let (session, remote) = session(true);
    remote.write_xp_award("u1", 40).await.unwrap();
    assert_eq!(session.hydrate_xp("u1").await.unwrap(), Some(40));

    // Rejected on the direct write and again on the drain
    remote.fail_next_write(RemoteError::Rejected("unknown user".into()));
    remote.fail_next_write(RemoteError::Rejected("unknown user".into()));
    session.complete_lesson("u1").await.unwrap();
    let outcome = session.sync().trigger(SyncTrigger::Manual).await.unwrap();
    assert!(matches!(outcome, DrainOutcome::Completed { dead_lettered: 1, .. }));
    assert_eq!(session.pending_count(), 0);
    assert_eq!(session.total_xp("u1").unwrap(), 50);

    assert_eq!(session.hydrate_xp("u1").await.unwrap(), Some(50));
    assert_eq!(session.total_xp("u1").unwrap(), 50);
    assert!(!session.snapshot("u1").unwrap().xp_confirmed);
  }

  #[tokio::test]
  async fn test_in_flight_write_is_not_overtaken() {
    let remote = Arc::new(MemoryRemote::new().with_write_latency(Duration::from_millis(50)));
    let session = StudySession::new(open_in_memory().unwrap(), remote.clone(), SyncConfig::default(), true).unwrap();
    remote.fail_next_write(RemoteError::Transient("502".into()));

    let (rated, lesson) = tokio::join!(session.rate_item("u1", "apple", Quality::Good), async {
      tokio::time::sleep(Duration::from_millis(5)).await;
      session.complete_lesson("u1").await
    });
    assert!(!rated.unwrap().confirmed);
    assert!(!lesson.unwrap().confirmed);
    assert_eq!(session.pending_count(), 2);
    // The lesson award waited and then queued instead of writing
    assert_eq!(remote.write_attempts(), 1);

    session.sync().trigger(SyncTrigger::Manual).await.unwrap();
    assert_eq!(
      remote.applied(),
      vec![
        RemoteCall::WriteProgress { user_id: "u1".into(), item_id: "apple".into(), repetitions: 1 },
        RemoteCall::XpAward { user_id: "u1".into(), amount: 10 },
      ]
    );
  }
}
