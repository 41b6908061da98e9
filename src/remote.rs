//! Boundary to the remote record store.
//!
//! The real backend lives outside this crate. Everything here talks to it
//! through [`RemoteStore`], and any failure is either retried later through
//! the offline queue or, when the remote refuses the payload outright,
//! dead-lettered.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;

use crate::domain::ProgressRecord;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
  /// Connectivity or server trouble. Worth retrying.
  #[error("remote unavailable: {0}")]
  Transient(String),

  /// The remote refused the payload. Retrying will not help.
  #[error("remote rejected mutation: {0}")]
  Rejected(String),
}

impl RemoteError {
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::Transient(_))
  }
}

/// Network-backed store of progress and XP records.
///
/// All methods return `Send` futures so implementations can be driven from
/// axum handlers on a multi-threaded runtime.
pub trait RemoteStore: Send + Sync + 'static {
  fn read_progress(
    &self,
    user_id: &str,
    item_id: &str,
  ) -> impl Future<Output = Result<Option<ProgressRecord>, RemoteError>> + Send;

  fn write_progress(
    &self,
    user_id: &str,
    item_id: &str,
    progress: &ProgressRecord,
  ) -> impl Future<Output = Result<(), RemoteError>> + Send;

  fn read_xp(&self, user_id: &str) -> impl Future<Output = Result<u64, RemoteError>> + Send;

  /// Add `amount` to the user's total and return the new total
  fn write_xp_award(
    &self,
    user_id: &str,
    amount: u64,
  ) -> impl Future<Output = Result<u64, RemoteError>> + Send;
}

/// A write that reached [`MemoryRemote`] and was applied
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
  WriteProgress { user_id: String, item_id: String, repetitions: i64 },
  XpAward { user_id: String, amount: u64 },
}

#[derive(Default)]
struct MemoryState {
  online: bool,
  progress: HashMap<(String, String), ProgressRecord>,
  xp: HashMap<String, u64>,
  scripted_failures: VecDeque<RemoteError>,
  applied: Vec<RemoteCall>,
  write_attempts: u64,
}

/// In-process remote used for tests and the development server.
///
/// Supports going offline, scripting failures for upcoming writes, and an
/// artificial write latency.
pub struct MemoryRemote {
  state: Mutex<MemoryState>,
  write_latency: Option<Duration>,
}

impl Default for MemoryRemote {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryRemote {
  /// An empty store that starts online
  pub fn new() -> Self {
    Self {
      state: Mutex::new(MemoryState {
        online: true,
        ..Default::default()
      }),
      write_latency: None,
    }
  }

  pub fn with_write_latency(mut self, latency: Duration) -> Self {
    self.write_latency = Some(latency);
    self
  }

  pub fn set_online(&self, online: bool) {
    self.lock().online = online;
  }

  pub fn is_online(&self) -> bool {
    self.lock().online
  }

  /// Make the next write fail with `error`. Failures queue up in order.
  pub fn fail_next_write(&self, error: RemoteError) {
    self.lock().scripted_failures.push_back(error);
  }

  /// Writes that were applied, in order
  pub fn applied(&self) -> Vec<RemoteCall> {
    self.lock().applied.clone()
  }

  /// Every write attempt, including failed ones
  pub fn write_attempts(&self) -> u64 {
    self.lock().write_attempts
  }

  pub fn stored_progress(&self, user_id: &str, item_id: &str) -> Option<ProgressRecord> {
    self
      .lock()
      .progress
      .get(&(user_id.to_string(), item_id.to_string()))
      .cloned()
  }

  fn lock(&self) -> MutexGuard<'_, MemoryState> {
    // A panic while holding this lock only happens inside a failing test
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Shared failure handling for every write
  fn begin_write(&self) -> Result<(), RemoteError> {
    let mut state = self.lock();
    state.write_attempts += 1;
    if !state.online {
      return Err(RemoteError::Transient("offline".into()));
    }
    match state.scripted_failures.pop_front() {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }

  async fn simulate_latency(&self) {
    if let Some(latency) = self.write_latency {
      tokio::time::sleep(latency).await;
    }
  }
}

impl RemoteStore for MemoryRemote {
  async fn read_progress(
    &self,
    user_id: &str,
    item_id: &str,
  ) -> Result<Option<ProgressRecord>, RemoteError> {
    let state = self.lock();
    if !state.online {
      return Err(RemoteError::Transient("offline".into()));
    }
    Ok(state.progress.get(&(user_id.to_string(), item_id.to_string())).cloned())
  }

  async fn write_progress(
    &self,
    user_id: &str,
    item_id: &str,
    progress: &ProgressRecord,
  ) -> Result<(), RemoteError> {
    self.simulate_latency().await;
    self.begin_write()?;

    let mut state = self.lock();
    // Last write wins
    state
      .progress
      .insert((user_id.to_string(), item_id.to_string()), progress.clone());
    state.applied.push(RemoteCall::WriteProgress {
      user_id: user_id.to_string(),
      item_id: item_id.to_string(),
      repetitions: progress.repetitions,
    });
    Ok(())
  }

  async fn read_xp(&self, user_id: &str) -> Result<u64, RemoteError> {
    let state = self.lock();
    if !state.online {
      return Err(RemoteError::Transient("offline".into()));
    }
    Ok(state.xp.get(user_id).copied().unwrap_or(0))
  }

  async fn write_xp_award(&self, user_id: &str, amount: u64) -> Result<u64, RemoteError> {
    self.simulate_latency().await;
    self.begin_write()?;

    let mut state = self.lock();
    let total = state.xp.entry(user_id.to_string()).or_insert(0);
    *total = total.saturating_add(amount);
    let new_total = *total;
    state.applied.push(RemoteCall::XpAward {
      user_id: user_id.to_string(),
      amount,
    });
    Ok(new_total)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;

  #[tokio::test]
  async fn test_writes_are_recorded_in_order() {
    let remote = MemoryRemote::new();
    let progress = ProgressRecord::new_at(Utc::now());
    remote.write_progress("u1", "apple", &progress).await.unwrap();
    assert_eq!(remote.write_xp_award("u1", 10).await.unwrap(), 10);
    assert_eq!(remote.write_xp_award("u1", 17).await.unwrap(), 27);

    assert_eq!(remote.applied().len(), 3);
    assert!(matches!(remote.applied()[0], RemoteCall::WriteProgress { .. }));
    assert_eq!(remote.read_xp("u1").await.unwrap(), 27);
    assert_eq!(remote.read_progress("u1", "apple").await.unwrap(), Some(progress));
  }

  #[tokio::test]
  async fn test_offline_fails_transiently() {
    let remote = MemoryRemote::new();
    remote.set_online(false);
    let err = remote.write_xp_award("u1", 5).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(remote.read_xp("u1").await.is_err());
    assert_eq!(remote.write_attempts(), 1);
    assert!(remote.applied().is_empty());
  }

  #[tokio::test]
  async fn test_scripted_failures_consumed_in_order() {
    let remote = MemoryRemote::new();
    remote.fail_next_write(RemoteError::Rejected("bad payload".into()));
    remote.fail_next_write(RemoteError::Transient("503".into()));

    let first = remote.write_xp_award("u1", 1).await.unwrap_err();
    assert!(!first.is_retryable());
    let second = remote.write_xp_award("u1", 1).await.unwrap_err();
    assert!(second.is_retryable());
    assert_eq!(remote.write_xp_award("u1", 1).await.unwrap(), 1);
  }
}
