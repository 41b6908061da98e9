//! Process-wide sync status and the drain lock.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Read-only sync status for UI consumers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncState {
    pub is_online: bool,
    pub is_syncing: bool,
    pub pending_count: u64,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Set after a drain empties the queue, cleared once shown
    pub sync_succeeded: bool,
}

/// Shared container for [`SyncState`] plus the single-drain flag.
///
/// Created once per session and handed to the runner and the study session.
#[derive(Debug, Default)]
pub struct SyncHandle {
    draining: AtomicBool,
    state: Mutex<SyncState>,
}

impl SyncHandle {
    pub fn new(initial: SyncState) -> Self {
        Self {
            draining: AtomicBool::new(false),
            state: Mutex::new(SyncState {
                is_syncing: false,
                ..initial
            }),
        }
    }

    pub fn snapshot(&self) -> SyncState {
        self.lock().clone()
    }

    pub fn is_syncing(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    pub fn is_online(&self) -> bool {
        self.lock().is_online
    }

    /// Store the new connectivity and return the previous value
    pub fn set_online(&self, online: bool) -> bool {
        std::mem::replace(&mut self.lock().is_online, online)
    }

    pub fn set_pending_count(&self, count: u64) {
        self.lock().pending_count = count;
    }

    pub fn mark_synced(&self, at: DateTime<Utc>) {
        let mut state = self.lock();
        state.last_synced_at = Some(at);
        state.sync_succeeded = true;
    }

    /// Read and clear the transient success flag
    pub fn take_sync_success(&self) -> bool {
        std::mem::take(&mut self.lock().sync_succeeded)
    }

    /// Claim the drain lock. `None` means another drain is in flight.
    pub fn try_begin_drain(&self) -> Option<DrainGuard<'_>> {
        self.draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.lock().is_syncing = true;
        Some(DrainGuard { handle: self })
    }

    fn lock(&self) -> MutexGuard<'_, SyncState> {
        // SyncState is plain data; a poisoned lock still holds a usable value
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases the drain lock when dropped, including on early error returns
pub struct DrainGuard<'a> {
    handle: &'a SyncHandle,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.handle.lock().is_syncing = false;
        self.handle.draining.store(false, Ordering::Release);
    }
}
