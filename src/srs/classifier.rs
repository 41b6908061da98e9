//! Learning-state classification and due-item projections.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{LearningState, ProgressRecord};

/// Interval (days) from which an item counts as mastered
pub const MASTERED_INTERVAL_DAYS: i64 = 7;

/// Highest repetition count still considered "learning"
pub const LEARNING_MAX_REPETITIONS: i64 = 2;

/// Derive the learning state of an item.
///
/// Rules are checked in a fixed priority order:
/// 1. `Mastered` when interval >= 7 days, regardless of repetitions
/// 2. `New` when there is no progress or repetitions == 0
/// 3. `Learning` when repetitions <= 2
/// 4. `Review` otherwise
pub fn classify(progress: Option<&ProgressRecord>) -> LearningState {
  let Some(p) = progress else {
    return LearningState::New;
  };

  if p.interval_days >= MASTERED_INTERVAL_DAYS {
    LearningState::Mastered
  } else if p.repetitions == 0 {
    LearningState::New
  } else if p.repetitions <= LEARNING_MAX_REPETITIONS {
    LearningState::Learning
  } else {
    LearningState::Review
  }
}

/// Per-state totals for progress summaries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
  pub new: u64,
  pub learning: u64,
  pub review: u64,
  pub mastered: u64,
}

impl StateCounts {
  pub fn tally<'a>(records: impl IntoIterator<Item = &'a ProgressRecord>) -> Self {
    let mut counts = Self::default();
    for record in records {
      match classify(Some(record)) {
        LearningState::New => counts.new += 1,
        LearningState::Learning => counts.learning += 1,
        LearningState::Review => counts.review += 1,
        LearningState::Mastered => counts.mastered += 1,
      }
    }
    counts
  }

  pub fn total(&self) -> u64 {
    self.new + self.learning + self.review + self.mastered
  }
}

/// Number of records whose next review is at or before `now`
pub fn due_count<'a>(
  records: impl IntoIterator<Item = &'a ProgressRecord>,
  now: DateTime<Utc>,
) -> u64 {
  records.into_iter().filter(|r| r.is_due(now)).count() as u64
}

/// Earliest upcoming review strictly after `now`, if any
pub fn next_review_time<'a>(
  records: impl IntoIterator<Item = &'a ProgressRecord>,
  now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
  records
    .into_iter()
    .map(|r| r.next_review_at)
    .filter(|at| *at > now)
    .min()
}
