use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Starting ease for an item that has never been rated
pub const DEFAULT_EASE_FACTOR: f64 = 2.5;

/// Lowest ease the scheduler will ever produce
pub const MIN_EASE_FACTOR: f64 = 1.3;

/// Scheduling state for one user/item pair.
///
/// Created on first exposure and only ever changed by the scheduler. A
/// failing rating resets it; records are never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
  pub ease_factor: f64,
  /// Days until the next review. 0 means not yet scheduled.
  pub interval_days: i64,
  /// Consecutive passing reviews since the last reset
  pub repetitions: i64,
  pub next_review_at: DateTime<Utc>,
}

impl ProgressRecord {
  /// First-exposure state, due immediately
  pub fn new_at(now: DateTime<Utc>) -> Self {
    Self {
      ease_factor: DEFAULT_EASE_FACTOR,
      interval_days: 0,
      repetitions: 0,
      next_review_at: now,
    }
  }

  pub fn is_due(&self, now: DateTime<Utc>) -> bool {
    self.next_review_at <= now
  }
}

/// How well the user recalled an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
  Again = 0,
  Hard = 1,
  Good = 2,
  Easy = 3,
}

impl Quality {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Again => "again",
      Self::Hard => "hard",
      Self::Good => "good",
      Self::Easy => "easy",
    }
  }

  pub fn is_passing(&self) -> bool {
    !matches!(self, Self::Again)
  }
}

impl TryFrom<u8> for Quality {
  type Error = Error;

  fn try_from(value: u8) -> Result<Self, Self::Error> {
    match value {
      0 => Ok(Self::Again),
      1 => Ok(Self::Hard),
      2 => Ok(Self::Good),
      3 => Ok(Self::Easy),
      other => Err(Error::InvalidQuality(other)),
    }
  }
}

/// A single rating as produced by the study UI. Folded into a
/// `ProgressRecord` and then dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingEvent {
  pub item_id: String,
  pub quality: Quality,
  pub occurred_at: DateTime<Utc>,
}

/// Coarse learning state derived from a progress record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LearningState {
  New,
  Learning,
  Review,
  Mastered,
}

impl LearningState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::New => "new",
      Self::Learning => "learning",
      Self::Review => "review",
      Self::Mastered => "mastered",
    }
  }
}

/// Whether a locally applied change has been acknowledged by the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confirmation {
  Pending,
  Confirmed,
}

impl Confirmation {
  pub fn is_confirmed(&self) -> bool {
    matches!(self, Self::Confirmed)
  }

  pub fn from_flag(confirmed: bool) -> Self {
    if confirmed { Self::Confirmed } else { Self::Pending }
  }
}
