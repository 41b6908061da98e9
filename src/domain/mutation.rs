use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::progress::ProgressRecord;
use crate::error::Error;

/// A state change that must eventually reach the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
  ProgressUpdate {
    user_id: String,
    item_id: String,
    progress: ProgressRecord,
  },
  XpAward {
    user_id: String,
    amount: u64,
  },
}

impl Mutation {
  pub fn kind(&self) -> MutationKind {
    match self {
      Self::ProgressUpdate { .. } => MutationKind::ProgressUpdate,
      Self::XpAward { .. } => MutationKind::XpAward,
    }
  }

  pub fn user_id(&self) -> &str {
    match self {
      Self::ProgressUpdate { user_id, .. } | Self::XpAward { user_id, .. } => user_id,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
  ProgressUpdate,
  XpAward,
}

impl MutationKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::ProgressUpdate => "progress_update",
      Self::XpAward => "xp_award",
    }
  }

  pub fn parse(s: &str) -> Result<Self, Error> {
    match s {
      "progress_update" => Ok(Self::ProgressUpdate),
      "xp_award" => Ok(Self::XpAward),
      other => Err(Error::UnknownMutationKind(other.to_string())),
    }
  }
}

/// A mutation waiting in the offline queue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedMutation {
  /// Strictly increasing, never reused
  pub id: i64,
  pub mutation: Mutation,
  pub created_at: DateTime<Utc>,
  /// Failed apply attempts so far
  pub attempts: u32,
  pub last_error: Option<String>,
}

/// A mutation set aside after it was rejected or ran out of attempts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
  pub id: i64,
  pub kind: String,
  /// `None` when the stored payload could not be decoded
  pub mutation: Option<Mutation>,
  /// The stored payload, kept only when it could not be decoded
  #[serde(skip_serializing_if = "Option::is_none")]
  pub raw_payload: Option<String>,
  pub created_at: DateTime<Utc>,
  pub attempts: u32,
  pub last_error: Option<String>,
  pub dead_lettered_at: DateTime<Utc>,
}
