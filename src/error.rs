//! Crate-wide error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// A raw rating outside `0..=3`. Callers must never clamp these.
  #[error("invalid quality rating: {0}")]
  InvalidQuality(u8),

  #[error("database unavailable")]
  DatabaseUnavailable,

  #[error("unknown mutation kind: {0:?}")]
  UnknownMutationKind(String),

  #[error("queue entry {id} is corrupt: {reason}")]
  CorruptEntry { id: i64, reason: String },

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("configuration error: {0}")]
  Config(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
