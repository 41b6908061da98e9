//! Sync triggers and queue inspection.

use axum::{extract::State, Json};
use serde::Deserialize;

use crate::domain::DeadLetter;
use crate::error::Result;
use crate::remote::RemoteStore;
use crate::session::StudySession;
use crate::sync::{DrainOutcome, SkipReason, SyncTrigger};

#[derive(Debug, Deserialize)]
pub struct ConnectivityRequest {
  pub online: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
  Foreground,
  Background,
}

#[derive(Debug, Deserialize)]
pub struct LifecycleRequest {
  pub event: LifecycleEvent,
}

/// POST /sync
pub async fn manual_sync<R: RemoteStore>(State(session): State<StudySession<R>>) -> Result<Json<DrainOutcome>> {
  Ok(Json(session.sync().trigger(SyncTrigger::Manual).await?))
}

/// POST /signals/connectivity
pub async fn connectivity_signal<R: RemoteStore>(
  State(session): State<StudySession<R>>,
  Json(request): Json<ConnectivityRequest>,
) -> Result<Json<DrainOutcome>> {
  Ok(Json(session.sync().on_connectivity_changed(request.online).await?))
}

/// POST /signals/lifecycle
pub async fn lifecycle_signal<R: RemoteStore>(
  State(session): State<StudySession<R>>,
  Json(request): Json<LifecycleRequest>,
) -> Result<Json<DrainOutcome>> {
  let outcome = match request.event {
    LifecycleEvent::Foreground => session.sync().on_app_foreground().await?,
    LifecycleEvent::Background => {
      session.sync().on_app_background();
      DrainOutcome::Skipped {
        reason: SkipReason::NotTriggered,
      }
    }
  };
  Ok(Json(outcome))
}

/// GET /dead-letters
pub async fn dead_letters<R: RemoteStore>(State(session): State<StudySession<R>>) -> Result<Json<Vec<DeadLetter>>> {
  Ok(Json(session.sync().queue().dead_letters()?))
}
