//! JSON HTTP surface over a [`StudySession`].

pub mod review;
pub mod sync;

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  routing::{get, post},
  Json, Router,
};
use chrono::{DateTime, Utc};
use tower_http::trace::TraceLayer;

use crate::error::Error;
use crate::remote::RemoteStore;
use crate::session::StudySession;

pub use review::{award_review_xp, complete_lesson, item, rate_item, status};
pub use sync::{connectivity_signal, dead_letters, lifecycle_signal, manual_sync};

/// Build the application router around a session
pub fn router<R: RemoteStore>(session: StudySession<R>) -> Router {
  Router::new()
    .route("/status", get(status::<R>))
    .route("/items/{user_id}/{item_id}", get(item::<R>))
    .route("/review", post(rate_item::<R>))
    .route("/lesson", post(complete_lesson::<R>))
    .route("/review-xp", post(award_review_xp::<R>))
    .route("/dead-letters", get(dead_letters::<R>))
    .route("/sync", post(manual_sync::<R>))
    .route("/signals/connectivity", post(connectivity_signal::<R>))
    .route("/signals/lifecycle", post(lifecycle_signal::<R>))
    .layer(TraceLayer::new_for_http())
    .with_state(session)
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = match &self {
      Error::InvalidQuality(_) => StatusCode::UNPROCESSABLE_ENTITY,
      Error::DatabaseUnavailable => StatusCode::SERVICE_UNAVAILABLE,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
      tracing::error!("Request failed: {}", self);
    }
    (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
  }
}

fn format_relative_time(dt: DateTime<Utc>, now: DateTime<Utc>) -> String {
  let duration = dt.signed_duration_since(now);

  let minutes = duration.num_minutes();
  let hours = duration.num_hours();
  let days = duration.num_days();

  if minutes < 1 {
    "now".to_string()
  } else if minutes < 60 {
    format!("in {} minute{}", minutes, if minutes == 1 { "" } else { "s" })
  } else if hours < 24 {
    format!("in {} hour{}", hours, if hours == 1 { "" } else { "s" })
  } else if days == 1 {
    "tomorrow".to_string()
  } else {
    format!("in {} days", days)
  }
}
