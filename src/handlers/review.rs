//! Rating, XP and projection endpoints.

use axum::{
  extract::{Path, Query, State},
  Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::domain::Quality;
use crate::error::Result;
use crate::remote::RemoteStore;
use crate::session::{ItemView, RatedItem, StatusView, StudySession, XpAwarded};

use super::format_relative_time;

#[derive(Debug, Deserialize)]
pub struct UserQuery {
  pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
  #[serde(flatten)]
  pub status: StatusView,
  /// e.g. "in 3 hours"; absent when nothing is scheduled
  pub next_review_label: Option<String>,
}

/// GET /status?user_id=...
pub async fn status<R: RemoteStore>(
  State(session): State<StudySession<R>>,
  Query(query): Query<UserQuery>,
) -> Result<Json<StatusResponse>> {
  let status = session.snapshot(&query.user_id)?;
  let next_review_label = status
    .next_review_at
    .map(|at| format_relative_time(at, Utc::now()));
  Ok(Json(StatusResponse {
    status,
    next_review_label,
  }))
}

/// GET /items/{user_id}/{item_id}
pub async fn item<R: RemoteStore>(
  State(session): State<StudySession<R>>,
  Path((user_id, item_id)): Path<(String, String)>,
) -> Result<Json<ItemView>> {
  Ok(Json(session.item_view(&user_id, &item_id)?))
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
  pub user_id: String,
  pub item_id: String,
  /// 0 = again, 1 = hard, 2 = good, 3 = easy
  pub quality: u8,
}

/// POST /review
pub async fn rate_item<R: RemoteStore>(
  State(session): State<StudySession<R>>,
  Json(request): Json<ReviewRequest>,
) -> Result<Json<RatedItem>> {
  let quality = Quality::try_from(request.quality)?;
  let rated = session
    .rate_item(&request.user_id, &request.item_id, quality)
    .await?;
  Ok(Json(rated))
}

#[derive(Debug, Deserialize)]
pub struct LessonRequest {
  pub user_id: String,
}

/// POST /lesson
pub async fn complete_lesson<R: RemoteStore>(
  State(session): State<StudySession<R>>,
  Json(request): Json<LessonRequest>,
) -> Result<Json<XpAwarded>> {
  Ok(Json(session.complete_lesson(&request.user_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ReviewXpRequest {
  pub user_id: String,
  pub words_reviewed: f64,
}

/// POST /review-xp
pub async fn award_review_xp<R: RemoteStore>(
  State(session): State<StudySession<R>>,
  Json(request): Json<ReviewXpRequest>,
) -> Result<Json<XpAwarded>> {
  Ok(Json(
    session
      .award_review_xp(&request.user_id, request.words_reviewed)
      .await?,
  ))
}

#[cfg(test)]
mod tests {
  use super::super::router;
  use crate::config::SyncConfig;
  use crate::db::open_in_memory;
  use crate::remote::MemoryRemote;
  use crate::session::StudySession;
  use axum::http::StatusCode;
  use axum_test::TestServer;
  use serde_json::{json, Value};
  use std::sync::Arc;

  fn server() -> TestServer {
    let session = StudySession::new(
      open_in_memory().unwrap(),
      Arc::new(MemoryRemote::new()),
      SyncConfig::default(),
      true,
    )
    .unwrap();
    TestServer::new(router(session)).unwrap()
  }

  #[tokio::test]
  async fn test_review_returns_schedule() {
    let server = server();
    let response = server
      .post("/review")
      .json(&json!({ "user_id": "u1", "item_id": "apple", "quality": 2 }))
      .await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["progress"]["repetitions"], 1);
    assert_eq!(body["progress"]["interval_days"], 1);
    assert_eq!(body["next_review_label"], "Tomorrow");
    assert_eq!(body["state"], "Learning");
    assert_eq!(body["confirmed"], true);
  }

  #[tokio::test]
  async fn test_invalid_quality_is_unprocessable() {
    let server = server();
    let response = server
      .post("/review")
      .json(&json!({ "user_id": "u1", "item_id": "apple", "quality": 7 }))
      .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid quality rating: 7");

    // Nothing was scheduled
    let item: Value = server.get("/items/u1/apple").await.json();
    assert_eq!(item["state"], "New");
    assert_eq!(item["progress"], Value::Null);
  }

  #[tokio::test]
  async fn test_xp_endpoints_and_status() {
    let server = server();
    let lesson: Value = server
      .post("/lesson")
      .json(&json!({ "user_id": "u1" }))
      .await
      .json();
    assert_eq!(lesson["awarded"], 10);

    let review: Value = server
      .post("/review-xp")
      .json(&json!({ "user_id": "u1", "words_reviewed": 12.0 }))
      .await
      .json();
    assert_eq!(review["awarded"], 17);
    assert_eq!(review["total_xp"], 27);

    let status: Value = server
      .get("/status")
      .add_query_param("user_id", "u1")
      .await
      .json();
    assert_eq!(status["total_xp"], 27);
    assert_eq!(status["xp_confirmed"], true);
    assert_eq!(status["pending_count"], 0);
    assert_eq!(status["is_online"], true);
    assert_eq!(status["next_review_label"], Value::Null);
  }

  #[tokio::test]
  async fn test_status_labels_next_review() {
    let server = server();
    server
      .post("/review")
      .json(&json!({ "user_id": "u1", "item_id": "apple", "quality": 2 }))
      .await
      .assert_status_ok();

    let status: Value = server
      .get("/status")
      .add_query_param("user_id", "u1")
      .await
      .json();
    assert_eq!(status["due_count"], 0);
    assert_eq!(status["states"]["learning"], 1);
    assert!(status["next_review_label"].is_string());
  }
}
