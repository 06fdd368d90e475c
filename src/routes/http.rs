//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs parameters and basic result info.

use std::sync::Arc;
use axum::{
  extract::{
    rejection::{JsonRejection, QueryRejection},
    Query, State,
  },
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use tracing::{debug, info, instrument, warn};

use crate::error::{EngineError, SessionError};
use crate::logic::*;
use crate::protocol::*;
use crate::state::AppState;

/// Error body + status for API callers.
#[derive(Debug)]
pub struct ApiError {
  status: StatusCode,
  code: &'static str,
  message: String,
}

impl ApiError {
  pub fn bad_request(message: impl Into<String>) -> Self {
    Self { status: StatusCode::BAD_REQUEST, code: "BAD_REQUEST", message: message.into() }
  }
}

impl From<SessionError> for ApiError {
  fn from(e: SessionError) -> Self {
    let status = match &e {
      SessionError::UnknownSession(_) => StatusCode::NOT_FOUND,
      SessionError::Engine(EngineError::InvalidState { .. }) => StatusCode::CONFLICT,
    };
    Self { status, code: e.code(), message: e.to_string() }
  }
}

impl From<JsonRejection> for ApiError {
  fn from(rejection: JsonRejection) -> Self {
    Self::bad_request(rejection.body_text())
  }
}

impl From<QueryRejection> for ApiError {
  fn from(rejection: QueryRejection) -> Self {
    Self::bad_request(rejection.body_text())
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    warn!(target: "session", status = %self.status, code = self.code, message = %self.message, "Request rejected");
    (self.status, Json(ErrorOut { error: self.message, code: self.code.to_string() })).into_response()
  }
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state, payload))]
pub async fn http_start_session(
  State(state): State<Arc<AppState>>,
  payload: Result<Json<StartIn>, JsonRejection>,
) -> Result<Json<SessionOut>, ApiError> {
  let Json(body) = payload?;
  debug!(target: "session", problem_len = body.problem.len(), student_id = ?body.student_id, "HTTP start requested");
  if body.problem.trim().is_empty() {
    return Err(ApiError::bad_request("problem must not be empty"));
  }
  let started = start_session(&state, &body.problem, body.student_id, body.profile).await?;
  info!(target: "session", session_id = %started.session_id, "HTTP session started");
  Ok(Json(SessionOut::from(started)))
}

#[instrument(level = "info", skip(state, payload))]
pub async fn http_student_message(
  State(state): State<Arc<AppState>>,
  payload: Result<Json<MessageIn>, JsonRejection>,
) -> Result<Json<TurnOut>, ApiError> {
  let Json(body) = payload?;
  let outcome = student_message(&state, &body.session_id, &body.text).await?;
  Ok(Json(TurnOut::from(outcome)))
}

#[instrument(level = "info", skip(state, query))]
pub async fn http_get_analytics(
  State(state): State<Arc<AppState>>,
  query: Result<Query<SessionQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
  let Query(q) = query?;
  Ok(Json(session_analytics(&state, &q.session_id).await?))
}

#[instrument(level = "info", skip(state, query))]
pub async fn http_get_conversation(
  State(state): State<Arc<AppState>>,
  query: Result<Query<SessionQuery>, QueryRejection>,
) -> Result<Json<ConversationOut>, ApiError> {
  let Query(q) = query?;
  let turns = conversation(&state, &q.session_id).await?;
  Ok(Json(ConversationOut { turns }))
}

#[instrument(level = "info", skip(state, payload))]
pub async fn http_end_session(
  State(state): State<Arc<AppState>>,
  payload: Result<Json<EndIn>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
  let Json(body) = payload?;
  Ok(Json(end_session(&state, &body.session_id).await?))
}
