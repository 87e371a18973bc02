//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs parameters and basic result info.

use std::sync::Arc;
use axum::{
  extract::{Path, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use tracing::{error, info, instrument};

use crate::controller::ControllerError;
use crate::logic::*;
use crate::protocol::*;
use crate::state::AppState;

impl IntoResponse for LogicError {
  fn into_response(self) -> Response {
    let status = match &self {
      LogicError::UnknownLesson(_) => StatusCode::NOT_FOUND,
      LogicError::Controller(ControllerError::StepOutOfRange { .. }) => StatusCode::NOT_FOUND,
      LogicError::Controller(ControllerError::NoStepLoaded) => StatusCode::BAD_REQUEST,
      LogicError::Controller(ControllerError::Contract(e)) => {
        error!(target: "exercise", error = %e, "pattern engine contract violation");
        StatusCode::INTERNAL_SERVER_ERROR
      }
      LogicError::Worker(e) => {
        error!(target: "exercise", error = %e, "evaluation worker failed");
        StatusCode::INTERNAL_SERVER_ERROR
      }
    };
    (status, Json(ErrorOut { message: self.to_string() })).into_response()
  }
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state))]
pub async fn http_list_lessons(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  let lessons: Vec<LessonSummaryOut> = state.lessons_in_order().iter().map(|l| LessonSummaryOut::from(l.as_ref())).collect();
  Json(lessons)
}

#[instrument(level = "info", skip_all, fields(%id))]
pub async fn http_get_lesson(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, LogicError> {
  let lesson = state.lesson(&id).ok_or_else(|| LogicError::UnknownLesson(id.clone()))?;
  Ok(Json((*lesson).clone()))
}

#[instrument(level = "info", skip(state, body), fields(lesson = %body.lesson_id, step = body.step, pattern_len = body.pattern.len()))]
pub async fn http_post_evaluate(
  State(state): State<Arc<AppState>>,
  Json(body): Json<EvaluateIn>,
) -> Result<impl IntoResponse, LogicError> {
  let (lesson_id, step) = (body.lesson_id.clone(), body.step);
  let out = evaluate_bounded(state, body).await?;
  info!(target: "exercise", lesson = %lesson_id, step, status = ?out.status, "HTTP evaluate served");
  Ok(Json(out))
}

#[instrument(level = "info", skip_all, fields(%lesson_id))]
pub async fn http_get_progress(
  State(state): State<Arc<AppState>>,
  Path(lesson_id): Path<String>,
) -> Result<impl IntoResponse, LogicError> {
  let last_step = progress_for(&state, &lesson_id)?;
  Ok(Json(ProgressOut { lesson_id, last_step }))
}
