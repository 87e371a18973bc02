//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - One-shot evaluation of an attempt (no progress writes), bounded in time
//!   - Reading stored progress for a lesson
//!   - Turning controller state into protocol messages

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::task::JoinError;
use tracing::{debug, instrument, warn};

use crate::controller::{evaluate_attempt, ControllerError, ExerciseStepController};
use crate::domain::{AttemptState, AttemptStatus};
use crate::engine::EcmaEngine;
use crate::grading::Attempt;
use crate::highlight::Highlighter;
use crate::protocol::{EvaluateIn, EvaluationOut, ServerWsMessage, SpanOut, StepOut};
use crate::state::AppState;

#[derive(Debug, Error)]
pub enum LogicError {
  #[error("unknown lesson: {0}")]
  UnknownLesson(String),
  #[error(transparent)]
  Controller(#[from] ControllerError),
  #[error("evaluation worker failed: {0}")]
  Worker(#[from] JoinError),
}

#[instrument(level = "info", skip(state, body), fields(lesson = %body.lesson_id, step = body.step, pattern_len = body.pattern.len()))]
pub fn evaluate_once(state: &AppState, body: &EvaluateIn) -> Result<EvaluationOut, LogicError> {
  let lesson = state
    .lesson(&body.lesson_id)
    .ok_or_else(|| LogicError::UnknownLesson(body.lesson_id.clone()))?;
  let def = lesson
    .steps
    .get(body.step)
    .ok_or(ControllerError::StepOutOfRange { step: body.step, total: lesson.steps.len() })?;

  let attempt = Attempt { pattern: &body.pattern, flags: &body.flags, changed: body.changed };
  let eval = evaluate_attempt(&EcmaEngine, &state.highlighter, def, attempt).map_err(ControllerError::from)?;
  let display = state.highlighter.display(&def.content, &eval.spans).map_err(ControllerError::from)?;
  debug!(target: "exercise", status = ?eval.status, spans = eval.spans.len(), "one-shot evaluation");

  Ok(EvaluationOut {
    status: eval.status,
    changed: body.changed,
    spans: eval.spans.iter().map(|s| SpanOut::from_span(&def.content, *s)).collect(),
    display,
    error: eval.error,
  })
}

/// `evaluate_once` on the blocking pool, giving up after `state.eval_timeout`.
///
/// Backtracking patterns can run for minutes on short input. On timeout the
/// attempt is reported with `Error` status; the worker is left to finish on
/// its own since the engine cannot be interrupted.
pub async fn evaluate_bounded(state: Arc<AppState>, body: EvaluateIn) -> Result<EvaluationOut, LogicError> {
  let lesson = state
    .lesson(&body.lesson_id)
    .ok_or_else(|| LogicError::UnknownLesson(body.lesson_id.clone()))?;
  let def = lesson
    .steps
    .get(body.step)
    .ok_or(ControllerError::StepOutOfRange { step: body.step, total: lesson.steps.len() })?;

  let limit = state.eval_timeout;
  let changed = body.changed;
  let worker_state = Arc::clone(&state);
  let task = tokio::task::spawn_blocking(move || evaluate_once(&worker_state, &body));
  match tokio::time::timeout(limit, task).await {
    Ok(joined) => joined?,
    Err(_) => {
      warn!(target: "exercise", lesson = %lesson.id, limit_ms = limit.as_millis() as u64, "pattern evaluation timed out");
      Ok(timed_out(&state.highlighter, &def.content, changed, limit))
    }
  }
}

/// Error-status evaluation for an attempt that ran past `limit`.
pub fn timed_out(highlighter: &Highlighter, content: &str, changed: bool, limit: Duration) -> EvaluationOut {
  EvaluationOut {
    status: AttemptStatus::Error,
    changed,
    spans: Vec::new(),
    display: highlighter.display(content, &[]).unwrap_or_else(|_| content.to_string()),
    error: Some(format!("pattern took longer than {} ms to evaluate", limit.as_millis())),
  }
}

/// Highest completed step for `lesson_id`; a failing store reads as 0.
#[instrument(level = "info", skip_all, fields(%lesson_id))]
pub fn progress_for(state: &AppState, lesson_id: &str) -> Result<usize, LogicError> {
  if state.lesson(lesson_id).is_none() {
    return Err(LogicError::UnknownLesson(lesson_id.to_string()));
  }
  match state.store.get(lesson_id) {
    Ok(record) => Ok(record.map_or(0, |r| r.last_step)),
    Err(e) => {
      warn!(target: "exercise", %lesson_id, error = %e, "progress store unavailable; reporting step 0");
      Ok(0)
    }
  }
}

pub fn step_out(c: &ExerciseStepController) -> Result<StepOut, ControllerError> {
  let def = c.definition()?;
  let attempt = c.attempt();
  Ok(StepOut {
    lesson_id: c.lesson().id.clone(),
    step: c.step().unwrap_or(0),
    total_steps: c.lesson().steps.len(),
    title: def.title.clone(),
    pattern: attempt.pattern.clone(),
    flags: attempt.flags.clone(),
    cursor_position: c.cursor_position(),
    interactive: def.interactive,
    read_only: def.read_only,
    use_flags_control: def.use_flags_control,
    literal_fallback: def.literal_fallback,
  })
}

pub fn evaluation_out(c: &ExerciseStepController) -> Result<EvaluationOut, ControllerError> {
  let content = &c.definition()?.content;
  Ok(to_evaluation_out(content, c.attempt(), c.display()?))
}

fn to_evaluation_out(content: &str, attempt: &AttemptState, display: String) -> EvaluationOut {
  EvaluationOut {
    status: attempt.status,
    changed: attempt.changed,
    spans: attempt.spans.iter().map(|s| SpanOut::from_span(content, *s)).collect(),
    display,
    error: attempt.error.clone(),
  }
}

pub fn hint(c: &ExerciseStepController) -> Result<ServerWsMessage, ControllerError> {
  let def = c.definition()?;
  Ok(ServerWsMessage::Hint {
    reference_patterns: def.reference_patterns.clone(),
    reference_flags: def.reference_flags.clone(),
  })
}
