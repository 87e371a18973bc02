//! Domain models: lessons, exercise steps and the per-step attempt state.

use serde::{Deserialize, Serialize};

use crate::engine::Span;

fn default_true() -> bool { true }

/// One step of a lesson. Immutable once loaded.
///
/// Config files spell fields in snake_case; JSON responses use camelCase like
/// every other outbound message.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct ExerciseDefinition {
  #[serde(default)] pub title: String,
  /// Sample text the learner's pattern runs against.
  #[serde(default)] pub content: String,
  /// Acceptable answers. Only the first one is graded; the rest are shown as hints.
  #[serde(default)] pub reference_patterns: Vec<String>,
  #[serde(default)] pub reference_flags: String,
  #[serde(default)] pub initial_value: String,
  #[serde(default)] pub initial_flags: String,
  /// Non-interactive steps (explanations) succeed without evaluation.
  #[serde(default = "default_true")] pub interactive: bool,
  #[serde(default)] pub read_only: bool,
  #[serde(default)] pub use_flags_control: bool,
  /// Grade by exact string comparison instead of running the pattern.
  #[serde(default)] pub literal_fallback: bool,
  #[serde(default)] pub cursor_position: usize,
}

impl ExerciseDefinition {
  pub fn reference_pattern(&self) -> Option<&str> {
    self.reference_patterns.first().map(String::as_str)
  }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct Lesson {
  pub id: String,
  pub title: String,
  #[serde(default)] pub description: String,
  #[serde(default)] pub steps: Vec<ExerciseDefinition>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
  /// Nothing evaluated yet for this step.
  #[default]
  Idle,
  Error,
  /// Pattern matched something but is not accepted yet.
  Matched,
  Success,
}

/// Mutable learner state for the active step.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttemptState {
  pub pattern: String,
  pub flags: String,
  pub changed: bool,
  pub status: AttemptStatus,
  pub spans: Vec<Span>,
  /// Tagged copy of the step content; the raw content when nothing is highlighted.
  /// Kept for grading checks only: clients receive the always-escaped `display`.
  pub highlighted: String,
  /// Compile error text, when the pattern or flags were rejected.
  pub error: Option<String>,
}
