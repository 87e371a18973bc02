//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{AttemptStatus, Lesson};
use crate::engine::Span;
use crate::util::utf16_offset;

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    LoadStep {
        #[serde(rename = "lessonId")]
        lesson_id: String,
        step: usize,
    },
    SetPattern {
        pattern: String,
    },
    SetFlags {
        flags: String,
    },
    /// Only honoured on literal-fallback steps.
    Skip,
    Hint,
    NextStep,
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Step(StepOut),
    Evaluation(EvaluationOut),
    StatusChanged {
        success: bool,
    },
    Hint {
        #[serde(rename = "referencePatterns")]
        reference_patterns: Vec<String>,
        #[serde(rename = "referenceFlags")]
        reference_flags: String,
    },
    Error {
        message: String,
    },
}

/// Everything the presentation layer needs to set up a step.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOut {
    pub lesson_id: String,
    pub step: usize,
    pub total_steps: usize,
    pub title: String,
    pub pattern: String,
    pub flags: String,
    pub cursor_position: usize,
    pub interactive: bool,
    pub read_only: bool,
    pub use_flags_control: bool,
    pub literal_fallback: bool,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SpanOut {
    pub start: usize,
    pub end: usize,
    pub utf16_start: usize,
    pub utf16_end: usize,
}

impl SpanOut {
    pub fn from_span(content: &str, span: Span) -> Self {
        Self {
            start: span.start,
            end: span.end,
            utf16_start: utf16_offset(content, span.start),
            utf16_end: utf16_offset(content, span.end),
        }
    }
}

/// Result of one evaluation. `display` is the step content, HTML-escaped, with
/// matches wrapped in tags; clients inject it as-is.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationOut {
    pub status: AttemptStatus,
    pub changed: bool,
    pub spans: Vec<SpanOut>,
    pub display: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

//
// HTTP request/response DTOs
//

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct LessonSummaryOut {
    pub id: String,
    pub title: String,
    pub description: String,
    pub steps: usize,
}

impl From<&Lesson> for LessonSummaryOut {
    fn from(l: &Lesson) -> Self {
        Self {
            id: l.id.clone(),
            title: l.title.clone(),
            description: l.description.clone(),
            steps: l.steps.len(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EvaluateIn {
    #[serde(rename = "lessonId")]
    pub lesson_id: String,
    pub step: usize,
    pub pattern: String,
    #[serde(default)]
    pub flags: String,
    #[serde(default = "default_changed")]
    pub changed: bool,
}

fn default_changed() -> bool {
    true
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressOut {
    pub lesson_id: String,
    pub last_step: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorOut {
    pub message: String,
}
