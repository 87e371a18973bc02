//! Grading policies: decide whether an attempt matched and whether it passes.

use tracing::{debug, warn};

use crate::domain::ExerciseDefinition;
use crate::engine::{CompileError, Matcher, PatternEngine, Span};

/// Learner input at the moment of evaluation.
#[derive(Clone, Copy, Debug)]
pub struct Attempt<'a> {
  pub pattern: &'a str,
  pub flags: &'a str,
  pub changed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GradingPolicy {
  /// Run the pattern and compare spans with the reference pattern's spans.
  Standard,
  /// Exact string comparison with the first reference pattern; the engine is never called.
  LiteralFallback,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Grade {
  pub spans: Vec<Span>,
  pub matched: bool,
  pub success: bool,
}

impl GradingPolicy {
  pub fn for_exercise(def: &ExerciseDefinition) -> Self {
    if def.literal_fallback { Self::LiteralFallback } else { Self::Standard }
  }

  /// Whether a manual skip may force success under this policy.
  pub fn allows_skip(self) -> bool {
    matches!(self, Self::LiteralFallback)
  }

  pub fn grade<E: PatternEngine>(
    self,
    engine: &E,
    def: &ExerciseDefinition,
    attempt: Attempt<'_>,
  ) -> Result<Grade, CompileError> {
    match self {
      Self::Standard => grade_standard(engine, def, attempt),
      Self::LiteralFallback => Ok(grade_literal(def, attempt)),
    }
  }
}

fn grade_standard<E: PatternEngine>(
  engine: &E,
  def: &ExerciseDefinition,
  attempt: Attempt<'_>,
) -> Result<Grade, CompileError> {
  let matcher = engine.compile(attempt.pattern, attempt.flags)?;
  if attempt.pattern.is_empty() {
    return Ok(Grade::default());
  }

  let spans = matcher.find_all(&def.content);
  let matched = spans.iter().any(|s| !s.is_empty());
  // Untouched defaults pass on any match; edited attempts must reproduce the reference spans.
  let success = matched && (!attempt.changed || reference_spans(engine, def).as_deref() == Some(spans.as_slice()));

  debug!(target: "exercise", span_count = spans.len(), matched, success, changed = attempt.changed, "standard grade");
  Ok(Grade { spans, matched, success })
}

fn reference_spans<E: PatternEngine>(engine: &E, def: &ExerciseDefinition) -> Option<Vec<Span>> {
  let Some(reference) = def.reference_pattern() else {
    warn!(target: "exercise", title = %def.title, "exercise has no reference pattern");
    return None;
  };
  match engine.compile(reference, &def.reference_flags) {
    Ok(m) => Some(m.find_all(&def.content)),
    Err(e) => {
      warn!(target: "exercise", title = %def.title, error = %e, "reference pattern does not compile");
      None
    }
  }
}

fn grade_literal(def: &ExerciseDefinition, attempt: Attempt<'_>) -> Grade {
  let success = def.reference_pattern() == Some(attempt.pattern);
  debug!(target: "exercise", success, "literal grade");
  Grade { spans: Vec::new(), matched: success, success }
}
