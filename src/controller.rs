//! Step controller: the per-learner state machine driving one lesson.
//!
//! Every pattern or flag edit runs one complete evaluation (compile, grade,
//! highlight) before returning. Loading a step resets the attempt, decides
//! between review mode (pre-filled reference answer) and a fresh attempt from
//! stored progress, and evaluates once.
//!
//! The status listener fires whenever the status crosses the `Success`
//! boundary. Entering `Success` also records the step as completed.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::domain::{AttemptState, AttemptStatus, ExerciseDefinition, Lesson};
use crate::engine::{EcmaEngine, PatternEngine, Span};
use crate::grading::{Attempt, GradingPolicy};
use crate::highlight::{ContractViolation, Highlighter};
use crate::progress::ProgressStore;

pub type StatusListener = Box<dyn FnMut(bool) + Send>;

#[derive(Debug, Error)]
pub enum ControllerError {
  #[error("no step loaded")]
  NoStepLoaded,
  #[error("step {step} out of range (lesson has {total} steps)")]
  StepOutOfRange { step: usize, total: usize },
  #[error(transparent)]
  Contract(#[from] ContractViolation),
}

/// Result of grading one attempt against one exercise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Evaluation {
  pub status: AttemptStatus,
  pub spans: Vec<Span>,
  pub highlighted: String,
  pub error: Option<String>,
}

impl Evaluation {
  fn plain(def: &ExerciseDefinition, status: AttemptStatus, error: Option<String>) -> Self {
    Self { status, spans: Vec::new(), highlighted: def.content.clone(), error }
  }
}

/// Grade `attempt` against `def`. Pure: no progress reads or writes.
pub fn evaluate_attempt<E: PatternEngine>(
  engine: &E,
  highlighter: &Highlighter,
  def: &ExerciseDefinition,
  attempt: Attempt<'_>,
) -> Result<Evaluation, ContractViolation> {
  if !def.interactive {
    return Ok(Evaluation::plain(def, AttemptStatus::Success, None));
  }

  let grade = match GradingPolicy::for_exercise(def).grade(engine, def, attempt) {
    Ok(g) => g,
    Err(e) => {
      debug!(target: "exercise", error = %e, pattern_len = attempt.pattern.len(), "pattern rejected");
      return Ok(Evaluation::plain(def, AttemptStatus::Error, Some(e.to_string())));
    }
  };

  let highlighted = highlighter.highlight(&def.content, &grade.spans)?;
  let status = if grade.success {
    AttemptStatus::Success
  } else if grade.matched {
    AttemptStatus::Matched
  } else {
    AttemptStatus::Error
  };
  Ok(Evaluation { status, spans: grade.spans, highlighted, error: None })
}

pub struct ExerciseStepController<E: PatternEngine = EcmaEngine> {
  lesson: Arc<Lesson>,
  engine: E,
  store: Arc<dyn ProgressStore>,
  highlighter: Highlighter,
  listener: Option<StatusListener>,
  step: Option<usize>,
  attempt: AttemptState,
}

impl<E: PatternEngine> ExerciseStepController<E> {
  pub fn new(lesson: Arc<Lesson>, engine: E, store: Arc<dyn ProgressStore>, highlighter: Highlighter) -> Self {
    Self {
      lesson,
      engine,
      store,
      highlighter,
      listener: None,
      step: None,
      attempt: AttemptState::default(),
    }
  }

  /// Register the callback invoked with `true` on entering `Success` and `false` on leaving it.
  pub fn on_status_changed(mut self, listener: impl FnMut(bool) + Send + 'static) -> Self {
    self.listener = Some(Box::new(listener));
    self
  }

  pub fn lesson(&self) -> &Lesson {
    &self.lesson
  }

  pub fn step(&self) -> Option<usize> {
    self.step
  }

  pub fn attempt(&self) -> &AttemptState {
    &self.attempt
  }

  pub fn definition(&self) -> Result<&ExerciseDefinition, ControllerError> {
    let step = self.step.ok_or(ControllerError::NoStepLoaded)?;
    self.lesson.steps.get(step).ok_or(ControllerError::StepOutOfRange { step, total: self.lesson.steps.len() })
  }

  pub fn policy(&self) -> Result<GradingPolicy, ControllerError> {
    Ok(GradingPolicy::for_exercise(self.definition()?))
  }

  /// Caret offset the input should be restored to after a step load.
  pub fn cursor_position(&self) -> usize {
    self.definition().map(|d| d.cursor_position).unwrap_or(0)
  }

  /// Highlighted content as displayed, with line breaks rendered.
  pub fn display(&self) -> Result<String, ControllerError> {
    let def = self.definition()?;
    Ok(self.highlighter.display(&def.content, &self.attempt.spans)?)
  }

  #[instrument(level = "info", skip(self), fields(lesson = %self.lesson.id))]
  pub fn load_step(&mut self, step: usize) -> Result<&AttemptState, ControllerError> {
    let lesson = Arc::clone(&self.lesson);
    let def = lesson
      .steps
      .get(step)
      .ok_or(ControllerError::StepOutOfRange { step, total: lesson.steps.len() })?;

    self.step = Some(step);
    self.set_status(AttemptStatus::Idle);

    let review = step < self.last_completed_step();
    let (pattern, flags) = if review {
      (def.reference_pattern().unwrap_or_default(), def.reference_flags.as_str())
    } else {
      (def.initial_value.as_str(), def.initial_flags.as_str())
    };
    self.attempt = AttemptState {
      pattern: pattern.to_string(),
      flags: flags.to_string(),
      changed: false,
      status: AttemptStatus::Idle,
      spans: Vec::new(),
      highlighted: def.content.clone(),
      error: None,
    };
    info!(target: "exercise", step, review, interactive = def.interactive, "step loaded");

    self.evaluate()?;
    Ok(&self.attempt)
  }

  pub fn next_step(&mut self) -> Result<&AttemptState, ControllerError> {
    let next = self.step.map_or(0, |s| s + 1);
    self.load_step(next)
  }

  #[instrument(level = "debug", skip(self, pattern), fields(lesson = %self.lesson.id, pattern_len = pattern.len()))]
  pub fn set_pattern(&mut self, pattern: &str) -> Result<&AttemptState, ControllerError> {
    self.definition()?;
    self.attempt.pattern = pattern.to_string();
    self.attempt.changed = true;
    self.evaluate()?;
    Ok(&self.attempt)
  }

  #[instrument(level = "debug", skip(self), fields(lesson = %self.lesson.id))]
  pub fn set_flags(&mut self, flags: &str) -> Result<&AttemptState, ControllerError> {
    self.definition()?;
    self.attempt.flags = flags.to_string();
    self.attempt.changed = true;
    self.evaluate()?;
    Ok(&self.attempt)
  }

  /// Force `Success` without checking the pattern. Only the literal-fallback
  /// policy offers this; returns whether the skip was applied.
  #[instrument(level = "info", skip(self), fields(lesson = %self.lesson.id))]
  pub fn skip(&mut self) -> Result<bool, ControllerError> {
    if !self.policy()?.allows_skip() {
      debug!(target: "exercise", "skip ignored: step is graded by running the pattern");
      return Ok(false);
    }
    self.attempt.error = None;
    self.set_status(AttemptStatus::Success);
    Ok(true)
  }

  fn evaluate(&mut self) -> Result<(), ControllerError> {
    let lesson = Arc::clone(&self.lesson);
    let def = match self.step.and_then(|s| lesson.steps.get(s)) {
      Some(d) => d,
      None => return Err(ControllerError::NoStepLoaded),
    };
    let attempt = Attempt {
      pattern: &self.attempt.pattern,
      flags: &self.attempt.flags,
      changed: self.attempt.changed,
    };

    match evaluate_attempt(&self.engine, &self.highlighter, def, attempt) {
      Ok(eval) => {
        self.attempt.spans = eval.spans;
        self.attempt.highlighted = eval.highlighted;
        self.attempt.error = eval.error;
        self.set_status(eval.status);
        Ok(())
      }
      Err(violation) => {
        self.attempt.spans.clear();
        self.attempt.highlighted = def.content.clone();
        self.attempt.error = Some(violation.to_string());
        self.set_status(AttemptStatus::Error);
        Err(violation.into())
      }
    }
  }

  fn set_status(&mut self, status: AttemptStatus) {
    let was_success = self.attempt.status == AttemptStatus::Success;
    let is_success = status == AttemptStatus::Success;
    self.attempt.status = status;
    if was_success == is_success {
      return;
    }
    if is_success {
      self.record_completion();
    }
    if let Some(listener) = self.listener.as_mut() {
      listener(is_success);
    }
  }

  fn last_completed_step(&self) -> usize {
    match self.store.get(&self.lesson.id) {
      Ok(record) => record.map_or(0, |r| r.last_step),
      Err(e) => {
        warn!(target: "exercise", lesson = %self.lesson.id, error = %e, "progress store unavailable; starting fresh");
        0
      }
    }
  }

  fn record_completion(&self) {
    let Some(step) = self.step else { return };
    let completed = step + 1;
    if self.last_completed_step() >= completed {
      return;
    }
    match self.store.set(&self.lesson.id, completed) {
      Ok(()) => info!(target: "exercise", lesson = %self.lesson.id, last_step = completed, "progress recorded"),
      Err(e) => warn!(target: "exercise", lesson = %self.lesson.id, error = %e, "progress store unavailable; completion not saved"),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use super::*;
  use crate::engine::{CompileError, Matcher};
  use crate::progress::{MemoryProgressStore, ProgressRecord, StoreError};

  fn step(content: &str, reference: &str, flags: &str) -> ExerciseDefinition {
    ExerciseDefinition {
      title: "step".into(),
      content: content.into(),
      reference_patterns: vec![reference.into()],
      reference_flags: flags.into(),
      interactive: true,
      ..Default::default()
    }
  }

  fn lesson(steps: Vec<ExerciseDefinition>) -> Arc<Lesson> {
    Arc::new(Lesson { id: "basics".into(), title: "Basics".into(), description: String::new(), steps })
  }

  fn controller(steps: Vec<ExerciseDefinition>, store: Arc<dyn ProgressStore>) -> ExerciseStepController {
    ExerciseStepController::new(lesson(steps), EcmaEngine, store, Highlighter::default())
  }

  fn recorder() -> (Arc<Mutex<Vec<bool>>>, impl FnMut(bool) + Send + 'static) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    (events, move |s| sink.lock().unwrap().push(s))
  }

  #[test]
  fn scenario_cat_dog_cat() {
    let store = Arc::new(MemoryProgressStore::default());
    let mut c = controller(vec![step("cat dog cat", "cat", "g")], store);
    c.load_step(0).unwrap();
    c.set_flags("g").unwrap();
    let a = c.set_pattern("cat").unwrap();
    assert_eq!(a.status, AttemptStatus::Success);
    assert_eq!(a.spans, vec![Span::new(0, 3), Span::new(8, 11)]);
    assert_eq!(
      a.highlighted,
      "<span class=\"result-tag\">cat</span> dog <span class=\"result-tag\">cat</span>"
    );
  }

  #[test]
  fn fresh_step_starts_from_initial_values() {
    let mut d = step("abc", "abc", "g");
    d.initial_value = "a".into();
    d.initial_flags = "i".into();
    d.cursor_position = 1;
    let mut c = controller(vec![d], Arc::new(MemoryProgressStore::default()));
    let a = c.load_step(0).unwrap().clone();
    assert_eq!((a.pattern.as_str(), a.flags.as_str()), ("a", "i"));
    assert!(!a.changed);
    // Unedited default with a match passes without comparing spans.
    assert_eq!(a.status, AttemptStatus::Success);
    assert_eq!(c.cursor_position(), 1);
  }

  #[test]
  fn empty_initial_value_is_an_error_not_a_failure() {
    let mut c = controller(vec![step("abc", "abc", "g")], Arc::new(MemoryProgressStore::default()));
    let a = c.load_step(0).unwrap();
    assert_eq!(a.status, AttemptStatus::Error);
    assert_eq!(a.highlighted, "abc");
    assert_eq!(a.error, None);
  }

  #[test]
  fn review_mode_prefills_reference() {
    let store = Arc::new(MemoryProgressStore::default());
    store.set("basics", 2).unwrap();
    let mut c = controller(vec![step("x", "x", "g"), step("yy", "y+", "gi"), step("z", "z", "")], store);

    let a = c.load_step(1).unwrap();
    assert_eq!((a.pattern.as_str(), a.flags.as_str()), ("y+", "gi"));
    assert_eq!(a.status, AttemptStatus::Success);

    let a = c.load_step(2).unwrap();
    assert_eq!(a.pattern, "");
    assert_eq!(a.flags, "");
  }

  #[test]
  fn edits_mark_changed_and_reevaluate() {
    let mut c = controller(vec![step("cat dog cat", "cat", "g")], Arc::new(MemoryProgressStore::default()));
    c.load_step(0).unwrap();
    let a = c.set_pattern("dog").unwrap();
    assert!(a.changed);
    assert_eq!(a.status, AttemptStatus::Matched);
    assert_eq!(a.spans, vec![Span::new(4, 7)]);

    let a = c.set_pattern("cat").unwrap();
    // Flags are still empty, so only the first cat matches.
    assert_eq!(a.status, AttemptStatus::Matched);
    let a = c.set_flags("g").unwrap();
    assert_eq!(a.status, AttemptStatus::Success);
  }

  #[test]
  fn invalid_pattern_keeps_content_unmodified() {
    let mut c = controller(vec![step("a<b", "b", "g")], Arc::new(MemoryProgressStore::default()));
    c.load_step(0).unwrap();
    c.set_pattern("b").unwrap();
    let a = c.set_pattern("[b").unwrap();
    assert_eq!(a.status, AttemptStatus::Error);
    assert!(a.spans.is_empty());
    assert_eq!(a.highlighted, "a<b");
    assert!(a.error.is_some());
  }

  #[test]
  fn non_interactive_step_succeeds_without_the_engine() {
    struct PanickingEngine;
    impl PatternEngine for PanickingEngine {
      type Matcher = NoMatches;
      fn compile(&self, _: &str, _: &str) -> Result<NoMatches, CompileError> {
        panic!("engine must not run for non-interactive steps");
      }
    }
    struct NoMatches;
    impl Matcher for NoMatches {
      fn find_all(&self, _: &str) -> Vec<Span> { Vec::new() }
    }

    let mut d = step("read this", "(", "");
    d.interactive = false;
    let mut c = ExerciseStepController::new(
      lesson(vec![d]),
      PanickingEngine,
      Arc::new(MemoryProgressStore::default()),
      Highlighter::default(),
    );
    assert_eq!(c.load_step(0).unwrap().status, AttemptStatus::Success);
    assert_eq!(c.set_pattern("anything(").unwrap().status, AttemptStatus::Success);
  }

  #[test]
  fn literal_fallback_scenario() {
    let mut d = step("aaa", "^a+$", "");
    d.literal_fallback = true;
    let mut c = controller(vec![d], Arc::new(MemoryProgressStore::default()));
    c.load_step(0).unwrap();
    let a = c.set_pattern("^a+$").unwrap();
    assert_eq!(a.status, AttemptStatus::Success);
    assert_eq!(a.highlighted, "aaa");
    assert_eq!(c.set_pattern("a+").unwrap().status, AttemptStatus::Error);
  }

  #[test]
  fn skip_only_under_literal_fallback() {
    let mut d = step("aaa", "^a+$", "");
    d.literal_fallback = true;
    let (events, listener) = recorder();
    let mut c = controller(vec![d, step("b", "b", "")], Arc::new(MemoryProgressStore::default())).on_status_changed(listener);
    c.load_step(0).unwrap();
    assert!(c.skip().unwrap());
    assert_eq!(c.attempt().status, AttemptStatus::Success);
    assert_eq!(*events.lock().unwrap(), vec![true]);

    c.load_step(1).unwrap();
    assert!(!c.skip().unwrap());
    assert_eq!(c.attempt().status, AttemptStatus::Error);
  }

  #[test]
  fn listener_fires_on_each_boundary_crossing() {
    let (events, listener) = recorder();
    let mut c = controller(vec![step("cat", "cat", "")], Arc::new(MemoryProgressStore::default())).on_status_changed(listener);
    c.load_step(0).unwrap();
    c.set_pattern("c").unwrap();
    c.set_pattern("ca").unwrap();
    c.set_pattern("cat").unwrap();
    c.set_flags("").unwrap();
    c.set_pattern("cat!").unwrap();
    c.set_pattern("cat").unwrap();
    assert_eq!(*events.lock().unwrap(), vec![true, false, true]);
  }

  #[test]
  fn step_change_leaves_success() {
    let (events, listener) = recorder();
    let mut c = controller(vec![step("cat", "cat", ""), step("dog", "dog", "")], Arc::new(MemoryProgressStore::default()))
      .on_status_changed(listener);
    c.load_step(0).unwrap();
    c.set_pattern("cat").unwrap();
    let a = c.next_step().unwrap();
    assert_eq!(a.status, AttemptStatus::Error);
    assert!(!a.changed);
    assert_eq!(c.step(), Some(1));
    assert_eq!(*events.lock().unwrap(), vec![true, false]);
  }

  #[test]
  fn success_records_progress_monotonically() {
    let store = Arc::new(MemoryProgressStore::default());
    let mut c = controller(vec![step("cat", "cat", ""), step("dog", "dog", "")], store.clone());
    c.load_step(1).unwrap();
    c.set_pattern("dog").unwrap();
    assert_eq!(store.get("basics").unwrap(), Some(ProgressRecord { last_step: 2 }));

    c.load_step(0).unwrap();
    c.set_pattern("cat").unwrap();
    assert_eq!(store.get("basics").unwrap(), Some(ProgressRecord { last_step: 2 }));
  }

  #[test]
  fn unavailable_store_falls_back_to_fresh_attempts() {
    struct BrokenStore;
    impl ProgressStore for BrokenStore {
      fn get(&self, _: &str) -> Result<Option<ProgressRecord>, StoreError> {
        Err(std::io::Error::other("disk gone").into())
      }
      fn set(&self, _: &str, _: usize) -> Result<(), StoreError> {
        Err(std::io::Error::other("disk gone").into())
      }
    }

    let mut d = step("cat", "cat", "");
    d.initial_value = "c".into();
    let mut c = controller(vec![d], Arc::new(BrokenStore));
    assert_eq!(c.load_step(0).unwrap().pattern, "c");
    assert_eq!(c.set_pattern("cat").unwrap().status, AttemptStatus::Success);
  }

  #[test]
  fn overlapping_engine_spans_are_reported() {
    struct OverlapEngine;
    struct OverlapMatcher;
    impl PatternEngine for OverlapEngine {
      type Matcher = OverlapMatcher;
      fn compile(&self, _: &str, _: &str) -> Result<OverlapMatcher, CompileError> {
        Ok(OverlapMatcher)
      }
    }
    impl Matcher for OverlapMatcher {
      fn find_all(&self, _: &str) -> Vec<Span> { vec![Span::new(0, 2), Span::new(1, 3)] }
    }

    let mut c = ExerciseStepController::new(
      lesson(vec![step("abc", "abc", "")]),
      OverlapEngine,
      Arc::new(MemoryProgressStore::default()),
      Highlighter::default(),
    );
    c.load_step(0).unwrap();
    let err = c.set_pattern("ab").unwrap_err();
    assert!(matches!(err, ControllerError::Contract(ContractViolation::Overlap { .. })));
    assert_eq!(c.attempt().status, AttemptStatus::Error);
    assert_eq!(c.attempt().highlighted, "abc");
  }

  #[test]
  fn edits_before_loading_fail() {
    let mut c = controller(vec![step("a", "a", "")], Arc::new(MemoryProgressStore::default()));
    assert!(matches!(c.set_pattern("a"), Err(ControllerError::NoStepLoaded)));
    assert!(matches!(c.load_step(3), Err(ControllerError::StepOutOfRange { step: 3, total: 1 })));
  }

  #[test]
  fn display_renders_breaks() {
    let mut c = controller(vec![step("a\nb", "b", "")], Arc::new(MemoryProgressStore::default()));
    c.load_step(0).unwrap();
    c.set_pattern("b").unwrap();
    assert_eq!(c.display().unwrap(), "a<br /><span class=\"result-tag\">b</span>");
  }
}
