//! Application state: lesson catalogue, progress store and highlighting settings.
//!
//! This module owns:
//!   - lessons by id (built-in seeds overlaid with config lessons) and their order
//!   - the durable progress store shared by every connection
//!   - the highlighter built from config
//!   - how long a single pattern evaluation may run
//!
//! Per-learner state is not kept here: each WebSocket connection owns its
//! own `ExerciseStepController`.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tracing::{info, instrument};

use crate::config::{load_config_from_env, AppConfig, PROGRESS_PATH_ENV};
use crate::controller::ExerciseStepController;
use crate::domain::Lesson;
use crate::engine::EcmaEngine;
use crate::highlight::Highlighter;
use crate::progress::{FileProgressStore, ProgressStore};
use crate::seeds::seed_lessons;

#[derive(Clone)]
pub struct AppState {
  pub lessons: Arc<HashMap<String, Arc<Lesson>>>,
  pub order: Arc<Vec<String>>,
  pub store: Arc<dyn ProgressStore>,
  pub highlighter: Highlighter,
  pub eval_timeout: Duration,
}

impl AppState {
  /// Build state from env: load config, overlay lessons on seeds, open the progress file.
  #[instrument(level = "info", skip_all)]
  pub fn new() -> Self {
    let cfg = load_config_from_env().unwrap_or_default();
    let path = std::env::var(PROGRESS_PATH_ENV).unwrap_or_else(|_| cfg.progress.path.clone());
    let store = FileProgressStore::new(path);
    info!(target: "regexlab_backend", path = %store.path().display(), "Progress store ready");
    Self::from_parts(cfg, Arc::new(store))
  }

  pub fn from_parts(cfg: AppConfig, store: Arc<dyn ProgressStore>) -> Self {
    let mut by_id = HashMap::<String, Arc<Lesson>>::new();
    let mut order = Vec::<String>::new();

    // Seeds first; config lessons with the same id replace them in place.
    for lesson in seed_lessons().into_iter().chain(cfg.lessons) {
      if !by_id.contains_key(&lesson.id) {
        order.push(lesson.id.clone());
      }
      by_id.insert(lesson.id.clone(), Arc::new(lesson));
    }

    for id in &order {
      let steps = by_id.get(id).map_or(0, |l| l.steps.len());
      info!(target: "exercise", lesson = %id, steps, "Lesson available");
    }

    Self {
      lessons: Arc::new(by_id),
      order: Arc::new(order),
      store,
      highlighter: Highlighter::new(&cfg.highlight.class, cfg.highlight.line_breaks),
      eval_timeout: Duration::from_millis(cfg.evaluation.timeout_ms),
    }
  }

  pub fn lesson(&self, id: &str) -> Option<Arc<Lesson>> {
    self.lessons.get(id).cloned()
  }

  /// Lessons in catalogue order.
  pub fn lessons_in_order(&self) -> Vec<Arc<Lesson>> {
    self.order.iter().filter_map(|id| self.lesson(id)).collect()
  }

  /// Fresh controller for one learner working through `lesson_id`.
  pub fn controller(&self, lesson_id: &str) -> Option<ExerciseStepController> {
    let lesson = self.lesson(lesson_id)?;
    Some(ExerciseStepController::new(lesson, EcmaEngine, Arc::clone(&self.store), self.highlighter.clone()))
  }
}
