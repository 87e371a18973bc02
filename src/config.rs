//! Loading service configuration (progress store, highlighting, evaluation bound, lesson bank) from TOML.
//!
//! See `AppConfig` for the expected schema. Every section is optional.

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::Lesson;
use crate::highlight::DEFAULT_TAG_CLASS;

pub const CONFIG_PATH_ENV: &str = "REGEXLAB_CONFIG_PATH";
pub const PROGRESS_PATH_ENV: &str = "PROGRESS_PATH";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub progress: ProgressCfg,
  #[serde(default)]
  pub highlight: HighlightCfg,
  #[serde(default)]
  pub evaluation: EvaluationCfg,
  /// Extra lessons. An entry with the id of a built-in lesson replaces it.
  #[serde(default)]
  pub lessons: Vec<Lesson>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProgressCfg {
  #[serde(default = "default_progress_path")]
  pub path: String,
}

impl Default for ProgressCfg {
  fn default() -> Self {
    Self { path: default_progress_path() }
  }
}

fn default_progress_path() -> String {
  "./data/progress.json".into()
}

#[derive(Clone, Debug, Deserialize)]
pub struct HighlightCfg {
  /// CSS class put on every highlighted match.
  #[serde(default = "default_tag_class")]
  pub class: String,
  /// Render `\n` as `<br />` in the displayed content.
  #[serde(default = "default_line_breaks")]
  pub line_breaks: bool,
}

impl Default for HighlightCfg {
  fn default() -> Self {
    Self { class: default_tag_class(), line_breaks: default_line_breaks() }
  }
}

fn default_tag_class() -> String {
  DEFAULT_TAG_CLASS.into()
}

fn default_line_breaks() -> bool {
  true
}

#[derive(Clone, Debug, Deserialize)]
pub struct EvaluationCfg {
  /// Longest a learner pattern may run before the attempt is reported as an error.
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
}

impl Default for EvaluationCfg {
  fn default() -> Self {
    Self { timeout_ms: default_timeout_ms() }
  }
}

fn default_timeout_ms() -> u64 {
  1000
}

pub fn parse_config(s: &str) -> Result<AppConfig, toml::de::Error> {
  toml::from_str::<AppConfig>(s)
}

/// Attempt to load `AppConfig` from REGEXLAB_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_config_from_env() -> Option<AppConfig> {
  let path = std::env::var(CONFIG_PATH_ENV).ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_config(&s) {
      Ok(cfg) => {
        info!(target: "regexlab_backend", %path, lessons = cfg.lessons.len(), "Loaded config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "regexlab_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "regexlab_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
