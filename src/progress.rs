//! Learner progress: the highest completed step per lesson.
//!
//! Records live under the key `"lesson." + lesson_id` with the shape
//! `{ "lastStep": n }`. A missing record means step 0. Every `set` is a
//! monotonic max update, so concurrent writers can only move progress forward.

use std::{
  collections::{BTreeMap, HashMap},
  fs::{self, File, OpenOptions},
  io::ErrorKind,
  path::{Path, PathBuf},
  sync::Mutex,
};

use fd_lock::RwLock;
use tempfile::NamedTempFile;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

const KEY_PREFIX: &str = "lesson.";

pub fn record_key(lesson_id: &str) -> String {
  format!("{KEY_PREFIX}{lesson_id}")
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
  pub last_step: usize,
}

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("progress store io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("progress store is not valid JSON: {0}")]
  Json(#[from] serde_json::Error),
}

pub trait ProgressStore: Send + Sync {
  fn get(&self, lesson_id: &str) -> Result<Option<ProgressRecord>, StoreError>;
  /// Store `step` unless a higher value is already recorded.
  fn set(&self, lesson_id: &str, step: usize) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryProgressStore {
  records: Mutex<HashMap<String, ProgressRecord>>,
}

impl ProgressStore for MemoryProgressStore {
  fn get(&self, lesson_id: &str) -> Result<Option<ProgressRecord>, StoreError> {
    let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
    Ok(records.get(&record_key(lesson_id)).copied())
  }

  fn set(&self, lesson_id: &str, step: usize) -> Result<(), StoreError> {
    let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
    let entry = records.entry(record_key(lesson_id)).or_default();
    entry.last_step = entry.last_step.max(step);
    Ok(())
  }
}

type Records = BTreeMap<String, ProgressRecord>;

/// JSON file holding every record.
///
/// Every `set` holds an exclusive advisory lock on a sibling `.lock` file for
/// the whole read-modify-write, so store instances in this or another process
/// never overwrite each other. The new map is written to a uniquely named temp
/// file in the same directory and renamed over the store.
#[derive(Debug)]
pub struct FileProgressStore {
  path: PathBuf,
  lock_path: PathBuf,
}

impl FileProgressStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    let path = path.into();
    let mut lock_path = path.clone().into_os_string();
    lock_path.push(".lock");
    Self { path, lock_path: lock_path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn dir(&self) -> &Path {
    self.path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."))
  }

  fn open_lock_file(&self) -> Result<File, StoreError> {
    fs::create_dir_all(self.dir())?;
    Ok(OpenOptions::new().create(true).truncate(false).read(true).write(true).open(&self.lock_path)?)
  }

  fn read_all(&self) -> Result<Records, StoreError> {
    match fs::read_to_string(&self.path) {
      Ok(s) if s.trim().is_empty() => Ok(Records::new()),
      Ok(s) => Ok(serde_json::from_str(&s)?),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(Records::new()),
      Err(e) => Err(e.into()),
    }
  }

  fn write_all(&self, records: &Records) -> Result<(), StoreError> {
    let mut tmp = NamedTempFile::new_in(self.dir())?;
    serde_json::to_writer_pretty(&mut tmp, records)?;
    tmp.as_file().sync_all()?;
    tmp.persist(&self.path).map_err(|e| e.error)?;
    Ok(())
  }
}

impl ProgressStore for FileProgressStore {
  // Readers skip the lock: the store file is only ever replaced by rename.
  #[instrument(level = "debug", skip(self), fields(path = %self.path.display()))]
  fn get(&self, lesson_id: &str) -> Result<Option<ProgressRecord>, StoreError> {
    Ok(self.read_all()?.get(&record_key(lesson_id)).copied())
  }

  #[instrument(level = "debug", skip(self), fields(path = %self.path.display()))]
  fn set(&self, lesson_id: &str, step: usize) -> Result<(), StoreError> {
    let mut lock = RwLock::new(self.open_lock_file()?);
    let _guard = lock.write()?;
    let mut records = self.read_all()?;
    let entry = records.entry(record_key(lesson_id)).or_default();
    if entry.last_step >= step {
      debug!(target: "exercise", %lesson_id, step, stored = entry.last_step, "progress already ahead; skipping write");
      return Ok(());
    }
    entry.last_step = step;
    self.write_all(&records)
  }
}
