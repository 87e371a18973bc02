//! Pattern engine seam: compiles a learner pattern plus JavaScript-style flags
//! into a matcher and reports match spans.
//!
//! The default implementation (`EcmaEngine`) is backed by `regress`, which
//! follows EcmaScript regex syntax, so lessons written for browser regexes
//! behave the same here.

use std::ops::Range;

use thiserror::Error;

/// Flag letters a JavaScript `RegExp` accepts.
const KNOWN_FLAGS: &str = "dgimsuvy";
/// Flags that change how the pattern itself matches; forwarded to `regress`.
const ENGINE_FLAGS: &str = "imsuv";

/// Half-open byte range `[start, end)` into the subject string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Span {
  pub start: usize,
  pub end: usize,
}

impl Span {
  pub fn new(start: usize, end: usize) -> Self {
    Self { start, end }
  }

  pub fn is_empty(&self) -> bool {
    self.start >= self.end
  }

  pub fn range(&self) -> Range<usize> {
    self.start..self.end
  }
}

impl From<Range<usize>> for Span {
  fn from(r: Range<usize>) -> Self {
    Self::new(r.start, r.end)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
  #[error("invalid flag '{0}'")]
  InvalidFlag(char),
  #[error("duplicate flag '{0}'")]
  DuplicateFlag(char),
  #[error("flags 'u' and 'v' cannot be combined")]
  UnicodeModeConflict,
  #[error("invalid pattern: {0}")]
  Syntax(String),
}

/// Something that can find the matches of an already compiled pattern.
pub trait Matcher {
  /// Ordered (by `start`), non-overlapping spans. May contain zero-length spans.
  fn find_all(&self, subject: &str) -> Vec<Span>;
}

pub trait PatternEngine {
  type Matcher: Matcher;

  fn compile(&self, pattern: &str, flags: &str) -> Result<Self::Matcher, CompileError>;
}

/// Parsed JavaScript flag string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlagSet {
  pub global: bool,
  pub sticky: bool,
  engine: String,
}

impl FlagSet {
  pub fn parse(flags: &str) -> Result<Self, CompileError> {
    let mut seen = String::with_capacity(flags.len());
    let mut set = FlagSet::default();
    for c in flags.chars() {
      if !KNOWN_FLAGS.contains(c) {
        return Err(CompileError::InvalidFlag(c));
      }
      if seen.contains(c) {
        return Err(CompileError::DuplicateFlag(c));
      }
      seen.push(c);
      match c {
        'g' => set.global = true,
        'y' => set.sticky = true,
        c if ENGINE_FLAGS.contains(c) => set.engine.push(c),
        _ => {}
      }
    }
    if seen.contains('u') && seen.contains('v') {
      return Err(CompileError::UnicodeModeConflict);
    }
    Ok(set)
  }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EcmaEngine;

pub struct EcmaMatcher {
  re: regress::Regex,
  global: bool,
  sticky: bool,
}

impl PatternEngine for EcmaEngine {
  type Matcher = EcmaMatcher;

  fn compile(&self, pattern: &str, flags: &str) -> Result<EcmaMatcher, CompileError> {
    let set = FlagSet::parse(flags)?;
    let re = regress::Regex::with_flags(pattern, set.engine.as_str())
      .map_err(|e| CompileError::Syntax(e.to_string()))?;
    Ok(EcmaMatcher { re, global: set.global, sticky: set.sticky })
  }
}

impl Matcher for EcmaMatcher {
  fn find_all(&self, subject: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    // Where a sticky match must begin: the previous end, one character further
    // after an empty match.
    let mut expected_start = 0;
    for m in self.re.find_iter(subject) {
      let span = Span::from(m.range());
      if self.sticky && span.start != expected_start {
        break;
      }
      expected_start = match subject[span.end..].chars().next() {
        Some(c) if span.is_empty() => span.end + c.len_utf8(),
        _ => span.end,
      };
      spans.push(span);
      if !self.global {
        break;
      }
    }
    spans
  }
}
