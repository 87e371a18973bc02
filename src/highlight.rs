//! Wraps matched regions of the sample text in marker tags.
//!
//! Output is HTML: every segment is escaped on its own, so escaping never moves
//! a region boundary, and stripping the tags and unescaping gives back the
//! original text exactly.
//!
//! `highlight` returns the content untouched when there is nothing to mark;
//! `display` is always escaped since it is meant to be injected as HTML.

use thiserror::Error;
use tracing::error;

use crate::engine::Span;

pub const DEFAULT_TAG_CLASS: &str = "result-tag";
const LINE_BREAK: &str = "<br />";

/// The engine handed us spans that break its own contract (ordered,
/// non-overlapping, inside the subject, on char boundaries).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
  #[error("span {span:?} overlaps or precedes the previous span ending at {prev_end}")]
  Overlap { span: Span, prev_end: usize },
  #[error("span {span:?} is reversed")]
  Reversed { span: Span },
  #[error("span {span:?} falls outside content of {len} bytes")]
  OutOfBounds { span: Span, len: usize },
  #[error("span {span:?} splits a character")]
  NotCharBoundary { span: Span },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
  Plain(&'a str),
  Marked(&'a str),
}

/// Cut `content` into plain and marked segments. Zero-length spans produce nothing.
pub fn segments<'a>(content: &'a str, spans: &[Span]) -> Result<Vec<Segment<'a>>, ContractViolation> {
  let mut out = Vec::with_capacity(spans.len() * 2 + 1);
  let mut cursor = 0;
  let mut prev_end = 0;

  for &span in spans {
    check_span(content, span, prev_end).inspect_err(|e| {
      error!(target: "exercise", error = %e, "pattern engine returned malformed spans");
    })?;
    prev_end = span.end;
    if span.is_empty() {
      continue;
    }
    if span.start > cursor {
      out.push(Segment::Plain(&content[cursor..span.start]));
    }
    out.push(Segment::Marked(&content[span.range()]));
    cursor = span.end;
  }
  if cursor < content.len() {
    out.push(Segment::Plain(&content[cursor..]));
  }
  Ok(out)
}

fn check_span(content: &str, span: Span, prev_end: usize) -> Result<(), ContractViolation> {
  if span.start > span.end {
    return Err(ContractViolation::Reversed { span });
  }
  if span.end > content.len() {
    return Err(ContractViolation::OutOfBounds { span, len: content.len() });
  }
  if span.start < prev_end {
    return Err(ContractViolation::Overlap { span, prev_end });
  }
  if !content.is_char_boundary(span.start) || !content.is_char_boundary(span.end) {
    return Err(ContractViolation::NotCharBoundary { span });
  }
  Ok(())
}

#[derive(Clone, Debug)]
pub struct Highlighter {
  open_tag: String,
  line_breaks: bool,
}

impl Default for Highlighter {
  fn default() -> Self {
    Self::new(DEFAULT_TAG_CLASS, true)
  }
}

impl Highlighter {
  pub fn new(class: &str, line_breaks: bool) -> Self {
    let mut open_tag = String::from("<span class=\"");
    escape_into(&mut open_tag, class, false);
    open_tag.push_str("\">");
    Self { open_tag, line_breaks }
  }

  /// Tagged copy of `content`. With no spans this is `content` unchanged.
  pub fn highlight(&self, content: &str, spans: &[Span]) -> Result<String, ContractViolation> {
    if spans.iter().all(Span::is_empty) {
      segments(content, spans)?;
      return Ok(content.to_string());
    }
    Ok(self.render(&segments(content, spans)?, false))
  }

  /// What the learner sees: the tagged copy with line breaks rendered as `<br />`.
  pub fn display(&self, content: &str, spans: &[Span]) -> Result<String, ContractViolation> {
    Ok(self.render(&segments(content, spans)?, self.line_breaks))
  }

  fn render(&self, segments: &[Segment<'_>], line_breaks: bool) -> String {
    let mut out = String::new();
    for seg in segments {
      match seg {
        Segment::Plain(text) => escape_into(&mut out, text, line_breaks),
        Segment::Marked(text) => {
          out.push_str(&self.open_tag);
          escape_into(&mut out, text, line_breaks);
          out.push_str("</span>");
        }
      }
    }
    out
  }
}

fn escape_into(out: &mut String, text: &str, line_breaks: bool) {
  for ch in text.chars() {
    match ch {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#39;"),
      '\n' if line_breaks => out.push_str(LINE_BREAK),
      c => out.push(c),
    }
  }
}
