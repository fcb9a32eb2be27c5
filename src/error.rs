//! Shared error utilities used across the compilation pipeline.
//!
//! Every problem is fatal: the first error found is rendered with its line,
//! column and a caret under the offending byte, then compilation stops.

use std::fmt;

use snafu::Snafu;

pub type CompileResult<T> = Result<T, CompileError>;

/// Which stage rejected the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Lexical,
  Syntax,
  Resolution,
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ErrorKind::Lexical => "lexical",
      ErrorKind::Syntax => "syntax",
      ErrorKind::Resolution => "resolution",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CompileError {
  #[snafu(display("{line}:{column}: {kind} error: {message}\n{source_line}\n{marker}"))]
  WithLocation {
    kind: ErrorKind,
    line: usize,
    column: usize,
    source_line: String,
    marker: String,
    message: String,
  },

  #[snafu(display("failed to {action}: {source}"))]
  Io {
    action: String,
    source: std::io::Error,
  },
}

impl CompileError {
  /// Construct an error anchored at a specific byte offset in the source.
  pub fn at(kind: ErrorKind, src: &str, loc: usize, message: impl Into<String>) -> Self {
    let safe_loc = floor_char_boundary(src, loc.min(src.len()));
    let line_start = src[..safe_loc].rfind('\n').map_or(0, |i| i + 1);
    let line_end = src[safe_loc..]
      .find('\n')
      .map_or(src.len(), |i| safe_loc + i);
    let line = src[..line_start].matches('\n').count() + 1;
    let column = src[line_start..safe_loc].chars().count() + 1;
    let marker = format!("{}^", " ".repeat(column - 1));

    Self::WithLocation {
      kind,
      line,
      column,
      source_line: src[line_start..line_end].to_string(),
      marker,
      message: message.into(),
    }
  }

  pub fn lexical(src: &str, loc: usize, message: impl Into<String>) -> Self {
    Self::at(ErrorKind::Lexical, src, loc, message)
  }

  pub fn syntax(src: &str, loc: usize, message: impl Into<String>) -> Self {
    Self::at(ErrorKind::Syntax, src, loc, message)
  }

  pub fn resolution(src: &str, loc: usize, message: impl Into<String>) -> Self {
    Self::at(ErrorKind::Resolution, src, loc, message)
  }

  /// The failing stage, or `None` for driver I/O failures.
  pub fn kind(&self) -> Option<ErrorKind> {
    match self {
      Self::WithLocation { kind, .. } => Some(*kind),
      Self::Io { .. } => None,
    }
  }

  /// 1-based `(line, column)` of the diagnostic, if it has one.
  pub fn position(&self) -> Option<(usize, usize)> {
    match self {
      Self::WithLocation { line, column, .. } => Some((*line, *column)),
      Self::Io { .. } => None,
    }
  }
}

fn floor_char_boundary(src: &str, mut loc: usize) -> usize {
  while !src.is_char_boundary(loc) {
    loc -= 1;
  }
  loc
}
