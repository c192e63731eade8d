use crate::domain::value::HeapId;
use itertools::Itertools;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::fmt::Display;
use std::fmt::Formatter;

const SNIPPET_LEN: usize = 80;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TrailEntry {
  /// `None` for statements of code parsed at runtime.
  pub line: Option<usize>,
  pub text: String,
}

impl TrailEntry {
  pub fn new(line: Option<usize>, source: &str) -> TrailEntry {
    let first_line = source.lines().next().unwrap_or_default();
    let text = if first_line.chars().count() > SNIPPET_LEN {
      format!("{}…", first_line.chars().take(SNIPPET_LEN).collect::<String>())
    } else {
      first_line.to_string()
    };
    TrailEntry { line, text }
  }
}

impl Display for TrailEntry {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self.line {
      Some(line) => write!(f, "{line:>5} | {}", self.text),
      None => write!(f, "eval. | {}", self.text),
    }
  }
}

/// The most recently interpreted statements.
#[derive(Clone, Debug)]
pub struct Trail {
  entries: VecDeque<TrailEntry>,
  capacity: usize,
}

impl Trail {
  pub fn new(capacity: usize) -> Trail {
    Trail {
      entries: VecDeque::with_capacity(capacity),
      capacity,
    }
  }

  pub fn push(&mut self, entry: TrailEntry) {
    if self.entries.len() == self.capacity {
      self.entries.pop_front();
    };
    self.entries.push_back(entry);
  }

  pub fn entries(&self) -> Vec<TrailEntry> {
    self.entries.iter().cloned().collect()
  }
}

/// Diagnostic context attached to fatal analysis errors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FatalContext {
  pub state: String,
  pub trail: Vec<TrailEntry>,
  pub call_stack: Vec<HeapId>,
}

impl Display for FatalContext {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    writeln!(f, "state:")?;
    for line in self.state.lines() {
      writeln!(f, "  {line}")?;
    }
    writeln!(f, "call stack: [{}]", self.call_stack.iter().join(", "))?;
    writeln!(f, "last statements:")?;
    for entry in &self.trail {
      writeln!(f, "  {entry}")?;
    }
    Ok(())
  }
}
