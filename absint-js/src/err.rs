use crate::domain::value::HeapId;
use crate::util::debug::FatalContext;
use std::str::Utf8Error;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum HeapError {
  #[error("heap object {0} is referenced but does not exist")]
  Dangling(HeapId),
}

/// Conditions that abort an analysis run.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FatalKind {
  #[error("loop did not reach a fixpoint within {0} widening iterations")]
  LoopDiverged(usize),
  #[error("recursion did not stabilise within {0} widening iterations")]
  RecursionDiverged(usize),
  #[error("deferred callbacks did not stabilise within {0} rounds")]
  CallbacksDiverged(usize),
  #[error("recursion unwind escaped every call frame")]
  StrayUnwind,
  #[error(transparent)]
  Heap(#[from] HeapError),
  #[error("assertion failed: {0}")]
  AssertionFailed(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AnalysisError {
  #[error("syntax error at offset {offset}: {message}")]
  Syntax { offset: usize, message: String },
  #[error("source is not valid UTF-8: {0}")]
  InvalidUtf8(#[from] Utf8Error),
  #[error("{kind}")]
  Fatal {
    kind: FatalKind,
    context: Box<FatalContext>,
  },
}

impl AnalysisError {
  pub fn fatal_kind(&self) -> Option<&FatalKind> {
    match self {
      AnalysisError::Fatal { kind, .. } => Some(kind),
      _ => None,
    }
  }

  pub fn context(&self) -> Option<&FatalContext> {
    match self {
      AnalysisError::Fatal { context, .. } => Some(context),
      _ => None,
    }
  }
}
