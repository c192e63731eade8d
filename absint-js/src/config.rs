use crate::domain::value::AbstractValue;
use crate::domain::value::Special;
use serde::Deserialize;
use serde::Serialize;

/// Decides whether a disjunction is kept as `Or` or collapsed to `Top` when values are joined.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KeepOrPolicy {
  pub max_alternatives: usize,
  /// Only keep disjunctions that contain the undefined/NaN special.
  pub require_undefined: bool,
}

impl Default for KeepOrPolicy {
  fn default() -> Self {
    Self {
      max_alternatives: 2,
      require_undefined: true,
    }
  }
}

impl KeepOrPolicy {
  /// Alternatives must already be flattened, deduplicated, and free of `Top`/`Bottom`.
  pub fn admits(&self, alternatives: &[AbstractValue]) -> bool {
    if alternatives.len() > self.max_alternatives {
      return false;
    };
    !self.require_undefined
      || alternatives
        .iter()
        .any(|v| matches!(v, AbstractValue::Special(Special::UndefinedOrNaN)))
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalysisConfig {
  /// Loop iterations unrolled before switching to widening.
  pub max_iter: usize,
  /// Inlining depth of a single call site before recursion is generalized.
  pub max_recursion: usize,
  /// Ceiling for every widening fixpoint (loops and recursion); exceeding it is fatal.
  pub max_widening_iter: usize,
  /// Ceiling for rounds of deferred-callback processing; exceeding it is fatal.
  pub max_deferred_iter: usize,
  /// Collect unreachable heap objects after every statement.
  pub delete_unused: bool,
  /// Replace references to information-free objects with `Top` before collecting.
  pub unlink_top_objects: bool,
  /// Renumber heap ids before joining states.
  pub unify: bool,
  /// Annotate calls to single-return functions with their reduced expression.
  pub inlining: bool,
  /// Also interpret branches that are decidably not taken, on a discarded state.
  pub process_not_taken: bool,
  /// Treat every switch discriminant as unknown.
  pub merge_switch: bool,
  /// Log arguments passed to `console.log`.
  pub console: bool,
  pub keep_or: KeepOrPolicy,
}

impl Default for AnalysisConfig {
  fn default() -> Self {
    Self {
      max_iter: 100_000,
      max_recursion: 10,
      max_widening_iter: 10_000,
      max_deferred_iter: 100,
      delete_unused: true,
      unlink_top_objects: true,
      unify: true,
      inlining: true,
      process_not_taken: false,
      merge_switch: false,
      console: true,
      keep_or: KeepOrPolicy::default(),
    }
  }
}

impl AnalysisConfig {
  pub fn with_max_iter(mut self, max_iter: usize) -> Self {
    self.max_iter = max_iter;
    self
  }

  pub fn with_max_recursion(mut self, max_recursion: usize) -> Self {
    self.max_recursion = max_recursion;
    self
  }

  pub fn with_unify(mut self, unify: bool) -> Self {
    self.unify = unify;
    self
  }

  pub fn with_keep_or(mut self, keep_or: KeepOrPolicy) -> Self {
    self.keep_or = keep_or;
    self
  }

  pub fn with_unlink_top_objects(mut self, unlink: bool) -> Self {
    self.unlink_top_objects = unlink;
    self
  }

  pub fn with_merge_switch(mut self, merge_switch: bool) -> Self {
    self.merge_switch = merge_switch;
    self
  }

  pub fn with_process_not_taken(mut self, process_not_taken: bool) -> Self {
    self.process_not_taken = process_not_taken;
    self
  }
}
