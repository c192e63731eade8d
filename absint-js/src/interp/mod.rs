//! Abstract interpretation of a parse-js syntax tree.
//!
//! The interpreter owns a single mutable [`State`]. Where control flow diverges it clones the
//! state, evaluates each path, and joins the results back. Every value that Rust code holds on to
//! across an evaluation step is registered in a hold frame, so that collection and id
//! unification never invalidate it.
mod call;
mod callbacks;
mod expr;
mod filter;
mod loops;
mod stmt;

#[cfg(test)]
mod tests;

use crate::annotate::Annotations;
use crate::annotate::NodeId;
use crate::annotate::Stats;
use crate::config::AnalysisConfig;
use crate::domain::value::AbstractValue;
use crate::domain::value::HeapId;
use crate::domain::value::UNDEFINED;
use crate::err::AnalysisError;
use crate::err::FatalKind;
use crate::err::HeapError;
use crate::heap::State;
use crate::plugin::Plugins;
use crate::util::counter::Counter;
use crate::util::debug::FatalContext;
use crate::util::debug::Trail;
use crate::util::debug::TrailEntry;
use crate::util::lines::LineIndex;
use ahash::HashMap;
use ahash::HashMapExt;
use ahash::HashSet;
use ahash::HashSetExt;
use parse_js::ast::NodeData;
use parse_js::ast::Syntax;
use parse_js::session::Session;
use std::mem;
use tracing::error;
use tracing::info;

const TRAIL_LEN: usize = 16;

/// Why evaluation stopped before reaching the end of a node.
#[derive(Debug)]
pub(crate) enum Abort {
  /// Recursion reached the depth ceiling one level below the site's ceiling frame.
  Unwind(NodeId),
  Fatal(FatalKind),
}

impl From<FatalKind> for Abort {
  fn from(kind: FatalKind) -> Self {
    Abort::Fatal(kind)
  }
}

impl From<HeapError> for Abort {
  fn from(err: HeapError) -> Self {
    Abort::Fatal(FatalKind::Heap(err))
  }
}

pub(crate) type Flow<T> = Result<T, Abort>;

/// Evaluated call arguments. `open` means a spread of unknown length: arguments past the end are
/// unknown rather than `undefined`.
#[derive(Clone, Debug, Default)]
struct CallArgs {
  values: Vec<AbstractValue>,
  open: bool,
}

impl CallArgs {
  fn get(&self, i: usize) -> AbstractValue {
    match self.values.get(i) {
      Some(v) => v.clone(),
      None if self.open => AbstractValue::Top,
      None => UNDEFINED,
    }
  }
}

/// Targets of `break` and `continue`.
#[derive(Clone)]
enum Breakable {
  Loop {
    break_state: State,
    continue_state: State,
  },
  Switch {
    break_state: State,
  },
}

/// Returns seen so far by the innermost active function body.
#[derive(Clone)]
struct ReturnFrame {
  state: State,
  value: AbstractValue,
  /// Index of the hold frame that keeps returned values alive.
  hold: usize,
}

/// Recursion bookkeeping of one call site.
struct CallSite {
  active: usize,
  /// Pre-call state at the ceiling, joined with the states of deeper encounters.
  snapshot: Option<State>,
  /// Arguments of deeper encounters, joined.
  args: Vec<AbstractValue>,
  skip: bool,
  ret: AbstractValue,
}

impl CallSite {
  fn new() -> CallSite {
    CallSite {
      active: 0,
      snapshot: None,
      args: Vec::new(),
      skip: false,
      ret: AbstractValue::Bottom,
    }
  }
}

/// First line of a node's source, for log messages.
fn snippet(node: &NodeData<'_>) -> String {
  TrailEntry::new(None, node.loc.as_str()).text
}

/// Sets `pending` to the held ids that exist in `state`.
fn protect(holds: &[Vec<HeapId>], deferred: &[HeapId], state: &mut State) {
  if state.is_bottom {
    state.pending.clear();
    return;
  };
  let pending = holds
    .iter()
    .flatten()
    .chain(deferred)
    .copied()
    .filter(|id| state.objects.contains_key(id))
    .collect::<HashSet<_>>();
  state.pending = pending;
}

pub struct Interpreter<'a, 'p> {
  session: &'a Session,
  source: &'a str,
  plugins: &'p Plugins,
  config: AnalysisConfig,
  ids: Counter,
  state: State,
  holds: Vec<Vec<HeapId>>,
  breakables: Vec<Breakable>,
  returns: Vec<ReturnFrame>,
  /// One flag per active function body; cleared by any effect outside the body's own frame.
  purity: Vec<bool>,
  sites: HashMap<NodeId, CallSite>,
  /// Callables that escaped to code the analysis cannot see.
  deferred: Vec<HeapId>,
  functions: HashMap<NodeId, &'a NodeData<'a>>,
  sub_programs: HashMap<(NodeId, String), &'a NodeData<'a>>,
  /// Loops that had to be widened and call sites whose reductions disagreed; they get no
  /// unroll trace or beta reduction.
  conflicted: HashSet<NodeId>,
  /// Nesting depth of branches interpreted only for their annotations.
  discarding: usize,
  annotations: Annotations,
  stats: Stats,
  trail: Trail,
  lines: LineIndex,
}

impl<'a, 'p> Interpreter<'a, 'p> {
  pub fn new(
    session: &'a Session,
    source: &'a str,
    plugins: &'p Plugins,
    config: AnalysisConfig,
  ) -> Interpreter<'a, 'p> {
    Interpreter {
      session,
      source,
      plugins,
      config,
      ids: Counter::new(plugins.next_id()),
      state: plugins.seed(),
      holds: Vec::new(),
      breakables: Vec::new(),
      returns: Vec::new(),
      purity: Vec::new(),
      sites: HashMap::new(),
      deferred: Vec::new(),
      functions: HashMap::new(),
      sub_programs: HashMap::new(),
      conflicted: HashSet::new(),
      discarding: 0,
      annotations: Annotations::new(),
      stats: Stats::default(),
      trail: Trail::new(TRAIL_LEN),
      lines: LineIndex::new(source),
    }
  }

  /// Interprets a program and then its deferred callbacks. Returns the program's end value.
  pub fn run(&mut self, top_level: &'a NodeData<'a>) -> Result<AbstractValue, AnalysisError> {
    let result = self
      .run_program(top_level)
      .and_then(|()| self.process_deferred());
    match result {
      Ok(()) => {}
      Err(Abort::Fatal(kind)) => return Err(self.fatal(kind)),
      Err(Abort::Unwind(_)) => return Err(self.fatal(FatalKind::StrayUnwind)),
    };
    self.mark_dead_functions();
    info!(
      steps = self.stats.steps,
      static_values = self.stats.static_values,
      beta_reductions = self.stats.beta_reductions,
      functions = self.stats.functions,
      dead_functions = self.stats.dead_functions,
      "analysis finished"
    );
    Ok(self.state.last_value.clone())
  }

  pub fn state(&self) -> &State {
    &self.state
  }

  pub fn annotations(&self) -> &Annotations {
    &self.annotations
  }

  pub fn stats(&self) -> &Stats {
    &self.stats
  }

  pub fn into_parts(self) -> (State, Annotations, Stats) {
    (self.state, self.annotations, self.stats)
  }

  fn run_program(&mut self, program: &'a NodeData<'a>) -> Flow<()> {
    match &program.stx {
      Syntax::TopLevel { body } => {
        self.hoist(body)?;
        for stmt in body.iter() {
          self.eval_stmt(stmt)?;
        }
        Ok(())
      }
      _ => self.eval_stmt(program),
    }
  }

  fn mark_dead_functions(&mut self) {
    for node in self.functions.values() {
      let ann = self.annotations.entry(node);
      if !ann.used && !ann.dead {
        ann.dead = true;
        self.stats.dead_functions += 1;
      };
    }
  }

  fn fatal(&self, kind: FatalKind) -> AnalysisError {
    let context = FatalContext {
      state: self.state.to_string(),
      trail: self.trail.entries(),
      call_stack: self.state.call_stack.clone(),
    };
    error!("{kind}\n{context}");
    AnalysisError::Fatal {
      kind,
      context: Box::new(context),
    }
  }

  /// Whether a node was parsed from the analysed source rather than from an `eval` string.
  fn in_main_source(&self, node: &NodeData<'_>) -> bool {
    let start = self.source.as_ptr() as usize;
    let ptr = node.loc.as_str().as_ptr() as usize;
    ptr >= start && ptr <= start + self.source.len()
  }

  fn record_trail(&mut self, node: &NodeData<'_>) {
    let line = self
      .in_main_source(node)
      .then(|| self.lines.line_of(node.loc.start()));
    self.trail.push(TrailEntry::new(line, node.loc.as_str()));
  }

  fn hold(&mut self, v: &AbstractValue) {
    let ids = v.ids();
    if ids.is_empty() {
      return;
    };
    self.state.pending.extend(ids.iter().copied());
    match self.holds.last_mut() {
      Some(frame) => frame.extend(ids),
      None => self.holds.push(ids),
    };
  }

  fn protect_current(&mut self) {
    protect(&self.holds, &self.deferred, &mut self.state);
  }

  /// Joins `other` into `into`. Held ids are pending on both sides, so they survive and keep
  /// their numbers.
  fn join_states(&self, into: &mut State, mut other: State) -> Flow<()> {
    protect(&self.holds, &self.deferred, into);
    protect(&self.holds, &self.deferred, &mut other);
    into.join(&other, &self.config)?;
    protect(&self.holds, &self.deferred, into);
    Ok(())
  }

  /// Joins `other` into the current state.
  fn merge(&mut self, other: State) -> Flow<()> {
    let mut state = mem::replace(&mut self.state, State::empty());
    let result = self.join_states(&mut state, other);
    self.state = state;
    result
  }

  fn collect_garbage(&mut self) -> Flow<()> {
    if !self.config.delete_unused || self.state.is_bottom {
      return Ok(());
    };
    self.protect_current();
    self.state.garbage_collect(self.config.unlink_top_objects)?;
    Ok(())
  }

  /// Marks the innermost function body as having an effect outside its own frame.
  fn taint(&mut self) {
    if let Some(pure) = self.purity.last_mut() {
      *pure = false;
    };
  }
}
