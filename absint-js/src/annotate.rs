use crate::config::KeepOrPolicy;
use crate::domain::value::join;
use crate::domain::value::AbstractValue;
use ahash::HashMap;
use ahash::HashMapExt;
use itertools::Itertools;
use parse_js::ast::NodeData;
use serde::Serialize;

/// Identity of a syntax node. Nodes live in the parse session's arena and never move, so the
/// address is stable for as long as the session is alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(usize);

impl NodeId {
  pub fn of(node: &NodeData<'_>) -> NodeId {
    NodeId(node as *const NodeData<'_> as usize)
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Span {
  pub start: usize,
  pub end: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UnrollTrace {
  pub iterations: usize,
  /// Loop bodies and update expressions in execution order.
  pub trace: Vec<NodeId>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BetaReduction {
  /// The returned expression that replaces the call.
  pub body: NodeId,
  pub substitutions: Vec<(String, AbstractValue)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CallTarget {
  Unique(NodeId),
  Ambiguous,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
  pub span: Option<Span>,
  pub static_value: Option<AbstractValue>,
  pub live: bool,
  pub unrolled: Option<UnrollTrace>,
  pub reduced: Option<BetaReduction>,
  pub call_target: Option<CallTarget>,
  /// Top-level node of code parsed from an `eval`/`Function` argument.
  pub sub_program: Option<NodeId>,
  /// Set on function nodes that were called at least once.
  pub used: bool,
  /// Set on function nodes that were created but never called.
  pub dead: bool,
  /// Set on function nodes: whether every analysed call was free of outside effects.
  pub pure: Option<bool>,
}

/// Side table of analysis results, keyed by node identity.
#[derive(Clone, Debug, Default)]
pub struct Annotations {
  entries: HashMap<NodeId, Annotation>,
}

impl Annotations {
  pub fn new() -> Annotations {
    Annotations {
      entries: HashMap::new(),
    }
  }

  pub fn get(&self, node: NodeId) -> Option<&Annotation> {
    self.entries.get(&node)
  }

  pub fn of(&self, node: &NodeData<'_>) -> Option<&Annotation> {
    self.get(NodeId::of(node))
  }

  pub fn entry(&mut self, node: &NodeData<'_>) -> &mut Annotation {
    let ann = self.entries.entry(NodeId::of(node)).or_default();
    if ann.span.is_none() {
      ann.span = Some(Span {
        start: node.loc.start(),
        end: node.loc.end(),
      });
    };
    ann
  }

  /// Joins `value` into the node's recorded static value. Returns whether this is the first value.
  pub fn record_value(
    &mut self,
    node: &NodeData<'_>,
    value: &AbstractValue,
    policy: &KeepOrPolicy,
  ) -> bool {
    let ann = self.entry(node);
    if let Some(prev) = &mut ann.static_value {
      *prev = join(prev, value, policy);
      false
    } else {
      ann.static_value = Some(value.clone());
      true
    }
  }

  pub fn mark_live(&mut self, node: &NodeData<'_>) {
    self.entry(node).live = true;
  }

  pub fn set_call_target(&mut self, node: &NodeData<'_>, target: CallTarget) {
    let ann = self.entry(node);
    ann.call_target = match ann.call_target {
      None => Some(target),
      Some(prev) if prev == target => Some(prev),
      Some(_) => Some(CallTarget::Ambiguous),
    };
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Entries ordered by source position.
  pub fn sorted(&self) -> Vec<(NodeId, &Annotation)> {
    self
      .entries
      .iter()
      .map(|(id, ann)| (*id, ann))
      .sorted_by_key(|(id, ann)| (ann.span.map(|s| (s.start, s.end)), *id))
      .collect()
  }
}

/// Counters reported at the end of a run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
  pub steps: usize,
  pub static_values: usize,
  pub beta_reductions: usize,
  pub functions: usize,
  pub dead_functions: usize,
  pub unrolled_loops: usize,
  pub sub_programs: usize,
}
