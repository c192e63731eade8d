pub mod consteval;
pub mod default;
pub mod regexp;

#[cfg(test)]
mod tests;

use crate::annotate::NodeId;
use crate::config::AnalysisConfig;
use crate::config::KeepOrPolicy;
use crate::domain::object::AbstractObject;
use crate::domain::object::Callable;
use crate::domain::object::NativeId;
use crate::domain::object::PropKey;
use crate::domain::value::make_or;
use crate::domain::value::AbstractValue;
use crate::domain::value::HeapId;
use crate::domain::value::Scalar;
use crate::domain::value::UNDEFINED;
use crate::err::FatalKind;
use crate::heap::State;
use crate::util::counter::Counter;
use ahash::HashMap;
use ahash::HashMapExt;
use once_cell::sync::Lazy;
use parse_js::operator::OperatorName;
use std::rc::Rc;

/// Heap id of the global scope object.
pub const GLOBAL_ID: HeapId = HeapId(0);

/// Handlers receive single alternatives (never `Or` or `Bottom`) and return `Top` when they do
/// not apply.
pub type BinaryHandler =
  fn(&Plugins, OperatorName, &State, &AbstractValue, &AbstractValue) -> AbstractValue;
pub type UnaryHandler = fn(&Plugins, OperatorName, &State, &AbstractValue) -> AbstractValue;
pub type UpdateHandler = fn(&Plugins, OperatorName, &State, &AbstractValue) -> AbstractValue;
/// Resolves a property that the receiver does not own, e.g. a method of a string primitive.
pub type MemberHandler = fn(&Plugins, &State, &AbstractValue, &PropKey) -> AbstractValue;
pub type NativeFn = fn(&mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind>;

/// Kinds of receivers that have a table of native methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Receiver {
  String,
  Number,
  Array,
  Function,
  RegExp,
}

/// Everything a native function may look at or change.
pub struct NativeCall<'c> {
  pub name: &'static str,
  pub state: &'c mut State,
  pub ids: &'c mut Counter,
  /// The receiver; `undefined` for plain calls.
  pub this: AbstractValue,
  pub args: &'c [AbstractValue],
  pub config: &'c AnalysisConfig,
  /// Source text of an interpreted function.
  pub function_text: &'c dyn Fn(NodeId) -> Option<String>,
}

impl<'c> NativeCall<'c> {
  /// Missing arguments are `undefined`.
  pub fn arg(&self, i: usize) -> AbstractValue {
    self.args.get(i).cloned().unwrap_or(UNDEFINED)
  }

  pub fn has_arg(&self, i: usize) -> bool {
    i < self.args.len()
  }

  pub fn policy(&self) -> &KeepOrPolicy {
    &self.config.keep_or
  }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NativeOutcome {
  Value(AbstractValue),
  /// Interpret the source text against the current state and use its end value.
  Evaluate(String),
  /// Call `callee` as if the program had called it directly.
  Call {
    callee: AbstractValue,
    this: AbstractValue,
    args: Vec<AbstractValue>,
  },
}

#[derive(Clone)]
pub struct NativeEntry {
  pub name: &'static str,
  pub func: NativeFn,
  pub pure: bool,
}

/// Operator semantics and pre-existing objects, built once before a run.
#[derive(Clone)]
pub struct Plugins {
  binary: Vec<BinaryHandler>,
  unary: Vec<UnaryHandler>,
  update: Vec<UpdateHandler>,
  member: Vec<MemberHandler>,
  natives: Vec<NativeEntry>,
  objects: Vec<(HeapId, AbstractObject)>,
  globals: Vec<(String, AbstractValue)>,
  methods: HashMap<(Receiver, String), HeapId>,
  ids: Counter,
}

static DEFAULT_PLUGINS: Lazy<Plugins> = Lazy::new(|| {
  let mut plugins = Plugins::new();
  default::register(&mut plugins);
  plugins
});

/// Truthiness of a value, if every alternative agrees.
pub fn truthiness(v: &AbstractValue) -> Option<bool> {
  let mut result = None;
  for alt in v.alternatives() {
    let b = match alt {
      AbstractValue::Top | AbstractValue::Bottom | AbstractValue::Or(_) => return None,
      AbstractValue::Special(_) => false,
      AbstractValue::Primitive(Scalar::Num(n)) => *n != 0.0 && !n.is_nan(),
      AbstractValue::Primitive(Scalar::Str(s)) => !s.is_empty(),
      AbstractValue::Primitive(Scalar::Bool(b)) => *b,
      AbstractValue::Primitive(Scalar::Regex(_)) => true,
      AbstractValue::Reference(..) => true,
    };
    match result {
      None => result = Some(b),
      Some(prev) if prev != b => return None,
      Some(_) => {}
    };
  }
  result
}

impl Plugins {
  /// An empty registry: no handlers, no globals.
  pub fn new() -> Plugins {
    Plugins {
      binary: Vec::new(),
      unary: Vec::new(),
      update: Vec::new(),
      member: Vec::new(),
      natives: Vec::new(),
      objects: Vec::new(),
      globals: Vec::new(),
      methods: HashMap::new(),
      ids: Counter::new(GLOBAL_ID.0 + 1),
    }
  }

  /// The registry with the default operator semantics and natives.
  pub fn default_registry() -> &'static Plugins {
    &DEFAULT_PLUGINS
  }

  pub fn register_binary(&mut self, handler: BinaryHandler) {
    self.binary.push(handler);
  }

  pub fn register_unary(&mut self, handler: UnaryHandler) {
    self.unary.push(handler);
  }

  pub fn register_update(&mut self, handler: UpdateHandler) {
    self.update.push(handler);
  }

  pub fn register_member(&mut self, handler: MemberHandler) {
    self.member.push(handler);
  }

  pub fn register_object(&mut self, obj: AbstractObject) -> HeapId {
    let id = HeapId(self.ids.bump());
    self.objects.push((id, obj));
    id
  }

  pub fn register_native(&mut self, name: &'static str, func: NativeFn, pure: bool) -> HeapId {
    let id = NativeId(self.natives.len() as u32);
    self.natives.push(NativeEntry { name, func, pure });
    self.register_object(AbstractObject::new_callable(Callable::Native { id, pure }))
  }

  pub fn register_method(
    &mut self,
    receiver: Receiver,
    name: &'static str,
    func: NativeFn,
    pure: bool,
  ) -> HeapId {
    let id = self.register_native(name, func, pure);
    self.methods.insert((receiver, name.to_string()), id);
    id
  }

  pub fn set_global(&mut self, name: &str, value: AbstractValue) {
    self.globals.retain(|(n, _)| n != name);
    self.globals.push((name.to_string(), value));
  }

  pub fn global(&self, name: &str) -> Option<&AbstractValue> {
    self
      .globals
      .iter()
      .find(|(n, _)| n == name)
      .map(|(_, v)| v)
  }

  pub fn native(&self, id: NativeId) -> Option<&NativeEntry> {
    self.natives.get(id.0 as usize)
  }

  pub fn method(&self, receiver: Receiver, name: &str) -> Option<HeapId> {
    self.methods.get(&(receiver, name.to_string())).copied()
  }

  /// First id available to the analysis run.
  pub fn next_id(&self) -> u32 {
    self.ids.peek()
  }

  /// The initial state: the global scope plus every registered object, pinned as roots.
  pub fn seed(&self) -> State {
    let mut global = AbstractObject::unknown();
    for (name, value) in &self.globals {
      global.set(PropKey::name(name), value.clone());
    }
    let pinned: Rc<[HeapId]> = self.objects.iter().map(|(id, _)| *id).collect();
    let mut state = State::new(GLOBAL_ID, global, pinned);
    for (id, obj) in &self.objects {
      state.insert(*id, obj.clone());
    }
    state
  }

  pub fn handle_binary(
    &self,
    op: OperatorName,
    state: &State,
    left: &AbstractValue,
    right: &AbstractValue,
  ) -> AbstractValue {
    self
      .binary
      .iter()
      .map(|h| h(self, op, state, left, right))
      .find(|v| !v.is_top())
      .unwrap_or(AbstractValue::Top)
  }

  pub fn handle_unary(&self, op: OperatorName, state: &State, arg: &AbstractValue) -> AbstractValue {
    self
      .unary
      .iter()
      .map(|h| h(self, op, state, arg))
      .find(|v| !v.is_top())
      .unwrap_or(AbstractValue::Top)
  }

  pub fn handle_update(&self, op: OperatorName, state: &State, arg: &AbstractValue) -> AbstractValue {
    self
      .update
      .iter()
      .map(|h| h(self, op, state, arg))
      .find(|v| !v.is_top())
      .unwrap_or(AbstractValue::Top)
  }

  /// Binary dispatch lifted over `Or` alternatives. `Bottom` in, `Bottom` out.
  pub fn binary(
    &self,
    op: OperatorName,
    state: &State,
    left: &AbstractValue,
    right: &AbstractValue,
    policy: &KeepOrPolicy,
  ) -> AbstractValue {
    if left.is_bottom() || right.is_bottom() {
      return AbstractValue::Bottom;
    };
    let mut results = Vec::new();
    for l in left.alternatives() {
      for r in right.alternatives() {
        let v = self.handle_binary(op, state, l, r);
        if v.is_top() {
          return AbstractValue::Top;
        };
        results.push(v);
      }
    }
    make_or(results, policy)
  }

  pub fn unary(
    &self,
    op: OperatorName,
    state: &State,
    arg: &AbstractValue,
    policy: &KeepOrPolicy,
  ) -> AbstractValue {
    if arg.is_bottom() {
      return AbstractValue::Bottom;
    };
    make_or(
      arg
        .alternatives()
        .iter()
        .map(|a| self.handle_unary(op, state, a)),
      policy,
    )
  }

  pub fn update(
    &self,
    op: OperatorName,
    state: &State,
    arg: &AbstractValue,
    policy: &KeepOrPolicy,
  ) -> AbstractValue {
    if arg.is_bottom() {
      return AbstractValue::Bottom;
    };
    make_or(
      arg
        .alternatives()
        .iter()
        .map(|a| self.handle_update(op, state, a)),
      policy,
    )
  }

  /// Property lookup through the member hooks. `Top` when no hook knows the property.
  pub fn member(&self, state: &State, receiver: &AbstractValue, key: &PropKey) -> AbstractValue {
    self
      .member
      .iter()
      .map(|h| h(self, state, receiver, key))
      .find(|v| !v.is_top())
      .unwrap_or(AbstractValue::Top)
  }

  pub fn to_bool(&self, v: &AbstractValue) -> Option<bool> {
    truthiness(v)
  }
}

impl Default for Plugins {
  fn default() -> Self {
    Plugins::default_registry().clone()
  }
}
