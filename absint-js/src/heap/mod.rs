mod gc;
mod join;
mod unify;

#[cfg(test)]
mod tests;

use crate::domain::object::AbstractObject;
use crate::domain::object::Callable;
use crate::domain::object::MissingMode;
use crate::domain::object::PropKey;
use crate::domain::value::AbstractValue;
use crate::domain::value::HeapId;
use crate::err::HeapError;
use crate::util::counter::Counter;
use ahash::HashMap;
use ahash::HashMapExt;
use ahash::HashSet;
use ahash::HashSetExt;
use itertools::Itertools;
use std::fmt;
use std::fmt::Display;
use std::fmt::Formatter;
use std::rc::Rc;

/// Frame property holding the environment a closure was created in.
pub const CLOSURE_KEY: &str = "__closure";
/// Frame property holding the receiver of a call.
pub const THIS_KEY: &str = "this";

/// Abstract program state: an arena of objects plus the roots the program can reach them from.
#[derive(Clone, Debug)]
pub struct State {
  pub objects: HashMap<HeapId, AbstractObject>,
  pub global_ref: HeapId,
  pub local_ref: HeapId,
  /// Saved `local_ref`s of the callers, innermost last.
  pub call_stack: Vec<HeapId>,
  /// Objects that must survive collection although nothing links to them yet.
  pub pending: HashSet<HeapId>,
  pub last_value: AbstractValue,
  pub is_bottom: bool,
  /// Ids registered before the run; permanent collection roots.
  pinned: Rc<[HeapId]>,
}

impl State {
  pub fn new(global_ref: HeapId, global: AbstractObject, pinned: Rc<[HeapId]>) -> State {
    let mut objects = HashMap::new();
    objects.insert(global_ref, global);
    State {
      objects,
      global_ref,
      local_ref: global_ref,
      call_stack: Vec::new(),
      pending: HashSet::new(),
      last_value: AbstractValue::Bottom,
      is_bottom: false,
      pinned,
    }
  }

  /// A state with an unknown global object at id 0 and nothing else.
  pub fn empty() -> State {
    State::new(HeapId(0), AbstractObject::unknown(), Rc::from(Vec::new()))
  }

  pub fn pinned(&self) -> &[HeapId] {
    &self.pinned
  }

  pub fn depth(&self) -> usize {
    self.call_stack.len()
  }

  pub fn object(&self, id: HeapId) -> Result<&AbstractObject, HeapError> {
    self.objects.get(&id).ok_or(HeapError::Dangling(id))
  }

  pub fn object_mut(&mut self, id: HeapId) -> Result<&mut AbstractObject, HeapError> {
    self.objects.get_mut(&id).ok_or(HeapError::Dangling(id))
  }

  pub fn alloc(&mut self, ids: &mut Counter, obj: AbstractObject) -> HeapId {
    let id = HeapId(ids.bump());
    self.objects.insert(id, obj);
    id
  }

  pub fn insert(&mut self, id: HeapId, obj: AbstractObject) {
    self.objects.insert(id, obj);
  }

  /// Marks the state unreachable. Scope roots are kept so frames can still be popped.
  pub fn set_to_bottom(&mut self) {
    self.is_bottom = true;
    self.objects.clear();
    self.pending.clear();
    self.last_value = AbstractValue::Bottom;
  }

  /// A fresh unreachable state.
  pub fn bottom_like(&self) -> State {
    State {
      objects: HashMap::new(),
      global_ref: self.global_ref,
      local_ref: self.local_ref,
      call_stack: self.call_stack.clone(),
      pending: HashSet::new(),
      last_value: AbstractValue::Bottom,
      is_bottom: true,
      pinned: self.pinned.clone(),
    }
  }

  /// Collection roots in a fixed order.
  pub fn roots(&self) -> Vec<HeapId> {
    let mut roots = vec![self.local_ref, self.global_ref];
    roots.extend(self.call_stack.iter().copied());
    roots.extend(
      self
        .pending
        .iter()
        .copied()
        .filter(|id| self.objects.contains_key(id))
        .sorted(),
    );
    self.last_value.for_each_id(&mut |id| roots.push(id));
    roots.extend(self.pinned.iter().copied());
    roots
  }

  /// Finds the scope object that owns `name`: the local frame, then the captured environments,
  /// then the global scope.
  pub fn scope_lookup(&self, name: &str) -> Result<HeapId, HeapError> {
    let key = PropKey::name(name);
    let closure_key = PropKey::name(CLOSURE_KEY);
    let mut scope = self.local_ref;
    for _ in 0..=self.objects.len() {
      if scope == self.global_ref {
        break;
      };
      let obj = self.object(scope)?;
      if obj.has_own(&key) {
        return Ok(scope);
      };
      match obj.properties.get(&closure_key) {
        Some(AbstractValue::Reference(env, _)) => scope = *env,
        _ => break,
      };
    }
    Ok(self.global_ref)
  }

  /// Whether reading `v` can produce an unknown value.
  pub fn contains_top(&self, v: &AbstractValue) -> bool {
    v.alternatives().iter().any(|alt| match alt {
      AbstractValue::Top => true,
      AbstractValue::Reference(id, _) => self.objects.get(id).map_or(true, |o| o.contains_top()),
      _ => false,
    })
  }

  pub(crate) fn apply_remap(&mut self, map: &HashMap<HeapId, HeapId>) {
    let remap = |id: HeapId| map.get(&id).copied().unwrap_or(id);
    let objects = std::mem::take(&mut self.objects);
    self.objects = objects
      .into_iter()
      .map(|(id, mut obj)| {
        obj.remap_ids(map);
        (remap(id), obj)
      })
      .collect();
    self.global_ref = remap(self.global_ref);
    self.local_ref = remap(self.local_ref);
    for frame in self.call_stack.iter_mut() {
      *frame = remap(*frame);
    }
    self.pending = self.pending.iter().map(|id| remap(*id)).collect();
    self.last_value.remap_ids(map);
  }
}

impl Display for State {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    if self.is_bottom {
      return writeln!(f, "⊥");
    };
    writeln!(
      f,
      "global={} local={} stack=[{}] pending=[{}] last={}",
      self.global_ref,
      self.local_ref,
      self.call_stack.iter().join(", "),
      self.pending.iter().sorted().join(", "),
      self.last_value,
    )?;
    for (id, obj) in self.objects.iter().sorted_by_key(|(id, _)| **id) {
      if self.pinned.contains(id) {
        continue;
      };
      let mut tags = Vec::new();
      if obj.missing == MissingMode::MissingIsTop {
        tags.push("missing=⊤".to_string());
      };
      if obj.is_array {
        tags.push(match obj.length {
          Some(len) => format!("array[{len}]"),
          None => "array[?]".to_string(),
        });
      };
      match obj.callable {
        Some(Callable::Function { .. }) => tags.push("function".to_string()),
        Some(Callable::Closure { env, .. }) => tags.push(format!("closure env={env}")),
        Some(Callable::Native { id, .. }) => tags.push(format!("native {}", id.0)),
        None => {}
      };
      writeln!(
        f,
        "{id}: {{{}}}{}{}",
        obj
          .properties
          .iter()
          .map(|(k, v)| format!("{k}: {v}"))
          .join(", "),
        if tags.is_empty() { "" } else { " " },
        tags.join(" "),
      )?;
    }
    Ok(())
  }
}
