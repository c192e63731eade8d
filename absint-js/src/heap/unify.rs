use super::State;
use crate::domain::object::AbstractObject;
use crate::domain::object::Callable;
use crate::domain::value::AbstractValue;
use crate::domain::value::BoundThis;
use crate::domain::value::HeapId;
use ahash::HashMap;
use ahash::HashMapExt;
use ahash::HashSet;
use ahash::HashSetExt;
use itertools::Itertools;
use std::collections::VecDeque;
use tracing::trace;

fn pair_values(a: &AbstractValue, b: &AbstractValue, queue: &mut VecDeque<(HeapId, HeapId)>) {
  match (a, b) {
    (AbstractValue::Reference(x, bx), AbstractValue::Reference(y, by)) => {
      queue.push_back((*x, *y));
      if let (Some(BoundThis::Object(tx)), Some(BoundThis::Object(ty))) = (bx, by) {
        queue.push_back((*tx, *ty));
      };
    }
    (AbstractValue::Or(xs), AbstractValue::Or(ys)) if xs.len() == ys.len() => {
      for (x, y) in xs.iter().zip(ys) {
        pair_values(x, y, queue);
      }
    }
    _ => {}
  };
}

impl State {
  /// Renumbers heap ids of `self` so that objects at the same position as in `other` get
  /// `other`'s ids. Ids held in `pending` on either side are never renumbered.
  pub fn unify(&mut self, other: &State) {
    if self.is_bottom || other.is_bottom || self.depth() != other.depth() {
      return;
    };
    let mut protected: HashSet<HeapId> = self.pending.union(&other.pending).copied().collect();
    protected.extend(self.pinned.iter().copied());
    protected.insert(self.global_ref);

    let mut queue = VecDeque::new();
    queue.push_back((self.local_ref, other.local_ref));
    queue.push_back((self.global_ref, other.global_ref));
    queue.extend(self.call_stack.iter().copied().zip(other.call_stack.iter().copied()));
    pair_values(&self.last_value, &other.last_value, &mut queue);

    let mut visited = HashSet::new();
    let mut candidates = Vec::new();
    while let Some((a, b)) = queue.pop_front() {
      if !visited.insert(a) {
        continue;
      };
      let (Some(oa), Some(ob)) = (self.objects.get(&a), other.objects.get(&b)) else {
        continue;
      };
      if a != b {
        candidates.push((a, b));
      };
      for (key, va) in oa.properties.iter() {
        if let Some(vb) = ob.properties.get(key) {
          pair_values(va, vb, &mut queue);
        };
      }
      if let (Some(Callable::Closure { env: ea, .. }), Some(Callable::Closure { env: eb, .. })) =
        (oa.callable, ob.callable)
      {
        queue.push_back((ea, eb));
      };
    }

    let mut map = HashMap::new();
    let mut targets = HashSet::new();
    for (a, b) in candidates {
      if protected.contains(&a) || protected.contains(&b) {
        continue;
      };
      if map.contains_key(&a) || targets.contains(&b) {
        continue;
      };
      map.insert(a, b);
      targets.insert(b);
    }
    // A target that already exists in `self` must itself be moved out of the way.
    loop {
      let sources: HashSet<HeapId> = map.keys().copied().collect();
      let before = map.len();
      map.retain(|_, b| !self.objects.contains_key(b) || sources.contains(b));
      if map.len() == before {
        break;
      };
    }
    if map.is_empty() {
      return;
    };
    trace!(
      remap = %map.iter().sorted().map(|(a, b)| format!("{a}->{b}")).join(" "),
      "unifying heap ids"
    );
    self.apply_remap(&map);
  }

  /// Equality modulo heap-id renaming: both states must be isomorphic from their roots.
  pub fn equal(&self, other: &State) -> bool {
    if self.is_bottom || other.is_bottom {
      return self.is_bottom == other.is_bottom;
    };
    if self.global_ref != other.global_ref
      || self.depth() != other.depth()
      || self.pending != other.pending
    {
      return false;
    };
    let mut iso = Isomorphism::new();
    let mut seeds = vec![(self.local_ref, other.local_ref), (self.global_ref, other.global_ref)];
    seeds.extend(self.call_stack.iter().copied().zip(other.call_stack.iter().copied()));
    seeds.extend(self.pending.iter().sorted().map(|id| (*id, *id)));
    seeds.extend(self.pinned.iter().map(|id| (*id, *id)));
    for (a, b) in seeds {
      if !iso.pair(a, b) {
        return false;
      };
    }
    if !iso.values(&self.last_value, &other.last_value) {
      return false;
    };
    while let Some((a, b)) = iso.queue.pop_front() {
      let (Some(oa), Some(ob)) = (self.objects.get(&a), other.objects.get(&b)) else {
        return false;
      };
      if !iso.objects(oa, ob) {
        return false;
      };
    }
    true
  }
}

struct Isomorphism {
  fwd: HashMap<HeapId, HeapId>,
  bwd: HashMap<HeapId, HeapId>,
  queue: VecDeque<(HeapId, HeapId)>,
}

impl Isomorphism {
  fn new() -> Isomorphism {
    Isomorphism {
      fwd: HashMap::new(),
      bwd: HashMap::new(),
      queue: VecDeque::new(),
    }
  }

  fn pair(&mut self, a: HeapId, b: HeapId) -> bool {
    match (self.fwd.get(&a), self.bwd.get(&b)) {
      (None, None) => {
        self.fwd.insert(a, b);
        self.bwd.insert(b, a);
        self.queue.push_back((a, b));
        true
      }
      (Some(x), Some(y)) => *x == b && *y == a,
      _ => false,
    }
  }

  fn values(&mut self, a: &AbstractValue, b: &AbstractValue) -> bool {
    match (a, b) {
      (AbstractValue::Reference(x, bx), AbstractValue::Reference(y, by)) => {
        self.pair(*x, *y)
          && match (bx, by) {
            (None, None) => true,
            (Some(BoundThis::Object(tx)), Some(BoundThis::Object(ty))) => self.pair(*tx, *ty),
            (Some(BoundThis::Primitive(px)), Some(BoundThis::Primitive(py))) => px == py,
            _ => false,
          }
      }
      (AbstractValue::Or(xs), AbstractValue::Or(ys)) => {
        xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| self.values(x, y))
      }
      (a, b) => a == b,
    }
  }

  fn objects(&mut self, a: &AbstractObject, b: &AbstractObject) -> bool {
    if a.missing != b.missing
      || a.length != b.length
      || a.is_array != b.is_array
      || a.properties.len() != b.properties.len()
    {
      return false;
    };
    let callable_matches = match (a.callable, b.callable) {
      (None, None) => true,
      (Some(Callable::Closure { node: na, env: ea }), Some(Callable::Closure { node: nb, env: eb })) => {
        na == nb && self.pair(ea, eb)
      }
      (x, y) => x == y,
    };
    callable_matches
      && a
        .properties
        .iter()
        .zip(b.properties.iter())
        .all(|((ka, va), (kb, vb))| ka == kb && self.values(va, vb))
  }
}
