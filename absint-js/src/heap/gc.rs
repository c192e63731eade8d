use super::State;
use crate::domain::object::MissingMode;
use crate::domain::value::AbstractValue;
use crate::domain::value::HeapId;
use crate::err::HeapError;
use ahash::HashSet;
use ahash::HashSetExt;
use tracing::trace;

fn points_into(v: &AbstractValue, targets: &HashSet<HeapId>) -> bool {
  v.alternatives()
    .iter()
    .any(|alt| matches!(alt, AbstractValue::Reference(id, _) if targets.contains(id)))
}

impl State {
  /// Ids reachable from the roots. A reference to a missing object is an invariant violation.
  pub fn reachable(&self) -> Result<HashSet<HeapId>, HeapError> {
    let mut seen = HashSet::new();
    let mut stack = self.roots();
    while let Some(id) = stack.pop() {
      if !seen.insert(id) {
        continue;
      };
      let obj = self.object(id)?;
      obj.for_each_id(&mut |child| {
        if !seen.contains(&child) {
          stack.push(child);
        };
      });
    }
    Ok(seen)
  }

  pub(crate) fn retain_reachable(&mut self) -> Result<usize, HeapError> {
    let reachable = self.reachable()?;
    let before = self.objects.len();
    self.objects.retain(|id, _| reachable.contains(id));
    Ok(before - self.objects.len())
  }

  /// Drops every object not reachable from the roots. Returns how many were dropped.
  pub fn garbage_collect(&mut self, unlink_top_objects: bool) -> Result<usize, HeapError> {
    if self.is_bottom {
      return Ok(0);
    };
    if unlink_top_objects {
      self.unlink_top_objects();
    };
    let dropped = self.retain_reachable()?;
    if dropped > 0 {
      trace!(dropped, live = self.objects.len(), "collected");
    };
    Ok(dropped)
  }

  /// Replaces references to objects that carry no information with `Top`, until no such
  /// reference is left outside the roots.
  pub fn unlink_top_objects(&mut self) {
    loop {
      let roots: HashSet<HeapId> = self.roots().into_iter().collect();
      let uninformative: HashSet<HeapId> = self
        .objects
        .iter()
        .filter(|(id, obj)| !roots.contains(id) && obj.is_information_free())
        .map(|(id, _)| *id)
        .collect();
      if uninformative.is_empty() {
        break;
      };
      let mut changed = false;
      for obj in self.objects.values_mut() {
        let mut touched = false;
        for v in obj.properties.values_mut() {
          if points_into(v, &uninformative) {
            *v = AbstractValue::Top;
            touched = true;
          };
        }
        if touched && obj.missing == MissingMode::MissingIsTop {
          obj.properties.retain(|_, v| !v.is_top());
        };
        changed |= touched;
      }
      if !changed {
        break;
      };
    }
  }
}
