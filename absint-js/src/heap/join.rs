use super::State;
use crate::config::AnalysisConfig;
use crate::config::KeepOrPolicy;
use crate::domain::value::AbstractValue;
use crate::domain::value::HeapId;
use crate::err::HeapError;
use ahash::HashSet;
use ahash::HashSetExt;
use tracing::trace;

impl State {
  /// Merges `other` into `self` so that the result over-approximates both states.
  pub fn join(&mut self, other: &State, config: &AnalysisConfig) -> Result<(), HeapError> {
    if other.is_bottom {
      return Ok(());
    };
    if self.is_bottom {
      self.assign(other)?;
      return Ok(());
    };
    let policy = &config.keep_or;

    let folded;
    let other = if other.depth() > self.depth() {
      let mut deeper = other.clone();
      deeper.fold_to_depth(self.depth(), policy)?;
      folded = deeper;
      &folded
    } else {
      other
    };
    if self.depth() > other.depth() {
      self.fold_to_depth(other.depth(), policy)?;
    };

    if config.unify {
      self.unify(other);
    };

    let mut seen = HashSet::new();
    let mut stack = other.roots();
    while let Some(id) = stack.pop() {
      if !seen.insert(id) {
        continue;
      };
      let src = other.object(id)?;
      match self.objects.get_mut(&id) {
        Some(dst) => dst.join(src, policy),
        None => {
          self.objects.insert(id, src.clone());
        }
      };
      src.for_each_id(&mut |child| {
        if !seen.contains(&child) {
          stack.push(child);
        };
      });
    }

    // Frames at the same depth that still have different ids after unification.
    let frame_pairs = self
      .call_stack
      .iter()
      .copied()
      .chain([self.local_ref])
      .zip(other.call_stack.iter().copied().chain([other.local_ref]))
      .filter(|(a, b)| a != b)
      .collect::<Vec<_>>();
    for (dst, src) in frame_pairs {
      let src = other.object(src)?.clone();
      self.object_mut(dst)?.join(&src, policy);
    }

    self.pending = self
      .pending
      .intersection(&other.pending)
      .copied()
      .collect();
    self.last_value = if self.last_value == other.last_value || other.last_value.is_bottom() {
      self.last_value.clone()
    } else if self.last_value.is_bottom() {
      other.last_value.clone()
    } else {
      AbstractValue::Top
    };
    Ok(())
  }

  /// Folds frames deeper than `depth` into the ancestor frame at `depth`, generalizing the
  /// variables of nested activations into that frame.
  pub fn fold_to_depth(&mut self, depth: usize, policy: &KeepOrPolicy) -> Result<(), HeapError> {
    if self.depth() <= depth {
      return Ok(());
    };
    let target = self.call_stack[depth];
    let inner: Vec<HeapId> = self.call_stack[depth + 1..]
      .iter()
      .copied()
      .chain([self.local_ref])
      .collect();
    trace!(from = self.depth(), to = depth, "folding frames");
    for frame in inner {
      let src = self.object(frame)?.clone();
      self.object_mut(target)?.join(&src, policy);
    }
    self.local_ref = target;
    self.call_stack.truncate(depth);
    Ok(())
  }

  /// Makes `self` a deep copy of everything reachable in `other`.
  pub fn assign(&mut self, other: &State) -> Result<(), HeapError> {
    self.clone_from(other);
    if !self.is_bottom {
      self.retain_reachable()?;
    };
    Ok(())
  }
}
