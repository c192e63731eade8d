use super::call::function_parts;
use super::CallArgs;
use super::Flow;
use super::Interpreter;
use crate::annotate::NodeId;
use crate::domain::object::Callable;
use crate::domain::value::AbstractValue;
use crate::err::FatalKind;
use tracing::debug;

impl<'a, 'p> Interpreter<'a, 'p> {
  /// Runs the callables that escaped to unknown code, in any order and any number of times, until
  /// one more round of calling all of them no longer changes the state.
  pub(super) fn process_deferred(&mut self) -> Flow<()> {
    if self.deferred.is_empty() || self.state.is_bottom {
      return Ok(());
    };
    let end_value = self.state.last_value.clone();
    for round in 0..=self.config.max_deferred_iter {
      self.protect_current();
      let before = self.state.clone();
      // Callbacks deferred during this round are appended and run before it ends.
      let mut i = 0;
      while i < self.deferred.len() {
        let id = self.deferred[i];
        i += 1;
        let Some(obj) = self.state.objects.get(&id) else {
          continue;
        };
        let (node, env) = match obj.callable {
          Some(Callable::Function { node }) => (node, None),
          Some(Callable::Closure { node, env }) => (node, Some(env)),
          _ => continue,
        };
        let Some(&func) = self.functions.get(&node) else {
          continue;
        };
        let arity = function_parts(func).map_or(0, |parts| parts.params.len());
        debug!(round, at = func.loc.start(), "running deferred callback");
        let skipped = self.state.clone();
        self.holds.push(Vec::new());
        let args = CallArgs {
          values: vec![AbstractValue::Top; arity],
          open: true,
        };
        let result = self.call_at_site(NodeId::of(func), func, env, id, AbstractValue::Top, &args);
        self.holds.pop();
        result?;
        self.merge(skipped)?;
        self.collect_garbage()?;
      }
      self.state.last_value = end_value.clone();
      self.protect_current();
      if self.config.unify {
        self.state.unify(&before);
      };
      if self.state.equal(&before) {
        debug!(round, "deferred callbacks reached a fixpoint");
        return Ok(());
      };
    }
    Err(FatalKind::CallbacksDiverged(self.config.max_deferred_iter).into())
  }
}
