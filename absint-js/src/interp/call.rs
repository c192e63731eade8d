use super::stmt::collect_pattern_names;
use super::stmt::Body;
use super::Abort;
use super::CallArgs;
use super::Flow;
use super::Interpreter;
use super::ReturnFrame;
use crate::annotate::BetaReduction;
use crate::annotate::CallTarget;
use crate::annotate::NodeId;
use crate::config::KeepOrPolicy;
use crate::domain::object::AbstractObject;
use crate::domain::object::Callable;
use crate::domain::object::MissingMode;
use crate::domain::object::NativeId;
use crate::domain::object::PropKey;
use crate::domain::value::join;
use crate::domain::value::make_or;
use crate::domain::value::AbstractValue;
use crate::domain::value::BoundThis;
use crate::domain::value::HeapId;
use crate::domain::value::UNDEFINED;
use crate::err::FatalKind;
use crate::heap::State;
use crate::heap::CLOSURE_KEY;
use crate::heap::THIS_KEY;
use crate::plugin::NativeCall;
use crate::plugin::NativeOutcome;
use itertools::Itertools;
use parse_js::ast::ClassOrObjectMemberValue;
use parse_js::ast::Node;
use parse_js::ast::NodeData;
use parse_js::ast::ObjectMemberType;
use parse_js::ast::Syntax;
use parse_js::parse::toplevel::TopLevelMode;
use parse_js::session::Session;
use parse_js::session::SessionVec;
use std::mem;
use tracing::debug;
use tracing::warn;

pub(super) enum FunctionBody<'a> {
  Block(&'a Body<'a>),
  /// Concise arrow function body.
  Expression(&'a NodeData<'a>),
}

pub(super) struct FunctionParts<'a> {
  /// Name bound inside a named function expression.
  pub own_name: Option<&'a str>,
  pub params: &'a SessionVec<'a, Node<'a>>,
  pub body: FunctionBody<'a>,
  pub arrow: bool,
}

fn signature_params<'a>(signature: &'a NodeData<'a>) -> Option<&'a SessionVec<'a, Node<'a>>> {
  match &signature.stx {
    Syntax::FunctionSignature { parameters } => Some(parameters),
    _ => None,
  }
}

fn block_body<'a>(body: &'a NodeData<'a>) -> Option<FunctionBody<'a>> {
  match &body.stx {
    Syntax::BlockStmt { body } => Some(FunctionBody::Block(body)),
    _ => None,
  }
}

fn function_name<'a>(name: &'a Option<Node<'a>>) -> Option<&'a str> {
  match name.as_deref().map(|n| &n.stx) {
    Some(Syntax::ClassOrFunctionName { name }) => Some(name.as_str()),
    _ => None,
  }
}

/// Splits any function-like node into what a call needs.
pub(super) fn function_parts<'a>(node: &'a NodeData<'a>) -> Option<FunctionParts<'a>> {
  match &node.stx {
    Syntax::FunctionDecl {
      signature, body, ..
    } => Some(FunctionParts {
      own_name: None,
      params: signature_params(signature)?,
      body: block_body(body)?,
      arrow: false,
    }),
    Syntax::FunctionExpr {
      name,
      signature,
      body,
      ..
    } => Some(FunctionParts {
      own_name: function_name(name),
      params: signature_params(signature)?,
      body: block_body(body)?,
      arrow: false,
    }),
    Syntax::ArrowFunctionExpr {
      signature, body, ..
    } => Some(FunctionParts {
      own_name: None,
      params: signature_params(signature)?,
      body: block_body(body).unwrap_or(FunctionBody::Expression(body)),
      arrow: true,
    }),
    Syntax::ObjectMember { typ } => match typ {
      ObjectMemberType::Valued {
        value: ClassOrObjectMemberValue::Method {
          signature, body, ..
        },
        ..
      } => Some(FunctionParts {
        own_name: None,
        params: signature_params(signature)?,
        body: block_body(body)?,
        arrow: false,
      }),
      _ => None,
    },
    _ => None,
  }
}

/// Simple parameter names, in order; `None` if any parameter destructures or collects a rest.
fn simple_param_names<'a>(params: &'a SessionVec<'a, Node<'a>>) -> Option<Vec<&'a str>> {
  params
    .iter()
    .map(|param| match &param.stx {
      Syntax::ParamDecl {
        rest: false,
        pattern,
        ..
      } => match &pattern.stx {
        Syntax::IdentifierPattern { name } => Some(name.as_str()),
        _ => None,
      },
      _ => None,
    })
    .collect()
}

impl<'a, 'p> Interpreter<'a, 'p> {
  pub(super) fn eval_args(&mut self, arguments: &'a SessionVec<'a, Node<'a>>) -> Flow<CallArgs> {
    let mut args = CallArgs::default();
    for arg in arguments.iter() {
      let Syntax::CallArg { spread, value } = &arg.stx else {
        continue;
      };
      let v = self.eval_expr(value)?;
      if !*spread {
        if args.open {
          continue;
        };
        args.values.push(v);
        continue;
      };
      match self.spread_elements(&v)? {
        Some(items) if !args.open => args.values.extend(items),
        _ => args.open = true,
      };
    }
    Ok(args)
  }

  pub(super) fn eval_call(
    &mut self,
    node: &'a NodeData<'a>,
    callee: &'a NodeData<'a>,
    arguments: &'a SessionVec<'a, Node<'a>>,
  ) -> Flow<AbstractValue> {
    let (func, this) = match &callee.stx {
      Syntax::MemberExpr {
        left,
        right,
        optional_chaining,
        ..
      } => {
        let object = self.eval_expr(left)?;
        let func = self.read_member(&object, &[PropKey::name(right.as_str())], *optional_chaining)?;
        self.record_value(callee, &func);
        (func, object)
      }
      Syntax::ComputedMemberExpr {
        object,
        member,
        optional_chaining,
        ..
      } => {
        let object = self.eval_expr(object)?;
        let key = self.eval_expr(member)?;
        let func = match super::expr::keys_of(&key) {
          Some(keys) => self.read_member(&object, &keys, *optional_chaining)?,
          None => AbstractValue::Top,
        };
        self.record_value(callee, &func);
        (func, object)
      }
      _ => (self.eval_expr(callee)?, UNDEFINED),
    };
    self.hold(&func);
    let args = self.eval_args(arguments)?;
    self.call_value(node, &func, this, args)
  }

  /// Calls every alternative of `callee` on its own copy of the state and joins the outcomes.
  pub(super) fn call_value(
    &mut self,
    site: &'a NodeData<'a>,
    callee: &AbstractValue,
    this: AbstractValue,
    args: CallArgs,
  ) -> Flow<AbstractValue> {
    if callee.is_bottom() || self.state.is_bottom {
      return Ok(AbstractValue::Bottom);
    };
    let alternatives = callee.alternatives();
    if let [single] = alternatives {
      return self.call_single(site, single, this, &args);
    };
    let base = self.state.clone();
    let mut results = Vec::with_capacity(alternatives.len());
    let mut states = Vec::with_capacity(alternatives.len());
    for alt in alternatives {
      self.state = base.clone();
      let v = self.call_single(site, alt, this.clone(), &args)?;
      if !self.state.is_bottom {
        self.hold(&v);
        results.push(v);
      };
      states.push(mem::replace(&mut self.state, base.bottom_like()));
    }
    for state in states {
      self.merge(state)?;
    }
    Ok(make_or(results, &self.config.keep_or))
  }

  fn call_single(
    &mut self,
    site: &'a NodeData<'a>,
    callee: &AbstractValue,
    this: AbstractValue,
    args: &CallArgs,
  ) -> Flow<AbstractValue> {
    let AbstractValue::Reference(id, bound) = callee else {
      return self.call_unknown(&this, args);
    };
    let this = match bound {
      Some(BoundThis::Object(obj)) => AbstractValue::reference(*obj),
      Some(BoundThis::Primitive(p)) => AbstractValue::Primitive(p.clone()),
      None => this,
    };
    match self.state.object(*id)?.callable {
      Some(Callable::Function { node }) => self.call_function(site, node, None, *id, this, args),
      Some(Callable::Closure { node, env }) => {
        self.call_function(site, node, Some(env), *id, this, args)
      }
      Some(Callable::Native { id: native, pure }) => self.call_native(site, native, pure, this, args),
      None => self.call_unknown(&this, args),
    }
  }

  /// A call the analysis cannot follow. Its effects are unknown, and any function passed to it
  /// may be called back later.
  fn call_unknown(&mut self, this: &AbstractValue, args: &CallArgs) -> Flow<AbstractValue> {
    self.taint();
    self.defer_callables(this)?;
    for arg in &args.values {
      self.defer_callables(arg)?;
    }
    Ok(AbstractValue::Top)
  }

  fn call_function(
    &mut self,
    site: &'a NodeData<'a>,
    node: NodeId,
    env: Option<HeapId>,
    callee: HeapId,
    this: AbstractValue,
    args: &CallArgs,
  ) -> Flow<AbstractValue> {
    let Some(&func) = self.functions.get(&node) else {
      warn!("call to a function that was never created");
      return self.call_unknown(&this, args);
    };
    if self.discarding == 0 {
      self
        .annotations
        .set_call_target(site, CallTarget::Unique(node));
      self.note_beta_reduction(site, func, args);
    };
    self.call_at_site(NodeId::of(site), func, env, callee, this, args)
  }

  /// Records that the call can be replaced by the callee's returned expression with the
  /// parameters substituted.
  fn note_beta_reduction(&mut self, site: &'a NodeData<'a>, func: &'a NodeData<'a>, args: &CallArgs) {
    let site_id = NodeId::of(site);
    if !self.config.inlining || self.conflicted.contains(&site_id) {
      return;
    };
    let reduction = function_parts(func).and_then(|parts| {
      let body: &'a NodeData<'a> = match parts.body {
        FunctionBody::Expression(expr) => expr,
        FunctionBody::Block(stmts) => match stmts.first().map(|s| &s.stx) {
          Some(Syntax::ReturnStmt { value: Some(value) }) => value,
          _ => return None,
        },
      };
      let names = simple_param_names(parts.params)?;
      Some(BetaReduction {
        body: NodeId::of(body),
        substitutions: names
          .into_iter()
          .enumerate()
          .map(|(i, name)| (name.to_string(), args.get(i)))
          .collect(),
      })
    });
    let policy = self.config.keep_or;
    let ann = self.annotations.entry(site);
    let merged = match (reduction, ann.reduced.take()) {
      (Some(new), None) => {
        self.stats.beta_reductions += 1;
        Some(new)
      }
      (Some(new), Some(prev)) if new.body == prev.body => Some(BetaReduction {
        body: prev.body,
        substitutions: prev
          .substitutions
          .into_iter()
          .zip(new.substitutions)
          .map(|((name, a), (_, b))| (name, join(&a, &b, &policy)))
          .collect(),
      }),
      (_, prev) => {
        if prev.is_some() {
          self.stats.beta_reductions -= 1;
        };
        self.conflicted.insert(site_id);
        None
      }
    };
    ann.reduced = merged;
  }

  fn site_mut(&mut self, site: NodeId) -> &mut super::CallSite {
    self.sites.entry(site).or_insert_with(super::CallSite::new)
  }

  /// Calls an interpreted function, bounding recursion through the same call site.
  ///
  /// The call that reaches the depth ceiling is re-run from a widened state until the states and
  /// arguments of deeper encounters no longer change it. Deeper encounters record their state
  /// and unwind back to it.
  pub(super) fn call_at_site(
    &mut self,
    site: NodeId,
    func: &'a NodeData<'a>,
    env: Option<HeapId>,
    callee: HeapId,
    this: AbstractValue,
    args: &CallArgs,
  ) -> Flow<AbstractValue> {
    let max = self.config.max_recursion;
    let entry = self.site_mut(site);
    if entry.active > max {
      if entry.skip {
        return Ok(entry.ret.clone());
      };
      let snapshot = entry.snapshot.take();
      let policy = self.config.keep_or;
      let entry = self.site_mut(site);
      entry.args = join_args(&entry.args, &args.values, &policy);
      let widened = entry.args.clone();
      for v in &widened {
        self.hold(v);
      }
      let depth = match &snapshot {
        Some(s) => s.depth(),
        None => self.state.depth(),
      };
      let mut deeper = self.state.clone();
      deeper.fold_to_depth(depth, &policy)?;
      let mut snapshot = snapshot.unwrap_or_else(|| deeper.bottom_like());
      self.join_states(&mut snapshot, deeper)?;
      self.site_mut(site).snapshot = Some(snapshot);
      debug!(depth = self.state.depth(), "recursion past the ceiling, unwinding");
      return Err(Abort::Unwind(site));
    };
    if entry.active == max {
      return self.call_at_ceiling(site, func, env, callee, this, args);
    };
    self.inline(site, func, env, callee, this, args)
  }

  fn call_at_ceiling(
    &mut self,
    site: NodeId,
    func: &'a NodeData<'a>,
    env: Option<HeapId>,
    callee: HeapId,
    this: AbstractValue,
    args: &CallArgs,
  ) -> Flow<AbstractValue> {
    let mut args = args.clone();
    self.protect_current();
    let mut saved = self.state.clone();
    for round in 0..=self.config.max_widening_iter {
      {
        let entry = self.site_mut(site);
        entry.snapshot = Some(saved.clone());
        entry.args = args.values.clone();
      }
      let result = self.inline(site, func, env, callee, this.clone(), &args);
      match result {
        Err(Abort::Unwind(unwound)) if unwound == site => {
          let entry = self.site_mut(site);
          let joined = entry.snapshot.take();
          let widened = mem::take(&mut entry.args);
          let Some(mut joined) = joined else {
            return Err(FatalKind::StrayUnwind.into());
          };
          for v in &widened {
            self.hold(v);
          }
          super::protect(&self.holds, &self.deferred, &mut joined);
          super::protect(&self.holds, &self.deferred, &mut saved);
          if self.config.unify {
            joined.unify(&saved);
          };
          let stable = widened == args.values && joined.equal(&saved);
          args.values = widened;
          if stable {
            debug!(round, "recursion stable at the ceiling");
            return self.finish_recursion(site, func, env, callee, this, &args, joined);
          };
          debug!(round, "recursion not yet stable, widening");
          saved = joined;
          self.state = saved.clone();
        }
        other => {
          self.site_mut(site).snapshot = None;
          return other;
        }
      };
    }
    Err(FatalKind::RecursionDiverged(self.config.max_widening_iter).into())
  }

  /// Runs the ceiling call from the stable widened state, answering deeper calls with the return
  /// value accumulated so far, until that value stops changing.
  fn finish_recursion(
    &mut self,
    site: NodeId,
    func: &'a NodeData<'a>,
    env: Option<HeapId>,
    callee: HeapId,
    this: AbstractValue,
    args: &CallArgs,
    joined: State,
  ) -> Flow<AbstractValue> {
    let policy = self.config.keep_or;
    {
      let entry = self.site_mut(site);
      entry.skip = true;
      entry.ret = AbstractValue::Bottom;
    }
    for _ in 0..=self.config.max_widening_iter {
      self.state = joined.clone();
      let result = self.inline(site, func, env, callee, this.clone(), args);
      let entry = self.site_mut(site);
      let value = match result {
        Ok(value) => value,
        Err(err) => {
          entry.skip = false;
          return Err(err);
        }
      };
      let next = join(&entry.ret, &value, &policy);
      if next == entry.ret {
        entry.skip = false;
        return Ok(next);
      };
      entry.ret = next;
    }
    self.site_mut(site).skip = false;
    Err(FatalKind::RecursionDiverged(self.config.max_widening_iter).into())
  }

  fn inline(
    &mut self,
    site: NodeId,
    func: &'a NodeData<'a>,
    env: Option<HeapId>,
    callee: HeapId,
    this: AbstractValue,
    args: &CallArgs,
  ) -> Flow<AbstractValue> {
    self.site_mut(site).active += 1;
    let result = self.invoke(func, env, callee, this, args);
    self.site_mut(site).active -= 1;
    result
  }

  /// Pushes a frame for `func`, runs its body, and pops the frame again.
  fn invoke(
    &mut self,
    func: &'a NodeData<'a>,
    env: Option<HeapId>,
    callee: HeapId,
    this: AbstractValue,
    args: &CallArgs,
  ) -> Flow<AbstractValue> {
    let Some(parts) = function_parts(func) else {
      return Ok(AbstractValue::Top);
    };
    if self.discarding == 0 {
      self.annotations.entry(func).used = true;
    };

    let mut frame = AbstractObject::new_object();
    if let Some(env) = env {
      frame.set(PropKey::name(CLOSURE_KEY), AbstractValue::reference(env));
    };
    if !parts.arrow {
      frame.set(PropKey::name(THIS_KEY), this);
      let mut arguments = AbstractObject::new_array(args.values.clone());
      if args.open {
        arguments.length = None;
        arguments.set_missing_mode(MissingMode::MissingIsTop);
      };
      let arguments = self.state.alloc(&mut self.ids, arguments);
      frame.set(PropKey::name("arguments"), AbstractValue::reference(arguments));
    };
    if let Some(name) = parts.own_name {
      frame.set(PropKey::name(name), AbstractValue::reference(callee));
    };
    let frame = self.state.alloc(&mut self.ids, frame);
    self.state.call_stack.push(self.state.local_ref);
    self.state.local_ref = frame;

    self.holds.push(Vec::new());
    let hold = self.holds.len() - 1;
    let returns = self.state.bottom_like();
    self.returns.push(ReturnFrame {
      state: returns,
      value: AbstractValue::Bottom,
      hold,
    });
    self.purity.push(true);
    let body = self.run_body(&parts, args);
    let pure = self.purity.pop().unwrap_or(false);
    let returned = self.returns.pop();
    let result = match (body, returned) {
      (Ok(fell_off), Some(returned)) => self.complete_call(fell_off, returned),
      (Ok(fell_off), None) => Ok(fell_off),
      (Err(err), _) => Err(err),
    };
    self.holds.pop();
    let value = result?;

    if let Some(caller) = self.state.call_stack.pop() {
      self.state.local_ref = caller;
    };
    if self.discarding == 0 {
      let ann = self.annotations.entry(func);
      ann.pure = Some(ann.pure.unwrap_or(true) && pure);
    };
    if !pure {
      self.taint();
    };
    Ok(value)
  }

  /// Binds the parameters and runs the body. Returns the value of falling off the end.
  fn run_body(&mut self, parts: &FunctionParts<'a>, args: &CallArgs) -> Flow<AbstractValue> {
    let local = self.state.local_ref;
    let mut names = Vec::new();
    for param in parts.params.iter() {
      if let Syntax::ParamDecl { pattern, .. } = &param.stx {
        collect_pattern_names(pattern, &mut names);
      };
    }
    let frame = self.state.object_mut(local)?;
    for name in names {
      frame.set(PropKey::name(name), UNDEFINED);
    }
    for (i, param) in parts.params.iter().enumerate() {
      let Syntax::ParamDecl {
        rest,
        pattern,
        default_value,
      } = &param.stx
      else {
        continue;
      };
      let value = if *rest {
        let mut rest = AbstractObject::new_array(args.values.iter().skip(i).cloned().collect_vec());
        if args.open {
          rest.length = None;
          rest.set_missing_mode(MissingMode::MissingIsTop);
        };
        AbstractValue::reference(self.state.alloc(&mut self.ids, rest))
      } else {
        let value = args.get(i);
        self.apply_default(value, default_value.as_deref())?
      };
      self.hold(&value);
      self.bind_pattern(pattern, value)?;
    }

    match parts.body {
      FunctionBody::Expression(expr) => self.eval_expr(expr),
      FunctionBody::Block(stmts) => {
        self.hoist(stmts)?;
        for stmt in stmts.iter() {
          self.eval_stmt(stmt)?;
        }
        Ok(UNDEFINED)
      }
    }
  }

  fn complete_call(&mut self, fell_off: AbstractValue, returned: ReturnFrame) -> Flow<AbstractValue> {
    let fell_off = if self.state.is_bottom {
      AbstractValue::Bottom
    } else {
      fell_off
    };
    self.merge(returned.state)?;
    Ok(join(&returned.value, &fell_off, &self.config.keep_or))
  }

  fn call_native(
    &mut self,
    site: &'a NodeData<'a>,
    id: NativeId,
    pure: bool,
    this: AbstractValue,
    args: &CallArgs,
  ) -> Flow<AbstractValue> {
    let plugins = self.plugins;
    let Some(entry) = plugins.native(id) else {
      return self.call_unknown(&this, args);
    };
    if !pure {
      self.taint();
    };
    let functions = &self.functions;
    let function_text =
      |node: NodeId| functions.get(&node).map(|f| f.loc.as_str().to_string());
    let mut call = NativeCall {
      name: entry.name,
      state: &mut self.state,
      ids: &mut self.ids,
      this,
      args: &args.values,
      config: &self.config,
      function_text: &function_text,
    };
    let outcome = (entry.func)(&mut call)?;
    match outcome {
      NativeOutcome::Value(value) => Ok(value),
      NativeOutcome::Evaluate(source) => self.eval_source(site, source),
      NativeOutcome::Call { callee, this, args } => {
        self.hold(&callee);
        self.hold(&this);
        self.call_value(site, &callee, this, CallArgs {
          values: args,
          open: false,
        })
      }
    }
  }

  /// Parses source text produced at runtime and interprets it in the current scope. Each call
  /// site parses a given text once.
  fn eval_source(&mut self, site: &'a NodeData<'a>, source: String) -> Flow<AbstractValue> {
    let key = (NodeId::of(site), source);
    let cached = self.sub_programs.get(&key).copied();
    let program = match cached {
      Some(program) => program,
      None => {
        let session: &'a Session = self.session;
        let bytes = session.get_allocator().alloc_slice_copy(key.1.as_bytes());
        match parse_js::parse(session, bytes, TopLevelMode::Global) {
          Ok(node) => {
            let node: &'a NodeData<'a> = node;
            self.sub_programs.insert(key, node);
            self.stats.sub_programs += 1;
            node
          }
          Err(err) => {
            warn!(error = %err, "runtime source does not parse");
            return Ok(AbstractValue::Top);
          }
        }
      }
    };
    if self.discarding == 0 {
      self.annotations.entry(site).sub_program = Some(NodeId::of(program));
    };
    debug!(at = site.loc.start(), "interpreting runtime source");
    self.state.last_value = UNDEFINED;
    self.run_program(program)?;
    Ok(if self.state.is_bottom {
      AbstractValue::Bottom
    } else {
      self.state.last_value.clone()
    })
  }
}

fn join_args(
  a: &[AbstractValue],
  b: &[AbstractValue],
  policy: &KeepOrPolicy,
) -> Vec<AbstractValue> {
  (0..a.len().max(b.len()))
    .map(|i| {
      join(
        a.get(i).unwrap_or(&UNDEFINED),
        b.get(i).unwrap_or(&UNDEFINED),
        policy,
      )
    })
    .collect()
}
