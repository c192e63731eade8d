use super::Breakable;
use super::Flow;
use super::Interpreter;
use crate::annotate::NodeId;
use crate::annotate::UnrollTrace;
use crate::domain::value::AbstractValue;
use crate::err::FatalKind;
use crate::heap::State;
use parse_js::ast::ForInOfStmtHeaderLhs;
use parse_js::ast::ForThreeInit;
use parse_js::ast::NodeData;
use parse_js::ast::Syntax;
use std::mem;
use tracing::debug;
use tracing::warn;

/// How often an unrolled loop compares its header state against an earlier one.
const STABILITY_CHECK_INTERVAL: usize = 32;

enum Condition<'a> {
  Expr(&'a NodeData<'a>),
  Always,
  Unknown,
}

struct LoopParts<'a> {
  node: &'a NodeData<'a>,
  condition: Condition<'a>,
  body: &'a NodeData<'a>,
  post: Option<&'a NodeData<'a>>,
  /// Pattern assigned an unknown value before each iteration.
  binding: Option<&'a NodeData<'a>>,
  /// Run the body once before the first test.
  body_first: bool,
}

impl<'a, 'p> Interpreter<'a, 'p> {
  pub(super) fn eval_while(
    &mut self,
    node: &'a NodeData<'a>,
    condition: &'a NodeData<'a>,
    body: &'a NodeData<'a>,
  ) -> Flow<()> {
    self.eval_loop(LoopParts {
      node,
      condition: Condition::Expr(condition),
      body,
      post: None,
      binding: None,
      body_first: false,
    })
  }

  pub(super) fn eval_do_while(
    &mut self,
    node: &'a NodeData<'a>,
    condition: &'a NodeData<'a>,
    body: &'a NodeData<'a>,
  ) -> Flow<()> {
    self.eval_loop(LoopParts {
      node,
      condition: Condition::Expr(condition),
      body,
      post: None,
      binding: None,
      body_first: true,
    })
  }

  pub(super) fn eval_for(
    &mut self,
    node: &'a NodeData<'a>,
    init: &'a ForThreeInit<'a>,
    condition: Option<&'a NodeData<'a>>,
    post: Option<&'a NodeData<'a>>,
    body: &'a NodeData<'a>,
  ) -> Flow<()> {
    match init {
      ForThreeInit::None => {}
      ForThreeInit::Expression(expr) => {
        self.eval_expr(expr)?;
      }
      ForThreeInit::Declaration(decl) => self.eval_var_decl(decl)?,
    };
    self.eval_loop(LoopParts {
      node,
      condition: condition.map_or(Condition::Always, Condition::Expr),
      body,
      post,
      binding: None,
      body_first: false,
    })
  }

  /// Iteration protocols are not modelled: the body runs with an unknown binding until the state
  /// is stable.
  pub(super) fn eval_for_in_of(
    &mut self,
    node: &'a NodeData<'a>,
    lhs: &'a ForInOfStmtHeaderLhs<'a>,
    rhs: &'a NodeData<'a>,
    body: &'a NodeData<'a>,
  ) -> Flow<()> {
    warn!(at = node.loc.start(), "for-in/for-of analysed with unknown iteration values");
    self.eval_expr(rhs)?;
    let binding: &'a NodeData<'a> = match lhs {
      ForInOfStmtHeaderLhs::Pattern(pattern) => pattern,
      ForInOfStmtHeaderLhs::Declaration(decl) => match &decl.stx {
        Syntax::VarDecl { declarators, .. } => match declarators.first() {
          Some(declarator) => &declarator.pattern,
          None => return Ok(()),
        },
        _ => return Ok(()),
      },
    };
    self.eval_loop(LoopParts {
      node,
      condition: Condition::Unknown,
      body,
      post: None,
      binding: Some(binding),
      body_first: false,
    })
  }

  fn eval_loop(&mut self, parts: LoopParts<'a>) -> Flow<()> {
    let break_state = self.state.bottom_like();
    let continue_state = self.state.bottom_like();
    self.breakables.push(Breakable::Loop {
      break_state,
      continue_state,
    });
    let result = self.run_loop(&parts);
    let frame = self.breakables.pop();
    let trace = result?;
    if let Some(Breakable::Loop { break_state, .. }) = frame {
      self.merge(break_state)?;
    };
    self.publish_trace(parts.node, trace);
    Ok(())
  }

  fn test_condition(&mut self, condition: &Condition<'a>) -> Flow<Option<bool>> {
    match condition {
      Condition::Always => Ok(Some(true)),
      Condition::Unknown => Ok(None),
      Condition::Expr(expr) => {
        // Own hold frame: the test value is dropped right away and must not stay pending.
        self.holds.push(Vec::new());
        let value = self.eval_expr(expr);
        self.holds.pop();
        Ok(self.plugins.to_bool(&value?))
      }
    }
  }

  fn eval_post(&mut self, post: Option<&'a NodeData<'a>>) -> Flow<()> {
    if let Some(post) = post {
      self.holds.push(Vec::new());
      let result = self.eval_expr(post);
      self.holds.pop();
      result?;
    };
    Ok(())
  }

  /// Joins the states that reached `continue` back into the current state.
  fn take_continue_state(&mut self) -> Flow<()> {
    let fresh = self.state.bottom_like();
    let Some(Breakable::Loop { continue_state, .. }) = self.breakables.last_mut() else {
      return Ok(());
    };
    let continued = mem::replace(continue_state, fresh);
    self.merge(continued)
  }

  fn bind_unknown(&mut self, parts: &LoopParts<'a>) -> Flow<()> {
    match parts.binding {
      Some(pattern) if !self.state.is_bottom => self.bind_pattern(pattern, AbstractValue::Top),
      _ => Ok(()),
    }
  }

  /// Unrolls the loop while its condition is decidable. Returns the trace when the loop finished
  /// by unrolling, or `None` when it was widened or never terminates.
  fn run_loop(&mut self, parts: &LoopParts<'a>) -> Flow<Option<UnrollTrace>> {
    let mut trace = Vec::new();
    let mut iterations = 0;
    let mut snapshot: Option<State> = None;
    loop {
      if self.state.is_bottom {
        return Ok(Some(UnrollTrace { iterations, trace }));
      };
      self.protect_current();
      let header = self.state.clone();
      let decision = if parts.body_first && iterations == 0 {
        Some(true)
      } else {
        self.test_condition(&parts.condition)?
      };
      match decision {
        Some(false) => return Ok(Some(UnrollTrace { iterations, trace })),
        Some(true) if iterations < self.config.max_iter => {}
        Some(true) | None => {
          if decision.is_some() {
            debug!(iterations, "unroll budget exhausted, widening loop");
          } else {
            debug!(iterations, "loop condition undecidable, widening loop");
          };
          self.state = header;
          self.widen_loop(parts, parts.body_first && iterations == 0)?;
          return Ok(None);
        }
      };
      if self.state.is_bottom {
        return Ok(Some(UnrollTrace { iterations, trace }));
      };
      if iterations % STABILITY_CHECK_INTERVAL == 0 {
        if snapshot.as_ref().is_some_and(|prev| prev.equal(&header)) {
          debug!(iterations, "loop state repeats with a true condition, loop never exits");
          self.state.set_to_bottom();
          return Ok(None);
        };
        snapshot = Some(header);
      };
      iterations += 1;
      self.eval_stmt(parts.body)?;
      trace.push(NodeId::of(parts.body));
      self.take_continue_state()?;
      if let Some(post) = parts.post {
        if !self.state.is_bottom {
          self.eval_post(Some(post))?;
          trace.push(NodeId::of(post));
        };
      };
    }
  }

  /// Iterates from the loop header, joining each post-body state into it, until the header no
  /// longer changes. The exit state is the false branch of the final round's test.
  fn widen_loop(&mut self, parts: &LoopParts<'a>, skip_first_test: bool) -> Flow<()> {
    self.widened(parts.node);
    let mut header = mem::replace(&mut self.state, State::empty());
    for round in 0..=self.config.max_widening_iter {
      self.state = header.clone();
      let decision = if skip_first_test && round == 0 {
        Some(true)
      } else {
        self.test_condition(&parts.condition)?
      };
      let exit = match decision {
        Some(true) => self.state.bottom_like(),
        _ => self.state.clone(),
      };
      if decision == Some(false) {
        self.state.set_to_bottom();
      };
      self.bind_unknown(parts)?;
      self.eval_stmt(parts.body)?;
      self.take_continue_state()?;
      if !self.state.is_bottom {
        self.eval_post(parts.post)?;
      };
      let after = mem::replace(&mut self.state, State::empty());
      let mut next = header.clone();
      self.join_states(&mut next, after)?;
      if next.equal(&header) {
        debug!(round, "loop reached a fixpoint");
        self.state = exit;
        return Ok(());
      };
      header = next;
    }
    Err(FatalKind::LoopDiverged(self.config.max_widening_iter).into())
  }

  fn widened(&mut self, node: &'a NodeData<'a>) {
    self.conflicted.insert(NodeId::of(node));
  }

  /// Records the unroll trace of a loop. A loop that was ever widened, or that unrolled
  /// differently on another visit, keeps no trace.
  fn publish_trace(&mut self, node: &'a NodeData<'a>, trace: Option<UnrollTrace>) {
    if self.discarding > 0 {
      return;
    };
    let id = NodeId::of(node);
    let trace = match trace {
      Some(trace) if !self.conflicted.contains(&id) => trace,
      _ => {
        self.conflicted.insert(id);
        if self.annotations.entry(node).unrolled.take().is_some() {
          self.stats.unrolled_loops -= 1;
        };
        return;
      }
    };
    let ann = self.annotations.entry(node);
    match &ann.unrolled {
      None => {
        ann.unrolled = Some(trace);
        self.stats.unrolled_loops += 1;
      }
      Some(prev) if *prev == trace => {}
      Some(_) => {
        ann.unrolled = None;
        self.stats.unrolled_loops -= 1;
        self.conflicted.insert(id);
      }
    };
  }
}
