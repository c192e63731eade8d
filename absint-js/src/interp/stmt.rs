use super::snippet;
use super::Abort;
use super::Breakable;
use super::Flow;
use super::Interpreter;
use crate::domain::object::PropKey;
use crate::domain::value::join;
use crate::domain::value::AbstractValue;
use crate::domain::value::UNDEFINED;
use crate::heap::State;
use parse_js::ast::ClassOrObjectMemberKey;
use parse_js::ast::ForInOfStmtHeaderLhs;
use parse_js::ast::ForStmtHeader;
use parse_js::ast::ForThreeInit;
use parse_js::ast::Node;
use parse_js::ast::NodeData;
use parse_js::ast::Syntax;
use parse_js::operator::OperatorName;
use parse_js::session::SessionVec;
use std::mem;
use tracing::trace;
use tracing::warn;

pub(super) type Body<'a> = SessionVec<'a, Node<'a>>;

/// Collects the names a statement declares with `var`, `let` or `const`, without descending
/// into nested functions. Block scoping is not modelled: every declaration belongs to the
/// enclosing function.
fn collect_var_names<'a>(stmt: &'a NodeData<'a>, out: &mut Vec<&'a str>) {
  match &stmt.stx {
    Syntax::VarStmt { declaration } => collect_decl_names(declaration, out),
    Syntax::BlockStmt { body } => {
      for s in body.iter() {
        collect_var_names(s, out);
      }
    }
    Syntax::IfStmt {
      consequent,
      alternate,
      ..
    } => {
      collect_var_names(consequent, out);
      if let Some(alt) = alternate {
        collect_var_names(alt, out);
      };
    }
    Syntax::TryStmt {
      wrapped,
      catch,
      finally,
    } => {
      collect_var_names(wrapped, out);
      if let Some(catch) = catch {
        if let Syntax::CatchBlock { body, .. } = &catch.stx {
          collect_var_names(body, out);
        };
      };
      if let Some(finally) = finally {
        collect_var_names(finally, out);
      };
    }
    Syntax::WhileStmt { body, .. } | Syntax::DoWhileStmt { body, .. } => {
      collect_var_names(body, out)
    }
    Syntax::ForStmt { header, body } => {
      match header {
        ForStmtHeader::Three {
          init: ForThreeInit::Declaration(decl),
          ..
        } => collect_decl_names(decl, out),
        ForStmtHeader::InOf {
          lhs: ForInOfStmtHeaderLhs::Declaration(decl),
          ..
        } => collect_decl_names(decl, out),
        _ => {}
      };
      collect_var_names(body, out);
    }
    Syntax::SwitchStmt { branches, .. } => {
      for branch in branches.iter() {
        if let Syntax::SwitchBranch { body, .. } = &branch.stx {
          for s in body.iter() {
            collect_var_names(s, out);
          }
        };
      }
    }
    Syntax::LabelStmt { statement, .. } => collect_var_names(statement, out),
    _ => {}
  };
}

fn collect_decl_names<'a>(decl: &'a NodeData<'a>, out: &mut Vec<&'a str>) {
  if let Syntax::VarDecl { declarators, .. } = &decl.stx {
    for d in declarators.iter() {
      collect_pattern_names(&d.pattern, out);
    }
  };
}

pub(super) fn collect_pattern_names<'a>(pattern: &'a NodeData<'a>, out: &mut Vec<&'a str>) {
  match &pattern.stx {
    Syntax::IdentifierPattern { name } => out.push(name.as_str()),
    Syntax::ArrayPattern { elements, rest } => {
      for element in elements.iter().flatten() {
        collect_pattern_names(&element.target, out);
      }
      if let Some(rest) = rest {
        collect_pattern_names(rest, out);
      };
    }
    Syntax::ObjectPattern { properties, rest } => {
      for prop in properties.iter() {
        let Syntax::ObjectPatternProperty { key, target, .. } = &prop.stx else {
          continue;
        };
        match (target, key) {
          (Some(target), _) => collect_pattern_names(target, out),
          (None, ClassOrObjectMemberKey::Direct(name)) => out.push(name.as_str()),
          (None, ClassOrObjectMemberKey::Computed(_)) => {}
        };
      }
      if let Some(rest) = rest {
        collect_pattern_names(rest, out);
      };
    }
    _ => {}
  };
}

impl<'a, 'p> Interpreter<'a, 'p> {
  /// Declares the variables and functions of a function body or program in the current frame.
  pub(super) fn hoist(&mut self, body: &'a Body<'a>) -> Flow<()> {
    if self.state.is_bottom {
      return Ok(());
    };
    let mut names = Vec::new();
    for stmt in body.iter() {
      collect_var_names(stmt, &mut names);
    }
    let local = self.state.local_ref;
    let frame = self.state.object_mut(local)?;
    for name in names {
      let key = PropKey::name(name);
      if !frame.has_own(&key) {
        frame.set(key, UNDEFINED);
      };
    }
    self.hoist_functions(body)
  }

  /// Binds the function declarations directly inside `body`.
  pub(super) fn hoist_functions(&mut self, body: &'a Body<'a>) -> Flow<()> {
    for stmt in body.iter() {
      if self.state.is_bottom {
        return Ok(());
      };
      let Syntax::FunctionDecl {
        name: Some(name), ..
      } = &stmt.stx
      else {
        continue;
      };
      let Syntax::ClassOrFunctionName { name } = &name.stx else {
        continue;
      };
      let func = self.create_function(stmt)?;
      let local = self.state.local_ref;
      self
        .state
        .object_mut(local)?
        .set(PropKey::name(name.as_str()), func);
    }
    Ok(())
  }

  pub(super) fn eval_stmt(&mut self, stmt: &'a NodeData<'a>) -> Flow<()> {
    if self.state.is_bottom {
      return Ok(());
    };
    self.stats.steps += 1;
    self.record_trail(stmt);
    trace!(at = stmt.loc.start(), depth = self.state.depth(), "statement");
    if self.discarding == 0 {
      self.annotations.mark_live(stmt);
    };
    self.holds.push(Vec::new());
    let result = self.eval_stmt_kind(stmt);
    self.holds.pop();
    result?;
    self.collect_garbage()
  }

  fn eval_stmt_kind(&mut self, stmt: &'a NodeData<'a>) -> Flow<()> {
    match &stmt.stx {
      Syntax::EmptyStmt {} | Syntax::DebuggerStmt {} | Syntax::FunctionDecl { .. } => Ok(()),
      Syntax::ExpressionStmt { expression } => {
        let value = self.eval_expr(expression)?;
        if !self.state.is_bottom {
          self.state.last_value = value;
        };
        Ok(())
      }
      Syntax::VarStmt { declaration } => self.eval_var_decl(declaration),
      Syntax::BlockStmt { body } => self.eval_block(body),
      Syntax::IfStmt {
        test,
        consequent,
        alternate,
      } => self.eval_if(test, consequent, alternate.as_deref()),
      Syntax::WhileStmt { condition, body } => self.eval_while(stmt, condition, body),
      Syntax::DoWhileStmt { condition, body } => self.eval_do_while(stmt, condition, body),
      Syntax::ForStmt { header, body } => match header {
        ForStmtHeader::Three {
          init,
          condition,
          post,
        } => self.eval_for(stmt, init, condition.as_deref(), post.as_deref(), body),
        ForStmtHeader::InOf { lhs, rhs, .. } => self.eval_for_in_of(stmt, lhs, rhs, body),
      },
      Syntax::SwitchStmt { test, branches } => self.eval_switch(test, branches),
      Syntax::BreakStmt { .. } => self.jump(false),
      Syntax::ContinueStmt { .. } => self.jump(true),
      Syntax::ReturnStmt { value } => self.eval_return(value.as_deref()),
      Syntax::ThrowStmt { value } => {
        self.eval_expr(value)?;
        self.state.set_to_bottom();
        Ok(())
      }
      // Only the protected block runs; handlers are reached by exceptions, which are not modelled.
      Syntax::TryStmt { wrapped, .. } => self.eval_stmt(wrapped),
      Syntax::LabelStmt { statement, .. } => self.eval_stmt(statement),
      _ => {
        warn!(source = %snippet(stmt), "unsupported statement skipped");
        Ok(())
      }
    }
  }

  pub(super) fn eval_block(&mut self, body: &'a Body<'a>) -> Flow<()> {
    self.hoist_functions(body)?;
    for stmt in body.iter() {
      self.eval_stmt(stmt)?;
    }
    Ok(())
  }

  pub(super) fn eval_var_decl(&mut self, decl: &'a NodeData<'a>) -> Flow<()> {
    let Syntax::VarDecl { declarators, .. } = &decl.stx else {
      return Ok(());
    };
    for declarator in declarators.iter() {
      let Some(init) = &declarator.initializer else {
        continue;
      };
      let value = self.eval_expr(init)?;
      self.bind_pattern(&declarator.pattern, value)?;
    }
    Ok(())
  }

  fn eval_if(
    &mut self,
    test: &'a NodeData<'a>,
    consequent: &'a NodeData<'a>,
    alternate: Option<&'a NodeData<'a>>,
  ) -> Flow<()> {
    let cond = self.eval_expr(test)?;
    if self.state.is_bottom {
      return Ok(());
    };
    match self.plugins.to_bool(&cond) {
      Some(true) => {
        if let Some(alt) = alternate {
          self.eval_discarded(alt)?;
        };
        self.eval_stmt(consequent)
      }
      Some(false) => {
        self.eval_discarded(consequent)?;
        match alternate {
          Some(alt) => self.eval_stmt(alt),
          None => Ok(()),
        }
      }
      None => {
        let other = self.state.clone();
        self.narrow(test, true)?;
        self.eval_stmt(consequent)?;
        let taken = mem::replace(&mut self.state, other);
        self.narrow(test, false)?;
        if let Some(alt) = alternate {
          self.eval_stmt(alt)?;
        };
        self.merge(taken)
      }
    }
  }

  /// Interprets a branch that cannot be taken, for its annotations only. Nothing it does is
  /// kept.
  fn eval_discarded(&mut self, stmt: &'a NodeData<'a>) -> Flow<()> {
    if !self.config.process_not_taken {
      return Ok(());
    };
    let state = self.state.clone();
    let breakables = self.breakables.clone();
    let returns = self.returns.clone();
    let deferred = self.deferred.clone();
    let purity = self.purity.clone();
    self.discarding += 1;
    let result = self.eval_stmt(stmt);
    self.discarding -= 1;
    self.state = state;
    self.breakables = breakables;
    self.returns = returns;
    self.deferred = deferred;
    self.purity = purity;
    match result {
      Err(Abort::Fatal(kind)) => Err(kind.into()),
      _ => Ok(()),
    }
  }

  fn eval_switch(&mut self, test: &'a NodeData<'a>, branches: &'a Body<'a>) -> Flow<()> {
    let mut discriminant = self.eval_expr(test)?;
    if self.config.merge_switch {
      discriminant = AbstractValue::Top;
    };
    let policy = self.config.keep_or;
    let mut entries: Vec<Option<State>> = Vec::with_capacity(branches.len());
    let mut default = None;
    let mut sure = false;
    for (i, branch) in branches.iter().enumerate() {
      let Syntax::SwitchBranch { case, .. } = &branch.stx else {
        entries.push(None);
        continue;
      };
      if sure || self.state.is_bottom {
        entries.push(None);
        continue;
      };
      let Some(case) = case else {
        default = Some(i);
        entries.push(None);
        continue;
      };
      let value = self.eval_expr(case)?;
      let matched = self.plugins.binary(
        OperatorName::StrictEquality,
        &self.state,
        &discriminant,
        &value,
        &policy,
      );
      match self.plugins.to_bool(&matched) {
        Some(false) => entries.push(None),
        Some(true) => {
          sure = true;
          entries.push(Some(self.state.clone()));
        }
        None => entries.push(Some(self.state.clone())),
      };
    }
    // The state after every test failed enters `default`, or leaves the switch if there is none.
    let mut unmatched = None;
    if !sure {
      match default {
        Some(i) => entries[i] = Some(self.state.clone()),
        None => unmatched = Some(self.state.clone()),
      };
    };

    let break_state = self.state.bottom_like();
    self.breakables.push(Breakable::Switch { break_state });
    let result = self.eval_switch_bodies(branches, entries);
    let frame = self.breakables.pop();
    result?;
    if let Some(Breakable::Switch { break_state }) = frame {
      self.merge(break_state)?;
    };
    if let Some(unmatched) = unmatched {
      self.merge(unmatched)?;
    };
    Ok(())
  }

  /// Runs the case bodies in order. Each body starts from its entry state joined with whatever
  /// fell through from the previous body.
  fn eval_switch_bodies(&mut self, branches: &'a Body<'a>, entries: Vec<Option<State>>) -> Flow<()> {
    self.state.set_to_bottom();
    for (branch, entry) in branches.iter().zip(entries) {
      if let Some(entry) = entry {
        self.merge(entry)?;
      };
      let Syntax::SwitchBranch { body, .. } = &branch.stx else {
        continue;
      };
      self.eval_block(body)?;
    }
    Ok(())
  }

  /// Joins the current state into the innermost `break` (or `continue`) target and ends the
  /// current path. Labels are ignored.
  fn jump(&mut self, is_continue: bool) -> Flow<()> {
    let target = self
      .breakables
      .iter()
      .rposition(|b| !is_continue || matches!(b, Breakable::Loop { .. }));
    let Some(idx) = target else {
      warn!("jump outside of a loop or switch");
      self.state.set_to_bottom();
      return Ok(());
    };
    let mut acc = mem::replace(self.jump_target(idx, is_continue), State::empty());
    let result = self.join_states(&mut acc, self.state.clone());
    *self.jump_target(idx, is_continue) = acc;
    result?;
    self.state.set_to_bottom();
    Ok(())
  }

  fn jump_target(&mut self, idx: usize, is_continue: bool) -> &mut State {
    match &mut self.breakables[idx] {
      Breakable::Loop { continue_state, .. } if is_continue => continue_state,
      Breakable::Loop { break_state, .. } | Breakable::Switch { break_state } => break_state,
    }
  }

  fn eval_return(&mut self, value: Option<&'a NodeData<'a>>) -> Flow<()> {
    let value = match value {
      Some(expr) => self.eval_expr(expr)?,
      None => UNDEFINED,
    };
    if self.state.is_bottom {
      return Ok(());
    };
    let Some(mut frame) = self.returns.pop() else {
      warn!("return outside of a function");
      self.state.set_to_bottom();
      return Ok(());
    };
    if let Some(hold) = self.holds.get_mut(frame.hold) {
      hold.extend(value.ids());
    };
    let result = self.join_states(&mut frame.state, self.state.clone());
    frame.value = join(&frame.value, &value, &self.config.keep_or);
    self.returns.push(frame);
    result?;
    self.state.set_to_bottom();
    Ok(())
  }
}
