use super::snippet;
use super::CallArgs;
use super::Flow;
use super::Interpreter;
use crate::annotate::NodeId;
use crate::domain::object::AbstractObject;
use crate::domain::object::Callable;
use crate::domain::object::MissingMode;
use crate::domain::object::PropKey;
use crate::domain::value::join;
use crate::domain::value::make_or;
use crate::domain::value::number_to_string;
use crate::domain::value::AbstractValue;
use crate::domain::value::HeapId;
use crate::domain::value::Scalar;
use crate::domain::value::Special;
use crate::domain::value::UNDEFINED;
use crate::domain::value::NULL;
use crate::heap::THIS_KEY;
use crate::plugin::consteval::str_to_number;
use crate::util::escape::decode_literal;
use parse_js::ast::ArrayElement;
use parse_js::ast::ClassOrObjectMemberKey;
use parse_js::ast::ClassOrObjectMemberValue;
use parse_js::ast::LiteralTemplatePart;
use parse_js::ast::Node;
use parse_js::ast::NodeData;
use parse_js::ast::ObjectMemberType;
use parse_js::ast::Syntax;
use parse_js::operator::OperatorName;
use parse_js::session::SessionVec;
use std::mem;
use tracing::warn;

/// Where an assignment writes to, resolved before the right-hand side is evaluated.
enum Place<'a> {
  Variable(&'a str),
  Member {
    object: AbstractValue,
    /// `None` when the key is not known.
    keys: Option<Vec<PropKey>>,
  },
  Pattern(&'a NodeData<'a>),
}

/// Property key written in an object literal or pattern: an identifier, a quoted string or a
/// number.
pub(super) fn member_key(raw: &str) -> PropKey {
  match raw.as_bytes().first() {
    Some(b'"' | b'\'') if raw.len() >= 2 => PropKey::name(&decode_literal(&raw[1..raw.len() - 1])),
    Some(b'0'..=b'9' | b'.') => {
      let n = str_to_number(&raw.replace('_', ""));
      if n.is_nan() {
        PropKey::name(raw)
      } else {
        PropKey::name(&number_to_string(n))
      }
    }
    _ => PropKey::name(raw),
  }
}

/// Every key `v` may stand for, if all are known.
pub(super) fn keys_of(v: &AbstractValue) -> Option<Vec<PropKey>> {
  if v.is_bottom() {
    return None;
  };
  v.alternatives().iter().map(PropKey::from_value).collect()
}

/// The compound assignment operator's underlying binary operator.
fn compound_operator(op: OperatorName) -> Option<OperatorName> {
  #[rustfmt::skip]
  let base = match op {
    OperatorName::AssignmentAddition => OperatorName::Addition,
    OperatorName::AssignmentBitwiseAnd => OperatorName::BitwiseAnd,
    OperatorName::AssignmentBitwiseLeftShift => OperatorName::BitwiseLeftShift,
    OperatorName::AssignmentBitwiseOr => OperatorName::BitwiseOr,
    OperatorName::AssignmentBitwiseRightShift => OperatorName::BitwiseRightShift,
    OperatorName::AssignmentBitwiseUnsignedRightShift => OperatorName::BitwiseUnsignedRightShift,
    OperatorName::AssignmentBitwiseXor => OperatorName::BitwiseXor,
    OperatorName::AssignmentDivision => OperatorName::Division,
    OperatorName::AssignmentExponentiation => OperatorName::Exponentiation,
    OperatorName::AssignmentMultiplication => OperatorName::Multiplication,
    OperatorName::AssignmentRemainder => OperatorName::Remainder,
    OperatorName::AssignmentSubtraction => OperatorName::Subtraction,
    OperatorName::AssignmentLogicalAnd => OperatorName::LogicalAnd,
    OperatorName::AssignmentLogicalOr => OperatorName::LogicalOr,
    OperatorName::AssignmentNullishCoalescing => OperatorName::NullishCoalescing,
    _ => return None,
  };
  Some(base)
}

fn is_logical(op: OperatorName) -> bool {
  matches!(
    op,
    OperatorName::LogicalAnd | OperatorName::LogicalOr | OperatorName::NullishCoalescing
  )
}

/// Whether a value is `null` or `undefined`, if every alternative agrees.
fn nullishness(v: &AbstractValue) -> Option<bool> {
  let mut result = None;
  for alt in v.alternatives() {
    let nullish = match alt {
      AbstractValue::Top | AbstractValue::Bottom | AbstractValue::Or(_) => return None,
      AbstractValue::Special(_) => true,
      AbstractValue::Primitive(_) | AbstractValue::Reference(..) => false,
    };
    match result {
      None => result = Some(nullish),
      Some(prev) if prev != nullish => return None,
      Some(_) => {}
    };
  }
  result
}

impl<'a, 'p> Interpreter<'a, 'p> {
  pub(super) fn eval_expr(&mut self, node: &'a NodeData<'a>) -> Flow<AbstractValue> {
    if self.state.is_bottom {
      return Ok(AbstractValue::Bottom);
    };
    let value = self.eval_expr_kind(node)?;
    self.record_value(node, &value);
    self.hold(&value);
    Ok(value)
  }

  /// Joins a computed value into the node's static value annotation.
  pub(super) fn record_value(&mut self, node: &'a NodeData<'a>, value: &AbstractValue) {
    if value.is_bottom() || self.state.is_bottom {
      return;
    };
    let first = self
      .annotations
      .record_value(node, value, &self.config.keep_or);
    if first && !value.is_top() {
      self.stats.static_values += 1;
    };
  }

  fn eval_expr_kind(&mut self, node: &'a NodeData<'a>) -> Flow<AbstractValue> {
    let policy = self.config.keep_or;
    match &node.stx {
      Syntax::LiteralNumberExpr { value } => Ok(AbstractValue::num(value.0)),
      Syntax::LiteralStringExpr { value } => Ok(AbstractValue::str(decode_literal(value.as_str()))),
      Syntax::LiteralBooleanExpr { value } => Ok(AbstractValue::bool(*value)),
      Syntax::LiteralNull {} => Ok(NULL),
      Syntax::LiteralRegexExpr {} => Ok(AbstractValue::Primitive(Scalar::Regex(
        node.loc.as_str().to_string(),
      ))),
      Syntax::LiteralTemplateExpr { parts } => {
        let mut acc = AbstractValue::str("");
        for part in parts.iter() {
          let piece = match part {
            LiteralTemplatePart::String(raw) => AbstractValue::str(decode_literal(raw.as_str())),
            LiteralTemplatePart::Substitution(expr) => self.eval_expr(expr)?,
          };
          acc = self
            .plugins
            .binary(OperatorName::Addition, &self.state, &acc, &piece, &policy);
        }
        Ok(acc)
      }
      Syntax::LiteralArrayExpr { elements } => self.eval_array(elements),
      Syntax::LiteralObjectExpr { members } => self.eval_object(members),
      Syntax::IdentifierExpr { name } | Syntax::IdentifierPattern { name } => {
        self.read_variable(name.as_str())
      }
      Syntax::ThisExpr {} => self.read_this(),
      Syntax::FunctionExpr { .. } | Syntax::ArrowFunctionExpr { .. } => self.create_function(node),
      Syntax::MemberExpr {
        left,
        right,
        optional_chaining,
        ..
      } => {
        let object = self.eval_expr(left)?;
        self.read_member(&object, &[PropKey::name(right.as_str())], *optional_chaining)
      }
      Syntax::ComputedMemberExpr {
        object,
        member,
        optional_chaining,
        ..
      } => {
        let object = self.eval_expr(object)?;
        let key = self.eval_expr(member)?;
        match keys_of(&key) {
          Some(keys) => self.read_member(&object, &keys, *optional_chaining),
          None if key.is_bottom() => Ok(AbstractValue::Bottom),
          None => Ok(AbstractValue::Top),
        }
      }
      Syntax::CallExpr {
        callee, arguments, ..
      } => self.eval_call(node, callee, arguments),
      Syntax::ConditionalExpr {
        test,
        consequent,
        alternate,
        ..
      } => {
        let cond = self.eval_expr(test)?;
        match self.plugins.to_bool(&cond) {
          Some(true) => self.eval_expr(consequent),
          Some(false) => self.eval_expr(alternate),
          None => self.eval_branches(test, consequent, alternate),
        }
      }
      Syntax::BinaryExpr {
        operator,
        left,
        right,
        ..
      } => self.eval_binary(*operator, left, right),
      Syntax::UnaryExpr {
        operator, argument, ..
      } => self.eval_unary(node, *operator, argument),
      Syntax::UnaryPostfixExpr {
        operator, argument, ..
      } => self.eval_update(*operator, argument),
      _ => {
        warn!(source = %snippet(node), "unsupported expression evaluates to an unknown value");
        Ok(AbstractValue::Top)
      }
    }
  }

  pub(super) fn read_variable(&self, name: &str) -> Flow<AbstractValue> {
    let owner = self.state.scope_lookup(name)?;
    Ok(self.state.object(owner)?.get(&PropKey::name(name)))
  }

  /// `this` outside of any function is the global object.
  fn read_this(&self) -> Flow<AbstractValue> {
    let owner = self.state.scope_lookup(THIS_KEY)?;
    let frame = self.state.object(owner)?;
    let key = PropKey::name(THIS_KEY);
    if owner == self.state.global_ref && !frame.has_own(&key) {
      return Ok(AbstractValue::reference(self.state.global_ref));
    };
    Ok(frame.get(&key))
  }

  pub(super) fn write_variable(&mut self, name: &str, value: AbstractValue) -> Flow<()> {
    let owner = self.state.scope_lookup(name)?;
    if owner != self.state.local_ref {
      self.taint();
    };
    self.state.object_mut(owner)?.set(PropKey::name(name), value);
    Ok(())
  }

  /// Reads a property from every alternative of `object` under every key in `keys`.
  pub(super) fn read_member(
    &self,
    object: &AbstractValue,
    keys: &[PropKey],
    optional: bool,
  ) -> Flow<AbstractValue> {
    if object.is_bottom() {
      return Ok(AbstractValue::Bottom);
    };
    let mut results = Vec::new();
    for alt in object.alternatives() {
      for key in keys {
        let value = match alt {
          AbstractValue::Reference(id, _) => {
            let target = self.state.object(*id)?;
            if target.has_own(key) {
              target.get(key)
            } else {
              match self.plugins.member(&self.state, alt, key) {
                AbstractValue::Top => target.get(key),
                hooked => hooked,
              }
            }
          }
          AbstractValue::Primitive(_) => self.plugins.member(&self.state, alt, key),
          // Reading from `null`/`undefined` throws; only the optional chain and `NaN` survive.
          AbstractValue::Special(_) if optional => UNDEFINED,
          AbstractValue::Special(Special::UndefinedOrNaN) => UNDEFINED,
          AbstractValue::Special(Special::Null) => AbstractValue::Bottom,
          _ => return Ok(AbstractValue::Top),
        };
        results.push(value);
      }
    }
    Ok(make_or(results, &self.config.keep_or))
  }

  /// Writes a property. A single known object and key gets a strong update; anything less
  /// precise joins into every possible target.
  pub(super) fn write_member(
    &mut self,
    object: &AbstractValue,
    keys: Option<Vec<PropKey>>,
    value: AbstractValue,
  ) -> Flow<()> {
    self.taint();
    let policy = self.config.keep_or;
    let mut targets = Vec::new();
    let mut unknown_target = false;
    for alt in object.alternatives() {
      match alt {
        AbstractValue::Reference(id, _) => targets.push(*id),
        AbstractValue::Primitive(_) | AbstractValue::Special(_) => {}
        AbstractValue::Top | AbstractValue::Bottom | AbstractValue::Or(_) => unknown_target = true,
      };
    }
    if unknown_target {
      self.defer_callables(&value)?;
    };
    let strong = object.alternatives().len() == 1
      && targets.len() == 1
      && keys.as_ref().is_some_and(|keys| keys.len() == 1);
    for id in targets {
      let target = self.state.object_mut(id)?;
      match &keys {
        Some(keys) if strong => target.set(keys[0].clone(), value.clone()),
        Some(keys) => {
          for key in keys {
            target.set_weak(key.clone(), value.clone(), &policy);
          }
        }
        None => target.set_unknown_key(&value, &policy),
      };
    }
    Ok(())
  }

  /// Registers the interpreted callables in `value` to run once the program ends, with unknown
  /// arguments.
  pub(super) fn defer_callables(&mut self, value: &AbstractValue) -> Flow<()> {
    for id in value.ids() {
      let interpreted = self.state.object(id)?.function_node().is_some();
      if interpreted && !self.deferred.contains(&id) {
        self.deferred.push(id);
        self.state.pending.insert(id);
      };
    }
    Ok(())
  }

  pub(super) fn create_function(&mut self, node: &'a NodeData<'a>) -> Flow<AbstractValue> {
    let id = NodeId::of(node);
    if self.functions.insert(id, node).is_none() {
      self.stats.functions += 1;
    };
    let callable = if self.state.local_ref == self.state.global_ref {
      Callable::Function { node: id }
    } else {
      Callable::Closure {
        node: id,
        env: self.state.local_ref,
      }
    };
    let obj = self
      .state
      .alloc(&mut self.ids, AbstractObject::new_callable(callable));
    Ok(AbstractValue::reference(obj))
  }

  /// Elements of a value being spread, if they are all known.
  pub(super) fn spread_elements(&self, value: &AbstractValue) -> Flow<Option<Vec<AbstractValue>>> {
    Ok(match value {
      AbstractValue::Reference(id, _) => {
        let obj = self.state.object(*id)?;
        match (obj.is_array, obj.length, obj.missing) {
          (true, Some(len), MissingMode::MissingIsUndefined) => {
            Some((0..len).map(|i| obj.get(&PropKey::Index(i))).collect())
          }
          _ => None,
        }
      }
      AbstractValue::Primitive(Scalar::Str(s)) => {
        Some(s.chars().map(|c| AbstractValue::str(c.to_string())).collect())
      }
      _ => None,
    })
  }

  fn eval_array(&mut self, elements: &'a SessionVec<'a, ArrayElement<'a>>) -> Flow<AbstractValue> {
    let mut values = Vec::with_capacity(elements.len());
    let mut known = true;
    for element in elements.iter() {
      match element {
        ArrayElement::Single(expr) => values.push(self.eval_expr(expr)?),
        ArrayElement::Empty => values.push(UNDEFINED),
        ArrayElement::Rest(expr) => {
          let spread = self.eval_expr(expr)?;
          match self.spread_elements(&spread)? {
            Some(items) => values.extend(items),
            None => known = false,
          };
        }
      };
    }
    let obj = if known {
      AbstractObject::new_array(values)
    } else {
      let mut obj = AbstractObject::new_array(Vec::new());
      obj.length = None;
      obj.set_missing_mode(MissingMode::MissingIsTop);
      obj
    };
    Ok(AbstractValue::reference(self.state.alloc(&mut self.ids, obj)))
  }

  fn eval_object(&mut self, members: &'a SessionVec<'a, Node<'a>>) -> Flow<AbstractValue> {
    let id = self
      .state
      .alloc(&mut self.ids, AbstractObject::new_object());
    let result = AbstractValue::reference(id);
    self.hold(&result);
    for member in members.iter() {
      let Syntax::ObjectMember { typ } = &member.stx else {
        continue;
      };
      match typ {
        ObjectMemberType::Valued { key, value } => {
          let keys = match key {
            ClassOrObjectMemberKey::Direct(raw) => Some(vec![member_key(raw.as_str())]),
            ClassOrObjectMemberKey::Computed(expr) => {
              let key = self.eval_expr(expr)?;
              keys_of(&key)
            }
          };
          let value = match value {
            ClassOrObjectMemberValue::Property {
              initializer: Some(init),
            } => self.eval_expr(init)?,
            ClassOrObjectMemberValue::Property { initializer: None } => UNDEFINED,
            ClassOrObjectMemberValue::Method { .. } => self.create_function(member)?,
            ClassOrObjectMemberValue::Getter { .. } | ClassOrObjectMemberValue::Setter { .. } => {
              warn!(source = %snippet(member), "accessor properties are not modelled");
              AbstractValue::Top
            }
          };
          self.define_property(id, keys, value)?;
        }
        ObjectMemberType::Shorthand { name } => {
          let value = self.read_variable(name.as_str())?;
          self.define_property(id, Some(vec![PropKey::name(name.as_str())]), value)?;
        }
        ObjectMemberType::Rest { value } => {
          let source = self.eval_expr(value)?;
          self.spread_into(id, &source)?;
        }
      };
    }
    Ok(result)
  }

  fn define_property(&mut self, id: HeapId, keys: Option<Vec<PropKey>>, value: AbstractValue) -> Flow<()> {
    let policy = self.config.keep_or;
    let obj = self.state.object_mut(id)?;
    match keys {
      Some(keys) if keys.len() == 1 => {
        for key in keys {
          obj.set(key, value.clone());
        }
      }
      Some(keys) => {
        for key in keys {
          obj.set_weak(key, value.clone(), &policy);
        }
      }
      None => obj.set_unknown_key(&value, &policy),
    };
    Ok(())
  }

  /// Copies the own properties of `source` into a fresh object literal.
  fn spread_into(&mut self, id: HeapId, source: &AbstractValue) -> Flow<()> {
    let policy = self.config.keep_or;
    match source {
      AbstractValue::Special(_) | AbstractValue::Bottom => {}
      AbstractValue::Reference(src, _) => {
        let src = self.state.object(*src)?.clone();
        let obj = self.state.object_mut(id)?;
        for (key, value) in src.properties {
          obj.set(key, value);
        }
        if src.missing == MissingMode::MissingIsTop {
          obj.set_unknown_key(&AbstractValue::Top, &policy);
        };
      }
      _ => self
        .state
        .object_mut(id)?
        .set_unknown_key(&AbstractValue::Top, &policy),
    };
    Ok(())
  }

  /// Evaluates two alternatives on copies of the state, narrowed by `test`, and joins them.
  fn eval_branches(
    &mut self,
    test: &'a NodeData<'a>,
    consequent: &'a NodeData<'a>,
    alternate: &'a NodeData<'a>,
  ) -> Flow<AbstractValue> {
    let other = self.state.clone();
    self.narrow(test, true)?;
    let first = self.eval_expr(consequent)?;
    let first_state = mem::replace(&mut self.state, other);
    self.narrow(test, false)?;
    let second = self.eval_expr(alternate)?;
    let first = if first_state.is_bottom {
      AbstractValue::Bottom
    } else {
      first
    };
    let second = if self.state.is_bottom {
      AbstractValue::Bottom
    } else {
      second
    };
    self.merge(first_state)?;
    Ok(join(&first, &second, &self.config.keep_or))
  }

  /// `&&`, `||` and `??` with a known left operand.
  fn short_circuit(
    &mut self,
    op: OperatorName,
    left: AbstractValue,
    right: &'a NodeData<'a>,
  ) -> Flow<AbstractValue> {
    let plugins = self.plugins;
    // Whether the result is the left operand, per alternative.
    let keeps_left = |v: &AbstractValue| match op {
      OperatorName::LogicalAnd => plugins.to_bool(v).map(|b| !b),
      OperatorName::LogicalOr => plugins.to_bool(v),
      _ => nullishness(v).map(|n| !n),
    };
    match keeps_left(&left) {
      Some(true) => return Ok(left),
      Some(false) => return self.eval_expr(right),
      None => {}
    };
    let kept = if left.is_top() {
      AbstractValue::Top
    } else {
      make_or(
        left
          .alternatives()
          .iter()
          .filter(|alt| keeps_left(alt) != Some(false))
          .cloned(),
        &self.config.keep_or,
      )
    };
    let skipped = self.state.clone();
    let right = self.eval_expr(right)?;
    let right = if self.state.is_bottom {
      AbstractValue::Bottom
    } else {
      right
    };
    self.merge(skipped)?;
    Ok(join(&kept, &right, &self.config.keep_or))
  }

  fn eval_binary(
    &mut self,
    op: OperatorName,
    left: &'a NodeData<'a>,
    right: &'a NodeData<'a>,
  ) -> Flow<AbstractValue> {
    if op == OperatorName::Assignment || compound_operator(op).is_some() {
      return self.eval_assignment(op, left, right);
    };
    let l = self.eval_expr(left)?;
    if is_logical(op) {
      return self.short_circuit(op, l, right);
    };
    let r = self.eval_expr(right)?;
    if op == OperatorName::Comma {
      return Ok(r);
    };
    Ok(
      self
        .plugins
        .binary(op, &self.state, &l, &r, &self.config.keep_or),
    )
  }

  fn eval_assignment(
    &mut self,
    op: OperatorName,
    target: &'a NodeData<'a>,
    right: &'a NodeData<'a>,
  ) -> Flow<AbstractValue> {
    let place = self.resolve_place(target)?;
    let value = match compound_operator(op) {
      None => self.eval_expr(right)?,
      Some(base) if is_logical(base) => {
        let current = self.read_place(&place)?;
        self.short_circuit(base, current, right)?
      }
      Some(base) => {
        let current = self.read_place(&place)?;
        let r = self.eval_expr(right)?;
        self
          .plugins
          .binary(base, &self.state, &current, &r, &self.config.keep_or)
      }
    };
    if self.state.is_bottom {
      return Ok(AbstractValue::Bottom);
    };
    self.hold(&value);
    self.write_place(place, value.clone())?;
    Ok(value)
  }

  fn resolve_place(&mut self, target: &'a NodeData<'a>) -> Flow<Place<'a>> {
    Ok(match &target.stx {
      Syntax::IdentifierPattern { name } | Syntax::IdentifierExpr { name } => {
        Place::Variable(name.as_str())
      }
      Syntax::MemberExpr { left, right, .. } => Place::Member {
        object: self.eval_expr(left)?,
        keys: Some(vec![PropKey::name(right.as_str())]),
      },
      Syntax::ComputedMemberExpr { object, member, .. } => {
        let object = self.eval_expr(object)?;
        let key = self.eval_expr(member)?;
        Place::Member {
          object,
          keys: keys_of(&key),
        }
      }
      _ => Place::Pattern(target),
    })
  }

  fn read_place(&mut self, place: &Place<'a>) -> Flow<AbstractValue> {
    match place {
      Place::Variable(name) => self.read_variable(name),
      Place::Member {
        object,
        keys: Some(keys),
      } => self.read_member(object, keys, false),
      Place::Member { keys: None, .. } | Place::Pattern(_) => Ok(AbstractValue::Top),
    }
  }

  fn write_place(&mut self, place: Place<'a>, value: AbstractValue) -> Flow<()> {
    match place {
      Place::Variable(name) => self.write_variable(name, value),
      Place::Member { object, keys } => self.write_member(&object, keys, value),
      Place::Pattern(pattern) => self.bind_pattern(pattern, value),
    }
  }

  /// Assigns `value` to a binding pattern or assignment target, destructuring as needed.
  pub(super) fn bind_pattern(&mut self, pattern: &'a NodeData<'a>, value: AbstractValue) -> Flow<()> {
    if self.state.is_bottom {
      return Ok(());
    };
    match &pattern.stx {
      Syntax::IdentifierPattern { name } | Syntax::IdentifierExpr { name } => {
        self.write_variable(name.as_str(), value)
      }
      Syntax::ArrayPattern { elements, rest } => {
        for (i, element) in elements.iter().enumerate() {
          let Some(element) = element else {
            continue;
          };
          let item = self.read_member(&value, &[PropKey::Index(i as u32)], false)?;
          let item = self.apply_default(item, element.default_value.as_deref())?;
          self.bind_pattern(&element.target, item)?;
        }
        if let Some(rest) = rest {
          self.bind_pattern(rest, AbstractValue::Top)?;
        };
        Ok(())
      }
      Syntax::ObjectPattern { properties, rest } => {
        for prop in properties.iter() {
          let Syntax::ObjectPatternProperty {
            key,
            target,
            default_value,
          } = &prop.stx
          else {
            continue;
          };
          let keys = match key {
            ClassOrObjectMemberKey::Direct(raw) => Some(vec![member_key(raw.as_str())]),
            ClassOrObjectMemberKey::Computed(expr) => {
              let key = self.eval_expr(expr)?;
              keys_of(&key)
            }
          };
          let item = match keys {
            Some(keys) => self.read_member(&value, &keys, false)?,
            None => AbstractValue::Top,
          };
          let item = self.apply_default(item, default_value.as_deref())?;
          match (target, key) {
            (Some(target), _) => self.bind_pattern(target, item)?,
            (None, ClassOrObjectMemberKey::Direct(name)) => {
              self.write_variable(name.as_str(), item)?
            }
            (None, ClassOrObjectMemberKey::Computed(_)) => {}
          };
        }
        if let Some(rest) = rest {
          self.bind_pattern(rest, AbstractValue::Top)?;
        };
        Ok(())
      }
      Syntax::MemberExpr { .. } | Syntax::ComputedMemberExpr { .. } => {
        let place = self.resolve_place(pattern)?;
        self.write_place(place, value)
      }
      _ => {
        warn!(source = %snippet(pattern), "unsupported assignment target");
        Ok(())
      }
    }
  }

  /// Substitutes a pattern default for `undefined`.
  pub(super) fn apply_default(
    &mut self,
    value: AbstractValue,
    default: Option<&'a NodeData<'a>>,
  ) -> Flow<AbstractValue> {
    let Some(default) = default else {
      return Ok(value);
    };
    if value == UNDEFINED {
      return self.eval_expr(default);
    };
    if !value.alternatives().contains(&UNDEFINED) {
      return Ok(value);
    };
    let fallback = self.eval_expr(default)?;
    Ok(join(
      &value.without(&UNDEFINED),
      &fallback,
      &self.config.keep_or,
    ))
  }

  fn eval_unary(
    &mut self,
    node: &'a NodeData<'a>,
    op: OperatorName,
    argument: &'a NodeData<'a>,
  ) -> Flow<AbstractValue> {
    match op {
      OperatorName::New => self.eval_new(node, argument),
      OperatorName::Delete => self.eval_delete(argument),
      OperatorName::PrefixIncrement | OperatorName::PrefixDecrement => {
        self.eval_update(op, argument)
      }
      OperatorName::Await | OperatorName::Yield | OperatorName::YieldDelegated => {
        warn!(source = %snippet(node), "async and generator control flow is not modelled");
        self.eval_expr(argument)?;
        Ok(AbstractValue::Top)
      }
      _ => {
        let arg = self.eval_expr(argument)?;
        Ok(
          self
            .plugins
            .unary(op, &self.state, &arg, &self.config.keep_or),
        )
      }
    }
  }

  fn eval_update(&mut self, op: OperatorName, target: &'a NodeData<'a>) -> Flow<AbstractValue> {
    let policy = self.config.keep_or;
    let place = self.resolve_place(target)?;
    let old = self.read_place(&place)?;
    let new = self.plugins.update(op, &self.state, &old, &policy);
    self.write_place(place, new.clone())?;
    Ok(match op {
      OperatorName::PostfixIncrement | OperatorName::PostfixDecrement => {
        self
          .plugins
          .unary(OperatorName::UnaryPlus, &self.state, &old, &policy)
      }
      _ => new,
    })
  }

  fn eval_delete(&mut self, argument: &'a NodeData<'a>) -> Flow<AbstractValue> {
    match self.resolve_place(argument)? {
      Place::Member {
        object: AbstractValue::Reference(id, _),
        keys: Some(keys),
      } => {
        self.taint();
        let policy = self.config.keep_or;
        let obj = self.state.object_mut(id)?;
        match keys.as_slice() {
          [key] => obj.remove(key),
          keys => {
            for key in keys {
              obj.set_weak(key.clone(), UNDEFINED, &policy);
            }
          }
        };
      }
      Place::Member { object, .. } => {
        self.taint();
        for id in object.ids() {
          self
            .state
            .object_mut(id)?
            .set_unknown_key(&UNDEFINED, &self.config.keep_or);
        }
      }
      Place::Variable(_) => {}
      Place::Pattern(expr) => {
        self.eval_expr(expr)?;
      }
    };
    Ok(AbstractValue::bool(true))
  }

  /// `new F(...)`: calls `F` with a fresh object as `this`. An interpreted constructor that does
  /// not return an object yields that fresh object.
  fn eval_new(&mut self, node: &'a NodeData<'a>, argument: &'a NodeData<'a>) -> Flow<AbstractValue> {
    let (ctor, args) = match &argument.stx {
      Syntax::CallExpr {
        callee, arguments, ..
      } => {
        let ctor = self.eval_expr(callee)?;
        (ctor, self.eval_args(arguments)?)
      }
      _ => (self.eval_expr(argument)?, CallArgs::default()),
    };
    let this = AbstractValue::reference(
      self
        .state
        .alloc(&mut self.ids, AbstractObject::new_object()),
    );
    self.hold(&this);
    let interpreted = ctor.alternatives().iter().all(|alt| {
      alt
        .as_reference()
        .and_then(|id| self.state.objects.get(&id))
        .is_some_and(|obj| obj.function_node().is_some())
    });
    let result = self.call_value(node, &ctor, this.clone(), args)?;
    if !interpreted || result.is_top() || result.is_bottom() {
      return Ok(result);
    };
    Ok(make_or(
      result.alternatives().iter().map(|alt| match alt {
        AbstractValue::Reference(..) => alt.clone(),
        _ => this.clone(),
      }),
      &self.config.keep_or,
    ))
  }
}
