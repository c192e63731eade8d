use super::Flow;
use super::Interpreter;
use crate::domain::object::PropKey;
use crate::domain::value::AbstractValue;
use crate::domain::value::HeapId;
use crate::heap::THIS_KEY;
use crate::util::escape::decode_literal;
use parse_js::ast::NodeData;
use parse_js::ast::Syntax;
use parse_js::operator::OperatorName;
use tracing::trace;

/// Value of a string, number or boolean literal.
fn literal_value(node: &NodeData<'_>) -> Option<AbstractValue> {
  match &node.stx {
    Syntax::LiteralStringExpr { value } => Some(AbstractValue::str(decode_literal(value.as_str()))),
    Syntax::LiteralNumberExpr { value } => Some(AbstractValue::num(value.0)),
    Syntax::LiteralBooleanExpr { value } => Some(AbstractValue::bool(*value)),
    _ => None,
  }
}

impl<'a, 'p> Interpreter<'a, 'p> {
  /// Refines the current state with the outcome of a branch test. Only strict (in)equality
  /// between a variable or property chain and a literal refines anything.
  pub(super) fn narrow(&mut self, test: &'a NodeData<'a>, outcome: bool) -> Flow<()> {
    if self.state.is_bottom {
      return Ok(());
    };
    let Syntax::BinaryExpr {
      operator,
      left,
      right,
      ..
    } = &test.stx
    else {
      return Ok(());
    };
    let equal = match operator {
      OperatorName::StrictEquality => outcome,
      OperatorName::StrictInequality => !outcome,
      _ => return Ok(()),
    };
    let (place, literal) = match (literal_value(left), literal_value(right)) {
      (None, Some(literal)) => (&**left, literal),
      (Some(literal), None) => (&**right, literal),
      _ => return Ok(()),
    };
    let Some((owner, key)) = self.locate(place)? else {
      return Ok(());
    };
    let current = self.state.object(owner)?.get(&key);
    let narrowed = if !equal {
      current.without(&literal)
    } else if current.is_top() || current.alternatives().contains(&literal) {
      literal
    } else {
      AbstractValue::Bottom
    };
    trace!(%current, %narrowed, "narrowed by branch test");
    if narrowed.is_bottom() {
      self.state.set_to_bottom();
    } else {
      self.state.object_mut(owner)?.set(key, narrowed);
    };
    Ok(())
  }

  /// The object and key a side-effect-free place expression reads from.
  fn locate(&self, place: &NodeData<'_>) -> Flow<Option<(HeapId, PropKey)>> {
    Ok(match &place.stx {
      Syntax::IdentifierExpr { name } => {
        let name = name.as_str();
        Some((self.state.scope_lookup(name)?, PropKey::name(name)))
      }
      Syntax::MemberExpr {
        left,
        right,
        optional_chaining: false,
        ..
      } => self
        .peek_object(left)?
        .map(|id| (id, PropKey::name(right.as_str()))),
      Syntax::ComputedMemberExpr {
        object,
        member,
        optional_chaining: false,
        ..
      } => {
        let key = literal_value(member).and_then(|v| PropKey::from_value(&v));
        match (self.peek_object(object)?, key) {
          (Some(id), Some(key)) => Some((id, key)),
          _ => None,
        }
      }
      _ => None,
    })
  }

  /// The single object a place expression refers to, if it can be known without evaluating it.
  fn peek_object(&self, node: &NodeData<'_>) -> Flow<Option<HeapId>> {
    let value = match &node.stx {
      Syntax::ThisExpr {} => {
        let owner = self.state.scope_lookup(THIS_KEY)?;
        let frame = self.state.object(owner)?;
        if owner == self.state.global_ref && !frame.has_own(&PropKey::name(THIS_KEY)) {
          return Ok(Some(self.state.global_ref));
        };
        frame.get(&PropKey::name(THIS_KEY))
      }
      _ => match self.locate(node)? {
        Some((owner, key)) => self.state.object(owner)?.get(&key),
        None => return Ok(None),
      },
    };
    Ok(match value {
      AbstractValue::Reference(id, _) => Some(id),
      _ => None,
    })
  }
}
