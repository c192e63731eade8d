use crate::config::KeepOrPolicy;
use ahash::HashMap;
use itertools::Itertools;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::fmt::Display;
use std::fmt::Formatter;
use std::hash::Hash;
use std::hash::Hasher;

/// Index into the object arena of a [`State`](crate::heap::State).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HeapId(pub u32);

impl Display for HeapId {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

// https://tc39.es/ecma262/multipage/ecmascript-data-types-and-values.html#sec-numeric-types-number-tostring
pub fn number_to_string(v: f64) -> String {
  if v.is_nan() {
    return "NaN".to_string();
  };
  if v.is_infinite() {
    return if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
  };
  if v == 0.0 {
    return "0".to_string();
  };
  if v.fract() == 0.0 && v.abs() < 1e21 {
    return format!("{v:.0}");
  };
  format!("{v}")
}

/// A concrete scalar. Numbers compare with `-0 == 0`; NaN is never stored (it is represented by
/// [`Special::UndefinedOrNaN`]) but still compares equal to itself.
#[derive(Clone, Debug, Serialize)]
pub enum Scalar {
  Num(f64),
  Str(String),
  Bool(bool),
  /// Source text of a regex literal, including slashes and flags.
  Regex(String),
}

fn normalise_num(v: f64) -> f64 {
  if v == 0.0 {
    0.0
  } else if v.is_nan() {
    f64::NAN
  } else {
    v
  }
}

impl Scalar {
  fn rank(&self) -> u8 {
    match self {
      Scalar::Num(_) => 0,
      Scalar::Str(_) => 1,
      Scalar::Bool(_) => 2,
      Scalar::Regex(_) => 3,
    }
  }

  pub fn as_num(&self) -> Option<f64> {
    match self {
      Scalar::Num(v) => Some(*v),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Scalar::Str(v) => Some(v),
      _ => None,
    }
  }
}

impl PartialEq for Scalar {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for Scalar {}

impl PartialOrd for Scalar {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for Scalar {
  fn cmp(&self, other: &Self) -> Ordering {
    match (self, other) {
      (Scalar::Num(a), Scalar::Num(b)) => normalise_num(*a).total_cmp(&normalise_num(*b)),
      (Scalar::Str(a), Scalar::Str(b)) => a.cmp(b),
      (Scalar::Bool(a), Scalar::Bool(b)) => a.cmp(b),
      (Scalar::Regex(a), Scalar::Regex(b)) => a.cmp(b),
      (a, b) => a.rank().cmp(&b.rank()),
    }
  }
}

impl Hash for Scalar {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.rank().hash(state);
    match self {
      Scalar::Num(v) => normalise_num(*v).to_bits().hash(state),
      Scalar::Str(v) | Scalar::Regex(v) => v.hash(state),
      Scalar::Bool(v) => v.hash(state),
    }
  }
}

impl Display for Scalar {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      Scalar::Num(v) => f.write_str(&number_to_string(*v)),
      Scalar::Str(v) => write!(f, "{v:?}"),
      Scalar::Bool(v) => write!(f, "{v}"),
      Scalar::Regex(v) => f.write_str(v),
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Special {
  /// Either `undefined` or `NaN`; the two are not distinguished.
  UndefinedOrNaN,
  Null,
}

/// Receiver attached to a reference for method-call semantics.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum BoundThis {
  Object(HeapId),
  Primitive(Scalar),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum AbstractValue {
  Top,
  Bottom,
  Special(Special),
  Primitive(Scalar),
  Reference(HeapId, Option<BoundThis>),
  /// Sorted, deduplicated, never nested, and never containing `Top` or `Bottom`.
  Or(Vec<AbstractValue>),
}

pub const UNDEFINED: AbstractValue = AbstractValue::Special(Special::UndefinedOrNaN);
pub const NULL: AbstractValue = AbstractValue::Special(Special::Null);

impl AbstractValue {
  pub fn num(v: f64) -> AbstractValue {
    if v.is_nan() {
      UNDEFINED
    } else {
      AbstractValue::Primitive(Scalar::Num(v))
    }
  }

  pub fn str(v: impl Into<String>) -> AbstractValue {
    AbstractValue::Primitive(Scalar::Str(v.into()))
  }

  pub fn bool(v: bool) -> AbstractValue {
    AbstractValue::Primitive(Scalar::Bool(v))
  }

  pub fn reference(id: HeapId) -> AbstractValue {
    AbstractValue::Reference(id, None)
  }

  pub fn is_top(&self) -> bool {
    matches!(self, AbstractValue::Top)
  }

  pub fn is_bottom(&self) -> bool {
    matches!(self, AbstractValue::Bottom)
  }

  /// A primitive or special value, i.e. something that fully determines the concrete value.
  pub fn is_concrete(&self) -> bool {
    matches!(self, AbstractValue::Primitive(_) | AbstractValue::Special(_))
  }

  pub fn as_scalar(&self) -> Option<&Scalar> {
    match self {
      AbstractValue::Primitive(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_reference(&self) -> Option<HeapId> {
    match self {
      AbstractValue::Reference(id, _) => Some(*id),
      _ => None,
    }
  }

  /// The alternatives of an `Or`, or the value itself.
  pub fn alternatives(&self) -> &[AbstractValue] {
    match self {
      AbstractValue::Or(alts) => alts,
      v => std::slice::from_ref(v),
    }
  }

  /// Calls `f` with every heap id this value points at, including bound receivers.
  pub fn for_each_id(&self, f: &mut impl FnMut(HeapId)) {
    match self {
      AbstractValue::Reference(id, bound) => {
        f(*id);
        if let Some(BoundThis::Object(this)) = bound {
          f(*this);
        };
      }
      AbstractValue::Or(alts) => {
        for alt in alts {
          alt.for_each_id(f);
        }
      }
      _ => {}
    }
  }

  pub fn ids(&self) -> Vec<HeapId> {
    let mut ids = Vec::new();
    self.for_each_id(&mut |id| ids.push(id));
    ids
  }

  pub fn remap_ids(&mut self, map: &HashMap<HeapId, HeapId>) {
    match self {
      AbstractValue::Reference(id, bound) => {
        if let Some(new) = map.get(id) {
          *id = *new;
        };
        if let Some(BoundThis::Object(this)) = bound {
          if let Some(new) = map.get(this) {
            *this = *new;
          };
        };
      }
      AbstractValue::Or(alts) => {
        for alt in alts.iter_mut() {
          alt.remap_ids(map);
        }
        alts.sort();
      }
      _ => {}
    }
  }

  /// Removes `excluded` from the alternatives. Removing the last alternative yields `Bottom`.
  pub fn without(&self, excluded: &AbstractValue) -> AbstractValue {
    match self {
      AbstractValue::Top => AbstractValue::Top,
      v if v == excluded => AbstractValue::Bottom,
      AbstractValue::Or(alts) => {
        let mut rest = alts.iter().filter(|a| *a != excluded).cloned().collect_vec();
        match rest.len() {
          0 => AbstractValue::Bottom,
          1 => rest.remove(0),
          _ => AbstractValue::Or(rest),
        }
      }
      v => v.clone(),
    }
  }
}

/// Builds the canonical value covering all `alternatives`.
pub fn make_or(
  alternatives: impl IntoIterator<Item = AbstractValue>,
  policy: &KeepOrPolicy,
) -> AbstractValue {
  let mut alts = Vec::new();
  for v in alternatives {
    match v {
      AbstractValue::Bottom => {}
      AbstractValue::Top => return AbstractValue::Top,
      AbstractValue::Or(inner) => alts.extend(inner),
      v => alts.push(v),
    };
  }
  alts.sort();
  alts.dedup();
  match alts.len() {
    0 => AbstractValue::Bottom,
    1 => alts.remove(0),
    _ if policy.admits(&alts) => AbstractValue::Or(alts),
    _ => AbstractValue::Top,
  }
}

pub fn join(a: &AbstractValue, b: &AbstractValue, policy: &KeepOrPolicy) -> AbstractValue {
  if a == b {
    return a.clone();
  };
  match (a, b) {
    (AbstractValue::Bottom, v) | (v, AbstractValue::Bottom) => v.clone(),
    (AbstractValue::Top, _) | (_, AbstractValue::Top) => AbstractValue::Top,
    (a, b) => make_or(
      a.alternatives().iter().chain(b.alternatives()).cloned(),
      policy,
    ),
  }
}

impl Display for AbstractValue {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      AbstractValue::Top => f.write_str("⊤"),
      AbstractValue::Bottom => f.write_str("⊥"),
      AbstractValue::Special(Special::UndefinedOrNaN) => f.write_str("undefined|NaN"),
      AbstractValue::Special(Special::Null) => f.write_str("null"),
      AbstractValue::Primitive(s) => write!(f, "{s}"),
      AbstractValue::Reference(id, None) => write!(f, "{id}"),
      AbstractValue::Reference(id, Some(BoundThis::Object(this))) => {
        write!(f, "{id}.bind({this})")
      }
      AbstractValue::Reference(id, Some(BoundThis::Primitive(this))) => {
        write!(f, "{id}.bind({this})")
      }
      AbstractValue::Or(alts) => write!(f, "({})", alts.iter().join(" | ")),
    }
  }
}
