use super::value::join;
use super::value::number_to_string;
use super::value::AbstractValue;
use super::value::HeapId;
use super::value::Scalar;
use super::value::Special;
use super::value::UNDEFINED;
use crate::annotate::NodeId;
use crate::config::KeepOrPolicy;
use ahash::HashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::fmt::Display;
use std::fmt::Formatter;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum PropKey {
  Index(u32),
  Name(String),
}

impl PropKey {
  /// Canonical array indices become [`PropKey::Index`].
  pub fn name(raw: &str) -> PropKey {
    let canonical = !raw.is_empty()
      && raw.bytes().all(|b| b.is_ascii_digit())
      && (raw == "0" || !raw.starts_with('0'));
    match raw.parse::<u32>() {
      Ok(i) if canonical && i != u32::MAX => PropKey::Index(i),
      _ => PropKey::Name(raw.to_string()),
    }
  }

  pub fn from_scalar(s: &Scalar) -> PropKey {
    match s {
      Scalar::Num(v) if *v >= 0.0 && v.fract() == 0.0 && *v < u32::MAX as f64 => {
        PropKey::Index(*v as u32)
      }
      Scalar::Num(v) => PropKey::Name(number_to_string(*v)),
      Scalar::Str(v) => PropKey::name(v),
      Scalar::Bool(v) => PropKey::Name(v.to_string()),
      Scalar::Regex(v) => PropKey::Name(v.clone()),
    }
  }

  /// Returns `None` when the value does not determine a single key.
  pub fn from_value(v: &AbstractValue) -> Option<PropKey> {
    match v {
      AbstractValue::Primitive(s) => Some(PropKey::from_scalar(s)),
      AbstractValue::Special(Special::Null) => Some(PropKey::Name("null".to_string())),
      _ => None,
    }
  }

  pub fn as_index(&self) -> Option<u32> {
    match self {
      PropKey::Index(i) => Some(*i),
      PropKey::Name(_) => None,
    }
  }

  pub fn is_name(&self, name: &str) -> bool {
    matches!(self, PropKey::Name(n) if n == name)
  }
}

impl Display for PropKey {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      PropKey::Index(i) => write!(f, "{i}"),
      PropKey::Name(n) => f.write_str(n),
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum MissingMode {
  MissingIsUndefined,
  MissingIsTop,
}

/// Index into the native table of a [`Plugins`](crate::plugin::Plugins) registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NativeId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Callable {
  /// A function created at top level; it captures nothing.
  Function { node: NodeId },
  Closure { node: NodeId, env: HeapId },
  Native { id: NativeId, pure: bool },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AbstractObject {
  pub properties: BTreeMap<PropKey, AbstractValue>,
  pub missing: MissingMode,
  /// Only meaningful for arrays; `None` once unknown.
  pub length: Option<u32>,
  pub is_array: bool,
  pub callable: Option<Callable>,
}

impl AbstractObject {
  pub fn new_object() -> AbstractObject {
    AbstractObject {
      properties: BTreeMap::new(),
      missing: MissingMode::MissingIsUndefined,
      length: None,
      is_array: false,
      callable: None,
    }
  }

  /// An object nothing is known about.
  pub fn unknown() -> AbstractObject {
    AbstractObject {
      missing: MissingMode::MissingIsTop,
      ..AbstractObject::new_object()
    }
  }

  pub fn new_array(elements: Vec<AbstractValue>) -> AbstractObject {
    let mut obj = AbstractObject {
      is_array: true,
      length: Some(elements.len() as u32),
      ..AbstractObject::new_object()
    };
    for (i, v) in elements.into_iter().enumerate() {
      obj.properties.insert(PropKey::Index(i as u32), v);
    }
    obj
  }

  pub fn new_callable(callable: Callable) -> AbstractObject {
    AbstractObject {
      callable: Some(callable),
      ..AbstractObject::new_object()
    }
  }

  pub fn with_property(mut self, name: &str, value: AbstractValue) -> AbstractObject {
    self.set(PropKey::name(name), value);
    self
  }

  pub fn is_callable(&self) -> bool {
    self.callable.is_some()
  }

  /// The interpreted function node, if any.
  pub fn function_node(&self) -> Option<NodeId> {
    match self.callable {
      Some(Callable::Function { node }) | Some(Callable::Closure { node, .. }) => Some(node),
      _ => None,
    }
  }

  fn missing_value(&self) -> AbstractValue {
    match self.missing {
      MissingMode::MissingIsUndefined => UNDEFINED,
      MissingMode::MissingIsTop => AbstractValue::Top,
    }
  }

  pub fn has_own(&self, key: &PropKey) -> bool {
    (self.is_array && key.is_name("length")) || self.properties.contains_key(key)
  }

  pub fn get(&self, key: &PropKey) -> AbstractValue {
    if self.is_array && key.is_name("length") {
      return match self.length {
        Some(len) => AbstractValue::num(len as f64),
        None => AbstractValue::Top,
      };
    };
    match self.properties.get(key) {
      Some(v) => v.clone(),
      None => self.missing_value(),
    }
  }

  /// Strong update of a single property.
  pub fn set(&mut self, key: PropKey, value: AbstractValue) {
    if self.is_array && key.is_name("length") {
      match value.as_scalar().and_then(|s| s.as_num()) {
        Some(n) if n >= 0.0 && n.fract() == 0.0 && n < u32::MAX as f64 => {
          let n = n as u32;
          self.properties.retain(|k, _| k.as_index().map_or(true, |i| i < n));
          self.length = Some(n);
        }
        _ => self.length = None,
      };
      return;
    };
    if self.is_array {
      if let (Some(i), Some(len)) = (key.as_index(), self.length) {
        if i >= len {
          self.length = Some(i + 1);
        };
      };
    };
    self.properties.remove(&key);
    if !(self.missing == MissingMode::MissingIsTop && value.is_top()) {
      self.properties.insert(key, value);
    };
  }

  /// Weak update: the property may or may not have been written.
  pub fn set_weak(&mut self, key: PropKey, value: AbstractValue, policy: &KeepOrPolicy) {
    let merged = join(&self.get(&key), &value, policy);
    self.set(key, merged);
  }

  /// A write of `value` through a key that could be anything.
  pub fn set_unknown_key(&mut self, value: &AbstractValue, policy: &KeepOrPolicy) {
    for v in self.properties.values_mut() {
      *v = join(v, value, policy);
    }
    self.set_missing_mode(MissingMode::MissingIsTop);
  }

  pub fn remove(&mut self, key: &PropKey) {
    self.properties.remove(key);
  }

  pub fn set_missing_mode(&mut self, mode: MissingMode) {
    if self.missing == MissingMode::MissingIsUndefined && mode == MissingMode::MissingIsTop {
      self.properties.retain(|_, v| !v.is_top());
      self.length = None;
    };
    self.missing = mode;
  }

  /// Whether a read of this object can yield `Top`.
  pub fn contains_top(&self) -> bool {
    self.missing == MissingMode::MissingIsTop || self.properties.values().any(|v| v.is_top())
  }

  /// Carries no information beyond "some object".
  pub fn is_information_free(&self) -> bool {
    self.missing == MissingMode::MissingIsTop
      && self.callable.is_none()
      && self.properties.values().all(|v| v.is_top())
  }

  pub fn for_each_id(&self, f: &mut impl FnMut(HeapId)) {
    for v in self.properties.values() {
      v.for_each_id(f);
    }
    if let Some(Callable::Closure { env, .. }) = self.callable {
      f(env);
    };
  }

  pub fn remap_ids(&mut self, map: &HashMap<HeapId, HeapId>) {
    for v in self.properties.values_mut() {
      v.remap_ids(map);
    }
    if let Some(Callable::Closure { env, .. }) = &mut self.callable {
      if let Some(new) = map.get(env) {
        *env = *new;
      };
    };
  }

  /// Merges `other` into `self` so that the result over-approximates both.
  pub fn join(&mut self, other: &AbstractObject, policy: &KeepOrPolicy) {
    let mut missing = if self.missing == MissingMode::MissingIsTop
      || other.missing == MissingMode::MissingIsTop
    {
      MissingMode::MissingIsTop
    } else {
      MissingMode::MissingIsUndefined
    };
    if self.callable != other.callable || self.is_array != other.is_array {
      self.callable = None;
      self.is_array = false;
      missing = MissingMode::MissingIsTop;
    };
    let keys: BTreeSet<PropKey> = self
      .properties
      .keys()
      .chain(other.properties.keys())
      .cloned()
      .collect();
    let mut properties = BTreeMap::new();
    for key in keys {
      let a = self
        .properties
        .get(&key)
        .cloned()
        .unwrap_or_else(|| self.missing_value());
      let b = other
        .properties
        .get(&key)
        .cloned()
        .unwrap_or_else(|| other.missing_value());
      let v = join(&a, &b, policy);
      if missing == MissingMode::MissingIsTop && v.is_top() {
        continue;
      };
      properties.insert(key, v);
    }
    self.properties = properties;
    if self.length != other.length || !self.is_array {
      self.length = None;
    };
    self.missing = missing;
  }
}
