//! Default operator semantics and the natives every run starts with.
use super::consteval::builtin_constant;
use super::consteval::eval_binary;
use super::consteval::eval_builtin_call;
use super::consteval::eval_unary;
use super::consteval::eval_update;
use super::consteval::Const;
use super::regexp::JsRegex;
use super::truthiness;
use super::NativeCall;
use super::NativeFn;
use super::NativeOutcome;
use super::Plugins;
use super::Receiver;
use crate::domain::object::AbstractObject;
use crate::domain::object::Callable;
use crate::domain::object::MissingMode;
use crate::domain::object::PropKey;
use crate::domain::value::number_to_string;
use crate::domain::value::AbstractValue;
use crate::domain::value::BoundThis;
use crate::domain::value::HeapId;
use crate::domain::value::Scalar;
use crate::domain::value::Special;
use crate::domain::value::NULL;
use crate::domain::value::UNDEFINED;
use crate::err::FatalKind;
use crate::heap::State;
use base64::alphabet;
use base64::engine::general_purpose::GeneralPurpose;
use base64::engine::general_purpose::GeneralPurposeConfig;
use base64::engine::general_purpose::STANDARD;
use base64::engine::DecodePaddingMode;
use base64::Engine;
use itertools::Itertools;
use parse_js::operator::OperatorName;
use tracing::info;

const MATH_FUNCTIONS: &[&str] = &[
  "Math.abs",
  "Math.acos",
  "Math.asin",
  "Math.atan",
  "Math.ceil",
  "Math.cos",
  "Math.floor",
  "Math.log",
  "Math.log10",
  "Math.log2",
  "Math.round",
  "Math.sin",
  "Math.sqrt",
  "Math.tan",
  "Math.trunc",
];

/// `atob` accepts input with or without padding and ignores stray bits in the last quantum.
const FORGIVING_BASE64: GeneralPurpose = GeneralPurpose::new(
  &alphabet::STANDARD,
  GeneralPurposeConfig::new()
    .with_decode_padding_mode(DecodePaddingMode::Indifferent)
    .with_decode_allow_trailing_bits(true),
);

pub fn register(plugins: &mut Plugins) {
  plugins.register_binary(binary_handler);
  plugins.register_unary(unary_handler);
  plugins.register_update(update_handler);
  plugins.register_member(member_hook);

  plugins.set_global("undefined", UNDEFINED);
  plugins.set_global("NaN", UNDEFINED);
  plugins.set_global("Infinity", AbstractValue::num(f64::INFINITY));

  let from_char_code = plugins.register_native("String.fromCharCode", string_from_char_code, true);
  let string = plugins.register_object(
    AbstractObject::new_object().with_property("fromCharCode", AbstractValue::reference(from_char_code)),
  );
  plugins.set_global("String", AbstractValue::reference(string));

  let mut math = AbstractObject::new_object();
  for name in ["E", "PI"] {
    if let Some(v) = builtin_constant(&format!("Math.{name}")) {
      math.set(PropKey::name(name), const_to_value(v));
    };
  }
  for path in MATH_FUNCTIONS {
    let id = plugins.register_native(path, math_unary, true);
    let name = path.trim_start_matches("Math.");
    math.set(PropKey::name(name), AbstractValue::reference(id));
  }
  let math = plugins.register_object(math);
  plugins.set_global("Math", AbstractValue::reference(math));

  let globals: &[(&'static str, NativeFn, bool)] = &[
    ("parseInt", parse_int, true),
    ("Number", number, true),
    ("decodeURIComponent", decode_uri_component, true),
    ("decodeURI", decode_uri, true),
    ("unescape", unescape, true),
    ("eval", eval, false),
    ("Function", function_constructor, true),
    ("RegExp", regexp_constructor, true),
    ("atob", atob, true),
    ("btoa", btoa, true),
    ("___assert", assert, true),
    ("___is_concretizable", is_concretizable, true),
    ("___display", display, false),
    ("___state", print_state, false),
  ];
  for &(name, func, pure) in globals {
    let id = plugins.register_native(name, func, pure);
    plugins.set_global(name, AbstractValue::reference(id));
  }
  let log = plugins.register_native("console.log", console_log, false);
  let console =
    plugins.register_object(AbstractObject::new_object().with_property("log", AbstractValue::reference(log)));
  plugins.set_global("console", AbstractValue::reference(console));

  let methods: &[(Receiver, &'static str, NativeFn, bool)] = &[
    (Receiver::String, "split", string_split, true),
    (Receiver::String, "charCodeAt", string_char_code_at, true),
    (Receiver::String, "charAt", string_char_at, true),
    (Receiver::String, "slice", string_slice, true),
    (Receiver::String, "substr", string_substr, true),
    (Receiver::String, "substring", string_substring, true),
    (Receiver::String, "replace", string_replace, true),
    (Receiver::String, "indexOf", string_index_of, true),
    (Receiver::String, "toString", string_to_string, true),
    (Receiver::Number, "toString", number_to_string_method, true),
    (Receiver::Array, "push", array_push, false),
    (Receiver::Array, "pop", array_pop, false),
    (Receiver::Array, "shift", array_shift, false),
    (Receiver::Array, "join", array_join, true),
    (Receiver::Array, "indexOf", array_index_of, true),
    (Receiver::Array, "reverse", array_reverse, false),
    (Receiver::Function, "toString", function_to_string, true),
    (Receiver::Function, "call", function_call, false),
    (Receiver::Function, "apply", function_apply, false),
    (Receiver::RegExp, "test", regexp_test, true),
  ];
  for &(receiver, name, func, pure) in methods {
    plugins.register_method(receiver, name, func, pure);
  }
}

fn const_to_value(c: Const) -> AbstractValue {
  match c {
    Const::Bool(v) => AbstractValue::bool(v),
    Const::Null => NULL,
    Const::Num(v) => AbstractValue::num(v.0),
    Const::Str(v) => AbstractValue::str(v),
    Const::Undefined => UNDEFINED,
  }
}

/// Converts an object to the string it would coerce to, when that is statically known.
fn object_to_string(state: &State, id: HeapId, depth: usize) -> Option<String> {
  let obj = state.objects.get(&id)?;
  if obj.is_callable() || depth > 8 {
    return None;
  };
  if !obj.is_array {
    let custom = obj.has_own(&PropKey::name("toString")) || obj.has_own(&PropKey::name("valueOf"));
    return (obj.missing == MissingMode::MissingIsUndefined && !custom)
      .then(|| "[object Object]".to_string());
  };
  let len = obj.length?;
  let mut parts = Vec::with_capacity(len as usize);
  for i in 0..len {
    let part = match obj.get(&PropKey::Index(i)) {
      AbstractValue::Special(_) => String::new(),
      AbstractValue::Primitive(Scalar::Regex(r)) => r,
      AbstractValue::Primitive(s) => scalar_to_const(&s)?.to_js_string(),
      AbstractValue::Reference(child, _) => object_to_string(state, child, depth + 1)?,
      _ => return None,
    };
    parts.push(part);
  }
  Some(parts.join(","))
}

fn scalar_to_const(s: &Scalar) -> Option<Const> {
  match s {
    Scalar::Num(v) => Some(Const::number(*v)),
    Scalar::Str(v) => Some(Const::Str(v.clone())),
    Scalar::Bool(v) => Some(Const::Bool(*v)),
    Scalar::Regex(_) => None,
  }
}

/// The concrete primitives a single alternative is evaluated as. The undefined/NaN special is
/// evaluated as `undefined`.
fn expand(state: &State, v: &AbstractValue) -> Option<Vec<Const>> {
  match v {
    AbstractValue::Special(Special::UndefinedOrNaN) => Some(vec![Const::Undefined]),
    AbstractValue::Special(Special::Null) => Some(vec![Const::Null]),
    AbstractValue::Primitive(s) => scalar_to_const(s).map(|c| vec![c]),
    AbstractValue::Reference(id, _) => object_to_string(state, *id, 0).map(|s| vec![Const::Str(s)]),
    _ => None,
  }
}

/// The common result of every expansion, or `Top` if they disagree.
fn agree(results: impl IntoIterator<Item = Option<Const>>) -> AbstractValue {
  let mut out: Option<AbstractValue> = None;
  for r in results {
    let Some(c) = r else {
      return AbstractValue::Top;
    };
    let v = const_to_value(c);
    match &out {
      None => out = Some(v),
      Some(prev) if *prev != v => return AbstractValue::Top,
      Some(_) => {}
    };
  }
  out.unwrap_or(AbstractValue::Top)
}

fn is_callable_ref(state: &State, v: &AbstractValue) -> Option<bool> {
  match v {
    AbstractValue::Reference(id, _) => state.objects.get(id).map(|o| o.is_callable()),
    _ => Some(false),
  }
}

fn binary_handler(
  plugins: &Plugins,
  op: OperatorName,
  state: &State,
  left: &AbstractValue,
  right: &AbstractValue,
) -> AbstractValue {
  if left.is_top() || right.is_top() {
    return AbstractValue::Top;
  };
  match op {
    OperatorName::Instanceof => {
      let is_function_ctor = matches!(
        (right, plugins.global("Function")),
        (AbstractValue::Reference(r, _), Some(AbstractValue::Reference(f, _))) if r == f
      );
      return match is_callable_ref(state, left) {
        Some(callable) if is_function_ctor => AbstractValue::bool(callable),
        _ if left.is_concrete() => AbstractValue::bool(false),
        _ => AbstractValue::Top,
      };
    }
    OperatorName::In => {
      let (Some(key), Some(id)) = (PropKey::from_value(left), right.as_reference()) else {
        return AbstractValue::Top;
      };
      return match state.objects.get(&id) {
        Some(obj) if obj.has_own(&key) => AbstractValue::bool(true),
        _ => AbstractValue::Top,
      };
    }
    OperatorName::StrictEquality | OperatorName::StrictInequality => {
      let negate = op == OperatorName::StrictInequality;
      let same = match (left, right) {
        (AbstractValue::Reference(a, _), AbstractValue::Reference(b, _)) => Some(a == b),
        (AbstractValue::Reference(..), _) | (_, AbstractValue::Reference(..)) => Some(false),
        _ => None,
      };
      if let Some(same) = same {
        return AbstractValue::bool(same != negate);
      };
    }
    _ => {}
  };
  let (Some(ls), Some(rs)) = (expand(state, left), expand(state, right)) else {
    return AbstractValue::Top;
  };
  agree(
    ls.iter()
      .cartesian_product(rs.iter())
      .map(|(l, r)| eval_binary(op, l, r)),
  )
}

fn unary_handler(
  _plugins: &Plugins,
  op: OperatorName,
  state: &State,
  arg: &AbstractValue,
) -> AbstractValue {
  match (op, arg) {
    (OperatorName::Void, _) => return UNDEFINED,
    (_, AbstractValue::Top) => return AbstractValue::Top,
    (OperatorName::Typeof, AbstractValue::Reference(id, _)) => {
      return match state.objects.get(id) {
        Some(obj) if obj.is_callable() => AbstractValue::str("function"),
        Some(_) => AbstractValue::str("object"),
        None => AbstractValue::Top,
      };
    }
    (OperatorName::Typeof, AbstractValue::Primitive(Scalar::Regex(_))) => {
      return AbstractValue::str("object");
    }
    (OperatorName::LogicalNot, v) => {
      if let Some(b) = truthiness(v) {
        return AbstractValue::bool(!b);
      };
    }
    _ => {}
  };
  let Some(args) = expand(state, arg) else {
    return AbstractValue::Top;
  };
  agree(args.iter().map(|a| eval_unary(op, a)))
}

fn update_handler(
  _plugins: &Plugins,
  op: OperatorName,
  state: &State,
  arg: &AbstractValue,
) -> AbstractValue {
  let Some(args) = expand(state, arg) else {
    return AbstractValue::Top;
  };
  agree(args.iter().map(|a| eval_update(op, a)))
}

fn bound(method: Option<HeapId>, this: BoundThis) -> AbstractValue {
  match method {
    Some(id) => AbstractValue::Reference(id, Some(this)),
    None => AbstractValue::Top,
  }
}

fn member_hook(
  plugins: &Plugins,
  state: &State,
  receiver: &AbstractValue,
  key: &PropKey,
) -> AbstractValue {
  match receiver {
    AbstractValue::Primitive(Scalar::Str(s)) => match key {
      k if k.is_name("length") => AbstractValue::num(s.encode_utf16().count() as f64),
      PropKey::Index(i) => match s.encode_utf16().nth(*i as usize) {
        Some(unit) => AbstractValue::str(String::from_utf16_lossy(&[unit])),
        None => UNDEFINED,
      },
      PropKey::Name(name) => bound(
        plugins.method(Receiver::String, name),
        BoundThis::Primitive(Scalar::Str(s.clone())),
      ),
    },
    AbstractValue::Primitive(r @ Scalar::Regex(text)) => match key {
      k if k.is_name("source") || k.is_name("flags") => match JsRegex::from_literal(text) {
        Some(re) if k.is_name("source") => AbstractValue::str(re.source),
        Some(re) => AbstractValue::str(re.flags),
        None => AbstractValue::Top,
      },
      PropKey::Name(name) => bound(
        plugins.method(Receiver::RegExp, name),
        BoundThis::Primitive(r.clone()),
      ),
      PropKey::Index(_) => UNDEFINED,
    },
    AbstractValue::Primitive(n @ Scalar::Num(_)) => match key {
      PropKey::Name(name) => bound(
        plugins.method(Receiver::Number, name),
        BoundThis::Primitive(n.clone()),
      ),
      PropKey::Index(_) => UNDEFINED,
    },
    AbstractValue::Reference(id, _) => {
      let (PropKey::Name(name), Some(obj)) = (key, state.objects.get(id)) else {
        return AbstractValue::Top;
      };
      let table = if obj.is_array {
        Receiver::Array
      } else if obj.is_callable() {
        Receiver::Function
      } else {
        return AbstractValue::Top;
      };
      bound(plugins.method(table, name), BoundThis::Object(*id))
    }
    _ => AbstractValue::Top,
  }
}

fn value(v: AbstractValue) -> Result<NativeOutcome, FatalKind> {
  Ok(NativeOutcome::Value(v))
}

fn concrete_str(v: &AbstractValue) -> Option<String> {
  match v {
    AbstractValue::Primitive(s) => scalar_to_const(s).map(|c| c.to_js_string()),
    AbstractValue::Special(Special::Null) => Some("null".to_string()),
    _ => None,
  }
}

fn concrete_num(v: &AbstractValue) -> Option<f64> {
  match v {
    AbstractValue::Primitive(s) => scalar_to_const(s).map(|c| c.to_number()),
    AbstractValue::Special(Special::Null) => Some(0.0),
    _ => None,
  }
}

fn this_str(call: &NativeCall<'_>) -> Option<String> {
  match &call.this {
    AbstractValue::Primitive(Scalar::Str(s)) => Some(s.clone()),
    _ => None,
  }
}

/// Converts a relative index argument (negative counts from the end) to a clamped offset.
fn relative_index(v: f64, len: usize) -> usize {
  let v = if v.is_nan() { 0.0 } else { v.trunc() };
  if v < 0.0 {
    (len as f64 + v).max(0.0) as usize
  } else {
    v.min(len as f64) as usize
  }
}

fn clamp_index(v: f64, len: usize) -> usize {
  if v.is_nan() {
    0
  } else {
    v.trunc().clamp(0.0, len as f64) as usize
  }
}

/// An optional numeric argument: `Some(None)` when absent or undefined, `None` when unknown.
fn optional_num(call: &NativeCall<'_>, i: usize) -> Option<Option<f64>> {
  match call.arg(i) {
    AbstractValue::Special(Special::UndefinedOrNaN) if call.has_arg(i) => None,
    AbstractValue::Special(Special::UndefinedOrNaN) => Some(None),
    v => concrete_num(&v).map(Some),
  }
}

fn string_from_char_code(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let mut units = Vec::with_capacity(call.args.len());
  for arg in call.args {
    let Some(n) = concrete_num(arg) else {
      return value(AbstractValue::Top);
    };
    units.push(n.trunc().rem_euclid(65536.0) as u16);
  }
  value(AbstractValue::str(String::from_utf16_lossy(&units)))
}

fn math_unary(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let Some(n) = concrete_num(&call.arg(0)) else {
    return value(AbstractValue::Top);
  };
  value(
    eval_builtin_call(call.name, &[Const::number(n)])
      .map(const_to_value)
      .unwrap_or(AbstractValue::Top),
  )
}

fn number(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  if !call.has_arg(0) {
    return value(AbstractValue::num(0.0));
  };
  let arg = call.arg(0);
  let Some(consts) = expand(call.state, &arg) else {
    return value(AbstractValue::Top);
  };
  value(agree(
    consts
      .iter()
      .map(|c| eval_builtin_call("Number", std::slice::from_ref(c))),
  ))
}

// https://tc39.es/ecma262/multipage/global-object.html#sec-parseint-string-radix
fn parse_int(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let Some(raw) = concrete_str(&call.arg(0)) else {
    return value(AbstractValue::Top);
  };
  let Some(radix) = optional_num(call, 1) else {
    return value(AbstractValue::Top);
  };
  let mut s = raw.trim_start();
  let mut sign = 1.0;
  if let Some(rest) = s.strip_prefix('-') {
    sign = -1.0;
    s = rest;
  } else if let Some(rest) = s.strip_prefix('+') {
    s = rest;
  };
  let mut radix = radix.map_or(0, |r| r.trunc() as i64);
  if radix != 0 && !(2..=36).contains(&radix) {
    return value(UNDEFINED);
  };
  if radix == 0 || radix == 16 {
    if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
      s = rest;
      radix = 16;
    };
  };
  if radix == 0 {
    radix = 10;
  };
  let digits: Vec<u32> = s
    .chars()
    .map_while(|c| c.to_digit(radix as u32))
    .collect();
  if digits.is_empty() {
    return value(UNDEFINED);
  };
  let n = digits
    .into_iter()
    .fold(0.0_f64, |acc, d| acc * radix as f64 + d as f64);
  value(AbstractValue::num(sign * n))
}

fn hex_value(bytes: &[u8]) -> Option<u32> {
  let s = std::str::from_utf8(bytes).ok()?;
  u32::from_str_radix(s, 16).ok()
}

/// Decodes `%XX` UTF-8 sequences. Escapes that decode to a character in `keep` stay encoded.
fn percent_decode(s: &str, keep: &str) -> Option<String> {
  let bytes = s.as_bytes();
  let mut out = Vec::with_capacity(bytes.len());
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] != b'%' {
      out.push(bytes[i]);
      i += 1;
      continue;
    };
    let b = hex_value(bytes.get(i + 1..i + 3)?)? as u8;
    if b < 0x80 && keep.contains(b as char) {
      out.extend_from_slice(&bytes[i..i + 3]);
    } else {
      out.push(b);
    };
    i += 3;
  }
  // Malformed sequences throw URIError at runtime.
  String::from_utf8(out).ok()
}

fn decode_with(call: &NativeCall<'_>, keep: &str) -> Result<NativeOutcome, FatalKind> {
  let decoded = concrete_str(&call.arg(0)).and_then(|s| percent_decode(&s, keep));
  value(decoded.map_or(AbstractValue::Top, AbstractValue::str))
}

fn decode_uri_component(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  decode_with(call, "")
}

fn decode_uri(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  decode_with(call, ";/?:@&=+$,#")
}

// https://tc39.es/ecma262/multipage/additional-ecmascript-features-for-web-browsers.html#sec-unescape-string
fn unescape(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let Some(s) = concrete_str(&call.arg(0)) else {
    return value(AbstractValue::Top);
  };
  let units: Vec<u16> = s.encode_utf16().collect();
  let mut out = Vec::with_capacity(units.len());
  let mut i = 0;
  while i < units.len() {
    let hex = |from: usize, len: usize| {
      units
        .get(from..from + len)
        .and_then(|w| String::from_utf16(w).ok())
        .and_then(|w| u32::from_str_radix(&w, 16).ok())
    };
    if units[i] == u16::from(b'%') {
      if units.get(i + 1) == Some(&u16::from(b'u')) {
        if let Some(v) = hex(i + 2, 4) {
          out.push(v as u16);
          i += 6;
          continue;
        };
      } else if let Some(v) = hex(i + 1, 2) {
        out.push(v as u16);
        i += 3;
        continue;
      };
    };
    out.push(units[i]);
    i += 1;
  }
  value(AbstractValue::str(String::from_utf16_lossy(&out)))
}

fn eval(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  Ok(match call.arg(0) {
    AbstractValue::Primitive(Scalar::Str(src)) => NativeOutcome::Evaluate(src),
    AbstractValue::Top | AbstractValue::Or(_) => NativeOutcome::Value(AbstractValue::Top),
    other => NativeOutcome::Value(other),
  })
}

fn function_constructor(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let mut parts = Vec::with_capacity(call.args.len());
  for arg in call.args {
    let Some(s) = concrete_str(arg) else {
      return value(AbstractValue::Top);
    };
    parts.push(s);
  }
  let body = parts.pop().unwrap_or_default();
  Ok(NativeOutcome::Evaluate(format!(
    "(function anonymous({}\n) {{\n{}\n}})",
    parts.join(","),
    body
  )))
}

fn console_log(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  if call.config.console {
    info!(target: "absint_js::console", "{}", call.args.iter().join(" "));
  };
  value(UNDEFINED)
}

fn assert(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let arg = call.arg(0);
  let decided = matches!(arg, AbstractValue::Primitive(_) | AbstractValue::Reference(..));
  if decided && truthiness(&arg) == Some(true) {
    return value(UNDEFINED);
  };
  Err(FatalKind::AssertionFailed(arg.to_string()))
}

fn is_concretizable(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let arg = call.arg(0);
  value(AbstractValue::bool(
    !arg.is_top() && !matches!(arg, AbstractValue::Or(_)),
  ))
}

fn display(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  for (i, arg) in call.args.iter().enumerate() {
    match arg.as_reference().and_then(|id| call.state.objects.get(&id)) {
      Some(obj) => info!("arg {i}: {arg} -> {:?}", obj.properties),
      None => info!("arg {i}: {arg}"),
    };
  }
  value(UNDEFINED)
}

fn print_state(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  info!("state:\n{}", call.state);
  value(UNDEFINED)
}

fn string_split(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let Some(s) = this_str(call) else {
    return value(AbstractValue::Top);
  };
  let parts: Vec<String> = match call.arg(0) {
    AbstractValue::Special(Special::UndefinedOrNaN) if !call.has_arg(0) => vec![s],
    sep => {
      let Some(sep) = concrete_str(&sep) else {
        return value(AbstractValue::Top);
      };
      if sep.is_empty() {
        s.encode_utf16()
          .map(|u| String::from_utf16_lossy(&[u]))
          .collect()
      } else {
        s.split(sep.as_str()).map(str::to_string).collect()
      }
    }
  };
  let parts = match optional_num(call, 1) {
    Some(None) => parts,
    Some(Some(limit)) => parts
      .into_iter()
      .take(Const::number(limit).to_uint32() as usize)
      .collect(),
    None => return value(AbstractValue::Top),
  };
  let array = AbstractObject::new_array(parts.into_iter().map(AbstractValue::str).collect());
  let id = call.state.alloc(call.ids, array);
  value(AbstractValue::reference(id))
}

fn string_char_code_at(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let (Some(s), Some(pos)) = (this_str(call), optional_num(call, 0)) else {
    return value(AbstractValue::Top);
  };
  let pos = pos.unwrap_or(0.0).trunc();
  let unit = (pos >= 0.0)
    .then(|| s.encode_utf16().nth(pos as usize))
    .flatten();
  value(unit.map_or(UNDEFINED, |u| AbstractValue::num(u as f64)))
}

fn string_char_at(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let (Some(s), Some(pos)) = (this_str(call), optional_num(call, 0)) else {
    return value(AbstractValue::Top);
  };
  let pos = pos.unwrap_or(0.0).trunc();
  let unit = (pos >= 0.0)
    .then(|| s.encode_utf16().nth(pos as usize))
    .flatten();
  value(AbstractValue::str(
    unit.map(|u| String::from_utf16_lossy(&[u])).unwrap_or_default(),
  ))
}

fn utf16_slice(units: &[u16], start: usize, end: usize) -> AbstractValue {
  if start >= end {
    return AbstractValue::str("");
  };
  AbstractValue::str(String::from_utf16_lossy(&units[start..end]))
}

fn string_slice(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let (Some(s), Some(begin), Some(end)) = (this_str(call), optional_num(call, 0), optional_num(call, 1))
  else {
    return value(AbstractValue::Top);
  };
  let units: Vec<u16> = s.encode_utf16().collect();
  let len = units.len();
  let start = relative_index(begin.unwrap_or(0.0), len);
  let end = end.map_or(len, |e| relative_index(e, len));
  value(utf16_slice(&units, start, end))
}

fn string_substr(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let (Some(s), Some(begin), Some(length)) = (this_str(call), optional_num(call, 0), optional_num(call, 1))
  else {
    return value(AbstractValue::Top);
  };
  let units: Vec<u16> = s.encode_utf16().collect();
  let len = units.len();
  let start = relative_index(begin.unwrap_or(0.0), len);
  let count = length.map_or(len, |l| clamp_index(l, len));
  value(utf16_slice(&units, start, (start + count).min(len)))
}

fn string_substring(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let (Some(s), Some(begin), Some(end)) = (this_str(call), optional_num(call, 0), optional_num(call, 1))
  else {
    return value(AbstractValue::Top);
  };
  let units: Vec<u16> = s.encode_utf16().collect();
  let len = units.len();
  let a = clamp_index(begin.unwrap_or(0.0), len);
  let b = end.map_or(len, |e| clamp_index(e, len));
  value(utf16_slice(&units, a.min(b), a.max(b)))
}

fn string_replace(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let pattern = match call.arg(0) {
    AbstractValue::Primitive(Scalar::Regex(text)) => JsRegex::from_literal(&text),
    p => concrete_str(&p).and_then(|needle| JsRegex::literal(&needle)),
  };
  let (Some(s), Some(pattern), Some(replacement)) = (this_str(call), pattern, concrete_str(&call.arg(1)))
  else {
    return value(AbstractValue::Top);
  };
  value(
    pattern
      .replace(&s, &replacement)
      .map_or(AbstractValue::Top, AbstractValue::str),
  )
}

fn this_regex(call: &NativeCall<'_>) -> Option<JsRegex> {
  match &call.this {
    AbstractValue::Primitive(Scalar::Regex(text)) => JsRegex::from_literal(text),
    _ => None,
  }
}

/// `RegExp(pattern, flags)`, with or without `new`. The result has the same representation as a
/// regular expression literal.
fn regexp_constructor(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let source = match call.arg(0) {
    AbstractValue::Primitive(Scalar::Regex(text)) => JsRegex::from_literal(&text).map(|re| re.source),
    AbstractValue::Special(Special::UndefinedOrNaN) if !call.has_arg(0) => Some(String::new()),
    p => concrete_str(&p),
  };
  let flags = match call.arg(1) {
    AbstractValue::Special(Special::UndefinedOrNaN) if !call.has_arg(1) => Some(String::new()),
    f => concrete_str(&f),
  };
  let (Some(source), Some(flags)) = (source, flags) else {
    return value(AbstractValue::Top);
  };
  let source = if source.is_empty() {
    "(?:)".to_string()
  } else {
    source
  };
  value(match JsRegex::new(&source, &flags) {
    Some(re) => AbstractValue::Primitive(Scalar::Regex(re.to_literal())),
    None => AbstractValue::Top,
  })
}

fn regexp_test(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let (Some(re), Some(s)) = (this_regex(call), concrete_str(&call.arg(0))) else {
    return value(AbstractValue::Top);
  };
  value(re.test(&s).map_or(AbstractValue::Top, AbstractValue::bool))
}

// https://html.spec.whatwg.org/multipage/webappapis.html#dom-atob
fn atob(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let Some(s) = concrete_str(&call.arg(0)) else {
    return value(AbstractValue::Top);
  };
  let compact: String = s.chars().filter(|c| !c.is_ascii_whitespace()).collect();
  value(match FORGIVING_BASE64.decode(compact) {
    // Each byte becomes the code unit of the same value.
    Ok(bytes) => AbstractValue::str(bytes.into_iter().map(char::from).collect::<String>()),
    Err(_) => AbstractValue::Top,
  })
}

// https://html.spec.whatwg.org/multipage/webappapis.html#dom-btoa
fn btoa(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let bytes = concrete_str(&call.arg(0)).and_then(|s| {
    s.chars()
      .map(|c| u8::try_from(c).ok())
      .collect::<Option<Vec<u8>>>()
  });
  value(match bytes {
    Some(bytes) => AbstractValue::str(STANDARD.encode(bytes)),
    None => AbstractValue::Top,
  })
}

fn string_index_of(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let (Some(s), Some(needle), Some(from)) = (this_str(call), concrete_str(&call.arg(0)), optional_num(call, 1))
  else {
    return value(AbstractValue::Top);
  };
  let hay: Vec<u16> = s.encode_utf16().collect();
  let needle: Vec<u16> = needle.encode_utf16().collect();
  let from = clamp_index(from.unwrap_or(0.0), hay.len());
  let found = (from..=hay.len().saturating_sub(needle.len()))
    .find(|&i| i + needle.len() <= hay.len() && hay[i..i + needle.len()] == needle[..]);
  value(AbstractValue::num(found.map_or(-1.0, |i| i as f64)))
}

fn string_to_string(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  value(this_str(call).map_or(AbstractValue::Top, AbstractValue::str))
}

fn integer_to_radix(mut n: u64, radix: u32) -> String {
  const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
  let mut out = Vec::new();
  loop {
    out.push(DIGITS[(n % radix as u64) as usize]);
    n /= radix as u64;
    if n == 0 {
      break;
    };
  }
  out.reverse();
  String::from_utf8_lossy(&out).into_owned()
}

fn number_to_string_method(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let (AbstractValue::Primitive(Scalar::Num(n)), Some(radix)) = (&call.this, optional_num(call, 0))
  else {
    return value(AbstractValue::Top);
  };
  let n = *n;
  let radix = radix.unwrap_or(10.0);
  if radix == 10.0 {
    return value(AbstractValue::str(number_to_string(n)));
  };
  if !(2.0..=36.0).contains(&radix) || n.fract() != 0.0 || n.abs() >= 2f64.powi(53) {
    return value(AbstractValue::Top);
  };
  let digits = integer_to_radix(n.abs() as u64, radix as u32);
  value(AbstractValue::str(if n < 0.0 {
    format!("-{digits}")
  } else {
    digits
  }))
}

fn this_array<'s>(call: &'s mut NativeCall<'_>) -> Result<Option<&'s mut AbstractObject>, FatalKind> {
  let Some(id) = call.this.as_reference() else {
    return Ok(None);
  };
  let obj = call.state.object_mut(id)?;
  Ok(obj.is_array.then_some(obj))
}

/// Forgets everything about an array whose length is no longer known.
fn havoc_array(obj: &mut AbstractObject) {
  obj.properties.clear();
  obj.set_missing_mode(MissingMode::MissingIsTop);
}

fn array_push(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let args = call.args.to_vec();
  let Some(arr) = this_array(call)? else {
    return value(AbstractValue::Top);
  };
  let Some(len) = arr.length else {
    havoc_array(arr);
    return value(AbstractValue::Top);
  };
  for (i, v) in args.into_iter().enumerate() {
    arr.set(PropKey::Index(len + i as u32), v);
  }
  let new_len = arr.length.map_or(AbstractValue::Top, |l| AbstractValue::num(l as f64));
  value(new_len)
}

fn array_pop(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let Some(arr) = this_array(call)? else {
    return value(AbstractValue::Top);
  };
  match arr.length {
    None => {
      havoc_array(arr);
      value(AbstractValue::Top)
    }
    Some(0) => value(UNDEFINED),
    Some(len) => {
      let last = arr.get(&PropKey::Index(len - 1));
      arr.remove(&PropKey::Index(len - 1));
      arr.length = Some(len - 1);
      value(last)
    }
  }
}

fn array_shift(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let Some(arr) = this_array(call)? else {
    return value(AbstractValue::Top);
  };
  match arr.length {
    None => {
      havoc_array(arr);
      value(AbstractValue::Top)
    }
    Some(0) => value(UNDEFINED),
    Some(len) => {
      let first = arr.get(&PropKey::Index(0));
      let rest: Vec<AbstractValue> = (1..len).map(|i| arr.get(&PropKey::Index(i))).collect();
      arr.properties.retain(|k, _| k.as_index().is_none());
      for (i, v) in rest.into_iter().enumerate() {
        arr.properties.insert(PropKey::Index(i as u32), v);
      }
      arr.length = Some(len - 1);
      value(first)
    }
  }
}

fn array_join(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let sep = match call.arg(0) {
    AbstractValue::Special(Special::UndefinedOrNaN) if !call.has_arg(0) => Some(",".to_string()),
    v => concrete_str(&v),
  };
  let (Some(sep), Some(id)) = (sep, call.this.as_reference()) else {
    return value(AbstractValue::Top);
  };
  // Joining with "," is exactly the array's string conversion.
  let joined = object_to_string(call.state, id, 0).and_then(|default| {
    if sep == "," {
      return Some(default);
    };
    let obj = call.state.objects.get(&id)?;
    let len = obj.length?;
    (0..len)
      .map(|i| match obj.get(&PropKey::Index(i)) {
        AbstractValue::Special(_) => Some(String::new()),
        AbstractValue::Primitive(s) => scalar_to_const(&s).map(|c| c.to_js_string()),
        AbstractValue::Reference(child, _) => object_to_string(call.state, child, 1),
        _ => None,
      })
      .collect::<Option<Vec<_>>>()
      .map(|parts| parts.join(&sep))
  });
  value(joined.map_or(AbstractValue::Top, AbstractValue::str))
}

fn array_index_of(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let needle = call.arg(0);
  let Some(start) = optional_num(call, 1) else {
    return value(AbstractValue::Top);
  };
  let Some(arr) = this_array(call)? else {
    return value(AbstractValue::Top);
  };
  let Some(len) = arr.length else {
    return value(AbstractValue::Top);
  };
  let needle_const = match &needle {
    AbstractValue::Primitive(s) => scalar_to_const(s),
    AbstractValue::Special(Special::Null) => Some(Const::Null),
    _ => None,
  };
  let start = relative_index(start.unwrap_or(0.0), len as usize) as u32;
  for i in start..len {
    let elem = arr.get(&PropKey::Index(i));
    let equal = match (&needle, &elem) {
      (AbstractValue::Reference(a, _), AbstractValue::Reference(b, _)) => Some(a == b),
      (_, AbstractValue::Primitive(s)) => {
        match (scalar_to_const(s), &needle_const) {
          (Some(e), Some(n)) => Some(e.strict_eq(n)),
          _ => None,
        }
      }
      (_, AbstractValue::Special(Special::Null)) => needle_const.as_ref().map(|n| *n == Const::Null),
      (AbstractValue::Primitive(_), AbstractValue::Reference(..)) => Some(false),
      _ => None,
    };
    match equal {
      Some(true) => return value(AbstractValue::num(i as f64)),
      Some(false) => {}
      None => return value(AbstractValue::Top),
    };
  }
  value(AbstractValue::num(-1.0))
}

fn array_reverse(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let this = call.this.clone();
  let Some(arr) = this_array(call)? else {
    return value(AbstractValue::Top);
  };
  let Some(len) = arr.length else {
    havoc_array(arr);
    return value(this);
  };
  let elements: Vec<(u32, AbstractValue)> = arr
    .properties
    .iter()
    .filter_map(|(k, v)| k.as_index().map(|i| (i, v.clone())))
    .collect();
  arr.properties.retain(|k, _| k.as_index().is_none());
  for (i, v) in elements {
    arr.properties.insert(PropKey::Index(len - 1 - i), v);
  }
  value(this)
}

fn function_to_string(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let Some(obj) = call
    .this
    .as_reference()
    .and_then(|id| call.state.objects.get(&id))
  else {
    return value(AbstractValue::Top);
  };
  let text = match obj.callable {
    Some(Callable::Native { .. }) => Some("function () { [native code] }".to_string()),
    _ => obj.function_node().and_then(|node| (call.function_text)(node)),
  };
  value(text.map_or(AbstractValue::Top, AbstractValue::str))
}

fn function_call(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  Ok(NativeOutcome::Call {
    callee: call.this.clone(),
    this: call.arg(0),
    args: call.args.iter().skip(1).cloned().collect(),
  })
}

fn function_apply(call: &mut NativeCall<'_>) -> Result<NativeOutcome, FatalKind> {
  let args = match call.arg(1) {
    AbstractValue::Special(_) => Some(Vec::new()),
    AbstractValue::Reference(id, _) => call
      .state
      .objects
      .get(&id)
      .filter(|obj| obj.is_array)
      .and_then(|obj| {
        let len = obj.length?;
        Some((0..len).map(|i| obj.get(&PropKey::Index(i))).collect())
      }),
    _ => None,
  };
  let Some(args) = args else {
    return value(AbstractValue::Top);
  };
  Ok(NativeOutcome::Call {
    callee: call.this.clone(),
    this: call.arg(0),
    args,
  })
}
