use crate::domain::value::number_to_string;
use parse_js::num::JsNumber;
use parse_js::operator::OperatorName;
use std::cmp::Ordering;
use std::mem::discriminant;

/// A fully known JavaScript primitive, as seen by the constant evaluator.
#[derive(Clone, Debug, PartialEq)]
pub enum Const {
  Bool(bool),
  Null,
  Num(JsNumber),
  Str(String),
  Undefined,
}

impl Const {
  pub fn number(v: f64) -> Const {
    Const::Num(JsNumber(v))
  }

  // https://tc39.es/ecma262/multipage/abstract-operations.html#sec-tonumber
  pub fn to_number(&self) -> f64 {
    match self {
      Const::Bool(b) => f64::from(u8::from(*b)),
      Const::Null => 0.0,
      Const::Num(n) => n.0,
      Const::Str(s) => str_to_number(s),
      Const::Undefined => f64::NAN,
    }
  }

  // https://tc39.es/ecma262/multipage/abstract-operations.html#sec-tostring
  pub fn to_js_string(&self) -> String {
    match self {
      Const::Bool(b) => b.to_string(),
      Const::Null => "null".to_string(),
      Const::Num(n) => number_to_string(n.0),
      Const::Str(s) => s.clone(),
      Const::Undefined => "undefined".to_string(),
    }
  }

  // https://tc39.es/ecma262/multipage/abstract-operations.html#sec-touint32
  pub fn to_uint32(&self) -> u32 {
    let n = self.to_number();
    if n.is_finite() {
      n.trunc().rem_euclid(4294967296.0) as u32
    } else {
      0
    }
  }

  pub fn to_int32(&self) -> i32 {
    self.to_uint32() as i32
  }

  // https://developer.mozilla.org/en-US/docs/Glossary/Falsy
  pub fn truthy(&self) -> bool {
    match self {
      Const::Bool(b) => *b,
      Const::Num(n) => n.0 != 0.0 && !n.0.is_nan(),
      Const::Str(s) => !s.is_empty(),
      Const::Null | Const::Undefined => false,
    }
  }

  pub fn type_name(&self) -> &'static str {
    match self {
      Const::Bool(_) => "boolean",
      Const::Null => "object",
      Const::Num(_) => "number",
      Const::Str(_) => "string",
      Const::Undefined => "undefined",
    }
  }

  /// `None` when the operands are unordered, which makes every relational operator false.
  // https://tc39.es/ecma262/multipage/abstract-operations.html#sec-islessthan
  pub fn compare(&self, other: &Const) -> Option<Ordering> {
    if let (Const::Str(l), Const::Str(r)) = (self, other) {
      return Some(l.encode_utf16().cmp(r.encode_utf16()));
    };
    self.to_number().partial_cmp(&other.to_number())
  }

  pub fn strict_eq(&self, other: &Const) -> bool {
    match (self, other) {
      (Const::Num(l), Const::Num(r)) => l.0 == r.0,
      (l, r) => l == r,
    }
  }

  // https://tc39.es/ecma262/multipage/abstract-operations.html#sec-islooselyequal
  pub fn loose_eq(&self, other: &Const) -> bool {
    if discriminant(self) == discriminant(other) {
      return self.strict_eq(other);
    };
    match (self, other) {
      (Const::Null, Const::Undefined) | (Const::Undefined, Const::Null) => true,
      (Const::Null | Const::Undefined, _) | (_, Const::Null | Const::Undefined) => false,
      // Remaining mixes of booleans, numbers and strings all compare numerically.
      (l, r) => l.to_number() == r.to_number(),
    }
  }
}

// https://tc39.es/ecma262/multipage/ecmascript-language-lexical-grammar.html#sec-white-space
fn is_js_whitespace(ch: char) -> bool {
  ch == '\u{FEFF}' || ch.is_whitespace()
}

fn radix_digits(digits: &str, radix: u32) -> f64 {
  if digits.is_empty() {
    return f64::NAN;
  };
  let mut acc = 0.0_f64;
  for ch in digits.chars() {
    match ch.to_digit(radix) {
      Some(d) => acc = acc * f64::from(radix) + f64::from(d),
      None => return f64::NAN,
    };
  }
  acc
}

/// Whether `body` is a decimal literal: digits with at most one dot, then an optional exponent.
fn is_decimal_literal(body: &str) -> bool {
  let (mantissa, exponent) = match body.find(['e', 'E']) {
    Some(i) => (&body[..i], Some(&body[i + 1..])),
    None => (body, None),
  };
  let mut dots = 0;
  let mut digits = 0;
  for ch in mantissa.chars() {
    match ch {
      '.' => dots += 1,
      '0'..='9' => digits += 1,
      _ => return false,
    };
  }
  if dots > 1 || digits == 0 {
    return false;
  };
  match exponent {
    None => true,
    Some(exp) => {
      let exp = exp.strip_prefix(['+', '-']).unwrap_or(exp);
      !exp.is_empty() && exp.bytes().all(|b| b.is_ascii_digit())
    }
  }
}

/// `Number(raw)` for a string.
// https://tc39.es/ecma262/multipage/abstract-operations.html#sec-stringtonumber
pub fn str_to_number(raw: &str) -> f64 {
  let raw = raw.trim_matches(is_js_whitespace);
  if raw.is_empty() {
    return 0.0;
  };
  for (prefix, radix) in [("0x", 16), ("0b", 2), ("0o", 8)] {
    let lower = raw.get(..2).map(|p| p.to_ascii_lowercase());
    if lower.as_deref() == Some(prefix) {
      return radix_digits(&raw[2..], radix);
    };
  }
  let (sign, body) = match raw.as_bytes()[0] {
    b'-' => (-1.0, &raw[1..]),
    b'+' => (1.0, &raw[1..]),
    _ => (1.0, raw),
  };
  if body == "Infinity" {
    return sign * f64::INFINITY;
  };
  if !is_decimal_literal(body) {
    return f64::NAN;
  };
  body.parse::<f64>().map_or(f64::NAN, |v| sign * v)
}

/// JavaScript `%`: the sign follows the dividend.
pub fn js_remainder(a: f64, b: f64) -> f64 {
  if b == 0.0 || a.is_infinite() {
    f64::NAN
  } else {
    a % b
  }
}

fn shift_count(v: &Const) -> u32 {
  v.to_uint32() & 31
}

/// Folds a binary operator over two known operands.
// https://tc39.es/ecma262/multipage/ecmascript-language-expressions.html#sec-applystringornumericbinaryoperator
pub fn eval_binary(op: OperatorName, a: &Const, b: &Const) -> Option<Const> {
  use OperatorName::*;
  let ordered = |f: fn(Ordering) -> bool| Some(Const::Bool(a.compare(b).is_some_and(f)));
  let int = |v: i64| Some(Const::number(v as f64));
  let (l, r) = (a.to_number(), b.to_number());
  match op {
    Addition => {
      if matches!(a, Const::Str(_)) || matches!(b, Const::Str(_)) {
        let mut s = a.to_js_string();
        s.push_str(&b.to_js_string());
        Some(Const::Str(s))
      } else {
        Some(Const::number(l + r))
      }
    }
    Subtraction => Some(Const::number(l - r)),
    Multiplication => Some(Const::number(l * r)),
    Division => Some(Const::number(l / r)),
    Remainder => Some(Const::number(js_remainder(l, r))),
    Exponentiation => Some(Const::number(l.powf(r))),
    BitwiseAnd => int((a.to_int32() & b.to_int32()).into()),
    BitwiseOr => int((a.to_int32() | b.to_int32()).into()),
    BitwiseXor => int((a.to_int32() ^ b.to_int32()).into()),
    BitwiseLeftShift => int(a.to_int32().wrapping_shl(shift_count(b)).into()),
    BitwiseRightShift => int(a.to_int32().wrapping_shr(shift_count(b)).into()),
    BitwiseUnsignedRightShift => int(a.to_uint32().wrapping_shr(shift_count(b)).into()),
    LessThan => ordered(Ordering::is_lt),
    LessThanOrEqual => ordered(Ordering::is_le),
    GreaterThan => ordered(Ordering::is_gt),
    GreaterThanOrEqual => ordered(Ordering::is_ge),
    Equality => Some(Const::Bool(a.loose_eq(b))),
    Inequality => Some(Const::Bool(!a.loose_eq(b))),
    StrictEquality => Some(Const::Bool(a.strict_eq(b))),
    StrictInequality => Some(Const::Bool(!a.strict_eq(b))),
    _ => None,
  }
}

/// Folds a prefix operator over a known operand.
pub fn eval_unary(op: OperatorName, a: &Const) -> Option<Const> {
  use OperatorName::*;
  Some(match op {
    BitwiseNot => Const::number(f64::from(!a.to_int32())),
    LogicalNot => Const::Bool(!a.truthy()),
    UnaryNegation => Const::number(-a.to_number()),
    UnaryPlus => Const::number(a.to_number()),
    Typeof => Const::Str(a.type_name().to_string()),
    Void => Const::Undefined,
    _ => return None,
  })
}

/// The new value of an `++`/`--` target.
pub fn eval_update(op: OperatorName, a: &Const) -> Option<Const> {
  use OperatorName::*;
  let delta = match op {
    PrefixIncrement | PostfixIncrement => 1.0,
    PrefixDecrement | PostfixDecrement => -1.0,
    _ => return None,
  };
  Some(Const::number(a.to_number() + delta))
}

/// One-argument builtins that are pure functions of a primitive.
pub fn eval_builtin_call(func: &str, args: &[Const]) -> Option<Const> {
  let [arg] = args else {
    return None;
  };
  match func {
    "Number" => return Some(Const::number(arg.to_number())),
    "String" => return Some(Const::Str(arg.to_js_string())),
    _ => {}
  };
  let Const::Num(JsNumber(x)) = *arg else {
    return None;
  };
  let f: fn(f64) -> f64 = match func.strip_prefix("Math.")? {
    "abs" => f64::abs,
    "acos" => f64::acos,
    "asin" => f64::asin,
    "atan" => f64::atan,
    "ceil" => f64::ceil,
    "cos" => f64::cos,
    "exp" => f64::exp,
    "floor" => f64::floor,
    "log" => f64::ln,
    "log10" => f64::log10,
    "log2" => f64::log2,
    // Half-way cases go towards +Infinity.
    "round" => |v| (v + 0.5).floor(),
    "sin" => f64::sin,
    "sqrt" => f64::sqrt,
    "tan" => f64::tan,
    "trunc" => f64::trunc,
    _ => return None,
  };
  Some(Const::number(f(x)))
}

/// Well-known constant properties of builtins, by dotted path.
pub fn builtin_constant(path: &str) -> Option<Const> {
  let v = match path {
    "Math.E" => std::f64::consts::E,
    "Math.LN2" => std::f64::consts::LN_2,
    "Math.LN10" => std::f64::consts::LN_10,
    "Math.PI" => std::f64::consts::PI,
    "Math.SQRT2" => std::f64::consts::SQRT_2,
    "Number.EPSILON" => f64::EPSILON,
    "Number.MAX_SAFE_INTEGER" => 9007199254740991.0,
    "Number.MIN_SAFE_INTEGER" => -9007199254740991.0,
    _ => return None,
  };
  Some(Const::number(v))
}
