use super::consteval::eval_binary;
use super::consteval::str_to_number;
use super::consteval::Const;
use super::regexp::replacement_template;
use super::regexp::JsRegex;
use super::truthiness;
use super::Plugins;
use super::Receiver;
use super::GLOBAL_ID;
use crate::config::KeepOrPolicy;
use crate::domain::object::AbstractObject;
use crate::domain::object::PropKey;
use crate::domain::value::make_or;
use crate::domain::value::AbstractValue;
use crate::domain::value::BoundThis;
use crate::domain::value::Scalar;
use crate::domain::value::UNDEFINED;
use crate::heap::State;
use crate::util::counter::Counter;
use parse_js::operator::OperatorName;
use pretty_assertions::assert_eq;

fn num(v: f64) -> AbstractValue {
  AbstractValue::num(v)
}

fn policy() -> KeepOrPolicy {
  KeepOrPolicy::default()
}

fn loose() -> KeepOrPolicy {
  KeepOrPolicy {
    max_alternatives: 3,
    require_undefined: false,
  }
}

#[test]
fn string_to_number_coercion() {
  assert_eq!(str_to_number(""), 0.0);
  assert_eq!(str_to_number("  42\n"), 42.0);
  assert_eq!(str_to_number("0x1f"), 31.0);
  assert_eq!(str_to_number("0b101"), 5.0);
  assert_eq!(str_to_number("-Infinity"), f64::NEG_INFINITY);
  assert_eq!(str_to_number("1e3"), 1000.0);
  assert!(str_to_number("1e").is_nan());
  assert!(str_to_number("12px").is_nan());
}

#[test]
fn number_to_string_coercion() {
  assert_eq!(Const::number(1.0).to_js_string(), "1");
  assert_eq!(Const::number(-0.0).to_js_string(), "0");
  assert_eq!(Const::number(0.5).to_js_string(), "0.5");
  assert_eq!(Const::Null.to_js_string(), "null");
  assert_eq!(Const::Undefined.to_js_string(), "undefined");
}

#[test]
fn constant_binary_operators() {
  let s = |v: &str| Const::Str(v.to_string());
  let n = |v: f64| Const::number(v);
  assert_eq!(
    eval_binary(OperatorName::Addition, &s("a"), &n(1.0)),
    Some(s("a1"))
  );
  assert_eq!(
    eval_binary(OperatorName::BitwiseUnsignedRightShift, &n(-1.0), &n(28.0)),
    Some(n(15.0))
  );
  assert_eq!(
    eval_binary(OperatorName::Equality, &Const::Null, &Const::Undefined),
    Some(Const::Bool(true))
  );
  assert_eq!(
    eval_binary(OperatorName::StrictEquality, &Const::Null, &Const::Undefined),
    Some(Const::Bool(false))
  );
  assert_eq!(
    eval_binary(OperatorName::LessThan, &s("10"), &s("9")),
    Some(Const::Bool(true))
  );
  assert!(s("1").loose_eq(&Const::Bool(true)));
  assert!(!Const::Null.loose_eq(&n(0.0)));
  assert!(!n(f64::NAN).strict_eq(&n(f64::NAN)));
  assert_eq!(
    eval_binary(OperatorName::Remainder, &n(-7.0), &n(2.0)),
    Some(n(-1.0))
  );
}

#[test]
fn truthiness_requires_agreement() {
  assert_eq!(truthiness(&num(0.0)), Some(false));
  assert_eq!(truthiness(&AbstractValue::str("x")), Some(true));
  assert_eq!(truthiness(&UNDEFINED), Some(false));
  assert_eq!(truthiness(&make_or([UNDEFINED, num(0.0)], &policy())), Some(false));
  assert_eq!(truthiness(&make_or([UNDEFINED, num(1.0)], &policy())), None);
  assert_eq!(truthiness(&AbstractValue::Top), None);
}

#[test]
fn operators_lift_over_alternatives() {
  let plugins = Plugins::default();
  let state = plugins.seed();
  let x = make_or([num(1.0), num(2.0)], &loose());
  assert_eq!(
    plugins.binary(OperatorName::Addition, &state, &x, &num(10.0), &loose()),
    make_or([num(11.0), num(12.0)], &loose())
  );
  // Under the default policy the two results cannot be kept apart.
  assert_eq!(
    plugins.binary(OperatorName::Addition, &state, &x, &num(10.0), &policy()),
    AbstractValue::Top
  );
  assert_eq!(
    plugins.unary(OperatorName::Typeof, &state, &x, &loose()),
    AbstractValue::str("number")
  );
}

#[test]
fn operators_are_bottom_strict() {
  let plugins = Plugins::default();
  let state = plugins.seed();
  assert_eq!(
    plugins.binary(OperatorName::Addition, &state, &AbstractValue::Bottom, &AbstractValue::Top, &policy()),
    AbstractValue::Bottom
  );
  assert_eq!(
    plugins.unary(OperatorName::LogicalNot, &state, &AbstractValue::Bottom, &policy()),
    AbstractValue::Bottom
  );
  assert_eq!(
    plugins.binary(OperatorName::Multiplication, &state, &AbstractValue::Top, &num(2.0), &policy()),
    AbstractValue::Top
  );
}

#[test]
fn undefined_compares_as_undefined() {
  let plugins = Plugins::default();
  let state = plugins.seed();
  assert_eq!(
    plugins.binary(OperatorName::StrictEquality, &state, &UNDEFINED, &UNDEFINED, &policy()),
    AbstractValue::bool(true)
  );
  assert_eq!(
    plugins.binary(OperatorName::Addition, &state, &UNDEFINED, &num(1.0), &policy()),
    UNDEFINED
  );
}

#[test]
fn strict_equality_on_references_compares_identity() {
  let plugins = Plugins::default();
  let mut state = plugins.seed();
  let mut ids = Counter::new(plugins.next_id());
  let a = AbstractValue::reference(state.alloc(&mut ids, AbstractObject::new_object()));
  let b = AbstractValue::reference(state.alloc(&mut ids, AbstractObject::new_object()));
  let eq = |l: &AbstractValue, r: &AbstractValue| {
    plugins.binary(OperatorName::StrictEquality, &state, l, r, &policy())
  };
  assert_eq!(eq(&a, &a), AbstractValue::bool(true));
  assert_eq!(eq(&a, &b), AbstractValue::bool(false));
  assert_eq!(eq(&a, &num(1.0)), AbstractValue::bool(false));
}

#[test]
fn objects_convert_to_strings() {
  let plugins = Plugins::default();
  let mut state = plugins.seed();
  let mut ids = Counter::new(plugins.next_id());
  let arr = state.alloc(
    &mut ids,
    AbstractObject::new_array(vec![num(1.0), AbstractValue::str("b"), UNDEFINED]),
  );
  let obj = state.alloc(&mut ids, AbstractObject::new_object());
  assert_eq!(
    plugins.binary(
      OperatorName::Addition,
      &state,
      &AbstractValue::reference(arr),
      &AbstractValue::str("!"),
      &policy()
    ),
    AbstractValue::str("1,b,!")
  );
  assert_eq!(
    plugins.binary(
      OperatorName::Addition,
      &state,
      &AbstractValue::str(""),
      &AbstractValue::reference(obj),
      &policy()
    ),
    AbstractValue::str("[object Object]")
  );
  assert_eq!(
    plugins.unary(OperatorName::Typeof, &state, &AbstractValue::reference(obj), &policy()),
    AbstractValue::str("object")
  );
}

#[test]
fn member_hook_resolves_string_properties() {
  let plugins = Plugins::default();
  let state = plugins.seed();
  let s = AbstractValue::str("héllo");
  assert_eq!(plugins.member(&state, &s, &PropKey::name("length")), num(5.0));
  assert_eq!(plugins.member(&state, &s, &PropKey::Index(1)), AbstractValue::str("é"));
  assert_eq!(plugins.member(&state, &s, &PropKey::Index(9)), UNDEFINED);

  let split = plugins.method(Receiver::String, "split").unwrap();
  assert_eq!(
    plugins.member(&state, &s, &PropKey::name("split")),
    AbstractValue::Reference(split, Some(BoundThis::Primitive(Scalar::Str("héllo".to_string()))))
  );
  assert_eq!(
    plugins.member(&state, &s, &PropKey::name("nope")),
    AbstractValue::Top
  );
}

#[test]
fn member_hook_binds_array_methods() {
  let plugins = Plugins::default();
  let mut state = plugins.seed();
  let mut ids = Counter::new(plugins.next_id());
  let arr = state.alloc(&mut ids, AbstractObject::new_array(vec![]));
  let push = plugins.method(Receiver::Array, "push").unwrap();
  assert_eq!(
    plugins.member(&state, &AbstractValue::reference(arr), &PropKey::name("push")),
    AbstractValue::Reference(push, Some(BoundThis::Object(arr)))
  );
}

#[test]
fn seed_pins_registered_objects() {
  let plugins = Plugins::default();
  let mut state: State = plugins.seed();
  let string = plugins.global("String").and_then(|v| v.as_reference()).unwrap();
  assert!(state.pinned().contains(&string));
  assert_eq!(state.garbage_collect(true).unwrap(), 0);
  assert!(state.objects.contains_key(&string));
  assert_eq!(
    state.object(GLOBAL_ID).unwrap().get(&PropKey::name("undefined")),
    UNDEFINED
  );
  assert_eq!(
    state.object(GLOBAL_ID).unwrap().get(&PropKey::name("somethingElse")),
    AbstractValue::Top
  );
}

#[test]
fn custom_registry_starts_empty() {
  let mut plugins = Plugins::new();
  let state = plugins.seed();
  assert_eq!(
    plugins.binary(OperatorName::Addition, &state, &num(1.0), &num(2.0), &policy()),
    AbstractValue::Top
  );
  super::default::register(&mut plugins);
  assert_eq!(
    plugins.binary(OperatorName::Addition, &state, &num(1.0), &num(2.0), &policy()),
    num(3.0)
  );
}

#[test]
fn replacement_strings_map_to_regex_syntax() {
  assert_eq!(replacement_template("$2 $1", 2).as_deref(), Some("${2} ${1}"));
  assert_eq!(replacement_template("[$&]", 0).as_deref(), Some("[${0}]"));
  assert_eq!(replacement_template("$$", 0).as_deref(), Some("$$"));
  // Groups that do not exist are literal text.
  assert_eq!(replacement_template("$1", 0).as_deref(), Some("$$1"));
  assert_eq!(replacement_template("$12", 1).as_deref(), Some("${1}2"));
  assert_eq!(replacement_template("$`", 0), None);
}

#[test]
fn regex_literals_follow_javascript_flags() {
  let re = JsRegex::from_literal("/a+/gi").unwrap();
  assert_eq!(re.source, "a+");
  assert_eq!(re.flags, "gi");
  assert_eq!(re.replace("xAaxa", "-").as_deref(), Some("x-x-"));
  assert_eq!(re.test("a"), None);

  let first = JsRegex::from_literal("/o/").unwrap();
  assert_eq!(first.replace("foo", "0").as_deref(), Some("f0o"));
  assert_eq!(first.test("bar"), Some(false));

  assert!(JsRegex::from_literal("/a/y").is_none());
  assert_eq!(
    JsRegex::literal("a.b").unwrap().replace("axb a.b", "$1").as_deref(),
    Some("axb $1")
  );
}
