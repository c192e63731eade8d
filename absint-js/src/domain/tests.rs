use super::object::AbstractObject;
use super::object::MissingMode;
use super::object::PropKey;
use super::value::join;
use super::value::make_or;
use super::value::AbstractValue;
use super::value::HeapId;
use super::value::UNDEFINED;
use crate::config::KeepOrPolicy;
use pretty_assertions::assert_eq;

fn num(v: f64) -> AbstractValue {
  AbstractValue::num(v)
}

fn loose() -> KeepOrPolicy {
  KeepOrPolicy {
    max_alternatives: 3,
    require_undefined: false,
  }
}

fn samples() -> Vec<AbstractValue> {
  vec![
    AbstractValue::Top,
    AbstractValue::Bottom,
    UNDEFINED,
    num(1.0),
    num(2.0),
    AbstractValue::str("a"),
    AbstractValue::reference(HeapId(3)),
    make_or([UNDEFINED, num(1.0)], &KeepOrPolicy::default()),
  ]
}

#[test]
fn join_is_commutative_idempotent_with_bottom_identity() {
  for policy in [KeepOrPolicy::default(), loose()] {
    for a in samples() {
      assert_eq!(join(&a, &a, &policy), a);
      assert_eq!(join(&a, &AbstractValue::Bottom, &policy), a);
      for b in samples() {
        assert_eq!(join(&a, &b, &policy), join(&b, &a, &policy), "{a} ⊔ {b}");
      }
    }
  }
}

#[test]
fn join_is_associative() {
  for policy in [KeepOrPolicy::default(), loose()] {
    for a in samples() {
      for b in samples() {
        for c in samples() {
          let left = join(&join(&a, &b, &policy), &c, &policy);
          let right = join(&a, &join(&b, &c, &policy), &policy);
          assert_eq!(left, right, "({a} ⊔ {b}) ⊔ {c}");
        }
      }
    }
  }
}

#[test]
fn join_over_approximates_both_sides() {
  let policy = loose();
  let joined = join(&num(1.0), &num(2.0), &policy);
  assert_eq!(joined, AbstractValue::Or(vec![num(1.0), num(2.0)]));
  let joined = join(&num(1.0), &num(2.0), &KeepOrPolicy::default());
  assert_eq!(joined, AbstractValue::Top);
}

#[test]
fn default_policy_keeps_undefined_pairs_only() {
  let policy = KeepOrPolicy::default();
  let kept = join(&UNDEFINED, &AbstractValue::str("x"), &policy);
  assert!(matches!(kept, AbstractValue::Or(ref alts) if alts.len() == 2));
  assert_eq!(join(&kept, &num(3.0), &policy), AbstractValue::Top);
}

#[test]
fn or_is_never_nested() {
  let policy = loose();
  let inner = join(&num(1.0), &num(2.0), &policy);
  let outer = join(&inner, &num(3.0), &policy);
  assert_eq!(outer, AbstractValue::Or(vec![num(1.0), num(2.0), num(3.0)]));
}

#[test]
fn narrowing_removes_alternatives() {
  let policy = loose();
  let v = join(&AbstractValue::str("a"), &AbstractValue::str("b"), &policy);
  assert_eq!(v.without(&AbstractValue::str("a")), AbstractValue::str("b"));
  assert_eq!(
    AbstractValue::str("b").without(&AbstractValue::str("b")),
    AbstractValue::Bottom
  );
  assert_eq!(AbstractValue::Top.without(&num(1.0)), AbstractValue::Top);
}

#[test]
fn negative_zero_equals_zero() {
  assert_eq!(num(-0.0), num(0.0));
  assert_eq!(num(f64::NAN), UNDEFINED);
}

#[test]
fn prop_keys_normalise_indices() {
  assert_eq!(PropKey::name("12"), PropKey::Index(12));
  assert_eq!(PropKey::name("012"), PropKey::Name("012".into()));
  assert_eq!(PropKey::name("-1"), PropKey::Name("-1".into()));
  assert_eq!(PropKey::from_value(&num(3.0)), Some(PropKey::Index(3)));
  assert_eq!(PropKey::from_value(&num(1.5)), Some(PropKey::Name("1.5".into())));
  assert_eq!(PropKey::from_value(&AbstractValue::Top), None);
}

#[test]
fn missing_mode_transition_drops_top_and_length() {
  let mut arr = AbstractObject::new_array(vec![num(1.0), AbstractValue::Top]);
  arr.set(PropKey::name("x"), AbstractValue::Top);
  assert_eq!(arr.length, Some(2));
  arr.set_missing_mode(MissingMode::MissingIsTop);
  assert_eq!(arr.length, None);
  assert!(arr.properties.values().all(|v| !v.is_top()));
  assert_eq!(arr.get(&PropKey::Index(0)), num(1.0));
  assert_eq!(arr.get(&PropKey::Index(1)), AbstractValue::Top);
}

#[test]
fn array_length_tracks_writes() {
  let mut arr = AbstractObject::new_array(vec![]);
  arr.set(PropKey::Index(3), num(1.0));
  assert_eq!(arr.get(&PropKey::name("length")), num(4.0));
  arr.set(PropKey::name("length"), num(1.0));
  assert_eq!(arr.get(&PropKey::Index(3)), UNDEFINED);
  assert_eq!(arr.length, Some(1));
}

#[test]
fn object_join_respects_missing_modes() {
  let policy = KeepOrPolicy::default();
  let mut a = AbstractObject::new_object().with_property("x", num(1.0));
  let b = AbstractObject::new_object().with_property("y", num(2.0));
  a.join(&b, &policy);
  assert_eq!(a.missing, MissingMode::MissingIsUndefined);
  assert_eq!(a.get(&PropKey::name("x")), join(&num(1.0), &UNDEFINED, &policy));
  assert_eq!(a.get(&PropKey::name("y")), join(&num(2.0), &UNDEFINED, &policy));

  let mut top = AbstractObject::unknown().with_property("x", num(1.0));
  let other = AbstractObject::unknown().with_property("y", num(2.0));
  top.join(&other, &policy);
  assert!(top.properties.is_empty());

  let mut same = AbstractObject::unknown().with_property("x", num(1.0));
  same.join(&AbstractObject::unknown().with_property("x", num(1.0)), &policy);
  assert_eq!(same.get(&PropKey::name("x")), num(1.0));
}

#[test]
fn object_join_keeps_agreeing_length() {
  let policy = KeepOrPolicy::default();
  let mut a = AbstractObject::new_array(vec![num(1.0)]);
  a.join(&AbstractObject::new_array(vec![num(1.0)]), &policy);
  assert_eq!(a.length, Some(1));
  a.join(&AbstractObject::new_array(vec![num(1.0), num(2.0)]), &policy);
  assert_eq!(a.length, None);
}
