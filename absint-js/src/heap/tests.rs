use super::State;
use super::CLOSURE_KEY;
use crate::config::AnalysisConfig;
use crate::config::KeepOrPolicy;
use crate::domain::object::AbstractObject;
use crate::domain::object::PropKey;
use crate::domain::value::make_or;
use crate::domain::value::AbstractValue;
use crate::domain::value::HeapId;
use crate::err::HeapError;
use crate::util::counter::Counter;
use pretty_assertions::assert_eq;
use std::rc::Rc;

fn num(v: f64) -> AbstractValue {
  AbstractValue::num(v)
}

fn key(name: &str) -> PropKey {
  PropKey::name(name)
}

fn loose() -> KeepOrPolicy {
  KeepOrPolicy {
    max_alternatives: 3,
    require_undefined: false,
  }
}

fn known_global() -> State {
  State::new(HeapId(0), AbstractObject::new_object(), Rc::from(Vec::new()))
}

/// A state whose global `a` points at a fresh `{ v: value }` object allocated from `ids`.
fn with_child(ids: &mut Counter, value: f64) -> State {
  let mut state = known_global();
  let child = state.alloc(ids, AbstractObject::new_object().with_property("v", num(value)));
  state
    .object_mut(HeapId(0))
    .unwrap()
    .set(key("a"), AbstractValue::reference(child));
  state
}

#[test]
fn gc_keeps_exactly_the_reachable_objects() {
  let mut ids = Counter::new(1);
  let mut state = known_global();
  let a = state.alloc(&mut ids, AbstractObject::new_object());
  let orphan = state.alloc(&mut ids, AbstractObject::new_object());
  let nested = state.alloc(&mut ids, AbstractObject::new_object());
  state.object_mut(HeapId(0)).unwrap().set(key("a"), AbstractValue::reference(a));
  state.object_mut(a).unwrap().set(key("n"), AbstractValue::reference(nested));

  let dropped = state.garbage_collect(false).unwrap();
  assert_eq!(dropped, 1);
  assert!(!state.objects.contains_key(&orphan), "orphan must be collected");
  assert!(state.objects.contains_key(&a));
  assert!(state.objects.contains_key(&nested));
}

#[test]
fn gc_keeps_pending_objects() {
  let mut ids = Counter::new(1);
  let mut state = known_global();
  let held = state.alloc(&mut ids, AbstractObject::new_object());
  state.pending.insert(held);
  assert_eq!(state.garbage_collect(false).unwrap(), 0);
  assert!(state.objects.contains_key(&held));
}

#[test]
fn gc_reports_dangling_references() {
  let mut state = known_global();
  state
    .object_mut(HeapId(0))
    .unwrap()
    .set(key("x"), AbstractValue::reference(HeapId(9)));
  assert_eq!(state.garbage_collect(false), Err(HeapError::Dangling(HeapId(9))));
}

#[test]
fn unlinking_replaces_references_to_information_free_objects() {
  let mut ids = Counter::new(1);
  let mut state = known_global();
  let blank = state.alloc(&mut ids, AbstractObject::unknown());
  state
    .object_mut(HeapId(0))
    .unwrap()
    .set(key("a"), AbstractValue::reference(blank));

  assert_eq!(state.garbage_collect(true).unwrap(), 1);
  assert_eq!(state.object(HeapId(0)).unwrap().get(&key("a")), AbstractValue::Top);
}

#[test]
fn states_differing_only_in_ids_are_equal() {
  let s1 = with_child(&mut Counter::new(1), 1.0);
  let s2 = with_child(&mut Counter::new(7), 1.0);
  assert!(s1.equal(&s2));
  assert!(s2.equal(&s1));

  let s3 = with_child(&mut Counter::new(7), 2.0);
  assert!(!s1.equal(&s3));
}

#[test]
fn unify_renames_to_the_other_states_ids() {
  let mut s1 = with_child(&mut Counter::new(1), 1.0);
  let s2 = with_child(&mut Counter::new(7), 1.0);
  s1.unify(&s2);
  assert!(s1.objects.contains_key(&HeapId(7)));
  assert!(!s1.objects.contains_key(&HeapId(1)));
  assert_eq!(
    s1.object(HeapId(0)).unwrap().get(&key("a")),
    AbstractValue::reference(HeapId(7))
  );
}

#[test]
fn join_with_unification_keeps_references_precise() {
  let config = AnalysisConfig::default();
  let mut s1 = with_child(&mut Counter::new(1), 1.0);
  let s2 = with_child(&mut Counter::new(7), 1.0);
  s1.join(&s2, &config).unwrap();
  let a = s1.object(HeapId(0)).unwrap().get(&key("a"));
  let child = a.as_reference().expect("a stays a single reference");
  assert_eq!(s1.object(child).unwrap().get(&key("v")), num(1.0));
}

#[test]
fn join_without_unification_loses_the_reference() {
  let config = AnalysisConfig::default().with_unify(false);
  let mut s1 = with_child(&mut Counter::new(1), 1.0);
  let s2 = with_child(&mut Counter::new(7), 1.0);
  s1.join(&s2, &config).unwrap();
  assert_eq!(s1.object(HeapId(0)).unwrap().get(&key("a")), AbstractValue::Top);
}

#[test]
fn join_with_bottom_is_identity() {
  let config = AnalysisConfig::default();
  let mut s1 = with_child(&mut Counter::new(1), 1.0);
  let before = s1.clone();
  s1.join(&before.bottom_like(), &config).unwrap();
  assert!(s1.equal(&before));

  let mut bottom = before.bottom_like();
  bottom.join(&before, &config).unwrap();
  assert!(!bottom.is_bottom);
  assert!(bottom.equal(&before));
}

/// Global `a` and `b` point at `{ v: a_value }` and `{ v: b_value }`. With `b_first` the object
/// for `b` is allocated before the one for `a`, so the two get swapped ids.
fn with_two_children(ids: &mut Counter, a_value: f64, b_value: f64, b_first: bool) -> State {
  let mut state = known_global();
  let mut alloc = |state: &mut State, value: f64| {
    state.alloc(ids, AbstractObject::new_object().with_property("v", num(value)))
  };
  let (a, b) = if b_first {
    let b = alloc(&mut state, b_value);
    (alloc(&mut state, a_value), b)
  } else {
    let a = alloc(&mut state, a_value);
    (a, alloc(&mut state, b_value))
  };
  let global = state.object_mut(HeapId(0)).unwrap();
  global.set(key("a"), AbstractValue::reference(a));
  global.set(key("b"), AbstractValue::reference(b));
  state
}

fn joined(left: &State, right: &State, config: &AnalysisConfig) -> State {
  let mut out = left.clone();
  out.join(right, config).unwrap();
  out
}

fn child_value(state: &State, name: &str) -> AbstractValue {
  let child = state
    .object(HeapId(0))
    .unwrap()
    .get(&key(name))
    .as_reference()
    .expect("global points at a single object");
  state.object(child).unwrap().get(&key("v"))
}

#[test]
fn join_is_commutative_associative_and_idempotent() {
  let config = AnalysisConfig::default().with_keep_or(loose());
  let s1 = with_child(&mut Counter::new(1), 1.0);
  let s2 = with_child(&mut Counter::new(7), 2.0);
  let s3 = with_child(&mut Counter::new(13), 3.0);
  let mut scalar = known_global();
  scalar.object_mut(HeapId(0)).unwrap().set(key("a"), num(5.0));
  let samples = [&s1, &s2, &s3, &scalar];

  for x in samples {
    assert!(joined(x, x, &config).equal(x));
    for y in samples {
      assert!(joined(x, y, &config).equal(&joined(y, x, &config)));
    }
  }

  let left = joined(&joined(&s1, &s2, &config), &s3, &config);
  let right = joined(&s1, &joined(&s2, &s3, &config), &config);
  assert!(left.equal(&right));
  assert_eq!(
    child_value(&left, "a"),
    make_or([num(1.0), num(2.0), num(3.0)], &loose())
  );

  // Under the default policy three alternatives collapse, the same way from either side.
  let config = AnalysisConfig::default();
  let left = joined(&joined(&s1, &s2, &config), &s3, &config);
  let right = joined(&s1, &joined(&s2, &s3, &config), &config);
  assert!(left.equal(&right));
  assert_eq!(child_value(&left, "a"), AbstractValue::Top);
}

#[test]
fn unify_then_join_ignores_allocation_order() {
  let config = AnalysisConfig::default().with_keep_or(loose());
  let in_order = with_two_children(&mut Counter::new(1), 1.0, 2.0, false);
  let swapped = with_two_children(&mut Counter::new(7), 3.0, 4.0, true);
  assert_eq!(
    swapped.object(HeapId(0)).unwrap().get(&key("b")),
    AbstractValue::reference(HeapId(7))
  );

  let forward = joined(&in_order, &swapped, &config);
  let backward = joined(&swapped, &in_order, &config);
  assert!(forward.equal(&backward));
  for state in [&forward, &backward] {
    assert_eq!(child_value(state, "a"), make_or([num(1.0), num(3.0)], &loose()));
    assert_eq!(child_value(state, "b"), make_or([num(2.0), num(4.0)], &loose()));
  }

  // The same allocation sequence with the other ids gives the same join.
  let renumbered = with_two_children(&mut Counter::new(20), 3.0, 4.0, true);
  assert!(joined(&in_order, &renumbered, &config).equal(&forward));
}

#[test]
fn join_folds_deeper_frames_into_the_common_depth() {
  let config = AnalysisConfig::default().with_keep_or(loose());
  let global = HeapId(0);
  let outer = HeapId(1);
  let inner = HeapId(2);

  let mut shallow = known_global();
  shallow.insert(outer, AbstractObject::new_object().with_property("x", num(1.0)));
  shallow.call_stack = vec![global];
  shallow.local_ref = outer;

  let mut deep = shallow.clone();
  deep.insert(inner, AbstractObject::new_object().with_property("x", num(2.0)));
  deep.call_stack = vec![global, outer];
  deep.local_ref = inner;

  shallow.join(&deep, &config).unwrap();
  assert_eq!(shallow.depth(), 1);
  assert_eq!(shallow.local_ref, outer);
  assert_eq!(
    shallow.object(outer).unwrap().get(&key("x")),
    make_or([num(1.0), num(2.0)], &loose())
  );
  assert!(!shallow.objects.contains_key(&inner));
}

#[test]
fn assign_is_a_deep_copy_of_the_reachable_part() {
  let mut ids = Counter::new(1);
  let mut source = with_child(&mut ids, 1.0);
  let orphan = source.alloc(&mut ids, AbstractObject::new_object());

  let mut copy = State::empty();
  copy.assign(&source).unwrap();
  assert!(!copy.objects.contains_key(&orphan));

  let child = copy
    .object(HeapId(0))
    .unwrap()
    .get(&key("a"))
    .as_reference()
    .unwrap();
  copy.object_mut(child).unwrap().set(key("v"), num(5.0));
  assert_eq!(source.object_mut(child).unwrap().get(&key("v")), num(1.0));
}

#[test]
fn scope_lookup_follows_captured_environments() {
  let global = HeapId(0);
  let env = HeapId(1);
  let frame = HeapId(2);
  let mut state = known_global();
  state.insert(env, AbstractObject::new_object().with_property("y", num(1.0)));
  state.insert(
    frame,
    AbstractObject::new_object()
      .with_property("x", num(1.0))
      .with_property(CLOSURE_KEY, AbstractValue::reference(env)),
  );
  state.call_stack = vec![global];
  state.local_ref = frame;

  assert_eq!(state.scope_lookup("x").unwrap(), frame);
  assert_eq!(state.scope_lookup("y").unwrap(), env);
  assert_eq!(state.scope_lookup("z").unwrap(), global);
}
