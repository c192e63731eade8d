use crate::analyze;
use crate::config::AnalysisConfig;
use crate::config::KeepOrPolicy;
use crate::domain::object::PropKey;
use crate::domain::value::make_or;
use crate::domain::value::AbstractValue;
use crate::domain::value::UNDEFINED;
use crate::err::AnalysisError;
use crate::err::FatalKind;
use crate::Report;
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

fn run(code: &str) -> Report {
  analyze(code.as_bytes(), AnalysisConfig::default()).unwrap()
}

fn run_with(code: &str, config: AnalysisConfig) -> Report {
  analyze(code.as_bytes(), config).unwrap()
}

fn fatal(code: &str, config: AnalysisConfig) -> FatalKind {
  let err = analyze(code.as_bytes(), config).unwrap_err();
  err.fatal_kind().cloned().unwrap()
}

#[test]
fn test_end_value_of_straight_line_code() {
  assert_eq!(run("var a = 1; a + 1;").end_value, num(2.0));
  assert_eq!(run("var s = 'ab'; s + 'c';").end_value, AbstractValue::str("abc"));
}

#[test]
fn test_static_values_are_annotated_by_span() {
  let report = run("var a = 1 + 2;");
  let anns = report.annotations_at(8, 13);
  assert_eq!(anns.len(), 1);
  assert_eq!(anns[0].static_value, Some(num(3.0)));
  assert!(report.stats.static_values >= 3);
}

#[test]
fn test_unknown_result_is_kept_in_the_static_value() {
  let code = "function f(a) { return a + 1; } f(unknown); f(1);";
  let start = code.find("a + 1").unwrap();
  let report = run(code);
  let anns = report.annotations_at(start, start + 5);
  assert_eq!(anns.len(), 1);
  assert_eq!(anns[0].static_value, Some(AbstractValue::Top));
}

#[test]
fn test_unknown_condition_joins_branches() {
  // `flag` is never defined, so it reads as an unknown global.
  let code = "var x = flag ? 1 : 2; x;";
  assert_eq!(run(code).end_value, AbstractValue::Top);
  let report = run_with(code, AnalysisConfig::default().with_keep_or(loose()));
  assert_eq!(report.end_value, make_or([num(1.0), num(2.0)], &loose()));

  let report = run("var y = flag ? 1 : undefined; y;");
  assert_eq!(
    report.end_value,
    make_or([num(1.0), UNDEFINED], &KeepOrPolicy::default())
  );
}

#[test]
fn test_strict_equality_narrows_branches() {
  let code = r#"
    var x = flag ? 1 : 2;
    if (x === 1) {
      ___assert(x === 1);
    } else {
      ___assert(x === 2);
    }
    var s = unknown;
    if (s !== "k") {} else {
      ___assert(s === "k");
    }
  "#;
  run_with(code, AnalysisConfig::default().with_keep_or(loose()));
}

#[test]
fn test_narrowed_branches_are_joined_after_the_if() {
  let code = r#"
    var x = flag ? "a" : "b";
    var y;
    if (x === "a") {
      y = 1;
    } else {
      ___assert(x === "b");
      y = 2;
    }
    y;
  "#;
  let report = run_with(code, AnalysisConfig::default().with_keep_or(loose()));
  assert_eq!(report.end_value, make_or([num(1.0), num(2.0)], &loose()));
}

#[test]
fn test_failed_assertion_is_fatal() {
  let kind = fatal("___assert(unknown === 1);", AnalysisConfig::default());
  assert!(matches!(kind, FatalKind::AssertionFailed(_)));
}

#[test]
fn test_function_calls_and_closures() {
  assert_eq!(
    run("function f(x) { return x * 2; } f(21);").end_value,
    num(42.0)
  );
  let code = r#"
    function counter() {
      var c = 0;
      return function () { c += 1; return c; };
    }
    var inc = counter();
    inc();
    inc();
  "#;
  assert_eq!(run(code).end_value, num(2.0));
  let code = "var o = { v: 5, get: function () { return this.v; } }; o.get();";
  assert_eq!(run(code).end_value, num(5.0));
  let code = "function g(a) { return this.k + a; } g.call({ k: 1 }, 2);";
  assert_eq!(run(code).end_value, num(3.0));
}

#[test]
fn test_missing_arguments_and_defaults() {
  assert_eq!(
    run("function f(a, b) { return b; } f(1);").end_value,
    UNDEFINED
  );
  assert_eq!(
    run("function f(a, b = 7) { return a + b; } f(1);").end_value,
    num(8.0)
  );
  assert_eq!(
    run("function f(...rest) { return rest.length; } f(1, 2, 3);").end_value,
    num(3.0)
  );
}

#[test]
fn test_concrete_recursion_is_evaluated_exactly() {
  let code = r#"
    function fact(n) {
      if (n <= 1) return 1;
      return n * fact(n - 1);
    }
    fact(5);
  "#;
  assert_eq!(run(code).end_value, num(120.0));
}

#[test]
fn test_deep_recursion_is_widened_at_the_ceiling() {
  let code = r#"
    function down(n) {
      if (n === 0) return 0;
      return down(n - 1);
    }
    down(100);
  "#;
  let report = run_with(code, AnalysisConfig::default().with_max_recursion(2));
  assert_eq!(report.end_value, num(0.0));
}

#[test]
fn test_loop_is_unrolled_with_a_trace() {
  let report = run("var s = 0; for (var i = 0; i < 3; i++) { s += i; } s;");
  assert_eq!(report.end_value, num(3.0));
  assert_eq!(report.stats.unrolled_loops, 1);
  let traces = report
    .annotations
    .sorted()
    .into_iter()
    .filter_map(|(_, ann)| ann.unrolled.clone())
    .collect::<Vec<_>>();
  assert_eq!(traces.len(), 1);
  assert_eq!(traces[0].iterations, 3);
  // Body and update expression for each iteration.
  assert_eq!(traces[0].trace.len(), 6);
}

#[test]
fn test_loop_past_the_unroll_budget_is_widened() {
  let code = "var i = 0; while (i < 1000) { i++; } i;";
  let report = run_with(code, AnalysisConfig::default().with_max_iter(10));
  assert!(report.end_value.is_top());
  assert_eq!(report.stats.unrolled_loops, 0);

  // Within budget the same loop is exact.
  let report = run("var i = 0; while (i < 20) { i++; } i;");
  assert_eq!(report.end_value, num(20.0));
}

#[test]
fn test_allocating_loop_reaches_a_fixpoint() {
  let code = "var l = null; while (unknown) { l = { next: l }; } 1;";
  assert_eq!(run(code).end_value, num(1.0));
  let report = run_with(code, AnalysisConfig::default().with_keep_or(loose()));
  assert_eq!(report.end_value, num(1.0));
  assert_eq!(report.stats.unrolled_loops, 0);

  let code = "var a = []; while (unknown) { a.push(1); } a.length;";
  assert!(run(code).end_value.is_top());
  let report = run_with(code, AnalysisConfig::default().with_keep_or(loose()));
  assert!(report.end_value.is_top());
}

#[test]
fn test_loop_with_break_and_continue() {
  let code = r#"
    var s = 0;
    for (var i = 0; i < 10; i++) {
      if (i === 2) continue;
      if (i === 4) break;
      s += i;
    }
    s;
  "#;
  assert_eq!(run(code).end_value, num(4.0));
  assert_eq!(
    run("var n = 0; do { n++; } while (n < 5); n;").end_value,
    num(5.0)
  );
}

#[test]
fn test_switch_falls_through_until_break() {
  let code = r#"
    var x = 2, r = "";
    switch (x) {
      case 1: r += "a";
      case 2: r += "b";
      case 3: r += "c"; break;
      default: r += "d";
    }
    r;
  "#;
  assert_eq!(run(code).end_value, AbstractValue::str("bc"));
  let code = r#"
    var r = "";
    switch (9) {
      case 1: r = "a"; break;
      default: r = "d";
    }
    r;
  "#;
  assert_eq!(run(code).end_value, AbstractValue::str("d"));
}

#[test]
fn test_merged_switch_joins_every_case() {
  let code = r#"
    var r = "x";
    switch (2) {
      case 1: r = "a"; break;
      case 2: r = "b"; break;
    }
    r;
  "#;
  let config = AnalysisConfig::default()
    .with_keep_or(loose())
    .with_merge_switch(true);
  assert_eq!(
    run_with(code, config).end_value,
    make_or(
      [
        AbstractValue::str("a"),
        AbstractValue::str("b"),
        AbstractValue::str("x"),
      ],
      &loose()
    )
  );
}

#[test]
fn test_eval_of_constant_source() {
  let report = run("eval('1 + 2');");
  assert_eq!(report.end_value, num(3.0));
  assert_eq!(report.stats.sub_programs, 1);

  let report = run("var f = Function('a', 'b', 'return a + b'); f(1, 2);");
  assert_eq!(report.end_value, num(3.0));
}

#[test]
fn test_base64_natives() {
  assert_eq!(run("atob('aGVsbG8=');").end_value, AbstractValue::str("hello"));
  assert_eq!(run("atob('aGVsbG8');").end_value, AbstractValue::str("hello"));
  assert_eq!(run("btoa('hello');").end_value, AbstractValue::str("aGVsbG8="));
  assert!(run("btoa('\\u0100');").end_value.is_top());
}

#[test]
fn test_regular_expressions_in_replace_and_test() {
  assert_eq!(
    run("'a-b-c'.replace(/-/g, '+');").end_value,
    AbstractValue::str("a+b+c")
  );
  assert_eq!(
    run("'a-b-c'.replace('-', '+');").end_value,
    AbstractValue::str("a+b-c")
  );
  assert_eq!(
    run(r"'john smith'.replace(/(\w+)\s(\w+)/, '$2 $1');").end_value,
    AbstractValue::str("smith john")
  );
  assert_eq!(
    run("new RegExp('^a+$').test('aaa');").end_value,
    AbstractValue::bool(true)
  );
  assert_eq!(
    run("var r = RegExp('b', 'i'); r.test('ABC');").end_value,
    AbstractValue::bool(true)
  );
  assert_eq!(
    run("'x1y2'.replace(new RegExp('[0-9]', 'g'), '');").end_value,
    AbstractValue::str("xy")
  );
}

#[test]
fn test_split_limit_is_converted_to_uint32() {
  assert_eq!(run("'a,b'.split(',', -1).length;").end_value, num(2.0));
  assert_eq!(run("'a,b,c'.split(',', 2).length;").end_value, num(2.0));
  assert_eq!(run("'a,b'.split(',', 0).length;").end_value, num(0.0));
}

#[test]
fn test_callbacks_passed_to_unknown_code_are_deferred() {
  let code = r#"
    var count = 0;
    setTimeout(function () { count = 1; });
    count;
  "#;
  let report = run_with(code, AnalysisConfig::default().with_keep_or(loose()));
  assert_eq!(report.end_value, num(0.0));
  assert_eq!(
    report.global("count"),
    Some(make_or([num(0.0), num(1.0)], &loose()))
  );
}

#[test]
fn test_beta_reduction_is_recorded() {
  let report = run("function sq(x) { return x * x; } sq(3);");
  assert_eq!(report.end_value, num(9.0));
  assert_eq!(report.stats.beta_reductions, 1);
  let reductions = report
    .annotations
    .sorted()
    .into_iter()
    .filter_map(|(_, ann)| ann.reduced.clone())
    .collect::<Vec<_>>();
  assert_eq!(reductions.len(), 1);
  assert_eq!(reductions[0].substitutions, vec![("x".to_string(), num(3.0))]);

  let report = run_with(
    "function sq(x) { return x * x; } sq(3);",
    AnalysisConfig {
      inlining: false,
      ..AnalysisConfig::default()
    },
  );
  assert_eq!(report.stats.beta_reductions, 0);
}

#[test]
fn test_uncalled_functions_are_dead() {
  let report = run("function unused() { return 1; } function used() { return 2; } used();");
  assert_eq!(report.stats.functions, 2);
  assert_eq!(report.stats.dead_functions, 1);
}

#[test]
fn test_unreachable_objects_are_collected() {
  let report = run("var t = { marker: 1 }; t = 0; t;");
  assert_eq!(report.end_value, num(0.0));
  let marker = PropKey::name("marker");
  assert!(report.state.objects.values().all(|obj| !obj.has_own(&marker)));

  let report = run("var o = { a: 1 }; var p = { b: o }; o = null; p.b.a;");
  assert_eq!(report.end_value, num(1.0));
}

#[test]
fn test_syntax_error_is_reported() {
  let err = analyze(b"var = ;", AnalysisConfig::default()).unwrap_err();
  assert!(matches!(err, AnalysisError::Syntax { .. }));
}
