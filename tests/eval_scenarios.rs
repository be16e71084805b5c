//! End-to-end scenarios and universal properties (§8) exercised purely
//! through the public host API — no crate-internal access, the way an
//! embedding application would use this crate.

use tiny_clj::{print, EvalConfig, EvalState};

fn fresh() -> EvalState {
    let mut st = EvalState::new();
    st.load_core();
    st
}

fn run(st: &mut EvalState, source: &str) -> String {
    match st.eval_string(source) {
        Ok(v) => print(v),
        Err(e) => panic!("unexpected exception: {} ({})", print(e.value), e.type_name()),
    }
}

#[test]
fn scenario_table() {
    let mut st = fresh();
    assert_eq!(run(&mut st, "(+ 1 2 3)"), "6");
    assert_eq!(run(&mut st, "(let [x 10 y (+ x 5)] (* x y))"), "150");
    run(&mut st, "(def f (fn [n] (if (= n 0) 1 (* n (f (- n 1))))))");
    assert_eq!(run(&mut st, "(f 5)"), "120");
    assert_eq!(
        run(
            &mut st,
            "(loop [i 0 acc 0] (if (= i 1000) acc (recur (+ i 1) (+ acc i))))"
        ),
        "499500"
    );
    assert_eq!(
        run(
            &mut st,
            r#"(try (throw (ex-info "boom" {:k 1})) (catch :default e (:k (ex-data e))))"#
        ),
        "1"
    );
    assert_eq!(run(&mut st, "(assoc {:a 1 :b 2} :a 10)"), "{:a 10 :b 2}");
}

#[test]
fn keyword_lookup_with_and_without_default() {
    let mut st = fresh();
    assert_eq!(run(&mut st, "(:a {:a 1 :b 2})"), "1");
    assert_eq!(run(&mut st, "(:missing {:a 1} :fallback)"), ":fallback");
    assert_eq!(run(&mut st, "(:missing {:a 1})"), "nil");
}

#[test]
fn catch_exception_is_a_catch_all_alias() {
    let mut st = fresh();
    assert_eq!(
        run(
            &mut st,
            r#"(try (throw (ex-info "boom" {})) (catch Exception e "caught"))"#
        ),
        "\"caught\""
    );
}

#[test]
fn unmatched_catch_type_lets_the_exception_propagate() {
    let mut st = fresh();
    let err = st
        .eval_string(r#"(try (throw (ex-info "boom" {})) (catch ArityError e "nope"))"#)
        .unwrap_err();
    assert_eq!(err.type_name(), "ExceptionInfo");
}

#[test]
fn finally_does_not_override_a_successful_result() {
    let mut st = fresh();
    assert_eq!(run(&mut st, "(try 1 (finally 2))"), "1");
}

#[test]
fn finally_throwing_replaces_the_in_flight_result() {
    let mut st = fresh();
    let err = st
        .eval_string(r#"(try (throw (ex-info "boom" {})) (finally (throw (ex-info "cleanup" {}))))"#)
        .unwrap_err();
    assert_eq!(print(err.value), "#<ExceptionInfo: cleanup>");
}

#[test]
fn non_tail_recursion_past_max_depth_raises_budget_exceeded() {
    let mut st = EvalState::with_config(EvalConfig {
        max_depth: 32,
        ..EvalConfig::default()
    });
    st.load_core();
    run(
        &mut st,
        "(def deep (fn [n] (if (= n 0) 0 (+ 1 (deep (- n 1))))))",
    );
    let err = st.eval_string("(deep 1000)").unwrap_err();
    assert_eq!(err.type_name(), "BudgetExceeded");
}

#[test]
fn recur_does_not_grow_past_a_shallow_max_depth() {
    let mut st = EvalState::with_config(EvalConfig {
        max_depth: 32,
        ..EvalConfig::default()
    });
    st.load_core();
    assert_eq!(
        run(
            &mut st,
            "(loop [i 0 acc 0] (if (= i 100000) acc (recur (+ i 1) (+ acc 1))))"
        ),
        "100000"
    );
}

#[test]
fn step_budget_exhaustion_raises_budget_exceeded() {
    let mut st = EvalState::with_config(EvalConfig {
        step_budget: Some(3),
        ..EvalConfig::default()
    });
    st.load_core();
    let err = st.eval_string("(+ 1 2 3 4 5)").unwrap_err();
    assert_eq!(err.type_name(), "BudgetExceeded");
}

#[test]
fn cow_assoc_never_mutates_the_original_map() {
    let mut st = fresh();
    run(&mut st, "(def original {:a 1})");
    run(&mut st, "(def updated (assoc original :a 2))");
    assert_eq!(run(&mut st, "(:a original)"), "1");
    assert_eq!(run(&mut st, "(:a updated)"), "2");
}

#[test]
fn read_then_print_round_trips_for_self_evaluating_literals() {
    let mut st = fresh();
    for (src, expected) in [
        ("42", "42"),
        ("-7", "-7"),
        ("3.5", "3.5000"),
        ("true", "true"),
        ("false", "false"),
        ("nil", "nil"),
        ("\"hi\"", "\"hi\""),
        (":kw", ":kw"),
        ("[1 2 3]", "[1 2 3]"),
    ] {
        assert_eq!(run(&mut st, src), expected);
    }
}

#[test]
fn do_returns_the_value_of_its_last_form() {
    let mut st = fresh();
    assert_eq!(
        run(&mut st, "(do (vector 1) (vector 1 2) (vector 1 2 3))"),
        "[1 2 3]"
    );
}

#[test]
fn eval_state_drop_runs_cleanly_with_a_retained_last_result() {
    let mut st = fresh();
    let v = run(&mut st, "(vector 1 2 3)");
    assert_eq!(v, "[1 2 3]");
    drop(st);
}
