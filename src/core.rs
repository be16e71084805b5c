//! The `clojure.core` namespace (§2, §4.6): native arithmetic/comparison/
//! collection primitives, installed once per `EvalState`, plus a small
//! `defn`-based source library layered on top of them.

use crate::collections::{list, map, vector};
use crate::eval;
use crate::exception::{self, ClojureException};
use crate::memory::{self, Kind};
use crate::namespace;
use crate::symbol;
use crate::value::{Value, NIL, TRUE, FALSE};
use crate::EvalState;

/// The host namespace unqualified symbol resolution falls back to (§4.3.1).
pub const CORE_NS: &str = "clojure.core";

/// Registers every native `clojure.core` function into `ns`. Idempotent:
/// re-running overwrites each binding with an equivalent fresh native-fn
/// value, which is harmless since native functions carry no captured state.
pub fn install(ns: &str) {
    namespace::ns_get_or_create(ns);
    for (name, min_arity, max_arity, func) in NATIVE_FNS {
        let f = eval::make_native_fn(name, *min_arity, *max_arity, *func);
        let sym = symbol::intern(None, name);
        namespace::def(ns, sym, f);
        memory::release(f);
    }
}

type NativeEntry = (&'static str, usize, Option<usize>, eval::NativeFn);

const NATIVE_FNS: &[NativeEntry] = &[
    ("+", 0, None, native_add),
    ("-", 1, None, native_sub),
    ("*", 0, None, native_mul),
    ("/", 1, None, native_div),
    ("=", 1, None, native_eq),
    ("<", 1, None, native_lt),
    (">", 1, None, native_gt),
    ("<=", 1, None, native_le),
    (">=", 1, None, native_ge),
    ("inc", 1, Some(1), native_inc),
    ("dec", 1, Some(1), native_dec),
    ("not", 1, Some(1), native_not),
    ("nil?", 1, Some(1), native_nil_p),
    ("str", 0, None, native_str),
    ("count", 1, Some(1), native_count),
    ("first", 1, Some(1), native_first),
    ("rest", 1, Some(1), native_rest),
    ("conj", 1, None, native_conj),
    ("assoc", 3, None, native_assoc),
    ("dissoc", 1, None, native_dissoc),
    ("get", 2, Some(3), native_get),
    ("vector", 0, None, native_vector),
    ("list", 0, None, native_list),
    ("ex-info", 2, Some(3), native_ex_info),
    ("ex-data", 1, Some(1), native_ex_data),
    ("ex-message", 1, Some(1), native_ex_message),
];

fn type_error(message: impl Into<String>) -> ClojureException {
    ClojureException {
        value: exception::simple("TypeError", message),
    }
}

fn number_format_error(message: impl Into<String>) -> ClojureException {
    ClojureException {
        value: exception::simple("NumberFormatException", message),
    }
}

fn as_number(v: Value) -> Result<i64, ClojureException> {
    v.as_fixnum()
        .or_else(|| v.as_f64().map(|f| f.round() as i64))
        .ok_or_else(|| type_error("expected a number"))
}

/// Arithmetic stays in fixnum space when every operand is a fixnum, and
/// falls back to the fixed-point encoding the moment any operand is a real
/// (§3.1), rounding back down through `as_f64` rather than tracking Q16.13
/// arithmetic bit-for-bit — acceptable since §6.4 only promises four
/// fractional digits of fidelity on the printed side.
fn any_fixed(args: &[Value]) -> bool {
    args.iter().any(|v| v.is_fixed())
}

fn num_result(args: &[Value], exact: i64, real: f64) -> Result<Value, ClojureException> {
    if any_fixed(args) {
        Ok(Value::fixed_from_f64(real))
    } else {
        Value::fixnum(exact).ok_or_else(|| number_format_error("integer overflow"))
    }
}

fn native_add(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    let mut exact = 0i64;
    let mut real = 0.0f64;
    for a in args {
        exact = exact.saturating_add(as_number(*a)?);
        real += a.as_f64().ok_or_else(|| type_error("expected a number"))?;
    }
    num_result(args, exact, real)
}

fn native_mul(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    let mut exact = 1i64;
    let mut real = 1.0f64;
    for a in args {
        exact = exact.saturating_mul(as_number(*a)?);
        real *= a.as_f64().ok_or_else(|| type_error("expected a number"))?;
    }
    num_result(args, exact, real)
}

fn native_sub(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    let first = as_number(args[0])?;
    let first_f = args[0].as_f64().ok_or_else(|| type_error("expected a number"))?;
    if args.len() == 1 {
        return num_result(args, -first, -first_f);
    }
    let mut exact = first;
    let mut real = first_f;
    for a in &args[1..] {
        exact = exact.saturating_sub(as_number(*a)?);
        real -= a.as_f64().ok_or_else(|| type_error("expected a number"))?;
    }
    num_result(args, exact, real)
}

fn native_div(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    let first_f = args[0].as_f64().ok_or_else(|| type_error("expected a number"))?;
    let (mut real, rest) = if args.len() == 1 {
        (1.0 / first_f, &args[0..0])
    } else {
        (first_f, &args[1..])
    };
    for a in rest {
        let d = a.as_f64().ok_or_else(|| type_error("expected a number"))?;
        if d == 0.0 {
            return Err(ClojureException {
                value: exception::simple("DivisionByZero", "division by zero"),
            });
        }
        real /= d;
    }
    if any_fixed(args) || real.fract() != 0.0 {
        Ok(Value::fixed_from_f64(real))
    } else {
        Value::fixnum(real as i64).ok_or_else(|| number_format_error("integer overflow"))
    }
}

fn compare_chain(args: &[Value], ok: impl Fn(f64, f64) -> bool) -> Result<Value, ClojureException> {
    for w in args.windows(2) {
        let a = w[0].as_f64().ok_or_else(|| type_error("expected a number"))?;
        let b = w[1].as_f64().ok_or_else(|| type_error("expected a number"))?;
        if !ok(a, b) {
            return Ok(FALSE);
        }
    }
    Ok(TRUE)
}

fn native_lt(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    compare_chain(args, |a, b| a < b)
}

fn native_gt(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    compare_chain(args, |a, b| a > b)
}

fn native_le(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    compare_chain(args, |a, b| a <= b)
}

fn native_ge(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    compare_chain(args, |a, b| a >= b)
}

fn native_eq(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    let ok = args.windows(2).all(|w| crate::collections::equal(w[0], w[1]));
    Ok(if ok { TRUE } else { FALSE })
}

fn native_inc(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    if let Some(n) = args[0].as_fixnum() {
        return Value::fixnum(n + 1).ok_or_else(|| number_format_error("integer overflow"));
    }
    let f = args[0].as_f64().ok_or_else(|| type_error("expected a number"))?;
    Ok(Value::fixed_from_f64(f + 1.0))
}

fn native_dec(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    if let Some(n) = args[0].as_fixnum() {
        return Value::fixnum(n - 1).ok_or_else(|| number_format_error("integer overflow"));
    }
    let f = args[0].as_f64().ok_or_else(|| type_error("expected a number"))?;
    Ok(Value::fixed_from_f64(f - 1.0))
}

fn native_not(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    Ok(if args[0].is_truthy() { FALSE } else { TRUE })
}

fn native_nil_p(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    Ok(if args[0].is_nil() { TRUE } else { FALSE })
}

fn native_str(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    let mut out = String::new();
    for a in args {
        if a.is_nil() {
            continue;
        }
        if memory::kind_of(*a) == Some(Kind::String) {
            out.push_str(&crate::collections::string_bytes(*a));
        } else {
            out.push_str(&crate::printer::print(*a));
        }
    }
    Ok(memory::alloc(Kind::String, memory::HeapData::Str(out)))
}

fn native_count(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    let v = args[0];
    let n = if v.is_nil() {
        0
    } else {
        match memory::kind_of(v) {
            Some(Kind::Vector) | Some(Kind::TransientVector) => vector::count(v),
            Some(Kind::Map) | Some(Kind::TransientMap) => map::count(v),
            Some(Kind::List) => list::count(v),
            Some(Kind::Seq) => crate::collections::seq::items(v).len(),
            Some(Kind::String) => crate::collections::string_bytes(v).chars().count(),
            Some(Kind::ByteArray) => crate::collections::bytes::len(v),
            _ => return Err(type_error("count requires a collection")),
        }
    };
    Value::fixnum(n as i64).ok_or_else(|| number_format_error("count overflow"))
}

fn native_first(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    let v = args[0];
    let result = if v.is_nil() {
        NIL
    } else {
        match memory::kind_of(v) {
            Some(Kind::List) => list::first(v).unwrap_or(NIL),
            Some(Kind::Vector) | Some(Kind::TransientVector) => vector::nth(v, 0).unwrap_or(NIL),
            Some(Kind::Seq) => crate::collections::seq::first(v).unwrap_or(NIL),
            _ => return Err(type_error("first requires a sequence")),
        }
    };
    Ok(memory::retain(result))
}

fn native_rest(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    let v = args[0];
    if v.is_nil() {
        return Ok(NIL);
    }
    match memory::kind_of(v) {
        Some(Kind::List) => Ok(memory::retain(list::rest(v))),
        Some(Kind::Vector) | Some(Kind::TransientVector) => {
            let items = vector::items(v);
            Ok(list::from_items(items.into_iter().skip(1)))
        }
        Some(Kind::Seq) => Ok(crate::collections::seq::rest(v)),
        _ => Err(type_error("rest requires a sequence")),
    }
}

fn native_conj(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    let mut coll = args[0];
    memory::retain(coll);
    for item in &args[1..] {
        let next = if coll.is_nil() || memory::kind_of(coll) == Some(Kind::List) {
            list::cons(*item, coll)
        } else if matches!(memory::kind_of(coll), Some(Kind::Vector) | Some(Kind::TransientVector)) {
            vector::conj(coll, *item)
        } else {
            memory::release(coll);
            return Err(type_error("conj requires a vector or list"));
        };
        memory::release(coll);
        coll = next;
    }
    Ok(coll)
}

fn native_assoc(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    if (args.len() - 1) % 2 != 0 {
        return Err(type_error("assoc requires an even number of key/value arguments"));
    }
    let mut coll = args[0];
    memory::retain(coll);
    for kv in args[1..].chunks_exact(2) {
        let next = match memory::kind_of(coll) {
            Some(Kind::Map) | Some(Kind::TransientMap) => map::assoc(coll, kv[0], kv[1]),
            Some(Kind::Vector) | Some(Kind::TransientVector) => {
                let Some(index) = kv[0].as_fixnum() else {
                    memory::release(coll);
                    return Err(type_error("vector assoc requires an integer index"));
                };
                let Some(updated) = vector::assoc(coll, index as usize, kv[1]) else {
                    memory::release(coll);
                    return Err(ClojureException {
                        value: exception::simple("IndexOutOfBoundsException", "index out of bounds"),
                    });
                };
                updated
            }
            _ => {
                memory::release(coll);
                return Err(type_error("assoc requires a map or vector"));
            }
        };
        memory::release(coll);
        coll = next;
    }
    Ok(coll)
}

fn native_dissoc(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    let mut coll = args[0];
    memory::retain(coll);
    for key in &args[1..] {
        let next = map::dissoc(coll, *key);
        memory::release(coll);
        coll = next;
    }
    Ok(coll)
}

fn native_get(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    let coll = args[0];
    let key = args[1];
    let default = args.get(2).copied().unwrap_or(NIL);
    let found = match memory::kind_of(coll) {
        Some(Kind::Map) | Some(Kind::TransientMap) => map::get(coll, key),
        Some(Kind::Vector) | Some(Kind::TransientVector) => {
            key.as_fixnum().and_then(|i| vector::nth(coll, i as usize))
        }
        _ => None,
    };
    Ok(memory::retain(found.unwrap_or(default)))
}

fn native_vector(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    Ok(vector::from_items(args.iter().copied()))
}

fn native_list(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    Ok(list::from_items(args.iter().copied()))
}

fn native_ex_info(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    if memory::kind_of(args[0]) != Some(Kind::String) {
        return Err(type_error("ex-info requires a string message"));
    }
    let message = crate::collections::string_bytes(args[0]);
    let data = args.get(1).copied().unwrap_or(NIL);
    Ok(exception::make("ExceptionInfo", &message, "", 0, 0, data))
}

fn native_ex_data(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    if memory::kind_of(args[0]) != Some(Kind::Exception) {
        return Err(type_error("ex-data requires an exception"));
    }
    Ok(memory::retain(exception::data_of(args[0])))
}

fn native_ex_message(args: &[Value], _st: &mut EvalState) -> Result<Value, ClojureException> {
    if memory::kind_of(args[0]) != Some(Kind::Exception) {
        return Err(type_error("ex-message requires an exception"));
    }
    Ok(memory::alloc(
        Kind::String,
        memory::HeapData::Str(exception::message_of(args[0])),
    ))
}

/// A small `defn`-based source library layered over the natives above.
/// Loaded by `EvalState::load_core` under the "catch and continue" policy
/// (§9): each top-level form is evaluated independently and a failure here
/// only drops that one definition, never aborts the rest of bootstrap.
pub const CORE_SOURCE: &str = r"
(defn not= [a b] (not (= a b)))
(defn second [coll] (first (rest coll)))
(defn identity [x] x)
(defn zero? [n] (= n 0))
(defn pos? [n] (> n 0))
(defn neg? [n] (< n 0))
(defn empty? [coll] (= 0 (count coll)))
";

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_ns(name: &str) -> String {
        install(name);
        name.to_string()
    }

    #[test]
    fn arithmetic_promotes_to_fixed_point_on_any_real_operand() {
        let mut st = EvalState::with_config(crate::EvalConfig::default());
        let r = native_add(&[Value::fixnum(1).unwrap(), Value::fixed_from_f64(0.5)], &mut st).unwrap();
        assert!(r.is_fixed());
        assert!((r.as_f64().unwrap() - 1.5).abs() < 1e-6);
    }

    #[test]
    fn division_by_zero_is_a_catchable_exception() {
        let mut st = EvalState::with_config(crate::EvalConfig::default());
        let err = native_div(&[Value::fixnum(1).unwrap(), Value::fixnum(0).unwrap()], &mut st).unwrap_err();
        assert_eq!(exception::type_name_of(err.value), "DivisionByZero");
    }

    #[test]
    fn install_registers_core_natives() {
        let ns = fresh_ns("core.test.install");
        let sym = symbol::intern(None, "+");
        assert!(namespace::contains(&ns, sym));
    }
}
