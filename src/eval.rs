//! The evaluator (§4.3): atom evaluation, list application, special forms,
//! closure capture, and the `recur` trampoline.
//!
//! `recur` is implemented as a Rust-level `loop` inside [`eval`] rather than
//! recursive calls: reassigning the loop's `form`/`env` locals and jumping
//! back to the top is how a tail call or an explicit `recur` is taken, so
//! guest-level iteration never grows the Rust call stack (§8 property 7).
//! Genuine non-tail recursion (argument evaluation, `if` tests, `let`
//! binding expressions, ordinary non-tail self-calls) goes through ordinary
//! recursive `eval` calls and *does* grow the Rust stack, same as any tree
//! walker — only the tail path is trampolined.

use crate::collections::{list, map};
use crate::exception::{self, ClojureException};
use crate::memory::{self, HeapData, Kind};
use crate::namespace;
use crate::symbol;
use crate::value::{Value, NIL};
use crate::EvalState;
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::OnceLock;

thread_local! {
    static EVAL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Tracks genuine (non-tail) Rust recursion through [`eval`] against the
/// configured `max_depth` (§4.8), raising `BudgetExceeded` before the Rust
/// stack itself would overflow. Tail calls never construct one of these —
/// they loop inside a single `eval` frame instead (see module docs).
struct DepthGuard;

impl DepthGuard {
    fn enter(max_depth: usize) -> Result<Self, ClojureException> {
        let exceeded = EVAL_DEPTH.with(|d| {
            let next = d.get() + 1;
            d.set(next);
            next > max_depth
        });
        if exceeded {
            EVAL_DEPTH.with(|d| d.set(d.get() - 1));
            return Err(ClojureException {
                value: exception::simple(
                    "BudgetExceeded",
                    "maximum evaluation recursion depth exceeded",
                ),
            });
        }
        Ok(DepthGuard)
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        EVAL_DEPTH.with(|d| d.set(d.get() - 1));
    }
}

pub(crate) struct InterpFnData {
    pub params: Vec<Value>,
    pub variadic: bool,
    pub body: Vec<Value>,
    pub env: Value,
    pub name: Option<Value>,
}

pub type NativeFn = fn(&[Value], &mut EvalState) -> Result<Value, ClojureException>;

pub(crate) struct NativeFnData {
    pub name: String,
    pub min_arity: usize,
    pub max_arity: Option<usize>, // None => variadic, unbounded above min_arity
    pub func: NativeFn,
}

#[must_use]
pub fn make_interp_fn(
    params: Vec<Value>,
    variadic: bool,
    body: Vec<Value>,
    env: Value,
    name: Option<Value>,
) -> Value {
    for p in &params {
        memory::retain(*p);
    }
    for f in &body {
        memory::retain(*f);
    }
    memory::retain(env);
    if let Some(n) = name {
        memory::retain(n);
    }
    memory::alloc(
        Kind::FunctionInterp,
        HeapData::FunctionInterp(InterpFnData {
            params,
            variadic,
            body,
            env,
            name,
        }),
    )
}

#[must_use]
pub fn make_native_fn(name: &str, min_arity: usize, max_arity: Option<usize>, func: NativeFn) -> Value {
    memory::alloc(
        Kind::FunctionNative,
        HeapData::FunctionNative(NativeFnData {
            name: name.to_string(),
            min_arity,
            max_arity,
            func,
        }),
    )
}

fn type_error(message: impl Into<String>) -> ClojureException {
    ClojureException {
        value: exception::simple("TypeError", message),
    }
}

fn arity_error(name: &str, got: usize) -> ClojureException {
    ClojureException {
        value: exception::simple("ArityError", format!("{name}: wrong number of arguments ({got})")),
    }
}

/// A keyword used in callee position looks itself up in its first argument,
/// the idiomatic Clojure accessor shorthand: `(:k m)` is `(get m :k)`, and
/// `(:k m default)` supplies the fallback `get` would take. Retains whatever
/// it returns; callers are responsible for discarding `args`.
fn keyword_lookup(kw: Value, args: &[Value]) -> Result<Value, ClojureException> {
    if args.is_empty() || args.len() > 2 {
        return Err(arity_error(&symbol::name(kw), args.len()));
    }
    let found = match memory::kind_of(args[0]) {
        Some(Kind::Map) => map::get(args[0], kw),
        _ => None,
    };
    let result = found.or_else(|| args.get(1).copied()).unwrap_or(NIL);
    Ok(memory::retain(result))
}

fn symbol_resolution_error(sym: Value) -> ClojureException {
    ClojureException {
        value: exception::simple(
            "SymbolResolutionError",
            format!("unable to resolve symbol: {}", symbol::qualified_name(sym)),
        ),
    }
}

/// Environment frames are persistent maps (§4.3.4) chained via a reserved
/// key no reader-produced symbol can ever name (its namespace text contains
/// a control character the symbol grammar never accepts).
fn parent_key() -> Value {
    static KEY: OnceLock<Value> = OnceLock::new();
    *KEY.get_or_init(|| symbol::intern(Some("\u{0}env"), "parent"))
}

#[must_use]
fn env_new(parent: Value) -> Value {
    map::assoc(map::empty(), parent_key(), parent)
}

#[must_use]
fn env_lookup(env: Value, sym: Value) -> Option<Value> {
    let mut cur = env;
    while !cur.is_nil() {
        if let Some(v) = map::get(cur, sym) {
            return Some(v);
        }
        cur = map::get(cur, parent_key()).unwrap_or(NIL);
    }
    None
}

/// Releases every environment frame this `eval` call allocated, once it
/// returns — closures that captured one of them hold their own retained
/// copy, so this never frees a live capture.
#[derive(Default)]
struct EnvScope(Vec<Value>);

impl EnvScope {
    fn track(&mut self, v: Value) -> Value {
        self.0.push(v);
        v
    }
}

impl Drop for EnvScope {
    fn drop(&mut self) {
        for v in self.0.drain(..) {
            memory::release(v);
        }
    }
}

/// What `recur` rebinds against: the nearest enclosing `loop` or function
/// tail, tracked locally to this `eval` call so cross-frame `recur` is
/// structurally impossible (§4.3.5) — a `recur` reached through a nested,
/// non-tail `eval` call sees that call's own (empty) local state instead.
struct RecurFrame {
    params: Vec<Value>,
    variadic: bool,
    outer_env: Value,
    body: Vec<Value>,
}

fn bind_params(
    scope: &mut EnvScope,
    outer_env: Value,
    params: &[Value],
    variadic: bool,
    args: &[Value],
    label: &str,
) -> Result<Value, ClojureException> {
    let fixed = if variadic { params.len() - 1 } else { params.len() };
    if variadic {
        if args.len() < fixed {
            return Err(arity_error(label, args.len()));
        }
    } else if args.len() != fixed {
        return Err(arity_error(label, args.len()));
    }
    // `env_new` starts out uniquely owned, so every `assoc` below mutates in
    // place and returns the same pointer `scope` is already tracking.
    let mut env = scope.track(env_new(outer_env));
    for (sym, val) in params.iter().take(fixed).zip(args.iter()) {
        env = map::assoc(env, *sym, *val);
    }
    if variadic {
        let rest = list::from_items(args[fixed..].iter().copied());
        env = map::assoc(env, params[fixed], rest);
        memory::release(rest);
    }
    Ok(env)
}

fn special_form_name(sym: Value) -> Option<&'static str> {
    static TABLE: OnceLock<HashMap<Value, &'static str>> = OnceLock::new();
    let table = TABLE.get_or_init(|| {
        symbol::SPECIAL_FORMS
            .iter()
            .map(|&name| (symbol::intern(None, name), name))
            .collect()
    });
    table.get(&sym).copied()
}

fn discard(v: Value) {
    memory::release(v);
}

/// Entry point (§4.3): evaluates `form` against `env` and the state `st`.
/// Drives its own tail-call trampoline; see module docs.
pub fn eval(form: Value, env: Value, st: &mut EvalState) -> Result<Value, ClojureException> {
    let _depth_guard = DepthGuard::enter(st.max_depth())?;
    let mut form = form;
    let mut env = env;
    let mut recur_frame: Option<RecurFrame> = None;
    let mut scope = EnvScope::default();

    loop {
        st.tick()?;

        if form.is_nil() || !form.is_heap() {
            // Immediates (fixnum/char/fixed/bool/nil) are self-evaluating.
            return Ok(form);
        }
        let Some(kind) = memory::kind_of(form) else {
            return Ok(form);
        };
        match kind {
            Kind::Symbol => {
                let name = symbol::name(form);
                if name.starts_with(':') {
                    // Keywords self-evaluate (§4.2).
                    return Ok(memory::retain(form));
                }
                if let Some(v) = env_lookup(env, form) {
                    return Ok(memory::retain(v));
                }
                if symbol::namespace(form).is_some() {
                    if let Some(v) = namespace::resolve_qualified(form) {
                        return Ok(memory::retain(v));
                    }
                    return Err(symbol_resolution_error(form));
                }
                if let Some(v) = namespace::resolve_unqualified(&st.current_ns, form) {
                    return Ok(memory::retain(v));
                }
                return Err(symbol_resolution_error(form));
            }
            Kind::String | Kind::ByteArray | Kind::FunctionNative | Kind::FunctionInterp => {
                return Ok(memory::retain(form));
            }
            Kind::Vector | Kind::Map => {
                // Literal vectors/maps evaluate to themselves (§4.3.1);
                // they are not recursively evaluated outside quasiquote.
                return Ok(memory::retain(form));
            }
            Kind::List => {
                if list::is_empty(form) {
                    return Ok(memory::retain(form));
                }
            }
            _ => return Ok(memory::retain(form)),
        }

        // `form` is a non-empty list: either a special form or application.
        let head = list::first(form).expect("checked non-empty");
        let args_forms = list::items(list::rest(form));

        if memory::kind_of(head) == Some(Kind::Symbol) {
            if let Some(special) = special_form_name(head) {
                match special {
                    "quote" => {
                        let [x] = args_forms.as_slice() else {
                            return Err(arity_error("quote", args_forms.len()));
                        };
                        return Ok(memory::retain(*x));
                    }
                    "def" => {
                        let [sym, value_form] = args_forms.as_slice() else {
                            return Err(arity_error("def", args_forms.len()));
                        };
                        let value = eval(*value_form, env, st)?;
                        namespace::def(&st.current_ns, *sym, value);
                        discard(value);
                        return Ok(memory::retain(*sym));
                    }
                    "fn" => {
                        let (params, variadic) = parse_param_vector(args_forms.first().copied())?;
                        let body = args_forms.get(1..).unwrap_or(&[]).to_vec();
                        return Ok(make_interp_fn(params, variadic, body, env, None));
                    }
                    "defn" => {
                        let Some(sym) = args_forms.first().copied() else {
                            return Err(arity_error("defn", args_forms.len()));
                        };
                        let (params, variadic) =
                            parse_param_vector(args_forms.get(1).copied())?;
                        let body = args_forms.get(2..).unwrap_or(&[]).to_vec();
                        let f = make_interp_fn(params, variadic, body, env, Some(sym));
                        namespace::def(&st.current_ns, sym, f);
                        discard(f);
                        return Ok(memory::retain(sym));
                    }
                    "if" => {
                        let test = args_forms
                            .first()
                            .copied()
                            .ok_or_else(|| arity_error("if", args_forms.len()))?;
                        let then = args_forms.get(1).copied();
                        let els = args_forms.get(2).copied();
                        let t = eval(test, env, st)?;
                        let truthy = t.is_truthy();
                        discard(t);
                        form = if truthy {
                            then.unwrap_or(NIL)
                        } else {
                            els.unwrap_or(NIL)
                        };
                        continue;
                    }
                    "do" => {
                        if args_forms.is_empty() {
                            return Ok(NIL);
                        }
                        for f in &args_forms[..args_forms.len() - 1] {
                            let v = eval(*f, env, st)?;
                            discard(v);
                        }
                        form = args_forms[args_forms.len() - 1];
                        continue;
                    }
                    "let" => {
                        let (new_env, body) = bind_sequential(args_forms, env, st, &mut scope)?;
                        env = new_env;
                        form = implicit_do(body);
                        continue;
                    }
                    "loop" => {
                        let (new_env, body) = bind_sequential(args_forms, env, st, &mut scope)?;
                        let (params, _) = parse_loop_params(args_forms.first().copied())?;
                        recur_frame = Some(RecurFrame {
                            params,
                            variadic: false,
                            outer_env: env,
                            body: body.to_vec(),
                        });
                        env = new_env;
                        form = implicit_do(body);
                        continue;
                    }
                    "recur" => {
                        let Some(frame) = recur_frame.as_ref() else {
                            return Err(ClojureException {
                                value: exception::simple(
                                    "RecurPositionError",
                                    "recur used outside the tail of a loop or fn",
                                ),
                            });
                        };
                        let mut args = Vec::with_capacity(args_forms.len());
                        for f in &args_forms {
                            args.push(eval(*f, env, st)?);
                        }
                        let params = frame.params.clone();
                        let variadic = frame.variadic;
                        let outer_env = frame.outer_env;
                        let body = frame.body.clone();
                        let new_env = bind_params(&mut scope, outer_env, &params, variadic, &args, "recur")?;
                        for a in args {
                            discard(a);
                        }
                        env = new_env;
                        form = implicit_do(&body);
                        continue;
                    }
                    "throw" => {
                        let x = args_forms
                            .first()
                            .copied()
                            .ok_or_else(|| arity_error("throw", args_forms.len()))?;
                        let v = eval(x, env, st)?;
                        if memory::kind_of(v) != Some(Kind::Exception) {
                            discard(v);
                            return Err(type_error("throw requires an exception value"));
                        }
                        return Err(ClojureException { value: v });
                    }
                    "try" => return eval_try(&args_forms, env, st),
                    "ns" => {
                        let Some(sym) = args_forms.first().copied() else {
                            return Err(arity_error("ns", args_forms.len()));
                        };
                        st.current_ns = symbol::name(sym);
                        namespace::ns_get_or_create(&st.current_ns);
                        return Ok(NIL);
                    }
                    "quasiquote" => {
                        let [x] = args_forms.as_slice() else {
                            return Err(arity_error("quasiquote", args_forms.len()));
                        };
                        return quasiquote(*x, env, st);
                    }
                    "unquote" | "splice-unquote" => {
                        return Err(type_error(format!("{special} used outside quasiquote")));
                    }
                    "catch" | "finally" => {
                        return Err(type_error(format!("{special} used outside try")));
                    }
                    _ => unreachable!("special_form_name only returns known names"),
                }
            }
        }

        // Application: evaluate callee and arguments left-to-right (§4.3.2).
        let callee = eval(head, env, st)?;
        let mut args = Vec::with_capacity(args_forms.len());
        for f in &args_forms {
            match eval(*f, env, st) {
                Ok(v) => args.push(v),
                Err(e) => {
                    discard(callee);
                    for a in args {
                        discard(a);
                    }
                    return Err(e);
                }
            }
        }

        match memory::kind_of(callee) {
            Some(Kind::FunctionNative) => {
                let result = call_native(callee, &args, st);
                discard(callee);
                for a in &args {
                    discard(*a);
                }
                return result;
            }
            Some(Kind::Symbol) if symbol::name(callee).starts_with(':') => {
                let result = keyword_lookup(callee, &args);
                discard(callee);
                for a in &args {
                    discard(*a);
                }
                return result;
            }
            Some(Kind::FunctionInterp) => {
                let (params, variadic, body, fn_env) = memory::with_data(callee, |d| {
                    let HeapData::FunctionInterp(f) = d else {
                        unreachable!()
                    };
                    (f.params.clone(), f.variadic, f.body.clone(), f.env)
                });
                let label = memory::with_data(callee, |d| {
                    let HeapData::FunctionInterp(f) = d else {
                        unreachable!()
                    };
                    f.name.map_or_else(|| "fn".to_string(), symbol::qualified_name)
                });
                let new_env = match bind_params(&mut scope, fn_env, &params, variadic, &args, &label) {
                    Ok(e) => e,
                    Err(e) => {
                        discard(callee);
                        for a in &args {
                            discard(*a);
                        }
                        return Err(e);
                    }
                };
                for a in &args {
                    discard(*a);
                }
                discard(callee);
                recur_frame = Some(RecurFrame {
                    params,
                    variadic,
                    outer_env: fn_env,
                    body: body.clone(),
                });
                env = new_env;
                form = implicit_do(&body);
                continue;
            }
            _ => {
                discard(callee);
                for a in &args {
                    discard(*a);
                }
                return Err(type_error("cannot call a non-function value"));
            }
        }
    }
}

/// Returns the final form to jump to for an implicit-`do` body: all but the
/// last are evaluated as ordinary (non-tail) statements by the caller before
/// this is invoked; this just picks the tail form.
fn implicit_do(body: &[Value]) -> Value {
    body.last().copied().unwrap_or(NIL)
}

fn call_native(f: Value, args: &[Value], st: &mut EvalState) -> Result<Value, ClojureException> {
    let (name, min_arity, max_arity, func) = memory::with_data(f, |d| {
        let HeapData::FunctionNative(n) = d else {
            unreachable!()
        };
        (n.name.clone(), n.min_arity, n.max_arity, n.func)
    });
    let ok_arity = args.len() >= min_arity && max_arity.is_none_or(|max| args.len() <= max);
    if !ok_arity {
        return Err(arity_error(&name, args.len()));
    }
    func(args, st)
}

/// Parses a `[params...]` or `[params... & rest]` vector, per §4.3.3/§3.3.
fn parse_param_vector(v: Option<Value>) -> Result<(Vec<Value>, bool), ClojureException> {
    let Some(v) = v else {
        return Ok((Vec::new(), false));
    };
    if memory::kind_of(v) != Some(Kind::Vector) {
        return Err(type_error("parameter list must be a vector"));
    }
    let items = crate::collections::vector::items(v);
    split_variadic(items)
}

fn parse_loop_params(v: Option<Value>) -> Result<(Vec<Value>, bool), ClojureException> {
    let Some(v) = v else {
        return Ok((Vec::new(), false));
    };
    if memory::kind_of(v) != Some(Kind::Vector) {
        return Err(type_error("loop binding form must be a vector"));
    }
    let items = crate::collections::vector::items(v);
    let syms: Vec<Value> = items.iter().step_by(2).copied().collect();
    Ok((syms, false))
}

fn split_variadic(items: Vec<Value>) -> Result<(Vec<Value>, bool), ClojureException> {
    let amp = symbol::intern(None, "&");
    if let Some(pos) = items.iter().position(|&s| s == amp) {
        let Some(&rest_sym) = items.get(pos + 1) else {
            return Err(type_error("missing binding after '&'"));
        };
        let mut params: Vec<Value> = items[..pos].to_vec();
        params.push(rest_sym);
        Ok((params, true))
    } else {
        Ok((items, false))
    }
}

/// Shared by `let` and `loop`: builds a nested environment by sequentially
/// evaluating each binding's value form against the bindings seen so far
/// (§4.3.3), then returns the new environment and the body forms.
fn bind_sequential<'a>(
    args_forms: Vec<Value>,
    outer_env: Value,
    st: &mut EvalState,
    scope: &mut EnvScope,
) -> Result<(Value, Vec<Value>), ClojureException> {
    let Some(bindings_vec) = args_forms.first().copied() else {
        return Err(type_error("let/loop requires a binding vector"));
    };
    if memory::kind_of(bindings_vec) != Some(Kind::Vector) {
        return Err(type_error("let/loop binding form must be a vector"));
    }
    let pairs = crate::collections::vector::items(bindings_vec);
    if pairs.len() % 2 != 0 {
        return Err(type_error("let/loop binding vector must have an even length"));
    }
    let mut env = scope.track(env_new(outer_env));
    let mut i = 0;
    while i < pairs.len() {
        let sym = pairs[i];
        let value_form = pairs[i + 1];
        let value = eval(value_form, env, st)?;
        env = map::assoc(env, sym, value);
        discard(value);
        i += 2;
    }
    let body = args_forms.get(1..).unwrap_or(&[]).to_vec();
    Ok((env, body))
}

/// `(try body... (catch Type sym handler)... (finally cleanup))` (§4.5).
fn eval_try(forms: &[Value], env: Value, st: &mut EvalState) -> Result<Value, ClojureException> {
    let catch_sym = symbol::intern(None, "catch");
    let finally_sym = symbol::intern(None, "finally");

    let mut body = Vec::new();
    let mut catches = Vec::new();
    let mut finally = None;
    for f in forms {
        if memory::kind_of(*f) == Some(Kind::List) && !list::is_empty(*f) {
            let h = list::first(*f).expect("non-empty");
            if h == catch_sym {
                catches.push(list::items(list::rest(*f)));
                continue;
            }
            if h == finally_sym {
                finally = Some(list::items(list::rest(*f)));
                continue;
            }
        }
        body.push(*f);
    }

    let pool_depth = st.pools.depth();
    let names: Vec<String> = catches
        .iter()
        .map(|c| c.first().map_or_else(|| "Exception".to_string(), symbol::name))
        .collect();
    // An empty `accepts` list is `HandlerStack`'s own catch-all spelling; fold
    // any catch-all clause in this `try` down to that rather than carrying
    // the literal name through.
    let accepts = if names.iter().any(|n| is_catch_all(n)) { Vec::new() } else { names };
    st.handlers.push(accepts, pool_depth);

    let body_result = (|| {
        let mut last = NIL;
        for f in &body {
            let v = eval(*f, env, st)?;
            discard(last);
            last = v;
        }
        Ok(last)
    })();

    st.handlers.pop();

    let result = match body_result {
        Ok(v) => Ok(v),
        Err(exc) => run_matching_catch(&catches, exc, env, st),
    };

    run_finally(finally, result, env, st)
}

/// Tiny-Clj exceptions carry no class hierarchy to check `isinstance`
/// against, so `catch` recognizes two literal catch-all spellings: the
/// keyword `:default` (Clojure's own non-class catch-all) and the bare
/// symbol `Exception` (this crate's stand-in root type).
fn is_catch_all(name: &str) -> bool {
    name == ":default" || name == "Exception"
}

/// Finds the nearest catch clause whose type filter accepts `exc`'s
/// `type_name` and runs its handler body (binding the exception if the
/// clause names a symbol), per §4.5. Returns `exc` unhandled if nothing
/// matches.
fn run_matching_catch(
    catches: &[Vec<Value>],
    exc: ClojureException,
    env: Value,
    st: &mut EvalState,
) -> Result<Value, ClojureException> {
    let type_name = exception::type_name_of(exc.value);
    let Some(clause) = catches.iter().find(|c| {
        c.first().map_or(true, |&t| {
            let name = symbol::name(t);
            is_catch_all(&name) || name == type_name
        })
    }) else {
        return Err(exc);
    };
    let bind_sym = clause.get(1).copied();
    let handler_body = clause.get(2..).unwrap_or(&[]);
    let exc_value = exc.value;
    let handler_env = match bind_sym {
        Some(bs) => map::assoc(env_new(env), bs, exc_value),
        None => env,
    };
    let mut last = NIL;
    let mut result = Ok(());
    for f in handler_body {
        match eval(*f, handler_env, st) {
            Ok(v) => {
                discard(last);
                last = v;
            }
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }
    if handler_env != env {
        memory::release(handler_env);
    }
    // `exc`'s own `Drop` releases `exc_value` (== `exc.value`) once this
    // function returns.
    result.map(|()| last)
}

/// Runs a `finally` clause (if present) on every path. A `finally` that
/// itself throws replaces the in-flight result (§4.5).
fn run_finally(
    finally: Option<Vec<Value>>,
    result: Result<Value, ClojureException>,
    env: Value,
    st: &mut EvalState,
) -> Result<Value, ClojureException> {
    let Some(cleanup) = finally else {
        return result;
    };
    let cleanup_result = (|| {
        for f in &cleanup {
            let v = eval(*f, env, st)?;
            discard(v);
        }
        Ok(())
    })();
    match cleanup_result {
        Err(e) => {
            if let Ok(v) = result {
                discard(v);
            }
            Err(e)
        }
        Ok(()) => result,
    }
}

/// Minimal, non-macro quasiquote expansion (§4.2 grammar, evaluated here
/// since the evaluator has no macro-expansion phase): `unquote` evaluates
/// its argument; `splice-unquote` evaluates to a sequence spliced into the
/// enclosing list; everything else is quoted data, recursively expanded.
fn quasiquote(form: Value, env: Value, st: &mut EvalState) -> Result<Value, ClojureException> {
    let unquote_sym = symbol::intern(None, "unquote");
    let splice_sym = symbol::intern(None, "splice-unquote");

    if memory::kind_of(form) == Some(Kind::List) && !list::is_empty(form) {
        let head = list::first(form).expect("non-empty");
        if head == unquote_sym {
            let arg = list::items(list::rest(form));
            let x = arg.first().copied().unwrap_or(NIL);
            return eval(x, env, st);
        }
        let mut out = Vec::new();
        for item in list::items(form) {
            if memory::kind_of(item) == Some(Kind::List) && !list::is_empty(item) {
                let h = list::first(item).expect("non-empty");
                if h == splice_sym {
                    let arg = list::items(list::rest(item));
                    let x = arg.first().copied().unwrap_or(NIL);
                    let spliced = eval(x, env, st)?;
                    out.extend(crate::collections::sequential_values(spliced));
                    discard(spliced);
                    continue;
                }
            }
            out.push(quasiquote(item, env, st)?);
        }
        let result = list::from_items(out.iter().copied());
        for v in out {
            discard(v);
        }
        return Ok(result);
    }
    Ok(memory::retain(form))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EvalConfig;

    fn fresh_state() -> EvalState {
        let ns = format!("eval.test.{}", symbol::intern(None, "unused").is_heap() as u8);
        let mut st = EvalState::with_config(EvalConfig::default());
        st.current_ns = ns;
        namespace::ns_get_or_create(&st.current_ns);
        st
    }

    fn read_one(src: &str, ns: &str) -> Value {
        crate::reader::Reader::new(src, ns).read_form().unwrap().unwrap()
    }

    #[test]
    fn arithmetic_and_let() {
        let mut st = fresh_state();
        crate::core::install(&st.current_ns);
        let form = read_one("(let [x 10 y (+ x 5)] (* x y))", &st.current_ns);
        let result = eval(form, NIL, &mut st).unwrap();
        assert_eq!(result, Value::fixnum(150).unwrap());
    }

    #[test]
    fn if_picks_the_right_branch() {
        let mut st = fresh_state();
        crate::core::install(&st.current_ns);
        let form = read_one("(if false 1 2)", &st.current_ns);
        assert_eq!(eval(form, NIL, &mut st).unwrap(), Value::fixnum(2).unwrap());
    }

    #[test]
    fn loop_recur_sums_without_growing_the_stack() {
        let mut st = fresh_state();
        crate::core::install(&st.current_ns);
        let form = read_one(
            "(loop [i 0 acc 0] (if (= i 1000) acc (recur (+ i 1) (+ acc i))))",
            &st.current_ns,
        );
        let result = eval(form, NIL, &mut st).unwrap();
        assert_eq!(result, Value::fixnum(499500).unwrap());
    }

    #[test]
    fn recur_through_a_nested_let_stays_in_the_enclosing_loop() {
        let mut st = fresh_state();
        crate::core::install(&st.current_ns);
        let form = read_one(
            "(loop [i 0] (let [j (inc i)] (if (= j 5) j (recur j))))",
            &st.current_ns,
        );
        let result = eval(form, NIL, &mut st).unwrap();
        assert_eq!(result, Value::fixnum(5).unwrap());
    }

    #[test]
    fn recur_outside_loop_is_an_error() {
        let mut st = fresh_state();
        crate::core::install(&st.current_ns);
        let form = read_one("(recur 1)", &st.current_ns);
        let err = eval(form, NIL, &mut st).unwrap_err();
        assert_eq!(exception::type_name_of(err.value), "RecurPositionError");
    }

    #[test]
    fn try_catch_binds_the_exception() {
        let mut st = fresh_state();
        crate::core::install(&st.current_ns);
        let form = read_one(
            "(try (throw (ex-info \"boom\" {})) (catch Exception e (str \"caught\")))",
            &st.current_ns,
        );
        let result = eval(form, NIL, &mut st).unwrap();
        assert_eq!(crate::collections::string_bytes(result), "caught");
    }
}
