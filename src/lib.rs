//! Tiny-Clj: an embeddable interpreter for a Clojure-like Lisp dialect.
//!
//! [`EvalState`] is the host's single entry point: it owns the current
//! namespace, the exception handler stack, and the autorelease-pool stack
//! that everything else in this crate is threaded through.

pub mod collections;
mod core;
mod eval;
mod exception;
mod memory;
mod namespace;
pub mod printer;
pub mod reader;
mod symbol;
pub mod value;

use value::{Value, NIL};

pub use exception::ClojureException;
pub use printer::print;
pub use value::Value;

/// Tunable knobs threaded through an [`EvalState`] (§4.8). All fields are
/// `Copy` so overriding one means building a whole new config, options
/// taken up front rather than mutating global state mid-evaluation.
#[derive(Debug, Clone, Copy)]
pub struct EvalConfig {
    /// Reductions remaining before `BudgetExceeded`; `None` is unbounded.
    pub step_budget: Option<u64>,
    /// Non-tail Rust recursion depth (argument evaluation, `if` tests, `let`
    /// value forms) at which the evaluator raises `BudgetExceeded` rather
    /// than risking a Rust stack overflow. Tail position (`recur`, function
    /// tail calls) is exempt — it trampolines and never recurses.
    pub max_depth: usize,
    /// Fractional bits of the fixed-point encoding; reserved for hosts that
    /// need to confirm the build they're embedding against (always 13 in
    /// this build — see [`value::FIXED_FRAC_BITS`]).
    pub fixed_frac_bits: u32,
    /// Namespace a fresh `EvalState` starts in.
    pub default_ns: &'static str,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            step_budget: None,
            max_depth: 4096,
            fixed_frac_bits: value::FIXED_FRAC_BITS,
            default_ns: namespace::DEFAULT_NS,
        }
    }
}

/// One evaluation context (§4.3, §5): current namespace, handler stack, pool
/// stack, and step budget. Never share a single `EvalState` across threads;
/// give each thread its own.
pub struct EvalState {
    pub(crate) current_ns: String,
    pub(crate) handlers: exception::HandlerStack,
    pub(crate) pools: memory::PoolStack,
    config: EvalConfig,
    steps_remaining: Option<u64>,
    /// The value last returned to the host by `eval_string`, retained here
    /// so the handle stays valid after the call returns. Released the next
    /// time `eval_string` succeeds, or when this `EvalState` drops — the
    /// host never sees a bare, ownerless `Value` it would have no public way
    /// to release itself.
    last_result: Value,
}

impl EvalState {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EvalConfig::default())
    }

    #[must_use]
    pub fn with_config(config: EvalConfig) -> Self {
        namespace::ns_get_or_create(config.default_ns);
        Self {
            current_ns: config.default_ns.to_string(),
            handlers: exception::HandlerStack::new(),
            pools: memory::PoolStack::new(),
            steps_remaining: config.step_budget,
            config,
            last_result: NIL,
        }
    }

    #[must_use]
    pub fn current_ns(&self) -> &str {
        &self.current_ns
    }

    pub(crate) fn max_depth(&self) -> usize {
        self.config.max_depth
    }

    /// Switches the namespace new top-level reads/evals resolve and `def`
    /// into, creating it if this is its first reference.
    pub fn set_current_ns(&mut self, name: &str) {
        namespace::ns_get_or_create(name);
        self.current_ns = name.to_string();
    }

    /// Decrements the step budget, if one is configured, raising
    /// `BudgetExceeded` once exhausted (§4.3.6). Called once per reduction
    /// by the evaluator's trampoline.
    pub(crate) fn tick(&mut self) -> Result<(), ClojureException> {
        let Some(remaining) = self.steps_remaining.as_mut() else {
            return Ok(());
        };
        if *remaining == 0 {
            return Err(ClojureException {
                value: exception::simple("BudgetExceeded", "evaluation step budget exhausted"),
            });
        }
        *remaining -= 1;
        Ok(())
    }

    /// Installs the native `clojure.core` functions and evaluates the
    /// built-in `defn`-based source library into `clojure.core` (§6.1). Per
    /// form failures are logged and skipped rather than aborting the rest
    /// of bootstrap ("catch and continue", §9).
    pub fn load_core(&mut self) {
        core::install(core::CORE_NS);
        let saved_ns = std::mem::replace(&mut self.current_ns, core::CORE_NS.to_string());
        namespace::ns_get_or_create(&self.current_ns);
        match reader::read_all(core::CORE_SOURCE, &self.current_ns) {
            Ok(forms) => {
                for form in forms {
                    match eval::eval(form, NIL, self) {
                        Ok(v) => memory::release(v),
                        Err(e) => log::warn!("load_core: form failed: {}", e.type_name()),
                    }
                }
            }
            Err(err) => log::warn!("load_core: failed to read core source: {err}"),
        }
        self.current_ns = saved_ns;
    }

    /// Reads and evaluates one top-level form from `source` against the
    /// current namespace (§6.1). Reader errors are surfaced as
    /// `ReaderError`/`IncompleteInputError` exceptions, matching every other
    /// evaluation failure's shape.
    pub fn eval_string(&mut self, source: &str) -> Result<Value, ClojureException> {
        let ns = self.current_ns.clone();
        let form = {
            let mut r = reader::Reader::new(source, &ns);
            r.read_form().map_err(reader_error_to_exception)?
        };
        let Some(form) = form else { return Ok(NIL) };
        let result = eval::eval(form, NIL, self)?;
        memory::release(self.last_result);
        self.last_result = result;
        Ok(result)
    }

    /// Evaluates every complete top-level form in `source`, logging (but
    /// not raising) each per-form failure, and returns whether all forms
    /// succeeded (§6.1).
    pub fn eval_multiline(&mut self, source: &str) -> bool {
        let ns = self.current_ns.clone();
        let forms = match reader::read_all(source, &ns) {
            Ok(forms) => forms,
            Err(err) => {
                log::error!("eval_multiline: {err}");
                return false;
            }
        };
        let mut all_ok = true;
        for form in forms {
            match eval::eval(form, NIL, self) {
                Ok(v) => memory::release(v),
                Err(e) => {
                    log::error!("eval_multiline: {}", print(e.value));
                    all_ok = false;
                }
            }
        }
        all_ok
    }
}

impl Default for EvalState {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EvalState {
    fn drop(&mut self) {
        // Every well-behaved evaluation pushes and pops its own pools in
        // LIFO order; if one is still open here (a panic mid-evaluation
        // unwound past its guard) drain it rather than leaking silently.
        while self.pools.depth() > 0 {
            self.pools.unwind_to(self.pools.depth() - 1);
        }
        memory::release(self.last_result);
    }
}

fn reader_error_to_exception(err: reader::Error) -> ClojureException {
    let (type_name, message) = match &err {
        reader::Error::Reader { message, .. } => ("ReaderError", message.clone()),
        reader::Error::Incomplete { message, .. } => ("IncompleteInputError", message.clone()),
    };
    ClojureException {
        value: exception::simple(type_name, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_string_runs_a_single_form_against_a_loaded_core() {
        let mut st = EvalState::new();
        st.load_core();
        let result = st.eval_string("(+ 1 2 3)").unwrap();
        assert_eq!(print(result), "6");
    }

    #[test]
    fn eval_multiline_evaluates_every_form_and_reports_failure() {
        let mut st = EvalState::new();
        st.load_core();
        assert!(st.eval_multiline("(def x 1) (def y 2)"));
        assert!(!st.eval_multiline("(undefined-symbol)"));
    }

    #[test]
    fn step_budget_is_enforced() {
        let mut st = EvalState::with_config(EvalConfig {
            step_budget: Some(1),
            ..EvalConfig::default()
        });
        st.load_core();
        let err = st.eval_string("(+ 1 2)").unwrap_err();
        assert_eq!(err.type_name(), "BudgetExceeded");
    }

    #[test]
    fn incomplete_input_is_reported_as_its_own_exception_type() {
        let mut st = EvalState::new();
        let err = st.eval_string("(+ 1 2").unwrap_err();
        assert_eq!(err.type_name(), "IncompleteInputError");
    }
}
