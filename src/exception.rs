//! Exception protocol (§4.5, §7): a typed escape value plus a per-`EvalState`
//! stack of handler frames recording a resumption point, the pool depth at
//! entry, and a type filter.

use crate::memory::{self, HeapData, Kind, PoolStack};
use crate::value::{Value, NIL};

pub(crate) struct ExceptionData {
    pub type_name: String,
    pub message: String,
    pub file: String,
    pub line: usize,
    pub column: usize,
    /// Arbitrary payload attached via `ex-info`; `nil` if none.
    pub data: Value,
}

/// Every non-local exit from `eval` carries one of these. Host-fatal bugs
/// (double free, pool LIFO violation, OOM) remain Rust panics (§7) and never
/// reach this type.
pub struct ClojureException {
    pub value: Value,
}

impl ClojureException {
    #[must_use]
    pub fn type_name(&self) -> String {
        memory::with_data(self.value, |d| match d {
            HeapData::Exception(e) => e.type_name.clone(),
            _ => "UserThrow".to_string(),
        })
    }
}

/// Every constructor below (`make`/`simple`) hands back a freshly retained
/// `value`, and every call site that builds a `ClojureException` does so from
/// an already-owned `Value` (an eval result, a fresh allocation) — so the
/// exception owns exactly one reference, released here the same way `Pool`
/// releases its members.
impl Drop for ClojureException {
    fn drop(&mut self) {
        memory::release(self.value);
    }
}

/// Allocates an exception value. Retains `data`.
#[must_use]
pub fn make(type_name: &str, message: &str, file: &str, line: usize, column: usize, data: Value) -> Value {
    memory::retain(data);
    memory::alloc(
        Kind::Exception,
        HeapData::Exception(ExceptionData {
            type_name: type_name.to_string(),
            message: message.to_string(),
            file: file.to_string(),
            line,
            column,
            data,
        }),
    )
}

/// Convenience for host-raised errors with no source position and no
/// `ex-info` payload.
#[must_use]
pub fn simple(type_name: &str, message: impl Into<String>) -> Value {
    make(type_name, &message.into(), "", 0, 0, NIL)
}

#[must_use]
pub fn type_name_of(v: Value) -> String {
    memory::with_data(v, |d| match d {
        HeapData::Exception(e) => e.type_name.clone(),
        _ => panic!("not an exception"),
    })
}

#[must_use]
pub fn message_of(v: Value) -> String {
    memory::with_data(v, |d| match d {
        HeapData::Exception(e) => e.message.clone(),
        _ => panic!("not an exception"),
    })
}

#[must_use]
pub fn data_of(v: Value) -> Value {
    memory::with_data(v, |d| match d {
        HeapData::Exception(e) => e.data,
        _ => panic!("not an exception"),
    })
}

/// One active `(try ...)` frame: which exception type names it accepts, and
/// how deep the pool stack was when the frame was entered (§4.5).
struct HandlerFrame {
    accepts: Vec<String>,
    pool_depth: usize,
}

/// Per-`EvalState` handler stack, scoped to one evaluation context rather
/// than process-wide, so that the "each thread gets its own `EvalState`,
/// share no heap values" policy of §5 also applies cleanly to in-flight
/// exception handling.
#[derive(Default)]
pub struct HandlerStack {
    frames: Vec<HandlerFrame>,
}

impl HandlerStack {
    #[must_use]
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    /// Pushes a frame accepting any of `accepts` (empty means "accept
    /// anything", used for a catch-all `catch Exception`).
    pub fn push(&mut self, accepts: Vec<String>, pool_depth: usize) {
        self.frames.push(HandlerFrame { accepts, pool_depth });
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Finds the nearest frame (top to bottom) whose filter accepts
    /// `type_name`, without popping it. Returns the frame's recorded pool
    /// depth so the caller can unwind pools above it.
    #[must_use]
    fn find_handler(&self, type_name: &str) -> Option<(usize, usize)> {
        self.frames.iter().enumerate().rev().find_map(|(i, f)| {
            (f.accepts.is_empty() || f.accepts.iter().any(|t| t == type_name))
                .then_some((i, f.pool_depth))
        })
    }

    /// Unwinds the frame stack down to (and including) the matching frame,
    /// draining every pool above its recorded depth, per §4.5. Returns
    /// `true` if a handler was found.
    pub fn unwind_to_handler(&mut self, type_name: &str, pools: &mut PoolStack) -> bool {
        let Some((index, pool_depth)) = self.find_handler(type_name) else {
            return false;
        };
        self.frames.truncate(index + 1);
        pools.unwind_to(pool_depth);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_stack_finds_matching_type() {
        let mut stack = HandlerStack::new();
        let mut pools = PoolStack::new();
        stack.push(vec!["ArityError".to_string()], 0);
        stack.push(vec!["TypeError".to_string()], 0);
        assert!(stack.unwind_to_handler("TypeError", &mut pools));
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn catch_all_frame_accepts_anything() {
        let mut stack = HandlerStack::new();
        let mut pools = PoolStack::new();
        stack.push(Vec::new(), 0);
        assert!(stack.unwind_to_handler("AnythingAtAll", &mut pools));
    }

    #[test]
    fn no_matching_frame_returns_false() {
        let mut stack = HandlerStack::new();
        let mut pools = PoolStack::new();
        stack.push(vec!["ArityError".to_string()], 0);
        assert!(!stack.unwind_to_handler("TypeError", &mut pools));
        assert_eq!(stack.depth(), 1);
    }
}
