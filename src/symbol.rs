//! Global symbol interning (§4.6): a process-wide table keyed by
//! `(namespace, name)`, so that two reads of the same qualified name always
//! yield the same heap pointer and the evaluator can compare symbols by
//! pointer identity.

use crate::memory::{self, HeapData, Kind};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::OnceLock;

/// Symbols are capped to 32 bytes (§3.3); longer names are a reader error,
/// not a panic here.
pub const MAX_NAME_LEN: usize = 32;

pub(crate) struct SymbolData {
    pub namespace: Option<String>,
    pub name: String,
}

type InternKey = (Option<String>, String);

fn table() -> &'static Mutex<HashMap<InternKey, Value>> {
    static TABLE: OnceLock<Mutex<HashMap<InternKey, Value>>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Interns `(namespace, name)`, allocating on first use. The table owns one
/// retained reference to every symbol it holds, so interned symbols live for
/// the life of the process — an "allocated once" bootstrap contract (§4.6).
#[must_use]
pub fn intern(namespace: Option<&str>, name: &str) -> Value {
    let key: InternKey = (namespace.map(str::to_owned), name.to_owned());
    let mut table = table().lock().expect("symbol table poisoned");
    if let Some(existing) = table.get(&key) {
        return *existing;
    }
    let sym = memory::alloc(
        Kind::Symbol,
        HeapData::Symbol(SymbolData {
            namespace: key.0.clone(),
            name: key.1.clone(),
        }),
    );
    table.insert(key, sym);
    sym
}

#[must_use]
pub fn namespace(v: Value) -> Option<String> {
    memory::with_data(v, |d| match d {
        HeapData::Symbol(s) => s.namespace.clone(),
        _ => panic!("not a symbol"),
    })
}

#[must_use]
pub fn name(v: Value) -> String {
    memory::with_data(v, |d| match d {
        HeapData::Symbol(s) => s.name.clone(),
        _ => panic!("not a symbol"),
    })
}

/// Qualified printed form, `ns/name` or bare `name` for the null namespace.
#[must_use]
pub fn qualified_name(v: Value) -> String {
    memory::with_data(v, |d| match d {
        HeapData::Symbol(s) => match &s.namespace {
            Some(ns) => format!("{ns}/{}", s.name),
            None => s.name.clone(),
        },
        _ => panic!("not a symbol"),
    })
}

/// Every static bootstrap symbol the evaluator and core library dispatch on
/// by pointer identity (§4.6). Resolved once, at [`crate::EvalState::new`]
/// time, via `load_core`'s reader pass — interning is idempotent so it is
/// safe to call this more than once.
pub const SPECIAL_FORMS: &[&str] = &[
    "def", "defn", "fn", "let", "if", "do", "quote", "quasiquote", "unquote",
    "splice-unquote", "loop", "recur", "try", "catch", "finally", "throw", "ns",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_pointer_stable() {
        let a = intern(None, "foo");
        let b = intern(None, "foo");
        assert_eq!(a, b);
        let c = intern(Some("user"), "foo");
        assert_ne!(a, c);
    }

    #[test]
    fn namespace_and_name_roundtrip() {
        let s = intern(Some("clojure.core"), "inc");
        assert_eq!(namespace(s).as_deref(), Some("clojure.core"));
        assert_eq!(name(s), "inc");
        assert_eq!(qualified_name(s), "clojure.core/inc");
    }

    #[test]
    fn unqualified_symbol_has_no_namespace() {
        let s = intern(None, "bar");
        assert_eq!(namespace(s), None);
        assert_eq!(qualified_name(s), "bar");
    }
}
