//! Namespace registry (§4.6): process-wide, initialized once. Each
//! namespace owns a persistent map from symbol to bound value; `def` writes
//! into it via copy-on-write `assoc`.

use crate::collections::map;
use crate::memory;
use crate::symbol;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::OnceLock;

/// One namespace's live binding table. The registry is an ordinary
/// `HashMap`, not a hand-rolled intrusive linked list — it gives the same
/// "create on miss, walk all names" behaviour `ns-get-or-create` needs
/// without hand-rolling list links in safe code; see `DESIGN.md`.
struct Namespace {
    bindings: Value, // always a Map
}

fn registry() -> &'static Mutex<HashMap<String, Namespace>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Namespace>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Looks up a namespace by name, creating (and retaining an empty bindings
/// map for) it on first reference.
pub fn ns_get_or_create(name: &str) {
    let mut reg = registry().lock().expect("namespace registry poisoned");
    reg.entry(name.to_owned()).or_insert_with(|| {
        let bindings = map::empty();
        memory::retain(bindings);
        Namespace { bindings }
    });
}

/// Binds `sym` to `value` in namespace `ns`, creating the namespace if
/// needed. Returns the (possibly new) bindings map, replacing the stored
/// one under COW.
pub fn def(ns: &str, sym: Value, value: Value) {
    ns_get_or_create(ns);
    let mut reg = registry().lock().expect("namespace registry poisoned");
    let entry = reg.get_mut(ns).expect("just created above");
    let updated = map::assoc(entry.bindings, sym, value);
    if updated != entry.bindings {
        memory::release(entry.bindings);
    }
    entry.bindings = updated;
}

/// Resolves `sym` within `ns` only (no parent fallback — callers walk the
/// local-env / current-ns / core-ns chain themselves per §4.3.1).
#[must_use]
pub fn resolve(ns: &str, sym: Value) -> Option<Value> {
    let reg = registry().lock().expect("namespace registry poisoned");
    let bindings = reg.get(ns)?.bindings;
    map::get(bindings, sym)
}

#[must_use]
pub fn contains(ns: &str, sym: Value) -> bool {
    resolve(ns, sym).is_some()
}

/// Every namespace name currently registered, for diagnostics/tests.
#[must_use]
pub fn names() -> Vec<String> {
    registry()
        .lock()
        .expect("namespace registry poisoned")
        .keys()
        .cloned()
        .collect()
}

/// Symbol resolution order for a bare (unqualified) symbol: local
/// environment, then the current namespace, then the host `clojure.core`
/// namespace (§4.3.1). The local-environment step happens in `eval`; this
/// helper covers the namespace fallback.
#[must_use]
pub fn resolve_unqualified(current_ns: &str, sym: Value) -> Option<Value> {
    resolve(current_ns, sym).or_else(|| resolve(crate::core::CORE_NS, sym))
}

/// Resolution for an explicitly namespace-qualified symbol `ns/name`.
#[must_use]
pub fn resolve_qualified(sym: Value) -> Option<Value> {
    let ns = symbol::namespace(sym)?;
    let bare = symbol::intern(None, &symbol::name(sym));
    resolve(&ns, bare)
}

pub const DEFAULT_NS: &str = "user";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn def_then_resolve_roundtrips() {
        ns_get_or_create("test.ns.a");
        let sym = symbol::intern(None, "pi-ish");
        def("test.ns.a", sym, Value::fixnum(3).unwrap());
        assert_eq!(resolve("test.ns.a", sym), Value::fixnum(3));
    }

    #[test]
    fn unresolved_symbol_is_none() {
        ns_get_or_create("test.ns.b");
        let sym = symbol::intern(None, "never-bound");
        assert_eq!(resolve("test.ns.b", sym), None);
    }
}
