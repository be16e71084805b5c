//! Core collections: persistent vector, persistent map, singly-linked list,
//! lazy sequence view, and mutable byte array. Equality and copy-on-write
//! mutation are specified in §4.4 of the design document.

pub mod bytes;
pub mod list;
pub mod map;
pub mod seq;
pub mod vector;

use crate::value::Value;

/// Raised by `conj!`/`assoc!`/`persistent!` when called on a transient that
/// has already been finalized (§4.4.3). A guest-catchable condition, not a
/// host bug — distinct from the fatal double-free panic in `memory`.
#[derive(Debug, Clone, Copy)]
pub struct TransientUseAfterPersistent;

/// Structural equality (`equal?`, §4.4.4): reflexive, pointer-identity fast
/// path, then a kind-directed recursive comparison.
#[must_use]
pub fn equal(a: Value, b: Value) -> bool {
    if a == b {
        return true;
    }
    if a.is_nil() || b.is_nil() {
        return a.is_nil() && b.is_nil();
    }
    if let (Some(x), Some(y)) = (a.as_fixnum(), b.as_fixnum()) {
        return x == y;
    }
    if a.is_number() && b.is_number() {
        // A fixnum equals a fixed-point only if they encode the same real
        // value exactly (§4.4.4): compare via the raw Q16.13 scale so that
        // the comparison is exact, not float-approximate.
        let scale = (1i64 << crate::value::FIXED_FRAC_BITS) as i64;
        let raw = |v: Value| -> Option<i64> {
            if let Some(n) = v.as_fixnum() {
                Some(n * scale)
            } else {
                v.as_fixed_raw()
            }
        };
        return match (raw(a), raw(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        };
    }
    if let (Some(x), Some(y)) = (a.as_char(), b.as_char()) {
        return x == y;
    }
    use crate::memory::Kind;

    // Lists, vectors and seqs are all "sequential": Clojure considers them
    // equal to one another when their elements match pairwise (e.g.
    // `(= '(1 2) [1 2])`), not only to same-kind peers.
    if is_sequential(a) && is_sequential(b) {
        let xa = sequential_items(a);
        let xb = sequential_items(b);
        return xa.len() == xb.len() && xa.iter().zip(&xb).all(|(x, y)| equal(*x, *y));
    }

    let (Some(ka), Some(kb)) = (crate::memory::kind_of(a), crate::memory::kind_of(b)) else {
        return false;
    };
    if ka != kb {
        return false;
    }
    match ka {
        Kind::String => string_bytes(a) == string_bytes(b),
        Kind::Map | Kind::TransientMap => map::equal(a, b),
        Kind::ByteArray => bytes::as_slice(a) == bytes::as_slice(b),
        // Symbols, functions and exceptions compare by identity only
        // (already handled by `a == b` above).
        Kind::Symbol | Kind::FunctionNative | Kind::FunctionInterp | Kind::Exception => false,
        Kind::Vector | Kind::TransientVector | Kind::List | Kind::Seq => unreachable!(
            "handled by the sequential-equality branch above"
        ),
    }
}

fn is_sequential(v: Value) -> bool {
    if v.is_nil() {
        return true;
    }
    matches!(
        crate::memory::kind_of(v),
        Some(crate::memory::Kind::Vector)
            | Some(crate::memory::Kind::TransientVector)
            | Some(crate::memory::Kind::List)
            | Some(crate::memory::Kind::Seq)
    )
}

/// Public form of [`sequential_items`], for callers outside this module
/// (e.g. quasiquote's `splice-unquote`) that need to walk a vector, list,
/// seq, or `nil` uniformly.
#[must_use]
pub fn sequential_values(v: Value) -> Vec<Value> {
    if is_sequential(v) {
        sequential_items(v)
    } else {
        Vec::new()
    }
}

fn sequential_items(v: Value) -> Vec<Value> {
    if v.is_nil() {
        return Vec::new();
    }
    match crate::memory::kind_of(v) {
        Some(crate::memory::Kind::Vector) | Some(crate::memory::Kind::TransientVector) => {
            vector::items(v)
        }
        Some(crate::memory::Kind::List) => list::items(v),
        Some(crate::memory::Kind::Seq) => seq::items(v),
        _ => panic!("not sequential"),
    }
}

pub(crate) fn string_bytes(v: Value) -> String {
    crate::memory::with_data(v, |d| match d {
        crate::memory::HeapData::Str(s) => s.clone(),
        _ => panic!("not a string"),
    })
}
