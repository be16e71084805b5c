//! Reference counting, heap object headers, and the autorelease-pool stack.
//!
//! A small header-plus-payload object: the header (`kind`, `refcount`) is
//! shared by every heap [`Value`] and the payload varies by [`Kind`].
//!
//! # Double-free detection without use-after-free
//!
//! A fatal diagnostic is required when a non-singleton's refcount is
//! decremented below zero. A literal C-style `free()` would make that check
//! itself undefined behaviour (the memory backing the refcount field may
//! already be gone). Instead, when a [`HeapObject`]'s refcount hits
//! zero we release its children, replace its payload with [`HeapData::Freed`]
//! (dropping the real payload and reclaiming *that* memory), and leave the
//! header allocation itself alive with its refcount set to a tombstone
//! sentinel. A further `release` on the same pointer reads a live, valid
//! header and can safely report the double free as fatal. The cost is a
//! small, bounded per-object header leak — an explicit trade of a few words
//! of memory for the absence of undefined behaviour.

use crate::collections::bytes::BytesData;
use crate::collections::map::MapData;
use crate::collections::seq::SeqData;
use crate::collections::vector::VectorData;
use crate::eval::{InterpFnData, NativeFnData};
use crate::exception::ExceptionData;
use crate::symbol::SymbolData;
use crate::value::Value;
use num_enum::TryFromPrimitive;
use std::cell::{Cell, RefCell};

/// Refcount value written into a header once its payload has been released.
/// Distinct from the singleton sentinel (`0`) so the two cases are never
/// confused.
const TOMBSTONE: i32 = i32::MIN;

/// Discriminant for a heap object's payload kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u16)]
pub enum Kind {
    String = 0,
    Vector = 1,
    Map = 2,
    List = 3,
    Seq = 4,
    Symbol = 5,
    FunctionNative = 6,
    FunctionInterp = 7,
    Exception = 8,
    ByteArray = 9,
    TransientVector = 10,
    TransientMap = 11,
}

pub(crate) enum HeapData {
    /// Tombstone left behind once a non-singleton object's refcount reaches
    /// zero; see the module docs.
    Freed,
    Str(String),
    Vector(VectorData),
    Map(MapData),
    /// Cons cell: `(head, tail)`. The empty list is `nil`, never a heap cell.
    List(Value, Value),
    Seq(SeqData),
    Symbol(SymbolData),
    FunctionNative(NativeFnData),
    FunctionInterp(InterpFnData),
    Exception(ExceptionData),
    ByteArray(BytesData),
    TransientVector(VectorData),
    TransientMap(MapData),
}

#[repr(align(8))]
pub(crate) struct HeapObject {
    pub kind: Kind,
    refcount: Cell<i32>,
    pub data: RefCell<HeapData>,
}

impl HeapObject {
    fn is_singleton(&self) -> bool {
        self.refcount.get() == 0
    }
}

/// Allocates a new heap object with the given payload and refcount 1.
pub(crate) fn alloc(kind: Kind, data: HeapData) -> Value {
    let obj = Box::new(HeapObject {
        kind,
        refcount: Cell::new(1),
        data: RefCell::new(data),
    });
    let ptr = Box::into_raw(obj);
    log::trace!("alloc {:?} @ {:p} rc=1", kind, ptr);
    Value::from_heap(ptr)
}

/// Leaks a heap object forever with refcount 0 (a static singleton, e.g. the
/// empty vector/map). Never call `release` enough times to matter: the
/// singleton check makes every release on it a no-op.
pub(crate) fn alloc_singleton(kind: Kind, data: HeapData) -> Value {
    let obj: &'static mut HeapObject = Box::leak(Box::new(HeapObject {
        kind,
        refcount: Cell::new(0),
        data: RefCell::new(data),
    }));
    Value::from_heap(obj as *mut HeapObject)
}

#[inline]
fn header(v: Value) -> Option<&'static HeapObject> {
    v.as_heap().map(|ptr| unsafe { &*ptr })
}

/// Returns the discriminant of a heap value's payload kind, if any.
#[must_use]
pub fn kind_of(v: Value) -> Option<Kind> {
    header(v).map(|h| h.kind)
}

/// Current refcount, for diagnostics/tests. Singletons read as `0`.
#[must_use]
pub(crate) fn refcount(v: Value) -> Option<i32> {
    header(v).map(|h| h.refcount.get())
}

/// Whether `v` is a heap value with exactly one owner, i.e. safe to mutate
/// in place under copy-on-write rules (§4.4). Singletons (refcount 0, shared
/// by definition) are never uniquely owned.
#[must_use]
pub(crate) fn is_uniquely_owned(v: Value) -> bool {
    refcount(v) == Some(1)
}

/// Borrows the payload of a heap value for the duration of `f`. Panics if
/// `v` is not a heap value or was already freed.
pub(crate) fn with_data<R>(v: Value, f: impl FnOnce(&HeapData) -> R) -> R {
    let h = header(v).expect("with_data on non-heap value");
    let data = h.data.borrow();
    assert!(!matches!(&*data, HeapData::Freed), "use after free");
    f(&data)
}

/// Mutably borrows the payload of a heap value for the duration of `f`.
/// Used by transient mutation and by in-place COW updates.
pub(crate) fn with_data_mut<R>(v: Value, f: impl FnOnce(&mut HeapData) -> R) -> R {
    let h = header(v).expect("with_data_mut on non-heap value");
    let mut data = h.data.borrow_mut();
    assert!(!matches!(&*data, HeapData::Freed), "use after free");
    f(&mut data)
}

/// Increments the refcount of a heap value. No-op on immediates and on
/// static singletons.
pub fn retain(v: Value) -> Value {
    if let Some(h) = header(v) {
        let rc = h.refcount.get();
        if rc == TOMBSTONE {
            panic!("use-after-free: retain on a released {:?}", h.kind);
        }
        if rc != 0 {
            h.refcount.set(rc + 1);
            log::trace!("retain {:?} rc={}", h.kind, rc + 1);
        }
    }
    v
}

/// Decrements the refcount of a heap value, freeing it (and releasing its
/// owned children) when it reaches zero. No-op on immediates and on static
/// singletons. Fatal if the value was already freed.
pub fn release(v: Value) {
    let Some(h) = header(v) else { return };
    let rc = h.refcount.get();
    if rc == 0 {
        return; // static singleton, immune
    }
    if rc == TOMBSTONE {
        panic!("double free detected on heap object of kind {:?}", h.kind);
    }
    debug_assert!(rc > 0, "corrupt refcount {rc} for kind {:?}", h.kind);
    let new_rc = rc - 1;
    if new_rc == 0 {
        log::trace!("free {:?} rc=0", h.kind);
        release_children(h);
        h.data.replace(HeapData::Freed);
        h.refcount.set(TOMBSTONE);
    } else {
        h.refcount.set(new_rc);
        log::trace!("release {:?} rc={}", h.kind, new_rc);
    }
}

/// Releases every `Value` owned by this object's payload. Called exactly
/// once, right before the payload is replaced with [`HeapData::Freed`].
fn release_children(h: &HeapObject) {
    match &*h.data.borrow() {
        HeapData::Vector(v) | HeapData::TransientVector(v) => {
            for item in &v.items {
                release(*item);
            }
        }
        HeapData::Map(m) | HeapData::TransientMap(m) => {
            for (k, val) in &m.entries {
                release(*k);
                release(*val);
            }
        }
        HeapData::List(head, tail) => {
            release(*head);
            release(*tail);
        }
        HeapData::Seq(s) => release(s.source),
        HeapData::FunctionInterp(f) => {
            for p in &f.params {
                release(*p);
            }
            for form in &f.body {
                release(*form);
            }
            release(f.env);
            if let Some(name) = f.name {
                release(name);
            }
        }
        HeapData::Exception(e) => release(e.data),
        HeapData::Symbol(_) | HeapData::FunctionNative(_) | HeapData::Str(_)
        | HeapData::ByteArray(_) | HeapData::Freed => {}
    }
}

/// A single autorelease scope: a flat list of non-owning pointers whose
/// release is deferred until the scope drains.
#[derive(Default)]
pub(crate) struct Pool {
    entries: Vec<Value>,
}

/// The per-[`crate::EvalState`] stack of autorelease pools.
#[derive(Default)]
pub struct PoolStack {
    pools: Vec<Pool>,
}

/// Opaque handle returned by [`PoolStack::push`]; pops must be LIFO and
/// match the push that produced the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolHandle(usize);

impl PoolStack {
    #[must_use]
    pub fn new() -> Self {
        Self { pools: Vec::new() }
    }

    pub fn push(&mut self) -> PoolHandle {
        self.pools.push(Pool::default());
        PoolHandle(self.pools.len() - 1)
    }

    /// Records `v` in the top pool and returns it unchanged. Does not touch
    /// the refcount.
    pub fn autorelease(&mut self, v: Value) -> Value {
        if let Some(top) = self.pools.last_mut() {
            top.entries.push(v);
        }
        v
    }

    /// Releases every value recorded in the pool identified by `handle`, in
    /// reverse order, then destroys it. Panics if `handle` is not the
    /// current top of stack (LIFO violation).
    pub fn pop(&mut self, handle: PoolHandle) {
        assert_eq!(
            handle.0 + 1,
            self.pools.len(),
            "autorelease pool popped out of LIFO order"
        );
        let pool = self.pools.pop().expect("handle validated above");
        log::trace!("pool_pop draining {} values", pool.entries.len());
        for v in pool.entries.into_iter().rev() {
            release(v);
        }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.pools.len()
    }

    /// Drains every pool above (and including) `depth`, used when unwinding
    /// to a `try` handler frame (see [`crate::exception`]).
    pub(crate) fn unwind_to(&mut self, depth: usize) {
        while self.pools.len() > depth {
            let pool = self.pools.pop().expect("len checked above");
            for v in pool.entries.into_iter().rev() {
                release(v);
            }
        }
    }
}

/// RAII wrapper over [`PoolStack::push`]/[`PoolStack::pop`]: pushes on
/// construction, pops on `Drop`. The idiomatic Rust surface over the
/// dynamically-scoped pool contract.
pub struct PoolGuard<'a> {
    stack: &'a mut PoolStack,
    handle: PoolHandle,
}

impl<'a> PoolGuard<'a> {
    pub fn new(stack: &'a mut PoolStack) -> Self {
        let handle = stack.push();
        Self { stack, handle }
    }

    pub fn autorelease(&mut self, v: Value) -> Value {
        self.stack.autorelease(v)
    }
}

impl Drop for PoolGuard<'_> {
    fn drop(&mut self) {
        self.stack.pop(self.handle);
    }
}

/// Runs `f` with a freshly pushed pool, draining it on return (or on
/// propagated exception, since `f` returns a `Result`).
pub fn with_pool<T, E>(
    stack: &mut PoolStack,
    f: impl FnOnce(&mut PoolStack) -> Result<T, E>,
) -> Result<T, E> {
    let mut guard = PoolGuard::new(stack);
    f(guard.stack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::vector;

    #[test]
    fn retain_release_roundtrip() {
        let v = vector::empty();
        let v = vector::conj(v, Value::fixnum(1).unwrap());
        retain(v);
        assert_eq!(refcount(v), Some(2));
        release(v);
        assert_eq!(refcount(v), Some(1));
        release(v);
    }

    #[test]
    fn double_free_is_fatal() {
        let v = vector::conj(vector::empty(), Value::fixnum(1).unwrap());
        release(v);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| release(v)));
        assert!(result.is_err());
    }

    #[test]
    fn singleton_survives_any_releases() {
        let empty = vector::empty();
        assert_eq!(refcount(empty), Some(0));
        for _ in 0..10 {
            release(empty);
        }
        assert_eq!(refcount(empty), Some(0));
    }

    #[test]
    fn pool_lifo_drains_in_reverse() {
        let mut stack = PoolStack::new();
        let h1 = stack.push();
        let a = vector::conj(vector::empty(), Value::fixnum(1).unwrap());
        stack.autorelease(a);
        assert_eq!(refcount(a), Some(1));
        stack.pop(h1);
        // refcount read is unreliable post-free (tombstoned); just assert no
        // panic and that a second, mismatched pop is rejected.
        let h2 = stack.push();
        let _h3 = stack.push();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            stack.pop(h2);
        }));
        assert!(result.is_err());
    }
}
