//! Persistent vector (§3.3, §4.4.2).
//!
//! Backed by a `Vec<Value>` rather than a hand-rolled inline array — the
//! safe Rust equivalent, since alternate internal representations are fine
//! as long as the COW contract and §8 properties hold. Capacity growth
//! still doubles, giving the same amortized O(1) append.

use crate::memory::{self, HeapData, Kind};
use crate::value::Value;
use std::sync::OnceLock;

pub(crate) struct VectorData {
    pub items: Vec<Value>,
    pub mutable: bool,
}

fn empty_singleton() -> Value {
    static EMPTY: OnceLock<Value> = OnceLock::new();
    *EMPTY.get_or_init(|| {
        memory::alloc_singleton(
            Kind::Vector,
            HeapData::Vector(VectorData {
                items: Vec::new(),
                mutable: false,
            }),
        )
    })
}

/// The shared empty-vector singleton (refcount 0, never freed).
#[must_use]
pub fn empty() -> Value {
    empty_singleton()
}

#[must_use]
pub fn count(v: Value) -> usize {
    memory::with_data(v, |d| match d {
        HeapData::Vector(vd) | HeapData::TransientVector(vd) => vd.items.len(),
        _ => panic!("not a vector"),
    })
}

#[must_use]
pub fn nth(v: Value, index: usize) -> Option<Value> {
    memory::with_data(v, |d| match d {
        HeapData::Vector(vd) | HeapData::TransientVector(vd) => vd.items.get(index).copied(),
        _ => panic!("not a vector"),
    })
}

#[must_use]
pub fn items(v: Value) -> Vec<Value> {
    memory::with_data(v, |d| match d {
        HeapData::Vector(vd) | HeapData::TransientVector(vd) => vd.items.clone(),
        _ => panic!("not a vector"),
    })
}

/// Builds a fresh persistent vector retaining every element.
#[must_use]
pub fn from_items(items: impl IntoIterator<Item = Value>) -> Value {
    let items: Vec<Value> = items.into_iter().collect();
    if items.is_empty() {
        return empty();
    }
    for it in &items {
        memory::retain(*it);
    }
    memory::alloc(
        Kind::Vector,
        HeapData::Vector(VectorData {
            items,
            mutable: false,
        }),
    )
}

/// Appends `item` at `count`, growing by doubling. Copy-on-write: mutates
/// in place when `v` is uniquely owned, otherwise allocates a fresh vector
/// (§4.4.2).
#[must_use]
pub fn conj(v: Value, item: Value) -> Value {
    memory::retain(item);
    if v != empty() && memory::is_uniquely_owned(v) {
        memory::with_data_mut(v, |d| {
            let HeapData::Vector(vd) = d else {
                panic!("not a vector")
            };
            vd.items.push(item);
        });
        return v;
    }
    let mut new_items = items(v);
    for it in &new_items {
        memory::retain(*it);
    }
    new_items.push(item);
    memory::alloc(
        Kind::Vector,
        HeapData::Vector(VectorData {
            items: new_items,
            mutable: false,
        }),
    )
}

/// Sets the element at `index`, following the same COW rule as `conj`.
/// Out-of-bounds raises `IndexOutOfBoundsException` at the call site (see
/// `crate::core`).
#[must_use]
pub fn assoc(v: Value, index: usize, value: Value) -> Option<Value> {
    if index >= count(v) {
        return None;
    }
    memory::retain(value);
    if memory::is_uniquely_owned(v) {
        memory::with_data_mut(v, |d| {
            let HeapData::Vector(vd) = d else {
                panic!("not a vector")
            };
            let old = vd.items[index];
            vd.items[index] = value;
            memory::release(old);
        });
        return Some(v);
    }
    let mut new_items = items(v);
    for (i, it) in new_items.iter().enumerate() {
        if i != index {
            memory::retain(*it);
        }
    }
    new_items[index] = value;
    Some(memory::alloc(
        Kind::Vector,
        HeapData::Vector(VectorData {
            items: new_items,
            mutable: false,
        }),
    ))
}

/// Drops the last element, releasing it. `None` if empty.
#[must_use]
pub fn pop(v: Value) -> Option<Value> {
    let n = count(v);
    if n == 0 {
        return None;
    }
    if memory::is_uniquely_owned(v) {
        memory::with_data_mut(v, |d| {
            let HeapData::Vector(vd) = d else {
                panic!("not a vector")
            };
            if let Some(last) = vd.items.pop() {
                memory::release(last);
            }
        });
        return Some(v);
    }
    let mut new_items = items(v);
    new_items.pop().expect("count checked above"); // stays owned by `v`, untouched
    for it in &new_items {
        memory::retain(*it);
    }
    Some(if new_items.is_empty() {
        empty()
    } else {
        memory::alloc(
            Kind::Vector,
            HeapData::Vector(VectorData {
                items: new_items,
                mutable: false,
            }),
        )
    })
}

/// Always returns a fresh copy (no structural sharing, per §4.4.2).
#[must_use]
pub fn subvec(v: Value, start: usize, end: usize) -> Option<Value> {
    let all = items(v);
    if start > end || end > all.len() {
        return None;
    }
    Some(from_items(all[start..end].iter().copied()))
}

#[must_use]
pub fn transient(v: Value) -> Value {
    let cloned = items(v);
    for it in &cloned {
        memory::retain(*it);
    }
    memory::alloc(
        Kind::TransientVector,
        HeapData::TransientVector(VectorData {
            items: cloned,
            mutable: true,
        }),
    )
}

/// Mutates a transient in place, returning its identity (§4.4.3). Errors if
/// `persistent!` already finalized this transient.
pub fn conj_bang(
    t: Value,
    item: Value,
) -> Result<Value, crate::collections::TransientUseAfterPersistent> {
    memory::with_data(t, |d| {
        let HeapData::TransientVector(vd) = d else {
            panic!("not a transient vector")
        };
        if !vd.mutable {
            return Err(crate::collections::TransientUseAfterPersistent);
        }
        Ok(())
    })?;
    memory::retain(item);
    memory::with_data_mut(t, |d| {
        let HeapData::TransientVector(vd) = d else {
            panic!("not a transient vector")
        };
        vd.items.push(item);
    });
    Ok(t)
}

/// Finalizes a transient into a fresh persistent vector. The transient
/// object itself is left behind, marked immutable (§4.4.3): it still owes
/// its caller one ordinary `release`, same as any other value, but any
/// further `conj!`/`assoc!`/`persistent!` on it is a catchable error rather
/// than a use-after-free.
pub fn persistent_bang(
    t: Value,
) -> Result<Value, crate::collections::TransientUseAfterPersistent> {
    let items = memory::with_data_mut(t, |d| {
        let HeapData::TransientVector(vd) = d else {
            panic!("not a transient vector")
        };
        if !vd.mutable {
            return Err(crate::collections::TransientUseAfterPersistent);
        }
        vd.mutable = false;
        Ok(std::mem::take(&mut vd.items))
    })?;
    if items.is_empty() {
        return Ok(empty());
    }
    Ok(memory::alloc(
        Kind::Vector,
        HeapData::Vector(VectorData {
            items,
            mutable: false,
        }),
    ))
}

#[must_use]
pub fn equal(a: Value, b: Value) -> bool {
    let xa = items(a);
    let xb = items(b);
    xa.len() == xb.len()
        && xa
            .iter()
            .zip(xb.iter())
            .all(|(x, y)| crate::collections::equal(*x, *y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conj_on_shared_vector_does_not_mutate_alias() {
        let v0 = conj(empty(), Value::fixnum(1).unwrap());
        memory::retain(v0); // second owner, forces COW on next conj
        let v1 = conj(v0, Value::fixnum(2).unwrap());
        assert_eq!(count(v0), 1);
        assert_eq!(count(v1), 2);
        assert_eq!(nth(v0, 0), Value::fixnum(1));
    }

    #[test]
    fn transient_roundtrip() {
        let v = from_items([Value::fixnum(1).unwrap(), Value::fixnum(2).unwrap()]);
        let t = transient(v);
        let t = conj_bang(t, Value::fixnum(3).unwrap()).unwrap();
        let p = persistent_bang(t).unwrap();
        assert_eq!(count(p), 3);
        assert_eq!(nth(p, 2), Value::fixnum(3));
        assert!(persistent_bang(t).is_err());
    }
}
