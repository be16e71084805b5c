//! Persistent map (§3.3, §4.4.1): an open-coded array of interleaved
//! key/value slots, linear-probed. Small-N by design — no
//! hash-array-mapped trie.

use crate::memory::{self, HeapData, Kind};
use crate::value::Value;
use std::sync::OnceLock;

pub(crate) struct MapData {
    pub entries: Vec<(Value, Value)>,
    pub mutable: bool,
}

fn empty_singleton() -> Value {
    static EMPTY: OnceLock<Value> = OnceLock::new();
    *EMPTY.get_or_init(|| {
        memory::alloc_singleton(
            Kind::Map,
            HeapData::Map(MapData {
                entries: Vec::new(),
                mutable: false,
            }),
        )
    })
}

#[must_use]
pub fn empty() -> Value {
    empty_singleton()
}

#[must_use]
pub fn count(m: Value) -> usize {
    memory::with_data(m, |d| match d {
        HeapData::Map(md) | HeapData::TransientMap(md) => md.entries.len(),
        _ => panic!("not a map"),
    })
}

#[must_use]
pub fn entries(m: Value) -> Vec<(Value, Value)> {
    memory::with_data(m, |d| match d {
        HeapData::Map(md) | HeapData::TransientMap(md) => md.entries.clone(),
        _ => panic!("not a map"),
    })
}

/// Linear probe: pointer identity first, then structural `equal?` (§3.3).
fn find_index(entries: &[(Value, Value)], key: Value) -> Option<usize> {
    if let Some(i) = entries.iter().position(|(k, _)| *k == key) {
        return Some(i);
    }
    entries
        .iter()
        .position(|(k, _)| crate::collections::equal(*k, key))
}

#[must_use]
pub fn get(m: Value, key: Value) -> Option<Value> {
    memory::with_data(m, |d| {
        let entries = match d {
            HeapData::Map(md) | HeapData::TransientMap(md) => &md.entries,
            _ => panic!("not a map"),
        };
        find_index(entries, key).map(|i| entries[i].1)
    })
}

#[must_use]
pub fn contains_key(m: Value, key: Value) -> bool {
    get(m, key).is_some()
}

#[must_use]
pub fn from_pairs(pairs: impl IntoIterator<Item = (Value, Value)>) -> Value {
    let mut out: Vec<(Value, Value)> = Vec::new();
    for (k, v) in pairs {
        if let Some(i) = find_index(&out, k) {
            memory::release(out[i].1);
            out[i].1 = v;
        } else {
            out.push((k, v));
        }
    }
    if out.is_empty() {
        return empty();
    }
    for (k, v) in &out {
        memory::retain(*k);
        memory::retain(*v);
    }
    memory::alloc(
        Kind::Map,
        HeapData::Map(MapData {
            entries: out,
            mutable: false,
        }),
    )
}

/// Copy-on-write `assoc` (§4.4.1): mutates in place when uniquely owned and
/// either the key already exists or there is room, otherwise copies.
#[must_use]
pub fn assoc(m: Value, key: Value, value: Value) -> Value {
    memory::retain(key);
    memory::retain(value);
    if memory::is_uniquely_owned(m) {
        let replaced = memory::with_data_mut(m, |d| {
            let HeapData::Map(md) = d else { panic!("not a map") };
            if let Some(i) = find_index(&md.entries, key) {
                let (old_k, old_v) = md.entries[i];
                md.entries[i] = (key, value);
                Some((old_k, old_v))
            } else {
                md.entries.push((key, value));
                None
            }
        });
        if let Some((old_k, old_v)) = replaced {
            memory::release(old_k);
            memory::release(old_v);
        }
        return m;
    }
    let mut new_entries = entries(m);
    for (k, v) in &new_entries {
        memory::retain(*k);
        memory::retain(*v);
    }
    if let Some(i) = find_index(&new_entries, key) {
        let (old_k, old_v) = new_entries[i];
        new_entries[i] = (key, value);
        memory::release(old_k);
        memory::release(old_v);
    } else {
        new_entries.push((key, value));
    }
    memory::alloc(
        Kind::Map,
        HeapData::Map(MapData {
            entries: new_entries,
            mutable: false,
        }),
    )
}

#[must_use]
pub fn dissoc(m: Value, key: Value) -> Value {
    let current = entries(m);
    let Some(i) = find_index(&current, key) else {
        return m;
    };
    if memory::is_uniquely_owned(m) {
        memory::with_data_mut(m, |d| {
            let HeapData::Map(md) = d else { panic!("not a map") };
            let (k, v) = md.entries.remove(i);
            memory::release(k);
            memory::release(v);
        });
        return m;
    }
    let mut new_entries = current;
    let (removed_k, removed_v) = new_entries.remove(i);
    let _ = (removed_k, removed_v); // stay owned by `m`, untouched
    for (k, v) in &new_entries {
        memory::retain(*k);
        memory::retain(*v);
    }
    if new_entries.is_empty() {
        return empty();
    }
    memory::alloc(
        Kind::Map,
        HeapData::Map(MapData {
            entries: new_entries,
            mutable: false,
        }),
    )
}

#[must_use]
pub fn transient(m: Value) -> Value {
    let cloned = entries(m);
    for (k, v) in &cloned {
        memory::retain(*k);
        memory::retain(*v);
    }
    memory::alloc(
        Kind::TransientMap,
        HeapData::TransientMap(MapData {
            entries: cloned,
            mutable: true,
        }),
    )
}

/// Mutates a transient in place, returning its identity (§4.4.3). Errors if
/// `persistent!` already finalized this transient.
pub fn assoc_bang(
    t: Value,
    key: Value,
    value: Value,
) -> Result<Value, crate::collections::TransientUseAfterPersistent> {
    memory::with_data(t, |d| {
        let HeapData::TransientMap(md) = d else {
            panic!("not a transient map")
        };
        if !md.mutable {
            return Err(crate::collections::TransientUseAfterPersistent);
        }
        Ok(())
    })?;
    memory::retain(key);
    memory::retain(value);
    memory::with_data_mut(t, |d| {
        let HeapData::TransientMap(md) = d else {
            panic!("not a transient map")
        };
        if let Some(i) = find_index(&md.entries, key) {
            let (old_k, old_v) = md.entries[i];
            md.entries[i] = (key, value);
            memory::release(old_k);
            memory::release(old_v);
        } else {
            md.entries.push((key, value));
        }
    });
    Ok(t)
}

/// Finalizes a transient into a fresh persistent map; see
/// `vector::persistent_bang` for why the transient object itself survives,
/// merely marked immutable.
pub fn persistent_bang(
    t: Value,
) -> Result<Value, crate::collections::TransientUseAfterPersistent> {
    let entries = memory::with_data_mut(t, |d| {
        let HeapData::TransientMap(md) = d else {
            panic!("not a transient map")
        };
        if !md.mutable {
            return Err(crate::collections::TransientUseAfterPersistent);
        }
        md.mutable = false;
        Ok(std::mem::take(&mut md.entries))
    })?;
    if entries.is_empty() {
        return Ok(empty());
    }
    Ok(memory::alloc(
        Kind::Map,
        HeapData::Map(MapData {
            entries,
            mutable: false,
        }),
    ))
}

#[must_use]
pub fn equal(a: Value, b: Value) -> bool {
    let ea = entries(a);
    let eb = entries(b);
    if ea.len() != eb.len() {
        return false;
    }
    ea.iter().all(|(k, v)| {
        find_index(&eb, *k)
            .map(|i| crate::collections::equal(eb[i].1, *v))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assoc_on_shared_map_does_not_mutate_alias() {
        let a = Value::character('a' as u32);
        let b = Value::character('b' as u32);
        let m0 = assoc(empty(), a, Value::fixnum(1).unwrap());
        memory::retain(m0);
        let m1 = assoc(m0, b, Value::fixnum(2).unwrap());
        assert_eq!(count(m0), 1);
        assert_eq!(count(m1), 2);
        assert_eq!(get(m0, b), None);
    }

    #[test]
    fn assoc_overwrite_preserves_count() {
        let a = Value::character('a' as u32);
        let m = assoc(empty(), a, Value::fixnum(1).unwrap());
        let m = assoc(m, a, Value::fixnum(10).unwrap());
        assert_eq!(count(m), 1);
        assert_eq!(get(m, a), Value::fixnum(10));
    }
}
