//! Lazy sequence view (§3.3): a single-pass, non-restartable cursor over a
//! backing vector, list, map (as key/value pair vectors), or string
//! (codepoints).

use crate::collections::{list, map, vector};
use crate::memory::{self, HeapData, Kind};
use crate::value::{Value, NIL};

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    Vector,
    List,
    MapEntries,
    Str,
}

pub(crate) struct SeqData {
    pub source: Value,
    pub kind: Source,
    pub index: usize,
}

fn source_len(source: Value, kind: Source) -> usize {
    match kind {
        Source::Vector => vector::count(source),
        Source::List => list::count(source),
        Source::MapEntries => map::count(source),
        Source::Str => crate::collections::string_bytes(source).chars().count(),
    }
}

fn element_at(source: Value, kind: Source, index: usize) -> Value {
    match kind {
        Source::Vector => vector::nth(source, index).expect("index < len checked by caller"),
        Source::List => {
            let mut cur = source;
            for _ in 0..index {
                cur = list::rest(cur);
            }
            list::first(cur).expect("index < len checked by caller")
        }
        Source::MapEntries => {
            let (k, v) = map::entries(source)[index];
            // A map's seq yields 2-element vectors `[k v]`, as in Clojure.
            vector::from_items([k, v])
        }
        Source::Str => crate::collections::string_bytes(source)
            .chars()
            .nth(index)
            .map(|c| Value::character(c as u32))
            .expect("index < len checked by caller"),
    }
}

fn make(source: Value, kind: Source, index: usize) -> Value {
    if index >= source_len(source, kind) {
        return NIL;
    }
    memory::retain(source);
    memory::alloc(
        Kind::Seq,
        HeapData::Seq(SeqData {
            source,
            kind,
            index,
        }),
    )
}

/// `(seq coll)`: `nil` for an empty collection, otherwise a seq over it.
#[must_use]
pub fn of_vector(v: Value) -> Value {
    make(v, Source::Vector, 0)
}

#[must_use]
pub fn of_list(v: Value) -> Value {
    if list::is_empty(v) {
        return NIL;
    }
    // Lists are already lazily-walkable; wrapping in a `Seq` header keeps
    // `first`/`rest` uniform across all seq-able sources.
    make(v, Source::List, 0)
}

#[must_use]
pub fn of_map(v: Value) -> Value {
    make(v, Source::MapEntries, 0)
}

#[must_use]
pub fn of_string(v: Value) -> Value {
    make(v, Source::Str, 0)
}

#[must_use]
pub fn first(v: Value) -> Option<Value> {
    if v.is_nil() {
        return None;
    }
    memory::with_data(v, |d| {
        let HeapData::Seq(s) = d else { panic!("not a seq") };
        Some(element_at(s.source, s.kind, s.index))
    })
}

#[must_use]
pub fn rest(v: Value) -> Value {
    if v.is_nil() {
        return NIL;
    }
    memory::with_data(v, |d| {
        let HeapData::Seq(s) = d else { panic!("not a seq") };
        make(s.source, s.kind, s.index + 1)
    })
}

#[must_use]
pub fn items(v: Value) -> Vec<Value> {
    let mut out = Vec::new();
    let mut cur = v;
    while let Some(head) = first(cur) {
        out.push(head);
        cur = rest(cur);
    }
    out
}

#[must_use]
pub fn equal(a: Value, b: Value) -> bool {
    let mut pa = a;
    let mut pb = b;
    loop {
        match (first(pa), first(pb)) {
            (None, None) => return true,
            (Some(ha), Some(hb)) => {
                if !crate::collections::equal(ha, hb) {
                    return false;
                }
                pa = rest(pa);
                pb = rest(pb);
            }
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_over_vector_is_single_pass_and_shares_backing() {
        let v = vector::from_items([
            Value::fixnum(1).unwrap(),
            Value::fixnum(2).unwrap(),
            Value::fixnum(3).unwrap(),
        ]);
        let s = of_vector(v);
        assert_eq!(first(s), Value::fixnum(1));
        let s2 = rest(s);
        assert_eq!(first(s2), Value::fixnum(2));
        assert_eq!(items(s), vec![
            Value::fixnum(1).unwrap(),
            Value::fixnum(2).unwrap(),
            Value::fixnum(3).unwrap()
        ]);
    }

    #[test]
    fn empty_collection_seq_is_nil() {
        assert!(of_vector(vector::empty()).is_nil());
    }
}
