//! Mutable byte array (§3.3): fixed-length, bounds-checked, with bulk copy
//! and copy-out slicing.

use crate::memory::{self, HeapData, Kind};
use crate::value::Value;

pub(crate) struct BytesData {
    pub bytes: Vec<u8>,
}

#[must_use]
pub fn alloc_zeroed(len: usize) -> Value {
    memory::alloc(Kind::ByteArray, HeapData::ByteArray(BytesData { bytes: vec![0; len] }))
}

#[must_use]
pub fn from_slice(data: &[u8]) -> Value {
    memory::alloc(
        Kind::ByteArray,
        HeapData::ByteArray(BytesData {
            bytes: data.to_vec(),
        }),
    )
}

#[must_use]
pub fn len(v: Value) -> usize {
    memory::with_data(v, |d| match d {
        HeapData::ByteArray(b) => b.bytes.len(),
        _ => panic!("not a byte array"),
    })
}

#[must_use]
pub fn as_slice(v: Value) -> Vec<u8> {
    memory::with_data(v, |d| match d {
        HeapData::ByteArray(b) => b.bytes.clone(),
        _ => panic!("not a byte array"),
    })
}

#[must_use]
pub fn get(v: Value, index: usize) -> Option<u8> {
    memory::with_data(v, |d| match d {
        HeapData::ByteArray(b) => b.bytes.get(index).copied(),
        _ => panic!("not a byte array"),
    })
}

/// Bounds-checked in-place write. Byte arrays are the one always-mutable
/// heap kind (§3.3): mutation does not go through copy-on-write.
pub fn set(v: Value, index: usize, byte: u8) -> bool {
    memory::with_data_mut(v, |d| match d {
        HeapData::ByteArray(b) => {
            let Some(slot) = b.bytes.get_mut(index) else {
                return false;
            };
            *slot = byte;
            true
        }
        _ => panic!("not a byte array"),
    })
}

/// Bulk copy from `src[src_off..src_off+len]` into `dst[dst_off..]`.
pub fn copy(dst: Value, dst_off: usize, src: Value, src_off: usize, len: usize) -> bool {
    let source = as_slice(src);
    let Some(chunk) = source.get(src_off..src_off + len) else {
        return false;
    };
    let chunk = chunk.to_vec();
    memory::with_data_mut(dst, |d| match d {
        HeapData::ByteArray(b) => {
            if dst_off + len > b.bytes.len() {
                return false;
            }
            b.bytes[dst_off..dst_off + len].copy_from_slice(&chunk);
            true
        }
        _ => panic!("not a byte array"),
    })
}

/// Always returns a fresh copy (never a view), per §3.3.
#[must_use]
pub fn slice(v: Value, start: usize, end: usize) -> Option<Value> {
    let all = as_slice(v);
    if start > end || end > all.len() {
        return None;
    }
    Some(from_slice(&all[start..end]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_checked_access() {
        let b = alloc_zeroed(4);
        assert!(set(b, 2, 9));
        assert_eq!(get(b, 2), Some(9));
        assert!(!set(b, 10, 1));
        assert_eq!(get(b, 10), None);
    }

    #[test]
    fn slice_is_a_copy() {
        let b = from_slice(&[1, 2, 3, 4]);
        let s = slice(b, 1, 3).unwrap();
        assert_eq!(as_slice(s), vec![2, 3]);
        set(s, 0, 99);
        assert_eq!(as_slice(b), vec![1, 2, 3, 4]);
    }
}
