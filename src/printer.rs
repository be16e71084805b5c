//! Printer (§4, §6.4): a round-trippable textual form for every value —
//! `read(print(v))` is structurally `equal?` to `v` for every readable value.

use crate::collections::{bytes, list, map, seq, vector};
use crate::memory::{self, HeapData, Kind};
use crate::symbol;
use crate::value::Value;

/// Prints `v` the way the reader would need to read it back (§6.4). Numbers
/// other than whole fixnums are printed to four fractional digits.
#[must_use]
pub fn print(v: Value) -> String {
    let mut out = String::new();
    print_into(v, &mut out);
    out
}

fn print_into(v: Value, out: &mut String) {
    if v.is_nil() {
        out.push_str("nil");
        return;
    }
    if v.is_true() {
        out.push_str("true");
        return;
    }
    if v.is_false() {
        out.push_str("false");
        return;
    }
    if let Some(n) = v.as_fixnum() {
        out.push_str(&n.to_string());
        return;
    }
    if let Some(raw) = v.as_fixed_raw() {
        print_fixed(raw, out);
        return;
    }
    if let Some(c) = v.as_char() {
        print_char(c, out);
        return;
    }
    let Some(kind) = memory::kind_of(v) else {
        out.push_str("nil");
        return;
    };
    match kind {
        Kind::String => print_string(v, out),
        Kind::Vector | Kind::TransientVector => print_seq_like(vector::items(v), '[', ']', out),
        Kind::List => print_seq_like(list::items(v), '(', ')', out),
        Kind::Seq => print_seq_like(seq::items(v), '(', ')', out),
        Kind::Map | Kind::TransientMap => print_map(v, out),
        Kind::Symbol => out.push_str(&symbol::qualified_name(v)),
        Kind::ByteArray => print_bytes(v, out),
        Kind::FunctionNative => {
            let name = memory::with_data(v, |d| {
                let HeapData::FunctionNative(f) = d else { unreachable!() };
                f.name.clone()
            });
            out.push_str(&format!("#<native-fn {name}>"));
        }
        Kind::FunctionInterp => {
            let name = memory::with_data(v, |d| {
                let HeapData::FunctionInterp(f) = d else { unreachable!() };
                f.name.map(symbol::qualified_name)
            });
            match name {
                Some(n) => out.push_str(&format!("#<fn {n}>")),
                None => out.push_str("#<fn>"),
            }
        }
        Kind::Exception => print_exception(v, out),
    }
}

/// Q16.13 raw value to a fixed-point literal, rounded to four fractional
/// digits (§6.4). The sign is carried on the integer part even when that
/// part is zero (`-0.5`, not `0.-5`).
fn print_fixed(raw: i64, out: &mut String) {
    let scale = 1i64 << crate::value::FIXED_FRAC_BITS;
    let negative = raw < 0;
    let magnitude = raw.unsigned_abs();
    let whole = magnitude / scale as u64;
    let frac_num = magnitude % scale as u64;
    // frac_num / scale, rounded to 4 decimal digits.
    let frac_digits = (frac_num * 10_000 + scale as u64 / 2) / scale as u64;
    if negative {
        out.push('-');
    }
    out.push_str(&whole.to_string());
    out.push('.');
    out.push_str(&format!("{frac_digits:04}"));
}

fn print_char(c: char, out: &mut String) {
    out.push('\\');
    match c {
        '\n' => out.push_str("newline"),
        ' ' => out.push_str("space"),
        '\t' => out.push_str("tab"),
        '\r' => out.push_str("return"),
        _ => out.push(c),
    }
}

fn print_string(v: Value, out: &mut String) {
    out.push('"');
    for c in crate::collections::string_bytes(v).chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out.push('"');
}

fn print_seq_like(items: Vec<Value>, open: char, close: char, out: &mut String) {
    out.push(open);
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        print_into(*item, out);
    }
    out.push(close);
}

fn print_map(v: Value, out: &mut String) {
    out.push('{');
    for (i, (k, val)) in map::entries(v).iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        print_into(*k, out);
        out.push(' ');
        print_into(*val, out);
    }
    out.push('}');
}

fn print_bytes(v: Value, out: &mut String) {
    out.push_str("#bytes[");
    for (i, b) in bytes::as_slice(v).iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&b.to_string());
    }
    out.push(']');
}

fn print_exception(v: Value, out: &mut String) {
    let type_name = crate::exception::type_name_of(v);
    let message = crate::exception::message_of(v);
    out.push_str(&format!("#<{type_name}: {message}>"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::NIL;

    #[test]
    fn prints_immediates() {
        assert_eq!(print(NIL), "nil");
        assert_eq!(print(Value::fixnum(42).unwrap()), "42");
        assert_eq!(print(Value::fixnum(-7).unwrap()), "-7");
    }

    #[test]
    fn prints_fixed_point_to_four_digits() {
        let v = Value::fixed_from_f64(3.5);
        assert_eq!(print(v), "3.5000");
        let neg = Value::fixed_from_f64(-1.25);
        assert_eq!(print(neg), "-1.2500");
    }

    #[test]
    fn prints_collections() {
        let v = vector::from_items([Value::fixnum(1).unwrap(), Value::fixnum(2).unwrap()]);
        assert_eq!(print(v), "[1 2]");

        let l = list::from_items([Value::fixnum(1).unwrap(), Value::fixnum(2).unwrap()]);
        assert_eq!(print(l), "(1 2)");
    }

    #[test]
    fn prints_strings_with_escapes() {
        let s = memory::alloc(Kind::String, HeapData::Str("a\nb\"c".to_string()));
        assert_eq!(print(s), "\"a\\nb\\\"c\"");
    }

    #[test]
    fn prints_symbols_qualified() {
        let s = symbol::intern(Some("user"), "foo");
        assert_eq!(print(s), "user/foo");
    }

    #[test]
    fn round_trips_through_the_reader() {
        let mut r = crate::reader::Reader::new("[1 2 {:a 3}]", "user");
        let form = r.read_form().unwrap().unwrap();
        let printed = print(form);
        let mut r2 = crate::reader::Reader::new(&printed, "user");
        let reread = r2.read_form().unwrap().unwrap();
        assert!(crate::collections::equal(form, reread));
    }
}
