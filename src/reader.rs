//! Form reader (§4.2): a UTF-8 cursor over a source string that emits one
//! form at a time and is restartable at form boundaries, the way the REPL
//! needs it to be.

use crate::collections::{list, map, vector};
use crate::symbol;
use crate::value::Value;
use std::{error, fmt};

#[derive(Debug, Clone)]
pub enum Error {
    /// Malformed input with no recovery: bad token, unbalanced close
    /// delimiter, odd-length map body, symbol name over the 32-byte cap.
    Reader { message: String, line: usize, column: usize },
    /// Input ended mid-form (unclosed delimiter, open string). The REPL
    /// treats this distinctly: it means "ask for one more line", not "this
    /// input is wrong" (§4.2).
    Incomplete { message: String, line: usize, column: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reader { message, line, column } => {
                write!(f, "ReaderError at {line}:{column}: {message}")
            }
            Self::Incomplete { message, line, column } => {
                write!(f, "IncompleteInputError at {line}:{column}: {message}")
            }
        }
    }
}

impl error::Error for Error {}

impl Error {
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete { .. })
    }
}

/// Cursor `{bytes, index, line, column}` (§4.2), over a `Vec<char>` rather
/// than raw bytes: every form the grammar accepts is ASCII-punctuation
/// delimited, but string and symbol content is full Unicode, and tracking
/// `line`/`column` against scalar values (not byte offsets) keeps error
/// positions meaningful for multi-byte input.
pub struct Reader<'a> {
    chars: Vec<char>,
    index: usize,
    line: usize,
    column: usize,
    /// Namespace substituted for `::name` auto-resolved keywords (§4.2).
    current_ns: &'a str,
}

impl<'a> Reader<'a> {
    #[must_use]
    pub fn new(source: &str, current_ns: &'a str) -> Self {
        Self {
            chars: source.chars().collect(),
            index: 0,
            line: 1,
            column: 1,
            current_ns,
        }
    }

    #[must_use]
    pub fn is_at_end(&self) -> bool {
        self.skip_ignored_no_advance(self.index).1 >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.index + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.index += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn err(&self, message: impl Into<String>) -> Error {
        Error::Reader {
            message: message.into(),
            line: self.line,
            column: self.column,
        }
    }

    fn incomplete(&self, message: impl Into<String>) -> Error {
        Error::Incomplete {
            message: message.into(),
            line: self.line,
            column: self.column,
        }
    }

    /// Reports how far index `from` would advance past whitespace, commas
    /// and `;`-comments without mutating `self` — used by `is_at_end`.
    fn skip_ignored_no_advance(&self, from: usize) -> ((), usize) {
        let mut i = from;
        loop {
            match self.chars.get(i) {
                Some(c) if c.is_whitespace() || *c == ',' => i += 1,
                Some(';') => {
                    while let Some(c) = self.chars.get(i) {
                        if *c == '\n' {
                            break;
                        }
                        i += 1;
                    }
                }
                _ => break,
            }
        }
        ((), i)
    }

    fn skip_ignored(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() || c == ',' => {
                    self.advance();
                }
                Some(';') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    /// Reads the next top-level form, or `None` if only whitespace/comments
    /// remain. Leaves the cursor positioned to read the following form,
    /// enabling repeated calls over the same source (§4.2).
    pub fn read_form(&mut self) -> Result<Option<Value>, Error> {
        self.skip_ignored();
        if self.peek().is_none() {
            return Ok(None);
        }
        Ok(Some(self.read_expr()?))
    }

    fn read_expr(&mut self) -> Result<Value, Error> {
        self.skip_ignored();
        let Some(c) = self.peek() else {
            return Err(self.incomplete("expected a form, found end of input"));
        };
        match c {
            '(' => self.read_list(),
            ')' => Err(self.err("unexpected ')'")),
            '[' => self.read_vector(),
            ']' => Err(self.err("unexpected ']'")),
            '{' => self.read_map(),
            '}' => Err(self.err("unexpected '}'")),
            '"' => self.read_string(),
            '\\' => self.read_character(),
            '\'' => {
                self.advance();
                let inner = self.read_expr()?;
                Ok(self.wrap("quote", inner))
            }
            '`' => {
                self.advance();
                let inner = self.read_expr()?;
                Ok(self.wrap("quasiquote", inner))
            }
            '~' => {
                self.advance();
                if self.peek() == Some('@') {
                    self.advance();
                    let inner = self.read_expr()?;
                    Ok(self.wrap("splice-unquote", inner))
                } else {
                    let inner = self.read_expr()?;
                    Ok(self.wrap("unquote", inner))
                }
            }
            '^' => {
                self.advance();
                let _meta = self.read_expr()?; // meta is an opaque side-table; see eval's attach_meta
                self.read_expr()
            }
            ':' => self.read_keyword(),
            c if c == '-' || c == '+' || c.is_ascii_digit() => self.read_number_or_symbol(),
            _ => self.read_symbol(),
        }
    }

    fn wrap(&self, head: &str, arg: Value) -> Value {
        list::from_items([symbol::intern(None, head), arg])
    }

    fn read_delimited(&mut self, close: char) -> Result<Vec<Value>, Error> {
        self.advance(); // opening delimiter
        let mut items = Vec::new();
        loop {
            self.skip_ignored();
            match self.peek() {
                None => return Err(self.incomplete(format!("unclosed '{close}'"))),
                Some(c) if c == close => {
                    self.advance();
                    return Ok(items);
                }
                _ => items.push(self.read_expr()?),
            }
        }
    }

    fn read_list(&mut self) -> Result<Value, Error> {
        let items = self.read_delimited(')')?;
        Ok(list::from_items(items))
    }

    fn read_vector(&mut self) -> Result<Value, Error> {
        let items = self.read_delimited(']')?;
        Ok(vector::from_items(items))
    }

    fn read_map(&mut self) -> Result<Value, Error> {
        let items = self.read_delimited('}')?;
        if items.len() % 2 != 0 {
            return Err(self.err("map literal requires an even number of forms"));
        }
        let pairs = items.chunks_exact(2).map(|kv| (kv[0], kv[1]));
        Ok(map::from_pairs(pairs))
    }

    fn read_string(&mut self) -> Result<Value, Error> {
        self.advance(); // opening quote
        let mut out = String::new();
        loop {
            match self.advance() {
                None => return Err(self.incomplete("unterminated string literal")),
                Some('"') => break,
                Some('\\') => out.push(self.read_escape()?),
                Some(c) => out.push(c),
            }
        }
        Ok(crate::memory::alloc(
            crate::memory::Kind::String,
            crate::memory::HeapData::Str(out),
        ))
    }

    fn read_escape(&mut self) -> Result<char, Error> {
        match self.advance() {
            None => Err(self.incomplete("unterminated escape sequence")),
            Some('n') => Ok('\n'),
            Some('t') => Ok('\t'),
            Some('r') => Ok('\r'),
            Some('\\') => Ok('\\'),
            Some('"') => Ok('"'),
            Some('u') => self.read_unicode_escape(),
            Some(other) => Err(self.err(format!("unknown escape '\\{other}'"))),
        }
    }

    fn read_unicode_escape(&mut self) -> Result<char, Error> {
        let braced = self.peek() == Some('{');
        if braced {
            self.advance();
        }
        let mut hex = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_hexdigit() {
                hex.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if braced {
            if self.peek() != Some('}') {
                return Err(self.incomplete("unterminated \\u{...} escape"));
            }
            self.advance();
        }
        let code = u32::from_str_radix(&hex, 16)
            .map_err(|_| self.err("invalid \\u escape"))?;
        char::from_u32(code).ok_or_else(|| self.err("invalid unicode scalar value"))
    }

    fn read_character(&mut self) -> Result<Value, Error> {
        self.advance(); // backslash
        let Some(first) = self.peek() else {
            return Err(self.incomplete("unterminated character literal"));
        };
        if first.is_alphabetic() {
            let start = self.index;
            while self.peek().is_some_and(|c| c.is_alphanumeric()) {
                self.advance();
            }
            let word: String = self.chars[start..self.index].iter().collect();
            let ch = match word.as_str() {
                "newline" => '\n',
                "space" => ' ',
                "tab" => '\t',
                "return" => '\r',
                _ if word.len() == 1 => word.chars().next().expect("len==1"),
                _ if word.starts_with('u') => {
                    let code = u32::from_str_radix(&word[1..], 16)
                        .map_err(|_| self.err(format!("invalid character literal \\{word}")))?;
                    return char::from_u32(code)
                        .map(Value::character)
                        .ok_or_else(|| self.err("invalid unicode scalar value"));
                }
                _ => return Err(self.err(format!("unknown character literal \\{word}"))),
            };
            Ok(Value::character(ch as u32))
        } else {
            self.advance();
            Ok(Value::character(first as u32))
        }
    }

    fn is_symbol_char(c: char) -> bool {
        c.is_ascii_alphanumeric()
            || matches!(
                c,
                '-' | '_' | '*' | '/' | '?' | '!' | '+' | '=' | '<' | '>' | '&' | '.' | ':'
            )
    }

    fn read_token(&mut self) -> String {
        let start = self.index;
        while self.peek().is_some_and(Self::is_symbol_char) {
            self.advance();
        }
        self.chars[start..self.index].iter().collect()
    }

    fn read_keyword(&mut self) -> Result<Value, Error> {
        self.advance(); // leading ':'
        if self.peek() == Some(':') {
            self.advance();
            let rest = self.read_token();
            if rest.is_empty() {
                return Err(self.err("expected a name after '::'"));
            }
            return self.make_symbol(Some(self.current_ns), &format!(":{rest}"));
        }
        let rest = self.read_token();
        if rest.is_empty() {
            return Err(self.err("expected a name after ':'"));
        }
        if let Some((ns, name)) = rest.split_once('/') {
            self.make_symbol(Some(ns), &format!(":{name}"))
        } else {
            self.make_symbol(None, &format!(":{rest}"))
        }
    }

    fn read_number_or_symbol(&mut self) -> Result<Value, Error> {
        let start = self.index;
        let sign = matches!(self.peek(), Some('-') | Some('+'));
        if sign {
            self.advance();
        }
        let has_digit_after_sign = self.peek().is_some_and(|c| c.is_ascii_digit());
        if sign && !has_digit_after_sign {
            self.index = start;
            return self.read_symbol();
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        let mut is_real = false;
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_real = true;
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        // A trailing symbol character turns this back into a plain symbol,
        // e.g. `1+` or `-main`.
        if self.peek().is_some_and(Self::is_symbol_char) {
            while self.peek().is_some_and(Self::is_symbol_char) {
                self.advance();
            }
            let text: String = self.chars[start..self.index].iter().collect();
            return self.make_symbol(None, &text);
        }
        let text: String = self.chars[start..self.index].iter().collect();
        if is_real {
            let f: f64 = text
                .parse()
                .map_err(|_| self.err(format!("invalid number literal '{text}'")))?;
            Ok(Value::fixed_from_f64(f))
        } else {
            let n: i64 = text
                .parse()
                .map_err(|_| self.err(format!("invalid number literal '{text}'")))?;
            Value::fixnum(n)
                .ok_or_else(|| self.err(format!("integer literal '{text}' exceeds fixnum range")))
        }
    }

    fn read_symbol(&mut self) -> Result<Value, Error> {
        let start = self.index;
        let text = self.read_token();
        if text.is_empty() {
            let c = self.peek().map_or_else(|| "end of input".to_string(), |c| c.to_string());
            self.index = start;
            return Err(self.err(format!("unexpected character '{c}'")));
        }
        if let Some((ns, name)) = text.split_once('/') {
            if name.is_empty() {
                return self.make_symbol(None, &text);
            }
            self.make_symbol(Some(ns), name)
        } else {
            self.make_symbol(None, &text)
        }
    }

    fn make_symbol(&self, ns: Option<&str>, name: &str) -> Result<Value, Error> {
        if name.len() > symbol::MAX_NAME_LEN {
            return Err(self.err(format!(
                "symbol name '{name}' exceeds the {}-byte limit",
                symbol::MAX_NAME_LEN
            )));
        }
        Ok(symbol::intern(ns, name))
    }
}

/// Reads every complete top-level form in `source`. Stops (without error) on
/// a trailing [`Error::Incomplete`] only when `allow_trailing_incomplete` is
/// set — the REPL uses this to ask for one more line rather than failing.
pub fn read_all(source: &str, current_ns: &str) -> Result<Vec<Value>, Error> {
    let mut reader = Reader::new(source, current_ns);
    let mut forms = Vec::new();
    while let Some(form) = reader.read_form()? {
        forms.push(form);
    }
    Ok(forms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::vector;

    #[test]
    fn reads_integers_and_symbols() {
        let mut r = Reader::new("(+ 1 -2 foo)", "user");
        let form = r.read_form().unwrap().unwrap();
        let items = list::items(form);
        assert_eq!(items.len(), 4);
        assert_eq!(items[1], Value::fixnum(1).unwrap());
        assert_eq!(items[2], Value::fixnum(-2).unwrap());
    }

    #[test]
    fn reads_vector_and_map_literals() {
        let mut r = Reader::new("[1 2 3]", "user");
        let v = r.read_form().unwrap().unwrap();
        assert_eq!(vector::count(v), 3);

        let mut r = Reader::new("{:a 1 :b 2}", "user");
        let m = r.read_form().unwrap().unwrap();
        assert_eq!(map::count(m), 2);
    }

    #[test]
    fn odd_map_body_is_a_reader_error() {
        let mut r = Reader::new("{:a}", "user");
        assert!(matches!(r.read_form(), Err(Error::Reader { .. })));
    }

    #[test]
    fn unclosed_list_is_incomplete_not_an_error() {
        let mut r = Reader::new("(+ 1 2", "user");
        let err = r.read_form().unwrap_err();
        assert!(err.is_incomplete());
    }

    #[test]
    fn reads_quote_and_string_escapes() {
        let mut r = Reader::new(r#"'(1 2) "a\nb""#, "user");
        let quoted = r.read_form().unwrap().unwrap();
        let items = list::items(quoted);
        assert_eq!(symbol::qualified_name(items[0]), "quote");

        let s = r.read_form().unwrap().unwrap();
        assert_eq!(crate::collections::string_bytes(s), "a\nb");
    }

    #[test]
    fn reader_is_restartable_across_calls() {
        let mut r = Reader::new("1 2 3", "user");
        assert_eq!(r.read_form().unwrap(), Value::fixnum(1));
        assert_eq!(r.read_form().unwrap(), Value::fixnum(2));
        assert_eq!(r.read_form().unwrap(), Value::fixnum(3));
        assert_eq!(r.read_form().unwrap(), None);
    }
}
