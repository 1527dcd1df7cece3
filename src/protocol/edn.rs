//! EDN values and a reader for prepl output.
//!
//! Prepl servers write one tagged map per frame, and the `:val` of `:ret` and
//! `:tap` frames is itself EDN text. Both passes go through `read_prefix`.

use std::fmt;

use thiserror::Error;

/// A decoded EDN value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Char(char),
    Keyword(String),
    Symbol(String),
    List(Vec<Value>),
    Vector(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
    /// `#tag value`, including `#object[...]`, `#inst "..."` and regex literals (`regex`).
    Tagged(String, Box<Value>),
}

/// Errors produced while reading EDN text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EdnError {
    /// Input ended inside a form. More bytes may complete it.
    #[error("unexpected end of input")]
    Incomplete,

    #[error("unexpected character {found:?} at offset {offset}")]
    Unexpected { found: char, offset: usize },

    #[error("invalid number {text:?}")]
    InvalidNumber { text: String },

    #[error("invalid escape sequence at offset {offset}")]
    InvalidEscape { offset: usize },

    #[error("map literal at offset {offset} has an odd number of forms")]
    OddMap { offset: usize },

    #[error("forms nested deeper than {max} levels at offset {offset}", max = MAX_DEPTH)]
    TooDeep { offset: usize },
}

/// Deepest nesting the reader accepts. Every collection, quote, metadata and
/// tag counts as a level.
pub const MAX_DEPTH: usize = 256;

impl Value {
    /// Look up a keyword key in a map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find_map(|(k, v)| match k {
                Value::Keyword(name) if name == key => Some(v),
                _ => None,
            }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_keyword(&self) -> Option<&str> {
        match self {
            Value::Keyword(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Elements of a list or vector.
    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Vector(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Convert to JSON for machine-readable output.
    ///
    /// Keywords and symbols become strings, map keys are stringified, and
    /// tagged literals become `{"tag": ..., "value": ...}` objects.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Nil => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Str(s) => Json::String(s.clone()),
            Value::Char(c) => Json::String(c.to_string()),
            Value::Keyword(k) => Json::String(format!(":{}", k)),
            Value::Symbol(s) => Json::String(s.clone()),
            Value::List(items) | Value::Vector(items) | Value::Set(items) => {
                Json::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(k, v)| {
                        let key = match k {
                            Value::Keyword(name) => name.clone(),
                            Value::Str(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (key, v.to_json())
                    })
                    .collect(),
            ),
            Value::Tagged(tag, value) => serde_json::json!({
                "tag": tag,
                "value": value.to_json(),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) if x.is_nan() => f.write_str("##NaN"),
            Value::Float(x) if x.is_infinite() => {
                f.write_str(if *x > 0.0 { "##Inf" } else { "##-Inf" })
            }
            Value::Float(x) if x.fract() == 0.0 && x.abs() < 1e15 => write!(f, "{:.1}", x),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write_string(f, s),
            Value::Char(c) => match c {
                '\n' => f.write_str("\\newline"),
                ' ' => f.write_str("\\space"),
                '\t' => f.write_str("\\tab"),
                '\r' => f.write_str("\\return"),
                other => write!(f, "\\{}", other),
            },
            Value::Keyword(k) => write!(f, ":{}", k),
            Value::Symbol(s) => f.write_str(s),
            Value::List(items) => write_seq(f, "(", items, ")"),
            Value::Vector(items) => write_seq(f, "[", items, "]"),
            Value::Set(items) => write_seq(f, "#{", items, "}"),
            Value::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} {}", k, v)?;
                }
                f.write_str("}")
            }
            Value::Tagged(tag, value) if tag == "regex" => match value.as_ref() {
                Value::Str(pattern) => write!(f, "#\"{}\"", pattern),
                other => write!(f, "#regex {}", other),
            },
            Value::Tagged(tag, value) => write!(f, "#{} {}", tag, value),
        }
    }
}

fn write_string(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            other => write!(f, "{}", other)?,
        }
    }
    f.write_str("\"")
}

fn write_seq(f: &mut fmt::Formatter<'_>, open: &str, items: &[Value], close: &str) -> fmt::Result {
    f.write_str(open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str(close)
}

/// Read the first form of `src`.
///
/// Returns `Ok(None)` when `src` holds only whitespace and comments, and
/// `Ok(Some((value, end)))` where `end` is the byte offset just past the form.
/// `EdnError::Incomplete` means the form is cut off and more input may finish it.
pub fn read_prefix(src: &str) -> Result<Option<(Value, usize)>, EdnError> {
    let mut reader = Reader { src, pos: 0, depth: 0 };
    loop {
        reader.skip_whitespace();
        if reader.peek().is_none() {
            return Ok(None);
        }
        if let Some(value) = reader.read_form()? {
            return Ok(Some((value, reader.pos)));
        }
    }
}

/// Read every top-level form in `src`.
pub fn read_all(src: &str) -> Result<Vec<Value>, EdnError> {
    let mut values = Vec::new();
    let mut rest = src;
    while let Some((value, end)) = read_prefix(rest)? {
        values.push(value);
        rest = &rest[end..];
    }
    Ok(values)
}

struct Reader<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl Reader<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == ',' {
                self.bump();
            } else if c == ';' {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    /// Read the next form, skipping `#_` discards.
    fn read_next(&mut self) -> Result<Value, EdnError> {
        loop {
            self.skip_whitespace();
            if self.peek().is_none() {
                return Err(EdnError::Incomplete);
            }
            if let Some(value) = self.read_form()? {
                return Ok(value);
            }
        }
    }

    /// Read one syntactic element. `None` means the element was a discard.
    fn read_form(&mut self) -> Result<Option<Value>, EdnError> {
        if self.depth >= MAX_DEPTH {
            return Err(EdnError::TooDeep { offset: self.pos });
        }
        self.depth += 1;
        let form = self.read_element();
        self.depth -= 1;
        form
    }

    fn read_element(&mut self) -> Result<Option<Value>, EdnError> {
        let offset = self.pos;
        let c = self.peek().ok_or(EdnError::Incomplete)?;
        let value = match c {
            '(' => {
                self.bump();
                Value::List(self.read_seq(')')?)
            }
            '[' => {
                self.bump();
                Value::Vector(self.read_seq(']')?)
            }
            '{' => {
                self.bump();
                Value::Map(pairs(self.read_seq('}')?, offset)?)
            }
            ')' | ']' | '}' => return Err(EdnError::Unexpected { found: c, offset }),
            '"' => {
                self.bump();
                Value::Str(self.read_string()?)
            }
            '\\' => {
                self.bump();
                Value::Char(self.read_char(offset)?)
            }
            ':' => {
                self.bump();
                let name = self.read_token();
                if name.is_empty() {
                    return Err(self.unexpected_here());
                }
                Value::Keyword(name.to_string())
            }
            '\'' => {
                self.bump();
                Value::List(vec![Value::Symbol("quote".to_string()), self.read_next()?])
            }
            '@' => {
                self.bump();
                Value::List(vec![
                    Value::Symbol("clojure.core/deref".to_string()),
                    self.read_next()?,
                ])
            }
            '^' => {
                self.bump();
                let _meta = self.read_next()?;
                self.read_next()?
            }
            '#' => {
                self.bump();
                return self.read_dispatch();
            }
            _ => {
                let token = self.read_token();
                if token.is_empty() {
                    return Err(self.unexpected_here());
                }
                atom(token)?
            }
        };
        Ok(Some(value))
    }

    fn read_dispatch(&mut self) -> Result<Option<Value>, EdnError> {
        let offset = self.pos;
        match self.peek().ok_or(EdnError::Incomplete)? {
            '{' => {
                self.bump();
                Ok(Some(Value::Set(self.read_seq('}')?)))
            }
            '_' => {
                self.bump();
                self.read_next()?;
                Ok(None)
            }
            '"' => {
                self.bump();
                let pattern = self.read_raw_string()?;
                Ok(Some(Value::Tagged(
                    "regex".to_string(),
                    Box::new(Value::Str(pattern)),
                )))
            }
            '#' => {
                self.bump();
                match self.read_token() {
                    "Inf" => Ok(Some(Value::Float(f64::INFINITY))),
                    "-Inf" => Ok(Some(Value::Float(f64::NEG_INFINITY))),
                    "NaN" => Ok(Some(Value::Float(f64::NAN))),
                    "" => Err(self.unexpected_here()),
                    _ => Err(EdnError::Unexpected { found: '#', offset }),
                }
            }
            '\'' => {
                self.bump();
                Ok(Some(Value::Tagged(
                    "var".to_string(),
                    Box::new(self.read_next()?),
                )))
            }
            '(' => {
                let body = self.read_next()?;
                Ok(Some(Value::Tagged("fn".to_string(), Box::new(body))))
            }
            _ => {
                let tag = self.read_token().to_string();
                if tag.is_empty() {
                    return Err(self.unexpected_here());
                }
                let value = self.read_next()?;
                Ok(Some(Value::Tagged(tag, Box::new(value))))
            }
        }
    }

    fn read_seq(&mut self, close: char) -> Result<Vec<Value>, EdnError> {
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return Err(EdnError::Incomplete),
                Some(c) if c == close => {
                    self.bump();
                    return Ok(items);
                }
                Some(_) => {
                    if let Some(value) = self.read_form()? {
                        items.push(value);
                    }
                }
            }
        }
    }

    fn read_string(&mut self) -> Result<String, EdnError> {
        let mut out = String::new();
        loop {
            let offset = self.pos;
            match self.bump().ok_or(EdnError::Incomplete)? {
                '"' => return Ok(out),
                '\\' => {
                    let escaped = match self.bump().ok_or(EdnError::Incomplete)? {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        'b' => '\u{8}',
                        'f' => '\u{c}',
                        '"' => '"',
                        '\\' => '\\',
                        'u' => self.read_unicode_escape(offset)?,
                        _ => return Err(EdnError::InvalidEscape { offset }),
                    };
                    out.push(escaped);
                }
                c => out.push(c),
            }
        }
    }

    /// Regex bodies keep their backslashes verbatim.
    fn read_raw_string(&mut self) -> Result<String, EdnError> {
        let mut out = String::new();
        loop {
            match self.bump().ok_or(EdnError::Incomplete)? {
                '"' => return Ok(out),
                '\\' => {
                    out.push('\\');
                    out.push(self.bump().ok_or(EdnError::Incomplete)?);
                }
                c => out.push(c),
            }
        }
    }

    fn read_unicode_escape(&mut self, offset: usize) -> Result<char, EdnError> {
        let end = self.pos + 4;
        if end > self.src.len() {
            return Err(EdnError::Incomplete);
        }
        let hex = self
            .src
            .get(self.pos..end)
            .ok_or(EdnError::InvalidEscape { offset })?;
        let code = u32::from_str_radix(hex, 16).map_err(|_| EdnError::InvalidEscape { offset })?;
        self.pos = end;
        char::from_u32(code).ok_or(EdnError::InvalidEscape { offset })
    }

    fn read_char(&mut self, offset: usize) -> Result<char, EdnError> {
        let start = self.pos;
        // The first character is always part of the literal, even a delimiter like `\(`.
        self.bump().ok_or(EdnError::Incomplete)?;
        while let Some(c) = self.peek() {
            if is_delimiter(c) {
                break;
            }
            self.bump();
        }
        let token = &self.src[start..self.pos];
        let mut chars = token.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => match token {
                "newline" => Ok('\n'),
                "space" => Ok(' '),
                "tab" => Ok('\t'),
                "return" => Ok('\r'),
                "backspace" => Ok('\u{8}'),
                "formfeed" => Ok('\u{c}'),
                _ if token.starts_with('u') && token.len() == 5 => {
                    u32::from_str_radix(&token[1..], 16)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or(EdnError::InvalidEscape { offset })
                }
                _ => Err(EdnError::InvalidEscape { offset }),
            },
        }
    }

    fn read_token(&mut self) -> &str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if is_delimiter(c) {
                break;
            }
            self.bump();
        }
        &self.src[start..self.pos]
    }

    fn unexpected_here(&self) -> EdnError {
        match self.peek() {
            Some(found) => EdnError::Unexpected {
                found,
                offset: self.pos,
            },
            None => EdnError::Incomplete,
        }
    }
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, ',' | '(' | ')' | '[' | ']' | '{' | '}' | '"' | ';')
}

fn pairs(items: Vec<Value>, offset: usize) -> Result<Vec<(Value, Value)>, EdnError> {
    if items.len() % 2 != 0 {
        return Err(EdnError::OddMap { offset });
    }
    let mut entries = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
        entries.push((k, v));
    }
    Ok(entries)
}

fn atom(token: &str) -> Result<Value, EdnError> {
    match token {
        "nil" => return Ok(Value::Nil),
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        _ => {}
    }
    let mut chars = token.chars();
    let first = chars.next();
    let second = chars.next();
    let numeric = match (first, second) {
        (Some(c), _) if c.is_ascii_digit() => true,
        (Some('+' | '-'), Some(c)) if c.is_ascii_digit() => true,
        _ => false,
    };
    if numeric {
        number(token)
    } else {
        Ok(Value::Symbol(token.to_string()))
    }
}

fn number(token: &str) -> Result<Value, EdnError> {
    let invalid = || EdnError::InvalidNumber {
        text: token.to_string(),
    };

    if let Some(int) = token.strip_suffix('N') {
        return int.parse().map(Value::Int).map_err(|_| invalid());
    }
    if let Some(decimal) = token.strip_suffix('M') {
        return decimal.parse().map(Value::Float).map_err(|_| invalid());
    }
    if let Some((numerator, denominator)) = token.split_once('/') {
        let n: f64 = numerator.parse().map_err(|_| invalid())?;
        let d: f64 = denominator.parse().map_err(|_| invalid())?;
        return Ok(Value::Float(n / d));
    }
    let (sign, digits) = match token.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, token.strip_prefix('+').unwrap_or(token)),
    };
    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        return i64::from_str_radix(hex, 16)
            .map(|n| Value::Int(sign * n))
            .map_err(|_| invalid());
    }
    if let Ok(int) = token.parse::<i64>() {
        return Ok(Value::Int(int));
    }
    token.parse::<f64>().map(Value::Float).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn read(src: &str) -> Value {
        read_prefix(src)
            .expect("should parse")
            .expect("should contain a form")
            .0
    }

    #[rstest]
    #[case("nil", Value::Nil)]
    #[case("true", Value::Bool(true))]
    #[case("42", Value::Int(42))]
    #[case("-7", Value::Int(-7))]
    #[case("12N", Value::Int(12))]
    #[case("1.5", Value::Float(1.5))]
    #[case("2.5M", Value::Float(2.5))]
    #[case("1/4", Value::Float(0.25))]
    #[case("0xff", Value::Int(255))]
    #[case(":ret", Value::Keyword("ret".to_string()))]
    #[case(":repl/quit", Value::Keyword("repl/quit".to_string()))]
    #[case("clojure.core/map", Value::Symbol("clojure.core/map".to_string()))]
    #[case("-", Value::Symbol("-".to_string()))]
    #[case("\\a", Value::Char('a'))]
    #[case("\\newline", Value::Char('\n'))]
    #[case("\\u0041", Value::Char('A'))]
    fn reads_atoms(#[case] src: &str, #[case] expected: Value) {
        assert_eq!(read(src), expected);
    }

    #[test]
    fn reads_prepl_ret_frame() {
        let frame = r#"{:tag :ret, :val "{:a [1 2]}", :ns "user", :ms 3, :form "(+ 1 2)"}"#;
        let value = read(frame);

        assert_eq!(value.get("tag"), Some(&Value::Keyword("ret".to_string())));
        assert_eq!(value.get("val").and_then(Value::as_str), Some("{:a [1 2]}"));
        assert_eq!(value.get("ms").and_then(Value::as_int), Some(3));
        assert_eq!(value.get("missing"), None);
    }

    #[test]
    fn reads_string_escapes() {
        let value = read(r#""line\n\"quoted\" \\ tab\t é""#);
        assert_eq!(value, Value::Str("line\n\"quoted\" \\ tab\t é".to_string()));
    }

    #[test]
    fn reads_object_and_special_floats() {
        let value =
            read(r#"[#object[clojure.lang.Atom 0x1f "ok"] ##Inf ##NaN #inst "2020-01-01"]"#);
        let items = value.as_seq().unwrap();

        match &items[0] {
            Value::Tagged(tag, inner) => {
                assert_eq!(tag, "object");
                assert_eq!(inner.as_seq().map(<[Value]>::len), Some(3));
            }
            other => panic!("expected tagged object, got {:?}", other),
        }
        assert_eq!(items[1], Value::Float(f64::INFINITY));
        assert!(matches!(items[2], Value::Float(x) if x.is_nan()));
        assert_eq!(
            items[3],
            Value::Tagged("inst".to_string(), Box::new(Value::Str("2020-01-01".to_string())))
        );
    }

    #[test]
    fn discard_and_comments_are_skipped() {
        let values = read_all("; leading comment\n[1 #_2 3] #_ignored :kw").unwrap();
        assert_eq!(
            values,
            vec![
                Value::Vector(vec![Value::Int(1), Value::Int(3)]),
                Value::Keyword("kw".to_string()),
            ]
        );
    }

    #[test]
    fn metadata_is_dropped() {
        assert_eq!(read("^:private foo"), Value::Symbol("foo".to_string()));
    }

    #[test]
    fn sets_regexes_and_quotes() {
        assert_eq!(read("#{1}"), Value::Set(vec![Value::Int(1)]));
        assert_eq!(
            read(r#"#"\d+""#),
            Value::Tagged("regex".to_string(), Box::new(Value::Str(r"\d+".to_string())))
        );
        assert_eq!(
            read("'x"),
            Value::List(vec![
                Value::Symbol("quote".to_string()),
                Value::Symbol("x".to_string())
            ])
        );
    }

    #[rstest]
    #[case("{:tag :ret")]
    #[case("\"unterminated")]
    #[case("[1 2")]
    #[case("#")]
    fn truncated_input_is_incomplete(#[case] src: &str) {
        assert_eq!(read_prefix(src), Err(EdnError::Incomplete));
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(matches!(
            read_prefix(")"),
            Err(EdnError::Unexpected { found: ')', offset: 0 })
        ));
        assert!(matches!(read_prefix("{:a}"), Err(EdnError::OddMap { .. })));
        assert!(matches!(
            read_prefix("12abc"),
            Err(EdnError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn nesting_is_bounded() {
        let nested = |depth: usize| format!("{}{}", "[".repeat(depth), "]".repeat(depth));

        assert!(read_prefix(&nested(MAX_DEPTH)).is_ok());
        assert!(matches!(
            read_prefix(&nested(MAX_DEPTH + 1)),
            Err(EdnError::TooDeep { .. })
        ));
        // Unterminated input is rejected once too deep, not left waiting for more.
        assert!(matches!(
            read_prefix(&"[".repeat(200_000)),
            Err(EdnError::TooDeep { .. })
        ));
        assert!(matches!(
            read_prefix(&"'".repeat(200_000)),
            Err(EdnError::TooDeep { .. })
        ));
    }

    #[test]
    fn read_prefix_reports_consumed_bytes() {
        let src = "{:tag :out} {:tag :ret}";
        let (_, end) = read_prefix(src).unwrap().unwrap();
        assert_eq!(&src[end..], " {:tag :ret}");
        assert_eq!(read_prefix("  \n ; only a comment").unwrap(), None);
    }

    #[test]
    fn display_prints_readable_edn() {
        let value = read(r#"{:a [1 2.0 "x\n"], :b #{nil}, :c \space}"#);
        assert_eq!(value.to_string(), r#"{:a [1 2.0 "x\n"], :b #{nil}, :c \space}"#);
        assert_eq!(read(&value.to_string()), value);
    }

    #[test]
    fn to_json_stringifies_keywords() {
        let value = read(r#"{:name "conjure", :tags [:a :b], :n 1}"#);
        assert_eq!(
            value.to_json(),
            serde_json::json!({"name": "conjure", "tags": [":a", ":b"], "n": 1})
        );
    }
}
