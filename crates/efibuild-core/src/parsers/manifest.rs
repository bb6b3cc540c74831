//! The manifest language: an indentation-based document format used for
//! build manifests, lockfiles and configuration patches.
//!
//! ```text
//! ---
//! version: 1.0.0
//! build: RELEASE
//! ---
//! Kexts:
//!   Lilu: acidanthera/Lilu=latest
//! @ifdef DEBUG
//!   DebugEnhancer: acidanthera/DebugEnhancer
//! @endif
//!   VirtualSMC:
//!     specifier: acidanthera/VirtualSMC
//!     bundled:
//!       - SMCProcessor
//! ```
//!
//! Scalars are untyped unless annotated (`Key: int | 5`); unannotated
//! values become booleans, integers, dates, `<hex>` data, `~` null, `{}`,
//! `[...]` flow arrays, or strings. Decimal numbers such as `1.5` stay
//! strings so version tags survive a round trip.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::LazyLock;

use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use efibuild_schema::{Dict, Uid, Value};
use regex::Regex;

use super::ParseError;

static INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-+]?(0x[0-9A-Fa-f]+|[0-9]+)$").expect("integer pattern"));
static DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})$")
        .expect("date pattern")
});
static HEX_DATA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<([0-9A-Fa-f\s]*)>$").expect("hex data pattern"));

/// Annotation type labels.
const TYPES: [&str; 9] = [
    "bool", "int", "float", "date", "data", "string", "uid", "dict", "array",
];

/// Characters that force single quoting when writing a string.
const RESERVED: [char; 19] = [
    ':', '#', '[', ']', '{', '}', ',', '\'', '"', '|', '&', '*', '!', '%', '@', '`', '<', '>',
    '~',
];

/// A parsed document and its optional frontmatter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    pub frontmatter: Option<Value>,
    pub body: Value,
}

impl Document {
    /// Frontmatter value at `key`.
    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.frontmatter.as_ref()?.get(key)
    }
}

/// Parse a document, running the preprocessor with `flags` plus whatever
/// the frontmatter defines.
///
/// A flag counts as defined when it is in `flags`, is a frontmatter key,
/// is listed under the frontmatter `flags`, or is the value of the
/// frontmatter `build` or `target`.
pub fn parse(text: &str, flags: &[String]) -> Result<Document, ParseError> {
    let raw: Vec<(usize, &str)> = text.lines().enumerate().map(|(i, l)| (i + 1, l)).collect();
    let (front_lines, body_lines) = split_frontmatter(&raw)?;

    let frontmatter = match front_lines {
        Some(lines) => Some(Parser::new(tokenize(lines)?).parse_root()?),
        None => None,
    };

    let mut defined: HashSet<String> = flags.iter().cloned().collect();
    if let Some(Value::Dict(front)) = &frontmatter {
        defined.extend(front.keys().cloned());
        if let Some(Value::Array(listed)) = front.get("flags") {
            defined.extend(listed.iter().filter_map(|v| v.as_str().map(String::from)));
        }
        for key in ["build", "target"] {
            if let Some(v) = front.get(key).and_then(Value::as_str) {
                defined.insert(v.to_string());
            }
        }
    }

    let kept = preprocess(body_lines, &defined)?;
    let body = Parser::new(tokenize(&kept)?).parse_root()?;
    Ok(Document { frontmatter, body })
}

/// Parse a document body with no flags and return only the body.
pub fn parse_value(text: &str) -> Result<Value, ParseError> {
    parse(text, &[]).map(|d| d.body)
}

type Lines<'a> = [(usize, &'a str)];

fn split_frontmatter<'a, 'b>(
    raw: &'b Lines<'a>,
) -> Result<(Option<&'b Lines<'a>>, &'b Lines<'a>), ParseError> {
    let start = raw.iter().position(|(_, l)| !l.trim().is_empty());
    let Some(start) = start.filter(|&i| raw[i].1.trim_end() == "---") else {
        return Ok((None, raw));
    };
    let close = raw[start + 1..]
        .iter()
        .position(|(_, l)| l.trim_end() == "---")
        .ok_or_else(|| ParseError::new(raw[start].0, "unterminated frontmatter"))?;
    let end = start + 1 + close;
    Ok((Some(&raw[start + 1..end]), &raw[end + 1..]))
}

struct Frame {
    parent_active: bool,
    condition: bool,
    in_else: bool,
    line: usize,
}

impl Frame {
    fn active(&self) -> bool {
        self.parent_active && (self.condition != self.in_else)
    }
}

/// Apply `@ifdef` / `@ifndef` / `@else` / `@endif`, returning the lines
/// that remain.
fn preprocess<'a>(
    lines: &Lines<'a>,
    defined: &HashSet<String>,
) -> Result<Vec<(usize, &'a str)>, ParseError> {
    let mut stack: Vec<Frame> = Vec::new();
    let mut kept = Vec::new();

    for &(number, line) in lines {
        let trimmed = line.trim();
        let mut words = trimmed.split_whitespace();
        let directive = words.next().unwrap_or_default();
        let active = stack.last().is_none_or(Frame::active);

        match directive {
            "@ifdef" | "@ifndef" => {
                let flag = words
                    .next()
                    .ok_or_else(|| ParseError::new(number, format!("{directive} needs a flag")))?;
                let is_defined = defined.contains(flag);
                stack.push(Frame {
                    parent_active: active,
                    condition: if directive == "@ifdef" { is_defined } else { !is_defined },
                    in_else: false,
                    line: number,
                });
            }
            "@else" => {
                let frame = stack
                    .last_mut()
                    .filter(|f| !f.in_else)
                    .ok_or_else(|| ParseError::new(number, "@else without matching @ifdef"))?;
                frame.in_else = true;
            }
            "@endif" => {
                stack
                    .pop()
                    .ok_or_else(|| ParseError::new(number, "@endif without matching @ifdef"))?;
            }
            "@if" | "@elif" => {
                return Err(ParseError::new(
                    number,
                    format!("{directive} is reserved; use @ifdef/@ifndef"),
                ));
            }
            _ if active => kept.push((number, line)),
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::new(open.line, "unterminated conditional block"));
    }
    Ok(kept)
}

#[derive(Debug, Clone)]
struct Line {
    indent: usize,
    text: String,
    number: usize,
}

fn tokenize(lines: &Lines<'_>) -> Result<Vec<Line>, ParseError> {
    let mut out = Vec::new();
    for &(number, raw) in lines {
        let body = raw.trim_start_matches(' ');
        if body.starts_with('\t') {
            return Err(ParseError::new(number, "tabs are not allowed in indentation"));
        }
        let text = body.trim_end();
        if text.is_empty() || text == "#" || text.starts_with("# ") {
            continue;
        }
        out.push(Line {
            indent: raw.len() - body.len(),
            text: text.to_string(),
            number,
        });
    }
    Ok(out)
}

fn is_seq_item(text: &str) -> bool {
    text == "-" || text.starts_with("- ")
}

/// Split `key: rest`. Keys may be quoted; an unquoted key ends at the
/// first `:` followed by a space or the end of the line.
fn split_key(text: &str) -> Option<(String, &str)> {
    if text.starts_with(['\'', '"']) {
        let (key, consumed) = read_quoted(text).ok()?;
        let rest = text[consumed..].trim_start().strip_prefix(':')?;
        return Some((key, rest.trim()));
    }
    if text.starts_with(['[', '{']) {
        return None;
    }
    let bytes = text.as_bytes();
    let pos = (0..bytes.len()).find(|&i| {
        bytes[i] == b':' && bytes.get(i + 1).is_none_or(|&b| b == b' ')
    })?;
    let key = text[..pos].trim_end();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), text[pos + 1..].trim()))
}

/// Split `type | value` when `type` is a known annotation.
fn split_annotation(rest: &str) -> Option<(&str, &str)> {
    let (ty, raw) = rest.split_once('|')?;
    let ty = ty.trim();
    TYPES.contains(&ty).then(|| (ty, raw.trim()))
}

/// Read a quoted string at the start of `text`; returns the unescaped
/// contents and the number of bytes consumed.
fn read_quoted(text: &str) -> Result<(String, usize), String> {
    let mut chars = text.char_indices();
    let Some((_, quote)) = chars.next() else {
        return Err("expected quoted string".into());
    };
    let mut out = String::new();

    while let Some((i, c)) = chars.next() {
        match (quote, c) {
            ('\'', '\'') => {
                if text[i + 1..].starts_with('\'') {
                    chars.next();
                    out.push('\'');
                } else {
                    return Ok((out, i + 1));
                }
            }
            ('"', '"') => return Ok((out, i + 1)),
            ('"', '\\') => {
                let (_, esc) = chars.next().ok_or("dangling escape")?;
                match esc {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    '\\' | '"' | '\'' => out.push(esc),
                    'x' | 'u' => {
                        let width = if esc == 'x' { 2 } else { 4 };
                        let start = i + 2;
                        let digits = text
                            .get(start..start + width)
                            .ok_or("truncated escape")?;
                        let code = u32::from_str_radix(digits, 16).map_err(|e| e.to_string())?;
                        out.push(char::from_u32(code).ok_or("invalid escape")?);
                        for _ in 0..width {
                            chars.next();
                        }
                    }
                    other => return Err(format!("unknown escape '\\{other}'")),
                }
            }
            _ => out.push(c),
        }
    }
    Err("unterminated quoted string".into())
}

fn unquote(raw: &str, line: usize) -> Result<String, ParseError> {
    let (s, consumed) = read_quoted(raw).map_err(|m| ParseError::new(line, m))?;
    if consumed != raw.len() {
        return Err(ParseError::new(line, "trailing characters after quoted string"));
    }
    Ok(s)
}

/// Split the inside of a flow array on top-level commas.
fn split_flow(inner: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let (mut depth, mut quote, mut start) = (0i32, None::<char>, 0usize);
    for (i, c) in inner.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[' | '{') => depth += 1,
            (None, ']' | '}') => depth -= 1,
            (None, ',') if depth == 0 => {
                parts.push(inner[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = inner[start..].trim();
    if !last.is_empty() || !parts.is_empty() {
        parts.push(last);
    }
    parts
}

fn parse_integer(raw: &str) -> Option<i64> {
    let (negative, digits) = match raw.as_bytes().first() {
        Some(b'-') => (true, &raw[1..]),
        Some(b'+') => (false, &raw[1..]),
        _ => (false, raw),
    };
    let magnitude = match digits.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };
    Some(if negative { -magnitude } else { magnitude })
}

fn parse_hex_data(raw: &str) -> Option<Vec<u8>> {
    let caps = HEX_DATA.captures(raw)?;
    let digits: String = caps[1].chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(digits).ok()
}

/// Untyped scalar (or flow collection).
fn parse_scalar(raw: &str, line: usize) -> Result<Value, ParseError> {
    if raw.starts_with(['\'', '"']) {
        return unquote(raw, line).map(Value::String);
    }
    match raw {
        "" | "~" | "null" => return Ok(Value::Null),
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "{}" => return Ok(Value::dict()),
        _ => {}
    }
    if let Some(inner) = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        return split_flow(inner)
            .into_iter()
            .map(|item| parse_scalar(item, line))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array);
    }
    if INTEGER.is_match(raw) {
        if let Some(i) = parse_integer(raw) {
            return Ok(Value::Integer(i));
        }
    }
    if DATE.is_match(raw) {
        if let Ok(d) = DateTime::parse_from_rfc3339(raw) {
            return Ok(Value::Date(d.with_timezone(&Utc)));
        }
    }
    if let Some(bytes) = parse_hex_data(raw) {
        return Ok(Value::Data(bytes));
    }
    Ok(Value::String(raw.to_string()))
}

/// Scalar with an explicit type annotation.
fn parse_typed(ty: &str, raw: &str, line: usize) -> Result<Value, ParseError> {
    let bad = |what: &str| ParseError::new(line, format!("invalid {what} '{raw}'"));
    Ok(match ty {
        "string" if raw.starts_with(['\'', '"']) => Value::String(unquote(raw, line)?),
        "string" => Value::String(raw.to_string()),
        "bool" => match raw {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => return Err(bad("boolean")),
        },
        "int" => Value::Integer(parse_integer(raw).ok_or_else(|| bad("integer"))?),
        "uid" => {
            let n = raw.parse::<u64>().map_err(|_| bad("uid"))?;
            Value::Uid(Uid::new(n).map_err(|e| ParseError::new(line, e.to_string()))?)
        }
        "float" => Value::Real(raw.parse::<f64>().map_err(|_| bad("real"))?),
        "date" => Value::Date(
            DateTime::parse_from_rfc3339(raw)
                .map_err(|_| bad("date"))?
                .with_timezone(&Utc),
        ),
        "data" => Value::Data(match parse_hex_data(raw) {
            Some(bytes) => bytes,
            None => base64::engine::general_purpose::STANDARD
                .decode(raw)
                .map_err(|_| bad("data"))?,
        }),
        "dict" if raw == "{}" => Value::dict(),
        "array" if raw.starts_with('[') => match parse_scalar(raw, line)? {
            v @ Value::Array(_) => v,
            _ => return Err(bad("array")),
        },
        _ => return Err(bad(ty)),
    })
}

struct Parser {
    lines: Vec<Line>,
    pos: usize,
}

impl Parser {
    fn new(lines: Vec<Line>) -> Self {
        Self { lines, pos: 0 }
    }

    fn parse_root(mut self) -> Result<Value, ParseError> {
        let Some(indent) = self.lines.first().map(|l| l.indent) else {
            return Ok(Value::dict());
        };
        let value = self.parse_block(indent)?;
        match self.lines.get(self.pos) {
            Some(line) => Err(ParseError::new(line.number, "unexpected dedent")),
            None => Ok(value),
        }
    }

    fn parse_block(&mut self, indent: usize) -> Result<Value, ParseError> {
        match self.lines.get(self.pos) {
            Some(line) if is_seq_item(&line.text) => self.parse_seq(indent),
            Some(_) => self.parse_map(indent),
            None => Ok(Value::Null),
        }
    }

    fn parse_map(&mut self, indent: usize) -> Result<Value, ParseError> {
        let mut dict = Dict::new();
        while let Some(line) = self.lines.get(self.pos) {
            if line.indent < indent {
                break;
            }
            let number = line.number;
            if line.indent > indent {
                return Err(ParseError::new(number, "unexpected indentation"));
            }
            if is_seq_item(&line.text) {
                return Err(ParseError::new(number, "list item inside a mapping"));
            }
            let text = line.text.clone();
            let (key, rest) = split_key(&text)
                .ok_or_else(|| ParseError::new(number, format!("expected 'key: value', got '{text}'")))?;
            self.pos += 1;
            let value = self.parse_entry(indent, rest, number, true)?;
            dict.insert(key, value);
        }
        Ok(Value::Dict(dict))
    }

    fn parse_seq(&mut self, indent: usize) -> Result<Value, ParseError> {
        let mut items = Vec::new();
        while let Some(line) = self.lines.get(self.pos) {
            if line.indent < indent || !is_seq_item(&line.text) {
                break;
            }
            let number = line.number;
            if line.indent > indent {
                return Err(ParseError::new(number, "unexpected indentation"));
            }
            let text = line.text.clone();
            let rest = text[1..].trim_start();
            let offset = indent + (text.len() - rest.len());

            let is_mapping = !rest.starts_with(['\'', '"'])
                && split_annotation(rest).is_none()
                && split_key(rest).is_some();
            if is_mapping {
                // Re-read the remainder as the first key of a nested mapping
                self.lines[self.pos].indent = offset;
                self.lines[self.pos].text = rest.to_string();
                items.push(self.parse_map(offset)?);
            } else {
                self.pos += 1;
                items.push(self.parse_entry(indent, rest, number, false)?);
            }
        }
        Ok(Value::Array(items))
    }

    /// Value following `key:` or `-`.
    fn parse_entry(
        &mut self,
        indent: usize,
        rest: &str,
        number: usize,
        same_indent_seq: bool,
    ) -> Result<Value, ParseError> {
        if let Some((ty, raw)) = split_annotation(rest) {
            if matches!(ty, "dict" | "array") && raw.is_empty() {
                let empty = if ty == "dict" {
                    Value::dict()
                } else {
                    Value::Array(Vec::new())
                };
                return self.parse_child(indent, same_indent_seq, empty);
            }
            return parse_typed(ty, raw, number);
        }
        if rest.is_empty() {
            return self.parse_child(indent, same_indent_seq, Value::Null);
        }
        parse_scalar(rest, number)
    }

    fn parse_child(
        &mut self,
        indent: usize,
        same_indent_seq: bool,
        empty: Value,
    ) -> Result<Value, ParseError> {
        match self.lines.get(self.pos) {
            Some(next) if next.indent > indent => {
                let child_indent = next.indent;
                self.parse_block(child_indent)
            }
            Some(next) if same_indent_seq && next.indent == indent && is_seq_item(&next.text) => {
                self.parse_seq(indent)
            }
            _ => Ok(empty),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Emit `type | value` annotations on every entry.
    pub annotated: bool,
    /// Emit dictionary keys in sorted order.
    pub sort_keys: bool,
}

/// Serialize a document with optional frontmatter.
pub fn write(body: &Value, frontmatter: Option<&Value>, opts: WriteOptions) -> String {
    let mut out = String::new();
    if let Some(front) = frontmatter {
        out.push_str("---\n");
        write_block(&mut out, front, 0, WriteOptions { annotated: false, ..opts });
        out.push_str("---\n");
    }
    write_block(&mut out, body, 0, opts);
    out
}

fn write_block(out: &mut String, value: &Value, indent: usize, opts: WriteOptions) {
    match value {
        Value::Dict(dict) => write_dict(out, dict, indent, opts),
        Value::Array(items) => write_array(out, items, indent, opts),
        scalar => {
            let _ = writeln!(out, "{}{}", " ".repeat(indent), inline(scalar, opts));
        }
    }
}

fn write_dict(out: &mut String, dict: &Dict, indent: usize, opts: WriteOptions) {
    let pad = " ".repeat(indent);
    let mut entries: Vec<_> = dict.iter().collect();
    if opts.sort_keys {
        entries.sort_by(|a, b| a.0.cmp(b.0));
    }
    for (key, value) in entries {
        let key = quote_string(key, false);
        if is_nonempty_container(value) {
            if opts.annotated {
                let _ = writeln!(out, "{pad}{key}: {} |", value.type_name());
            } else {
                let _ = writeln!(out, "{pad}{key}:");
            }
            write_block(out, value, indent + 2, opts);
        } else {
            let _ = writeln!(out, "{pad}{key}: {}", inline(value, opts));
        }
    }
}

fn write_array(out: &mut String, items: &[Value], indent: usize, opts: WriteOptions) {
    let pad = " ".repeat(indent);
    for item in items {
        match item {
            Value::Dict(dict) if !dict.is_empty() && !opts.annotated => {
                // First key shares the dash line
                let mut nested = String::new();
                write_dict(&mut nested, dict, indent + 2, opts);
                let _ = write!(out, "{pad}- {}", &nested[indent + 2..]);
            }
            v if is_nonempty_container(v) => {
                if opts.annotated {
                    let _ = writeln!(out, "{pad}- {} |", v.type_name());
                } else {
                    let _ = writeln!(out, "{pad}-");
                }
                write_block(out, v, indent + 2, opts);
            }
            v => {
                let _ = writeln!(out, "{pad}- {}", inline(v, opts));
            }
        }
    }
}

fn is_nonempty_container(v: &Value) -> bool {
    match v {
        Value::Dict(d) => !d.is_empty(),
        Value::Array(a) => !a.is_empty(),
        _ => false,
    }
}

/// Scalar text, prefixed with its type when annotating.
fn inline(value: &Value, opts: WriteOptions) -> String {
    let text = match value {
        Value::Null => return "~".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => format!("{r:?}"),
        Value::Uid(u) => u.get().to_string(),
        Value::Date(d) => d.to_rfc3339_opts(SecondsFormat::Secs, true),
        Value::Data(bytes) if opts.annotated => {
            base64::engine::general_purpose::STANDARD.encode(bytes)
        }
        Value::Data(bytes) => format!("<{}>", hex::encode_upper(bytes)),
        Value::String(s) => quote_string(s, opts.annotated),
        Value::Dict(_) => "{}".to_string(),
        Value::Array(_) => "[]".to_string(),
    };
    if opts.annotated {
        format!("{} | {text}", value.type_name())
    } else {
        text
    }
}

/// Apply the escape policy: control characters force double quotes,
/// reserved characters (or text that would read back as another type)
/// force single quotes.
fn quote_string(s: &str, annotated: bool) -> String {
    if s.chars().any(char::is_control) {
        let mut out = String::from("\"");
        for c in s.chars() {
            match c {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\t' => out.push_str("\\t"),
                '\r' => out.push_str("\\r"),
                c if c.is_control() => {
                    let _ = write!(out, "\\u{:04x}", c as u32);
                }
                c => out.push(c),
            }
        }
        out.push('"');
        return out;
    }

    let padded = s.is_empty() || s != s.trim();
    let ambiguous = !annotated
        && (matches!(s, "~" | "null" | "true" | "false" | "{}")
            || s.starts_with('-')
            || INTEGER.is_match(s)
            || DATE.is_match(s));
    if padded || ambiguous || s.contains(RESERVED) {
        format!("'{}'", s.replace('\'', "''"))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use efibuild_schema::dict;

    #[test]
    fn test_basic_document() {
        let text = "\
---
version: 1.0.0
build: DEBUG
---
ACPI:
  SSDT-EC: ./acpi/SSDT-EC.dsl
Kexts:
  Lilu: acidanthera/Lilu=latest
  VirtualSMC:
    specifier: acidanthera/VirtualSMC
    bundled:
      - SMCProcessor
      - SMCSuperIO
Tools: {}
";
        let doc = parse(text, &[]).unwrap();
        assert_eq!(doc.meta("version"), Some(&Value::from("1.0.0")));
        assert_eq!(
            doc.body,
            dict! {
                "ACPI" => dict! { "SSDT-EC" => "./acpi/SSDT-EC.dsl" },
                "Kexts" => dict! {
                    "Lilu" => "acidanthera/Lilu=latest",
                    "VirtualSMC" => dict! {
                        "specifier" => "acidanthera/VirtualSMC",
                        "bundled" => vec![Value::from("SMCProcessor"), Value::from("SMCSuperIO")],
                    },
                },
                "Tools" => dict!(),
            }
        );
    }

    #[test]
    fn test_preprocessor() {
        let text = "\
---
build: DEBUG
---
Kexts:
@ifdef DEBUG
  DebugEnhancer: acidanthera/DebugEnhancer
@else
  Nothing: x
@endif
@ifndef LAPTOP
  Desktop: y
@endif
@ifdef LAPTOP
  Battery: z
@endif
";
        let doc = parse(text, &[]).unwrap();
        let kexts = doc.body.get("Kexts").unwrap().as_dict().unwrap();
        let keys: Vec<_> = kexts.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["DebugEnhancer", "Desktop"]);

        let doc = parse(text, &["LAPTOP".to_string()]).unwrap();
        let kexts = doc.body.get("Kexts").unwrap().as_dict().unwrap();
        assert!(kexts.contains_key("Battery"));
        assert!(!kexts.contains_key("Desktop"));
    }

    #[test]
    fn test_preprocessor_errors() {
        assert_eq!(parse("@if X\na: 1\n@endif\n", &[]).unwrap_err().line, 1);
        assert!(parse("@ifdef X\na: 1\n", &[]).is_err());
        assert!(parse("@endif\n", &[]).is_err());
        assert!(parse("---\na: 1\n", &[]).is_err());
    }

    #[test]
    fn test_scalars() {
        let text = "\
n: 42
hex: 0x10
neg: -3
on: true
none: ~
when: 2024-01-02T03:04:05Z
blob: <0A0B0c>
ver: 1.5
quoted: 'it''s: here'
escaped: \"tab\\there\"
flow: [a, 'b, c', 3]
";
        let v = parse_value(text).unwrap();
        assert_eq!(v.get("n"), Some(&Value::Integer(42)));
        assert_eq!(v.get("hex"), Some(&Value::Integer(16)));
        assert_eq!(v.get("neg"), Some(&Value::Integer(-3)));
        assert_eq!(v.get("on"), Some(&Value::Bool(true)));
        assert_eq!(v.get("none"), Some(&Value::Null));
        assert!(matches!(v.get("when"), Some(Value::Date(_))));
        assert_eq!(v.get("blob"), Some(&Value::Data(vec![0x0A, 0x0B, 0x0C])));
        assert_eq!(v.get("ver"), Some(&Value::from("1.5")));
        assert_eq!(v.get("quoted"), Some(&Value::from("it's: here")));
        assert_eq!(v.get("escaped"), Some(&Value::from("tab\there")));
        assert_eq!(
            v.get("flow"),
            Some(&Value::Array(vec!["a".into(), "b, c".into(), Value::Integer(3)]))
        );
    }

    #[test]
    fn test_sequence_of_mappings() {
        let text = "\
Add:
- Path: SSDT-EC.aml
  Enabled: true
- Path: SSDT-PLUG.aml
  Enabled: false
After: 1
";
        let v = parse_value(text).unwrap();
        assert_eq!(
            v,
            dict! {
                "Add" => vec![
                    dict! { "Path" => "SSDT-EC.aml", "Enabled" => true },
                    dict! { "Path" => "SSDT-PLUG.aml", "Enabled" => false },
                ],
                "After" => 1i64,
            }
        );
    }

    #[test]
    fn test_write_round_trip_plain() {
        let value = dict! {
            "#Revision" => dict! { "algorithm" => "SHA256" },
            "Kexts" => dict! {
                "Lilu" => dict! {
                    "url" => "https://github.com/acidanthera/Lilu/releases/download/1.6.8/Lilu-1.6.8-RELEASE.zip",
                    "version" => "1.6.8",
                    "number" => "42",
                    "empty" => "",
                    "multi" => "line\nbreak",
                },
            },
            "Add" => vec![
                dict! { "Path" => "a.aml", "Enabled" => true },
                Value::Array(vec![Value::Integer(1)]),
                Value::from("plain"),
            ],
            "Blob" => Value::Data(vec![1, 2]),
            "Nothing" => Value::Array(vec![]),
        };
        let front = dict! { "version" => "0.1.0" };
        let text = write(&value, Some(&front), WriteOptions::default());
        let doc = parse(&text, &[]).unwrap();
        assert_eq!(doc.frontmatter, Some(front));
        assert_eq!(doc.body, value);
    }

    #[test]
    fn test_write_round_trip_annotated() {
        let value = dict! {
            "Misc" => dict! {
                "Tools" => vec![dict! { "Name" => "Shell.efi", "Enabled" => false }],
                "Timeout" => 5i64,
                "Scale" => Value::Real(1.5),
                "Key" => Value::Data(vec![0xFF; 4]),
                "Text" => "true",
            },
        };
        let text = write(&value, None, WriteOptions { annotated: true, sort_keys: false });
        assert!(text.contains("Timeout: int | 5"));
        assert!(text.contains("Text: string | true"));
        assert_eq!(parse_value(&text).unwrap(), value);
    }

    #[test]
    fn test_quote_policy() {
        assert_eq!(quote_string("plain", false), "plain");
        assert_eq!(quote_string("a#b", false), "'a#b'");
        assert_eq!(quote_string("123", false), "'123'");
        assert_eq!(quote_string("123", true), "123");
        assert_eq!(quote_string("a\u{1}b", false), "\"a\\u0001b\"");
    }
}
