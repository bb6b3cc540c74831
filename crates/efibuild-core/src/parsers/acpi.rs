//! ACPI source (ASL) scanner.
//!
//! Extracts just enough of the namespace to order tables: the
//! `DefinitionBlock` header, every `External` import and every object a
//! table defines. Expressions, method bodies and conditionals are skipped.

use std::collections::BTreeMap;

use super::ParseError;

/// Header of a `DefinitionBlock`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionBlock {
    pub signature: String,
    pub oem_id: String,
    pub table_id: String,
}

/// Namespace summary of one table. Paths are absolute, dot-separated,
/// without the leading root marker (`_SB.PCI0.LPCB`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcpiNamespace {
    pub definition_block: Option<DefinitionBlock>,
    /// External name -> declared object type (`DeviceObj`, `MethodObj`, ...).
    pub imports: BTreeMap<String, String>,
    /// Defined name -> defining statement (`Device`, `Method`, `Name`, ...).
    pub statements: BTreeMap<String, String>,
}

/// Statements whose first argument names a new object.
const DEFINERS: [&str; 9] = [
    "Device",
    "Method",
    "Name",
    "Processor",
    "PowerResource",
    "ThermalZone",
    "OperationRegion",
    "Mutex",
    "Event",
];

/// Buffer field creators; the new name is the last argument.
const FIELD_CREATORS: [&str; 6] = [
    "CreateBitField",
    "CreateByteField",
    "CreateWordField",
    "CreateDWordField",
    "CreateQWordField",
    "CreateField",
];

const FIELD_LISTS: [&str; 3] = ["Field", "IndexField", "BankField"];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    Number(String),
    Str(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Other,
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || matches!(c, '_' | '\\' | '^')
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '\\' | '^' | '.')
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, ParseError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let (mut i, mut line) = (0usize, 1usize);

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                line += 1;
                i += 1;
            }
            c if c.is_whitespace() => i += 1,
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let start = line;
                i += 2;
                loop {
                    match chars.get(i) {
                        None => return Err(ParseError::new(start, "unterminated comment")),
                        Some('*') if chars.get(i + 1) == Some(&'/') => {
                            i += 2;
                            break;
                        }
                        Some('\n') => line += 1,
                        Some(_) => {}
                    }
                    i += 1;
                }
            }
            '"' => {
                let start = line;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(ParseError::new(start, "unterminated string")),
                        Some('"') => break,
                        Some('\\') => {
                            if let Some(&next) = chars.get(i + 1) {
                                text.push(next);
                            }
                            i += 1;
                        }
                        Some(&ch) => {
                            if ch == '\n' {
                                line += 1;
                            }
                            text.push(ch);
                        }
                    }
                    i += 1;
                }
                i += 1;
                tokens.push((start, Token::Str(text)));
            }
            '(' => {
                tokens.push((line, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((line, Token::RParen));
                i += 1;
            }
            '{' => {
                tokens.push((line, Token::LBrace));
                i += 1;
            }
            '}' => {
                tokens.push((line, Token::RBrace));
                i += 1;
            }
            ',' => {
                tokens.push((line, Token::Comma));
                i += 1;
            }
            c if is_name_start(c) => {
                let start = i;
                while i < chars.len() && is_name_char(chars[i]) {
                    i += 1;
                }
                tokens.push((line, Token::Name(chars[start..i].iter().collect())));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_alphanumeric() {
                    i += 1;
                }
                tokens.push((line, Token::Number(chars[start..i].iter().collect())));
            }
            _ => {
                tokens.push((line, Token::Other));
                i += 1;
            }
        }
    }
    Ok(tokens)
}

/// Resolve `name` against `scope` using the root (`\`) and parent (`^`)
/// prefixes. Trailing underscore padding is stripped from each segment.
pub fn normalize(scope: &str, name: &str) -> String {
    let mut segments: Vec<String> = Vec::new();
    let mut rest = name;

    if let Some(stripped) = rest.strip_prefix('\\') {
        rest = stripped;
    } else {
        segments.extend(scope.split('.').filter(|s| !s.is_empty()).map(String::from));
        while let Some(stripped) = rest.strip_prefix('^') {
            segments.pop();
            rest = stripped;
        }
    }

    for segment in rest.split('.').filter(|s| !s.is_empty()) {
        let trimmed = segment.trim_end_matches('_');
        segments.push(if trimmed.is_empty() { "_" } else { trimmed }.to_string());
    }
    segments.join(".")
}

fn is_local_reference(name: &str) -> bool {
    let (prefix, digit) = name.split_at(name.len().saturating_sub(1));
    matches!(prefix, "Arg" | "Local") && digit.chars().all(|c| c.is_ascii_digit())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Scope,
    Method,
    FieldList,
    Other,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    path: String,
}

/// Scan one ASL source file.
pub fn scan(source: &str) -> Result<AcpiNamespace, ParseError> {
    let tokens = tokenize(source)?;
    let mut ns = AcpiNamespace::default();
    let mut stack = vec![Frame {
        kind: FrameKind::Scope,
        path: String::new(),
    }];
    // Frame opened by the next `{`
    let mut pending: Option<Frame> = None;
    let mut i = 0usize;

    while i < tokens.len() {
        let (line, token) = &tokens[i];
        let (line, token) = (*line, token.clone());
        let Some(top) = stack.last() else {
            return Err(ParseError::new(line, "unbalanced braces"));
        };
        let scope = top.path.clone();
        let in_method = stack.iter().any(|f| f.kind == FrameKind::Method);
        let in_fields = top.kind == FrameKind::FieldList;

        match token {
            Token::LBrace => {
                stack.push(pending.take().unwrap_or(Frame {
                    kind: FrameKind::Other,
                    path: scope,
                }));
                i += 1;
            }
            Token::RBrace => {
                if stack.len() == 1 {
                    return Err(ParseError::new(line, "unbalanced closing brace"));
                }
                stack.pop();
                pending = None;
                i += 1;
            }
            Token::Name(word) if matches!(tokens.get(i + 1), Some((_, Token::LParen))) => {
                let (args, next) = collect_args(&tokens, i + 2, line)?;
                i = next;
                pending = None;
                let first = args.first().cloned().unwrap_or_default();

                match word.as_str() {
                    "DefinitionBlock" => {
                        let arg = |n: usize| args.get(n).cloned().unwrap_or_default();
                        ns.definition_block = Some(DefinitionBlock {
                            signature: arg(1),
                            oem_id: arg(3),
                            table_id: arg(4),
                        });
                        pending = Some(Frame {
                            kind: FrameKind::Scope,
                            path: String::new(),
                        });
                    }
                    "External" => {
                        let kind = args.get(1).cloned().unwrap_or_else(|| "UnknownObj".into());
                        ns.imports.insert(normalize(&scope, &first), kind);
                    }
                    "Scope" => {
                        pending = Some(Frame {
                            kind: FrameKind::Scope,
                            path: normalize(&scope, &first),
                        });
                    }
                    w if DEFINERS.contains(&w) => {
                        let path = normalize(&scope, &first);
                        if !in_method && !first.is_empty() {
                            ns.statements.insert(path.clone(), w.to_string());
                        }
                        let kind = if w == "Method" {
                            FrameKind::Method
                        } else {
                            FrameKind::Scope
                        };
                        pending = Some(Frame { kind, path });
                    }
                    "Alias" if !in_method => {
                        if let Some(alias) = args.get(1) {
                            ns.statements.insert(normalize(&scope, alias), "Alias".into());
                        }
                    }
                    w if FIELD_CREATORS.contains(&w) && !in_method => {
                        if let Some(name) = args.last().filter(|n| !n.is_empty()) {
                            ns.statements.insert(normalize(&scope, name), w.to_string());
                        }
                    }
                    w if FIELD_LISTS.contains(&w) => {
                        pending = Some(Frame {
                            kind: FrameKind::FieldList,
                            path: scope,
                        });
                    }
                    _ => {}
                }
            }
            Token::Name(unit) if in_fields && !in_method => {
                // `UNIT, width` inside a field list
                if matches!(tokens.get(i + 1), Some((_, Token::Comma)))
                    && !is_local_reference(&unit)
                {
                    ns.statements.insert(normalize(&scope, &unit), "Field".into());
                }
                i += 1;
            }
            _ => i += 1,
        }
    }

    if stack.len() > 1 {
        return Err(ParseError::new(0, "unterminated block"));
    }
    Ok(ns)
}

/// Collect the top-level arguments of a call starting after its `(`.
/// Nested calls collapse to an empty argument. Returns the index past
/// the closing `)`.
fn collect_args(
    tokens: &[(usize, Token)],
    mut i: usize,
    line: usize,
) -> Result<(Vec<String>, usize), ParseError> {
    let mut args = Vec::new();
    let mut current: Option<String> = None;
    let mut depth = 0usize;

    loop {
        let Some((_, token)) = tokens.get(i) else {
            return Err(ParseError::new(line, "unterminated argument list"));
        };
        i += 1;
        match token {
            Token::LParen | Token::LBrace => depth += 1,
            Token::RParen | Token::RBrace if depth > 0 => depth -= 1,
            Token::RParen => {
                args.push(current.take().unwrap_or_default());
                return Ok((args, i));
            }
            Token::Comma if depth == 0 => args.push(current.take().unwrap_or_default()),
            Token::Name(s) | Token::Number(s) | Token::Str(s) if depth == 0 => {
                if current.is_none() {
                    current = Some(s.clone());
                } else {
                    current = Some(String::new());
                }
            }
            _ => {}
        }
    }
}
