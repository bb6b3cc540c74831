//! Preprocessor tags carried in a patch's frontmatter.
//!
//! A tag names a path and an operation to perform against the base
//! document before the patch is deep-merged. Each applied tag consumes the
//! patch value at its path so the merge does not undo it.

use efibuild_schema::{PathSegment, Value, format_path, parse_path};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Append,
    Prepend,
    Delete,
    Fallback,
    Override,
}

impl TagKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Append => "@append",
            Self::Prepend => "@prepend",
            Self::Delete => "@delete",
            Self::Fallback => "@fallback",
            Self::Override => "@override",
        }
    }
}

impl std::str::FromStr for TagKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "@append" => Ok(Self::Append),
            "@prepend" => Ok(Self::Prepend),
            "@delete" => Ok(Self::Delete),
            "@fallback" => Ok(Self::Fallback),
            "@override" => Ok(Self::Override),
            other => Err(Error::SchemaViolation(format!("unknown tag '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub kind: TagKind,
    pub path: Vec<PathSegment>,
    pub options: Option<Value>,
}

fn path_from_value(value: &Value) -> Result<Vec<PathSegment>> {
    match value {
        Value::String(s) => Ok(parse_path(s)),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(PathSegment::Key(s.clone())),
                Value::Integer(i) => usize::try_from(*i)
                    .map(PathSegment::Index)
                    .map_err(|_| Error::SchemaViolation(format!("negative index {i} in tag path"))),
                other => Err(Error::SchemaViolation(format!(
                    "tag path segment must be a string or integer, got {}",
                    other.type_name()
                ))),
            })
            .collect(),
        other => Err(Error::SchemaViolation(format!(
            "tag path must be a string or list, got {}",
            other.type_name()
        ))),
    }
}

impl Tag {
    /// Parse `[tag, path, options?]` or `{tag, path, options?}`.
    pub fn from_value(value: &Value) -> Result<Self> {
        let (tag, path, options) = match value {
            Value::Array(items) if (2..=3).contains(&items.len()) => {
                (&items[0], &items[1], items.get(2))
            }
            Value::Dict(fields) => {
                let field = |k: &str| {
                    fields
                        .get(k)
                        .ok_or_else(|| Error::SchemaViolation(format!("tag is missing '{k}'")))
                };
                (field("tag")?, field("path")?, fields.get("options"))
            }
            other => {
                return Err(Error::SchemaViolation(format!(
                    "malformed tag: expected [tag, path, options?], got {}",
                    other.type_name()
                )));
            }
        };
        let kind = tag
            .as_str()
            .ok_or_else(|| Error::SchemaViolation("tag name must be a string".into()))?
            .parse()?;
        Ok(Self {
            kind,
            path: path_from_value(path)?,
            options: options.filter(|o| !o.is_null()).cloned(),
        })
    }
}

/// Tags listed under `tags` in a patch frontmatter.
pub fn parse_tags(frontmatter: Option<&Value>) -> Result<Vec<Tag>> {
    match frontmatter.and_then(|f| f.get("tags")) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items.iter().map(Tag::from_value).collect(),
        Some(other) => Err(Error::SchemaViolation(format!(
            "tags must be a list, got {}",
            other.type_name()
        ))),
    }
}

fn join_with(separator: &str, parts: [Option<&Value>; 2]) -> Result<Value> {
    let mut texts = Vec::new();
    for part in parts.into_iter().flatten().filter(|v| !v.is_null()) {
        match part {
            Value::String(s) => texts.push(s.clone()),
            Value::Integer(i) => texts.push(i.to_string()),
            other => {
                return Err(Error::SchemaViolation(format!(
                    "cannot join {} as text",
                    other.type_name()
                )));
            }
        }
    }
    Ok(Value::String(texts.join(separator)))
}

fn concat(first: Option<&Value>, second: Option<&Value>, path: &[PathSegment]) -> Result<Value> {
    match (first, second) {
        (None | Some(Value::Null), Some(v)) | (Some(v), None | Some(Value::Null)) => Ok(v.clone()),
        (None, None) => Ok(Value::Null),
        (Some(Value::Array(a)), Some(Value::Array(b))) => {
            Ok(Value::Array(a.iter().chain(b).cloned().collect()))
        }
        (Some(Value::String(a)), Some(Value::String(b))) => Ok(Value::String(format!("{a}{b}"))),
        (Some(Value::Data(a)), Some(Value::Data(b))) => {
            Ok(Value::Data(a.iter().chain(b).copied().collect()))
        }
        (Some(Value::Dict(a)), Some(Value::Dict(b))) => {
            let mut out = a.clone();
            for (k, v) in b {
                out.insert(k.clone(), v.clone());
            }
            Ok(Value::Dict(out))
        }
        (Some(a), Some(b)) => Err(Error::SchemaViolation(format!(
            "cannot concatenate {} and {} at {}",
            a.type_name(),
            b.type_name(),
            format_path(path)
        ))),
    }
}

fn set(base: &mut Value, path: &[PathSegment], value: Value) -> Result<()> {
    Ok(base.set_path(path, value)?)
}

/// Replace array elements of `base` whose `key` field matches an element of
/// `patch`; unmatched patch elements are appended.
fn merge_by_key(base: &mut Vec<Value>, patch: &[Value], key: &str) {
    for item in patch {
        let id = item.get(key);
        match base.iter_mut().find(|b| id.is_some() && b.get(key) == id) {
            Some(slot) => *slot = item.clone(),
            None => base.push(item.clone()),
        }
    }
}

/// Apply one tag to `base`, consuming the matching part of `patch`.
pub fn apply_tag(base: &mut Value, patch: &mut Value, tag: &Tag) -> Result<()> {
    let path = tag.path.as_slice();
    let incoming = patch.get_path(path).cloned();
    let current = base.get_path(path).cloned();
    let separator = tag.options.as_ref().and_then(Value::as_str);

    match tag.kind {
        TagKind::Append | TagKind::Prepend => {
            let (first, second) = if tag.kind == TagKind::Append {
                (current.as_ref(), incoming.as_ref())
            } else {
                (incoming.as_ref(), current.as_ref())
            };
            let joined = match separator {
                Some(sep) => join_with(sep, [first, second])?,
                None => concat(first, second, path)?,
            };
            set(base, path, joined)?;
        }
        TagKind::Delete => match tag.options.as_ref() {
            Some(Value::String(list)) => {
                for target in list.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                    let mut full = tag.path.clone();
                    full.extend(parse_path(target));
                    base.remove_path(&full);
                    patch.remove_path(&full);
                }
            }
            Some(other) => {
                return Err(Error::SchemaViolation(format!(
                    "@delete options must be a comma-separated list, got {}",
                    other.type_name()
                )));
            }
            None if incoming.as_ref().is_none_or(Value::is_null) => {
                base.remove_path(path);
            }
            None => return Ok(()),
        },
        TagKind::Fallback => {
            if !current.as_ref().is_some_and(Value::is_truthy) {
                set(base, path, incoming.unwrap_or_default())?;
            }
        }
        TagKind::Override => {
            if let (Some(key), Some((PathSegment::Index(_), parent))) = (separator, path.split_last()) {
                let items = patch
                    .get_path(parent)
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                match base.get_path_mut(parent) {
                    Some(Value::Array(existing)) => merge_by_key(existing, &items, key),
                    _ => set(base, parent, Value::Array(items))?,
                }
                patch.remove_path(parent);
                return Ok(());
            }
            set(base, path, incoming.unwrap_or_default())?;
        }
    }
    patch.remove_path(path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use efibuild_schema::dict;

    fn tag(kind: TagKind, path: &str, options: Option<Value>) -> Tag {
        Tag {
            kind,
            path: parse_path(path),
            options,
        }
    }

    #[test]
    fn test_parse_tags() {
        let front = dict! {
            "tags" => vec![
                Value::from(vec![Value::from("@delete"), Value::from("X.Y")]),
                Value::from(vec![
                    Value::from("@override"),
                    Value::from(vec![Value::from("A"), Value::Integer(0)]),
                    Value::from("k"),
                ]),
            ],
        };
        let tags = parse_tags(Some(&front)).unwrap();
        assert_eq!(tags[0], tag(TagKind::Delete, "X.Y", None));
        assert_eq!(tags[1].path, vec![PathSegment::from("A"), PathSegment::Index(0)]);
        assert_eq!(tags[1].options, Some(Value::from("k")));
    }

    #[test]
    fn test_unknown_tag_is_schema_violation() {
        let front = dict! { "tags" => vec![Value::from(vec![Value::from("@merge"), Value::from("A")])] };
        assert!(matches!(parse_tags(Some(&front)), Err(Error::SchemaViolation(_))));
    }

    #[test]
    fn test_append_and_prepend() {
        let mut base = dict! { "Args" => "-v", "List" => vec![Value::from(1_i64)] };
        let mut patch = dict! { "Args" => "keepsyms=1", "List" => vec![Value::from(2_i64)] };
        apply_tag(&mut base, &mut patch, &tag(TagKind::Append, "Args", Some(" ".into()))).unwrap();
        apply_tag(&mut base, &mut patch, &tag(TagKind::Prepend, "List", None)).unwrap();
        assert_eq!(base.get("Args"), Some(&Value::from("-v keepsyms=1")));
        assert_eq!(
            base.get("List"),
            Some(&Value::from(vec![Value::from(2_i64), Value::from(1_i64)]))
        );
        assert_eq!(patch, dict!());
    }

    #[test]
    fn test_append_dissimilar_types() {
        let mut base = dict! { "A" => "text" };
        let mut patch = dict! { "A" => vec![Value::from(1_i64)] };
        let err = apply_tag(&mut base, &mut patch, &tag(TagKind::Append, "A", None)).unwrap_err();
        assert!(matches!(err, Error::SchemaViolation(_)));
    }

    #[test]
    fn test_fallback_keeps_truthy_base() {
        let mut base = dict! { "A" => "set", "B" => "" };
        let mut patch = dict! { "A" => "new", "B" => "new" };
        apply_tag(&mut base, &mut patch, &tag(TagKind::Fallback, "A", None)).unwrap();
        apply_tag(&mut base, &mut patch, &tag(TagKind::Fallback, "B", None)).unwrap();
        assert_eq!(base, dict! { "A" => "set", "B" => "new" });
    }

    #[test]
    fn test_delete_listed_paths() {
        let mut base = dict! { "X" => dict! { "A" => 1_i64, "B" => 2_i64, "C" => 3_i64 } };
        let mut patch = dict!();
        apply_tag(&mut base, &mut patch, &tag(TagKind::Delete, "X", Some("A, C".into()))).unwrap();
        assert_eq!(base, dict! { "X" => dict! { "B" => 2_i64 } });
    }

    #[test]
    fn test_plain_override_replaces() {
        let mut base = dict! { "A" => dict! { "x" => 1_i64, "y" => 2_i64 } };
        let mut patch = dict! { "A" => dict! { "x" => 5_i64 } };
        apply_tag(&mut base, &mut patch, &tag(TagKind::Override, "A", None)).unwrap();
        assert_eq!(base, dict! { "A" => dict! { "x" => 5_i64 } });
    }
}
