//! Ordered document tree shared by the property-list and manifest parsers.
//!
//! Both document formats decode into the same [`Value`] so the configuration
//! pipeline can merge a manifest-language patch over a property list without
//! caring where either came from.

use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use thiserror::Error;

/// Ordered string-keyed dictionary.
pub type Dict = IndexMap<String, Value>;

/// Exclusive upper bound for a keyed-archive UID.
pub const UID_LIMIT: u64 = 1 << 32;

/// Errors raised while addressing or constructing values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// A UID was constructed from a value that does not fit in 32 bits.
    #[error("UID {0} is out of range (must be below 2^32)")]
    UidOutOfRange(u64),

    /// A path could not be followed through the document.
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath {
        /// The dotted rendering of the offending path.
        path: String,
        /// Why the path could not be followed.
        reason: String,
    },
}

/// A keyed-archive UID, bounded below 2^32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(u32);

impl Uid {
    /// Create a UID, rejecting values at or above 2^32.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::UidOutOfRange`] when `value >= 2^32`.
    pub fn new(value: u64) -> Result<Self, ValueError> {
        u32::try_from(value)
            .map(Self)
            .map_err(|_| ValueError::UidOutOfRange(value))
    }

    /// The numeric value of the UID.
    pub fn get(self) -> u64 {
        u64::from(self.0)
    }
}

/// One step of a path into a [`Value`] tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    /// A dictionary key.
    Key(String),
    /// An array index.
    Index(usize),
}

impl std::fmt::Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Key(k) => write!(f, "{k}"),
            Self::Index(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(s: &str) -> Self {
        Self::Key(s.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(s: String) -> Self {
        Self::Key(s)
    }
}

impl From<usize> for PathSegment {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

/// Parse a dotted path (`Kernel.Add.0.BundlePath`); numeric segments become
/// array indices.
pub fn parse_path(s: &str) -> Vec<PathSegment> {
    s.split('.')
        .filter(|seg| !seg.is_empty())
        .map(|seg| match seg.parse::<usize>() {
            Ok(i) => PathSegment::Index(i),
            Err(_) => PathSegment::Key(seg.to_string()),
        })
        .collect()
}

/// Render a path in dotted form.
pub fn format_path(path: &[PathSegment]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

/// A node in a configuration document.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absent value; only produced by the manifest language.
    #[default]
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Signed integer scalar.
    Integer(i64),
    /// Floating point scalar.
    Real(f64),
    /// UTC timestamp.
    Date(DateTime<Utc>),
    /// Raw bytes.
    Data(Vec<u8>),
    /// UTF-8 string.
    String(String),
    /// Keyed-archive UID.
    Uid(Uid),
    /// Ordered sequence.
    Array(Vec<Value>),
    /// Ordered mapping.
    Dict(Dict),
}

impl Value {
    /// An empty dictionary.
    pub fn dict() -> Self {
        Self::Dict(Dict::new())
    }

    /// Short type label used in annotations and error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "int",
            Self::Real(_) => "float",
            Self::Date(_) => "date",
            Self::Data(_) => "data",
            Self::String(_) => "string",
            Self::Uid(_) => "uid",
            Self::Array(_) => "array",
            Self::Dict(_) => "dict",
        }
    }

    /// Whether this is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether this value is an array or dictionary.
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Array(_) | Self::Dict(_))
    }

    /// Truthiness in the sense of the `@fallback` tag: null, `false`, zero,
    /// and empty strings/data/containers are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Integer(i) => *i != 0,
            Self::Real(r) => *r != 0.0,
            Self::Data(d) => !d.is_empty(),
            Self::String(s) => !s.is_empty(),
            Self::Array(a) => !a.is_empty(),
            Self::Dict(d) => !d.is_empty(),
            Self::Date(_) | Self::Uid(_) => true,
        }
    }

    /// Borrow the string payload.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Copy the boolean payload.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Copy the integer payload.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Borrow the array payload.
    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Mutably borrow the array payload.
    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Borrow the dictionary payload.
    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Self::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Mutably borrow the dictionary payload.
    pub fn as_dict_mut(&mut self) -> Option<&mut Dict> {
        match self {
            Self::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Look up a child by dictionary key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict().and_then(|d| d.get(key))
    }

    /// Follow `path` and return the value found there.
    pub fn get_path(&self, path: &[PathSegment]) -> Option<&Value> {
        let mut current = self;
        for seg in path {
            current = match (seg, current) {
                (PathSegment::Key(k), Self::Dict(d)) => d.get(k)?,
                (PathSegment::Index(i), Self::Array(a)) => a.get(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Follow `path` and return a mutable reference to the value found there.
    pub fn get_path_mut(&mut self, path: &[PathSegment]) -> Option<&mut Value> {
        let mut current = self;
        for seg in path {
            current = match (seg, current) {
                (PathSegment::Key(k), Self::Dict(d)) => d.get_mut(k)?,
                (PathSegment::Index(i), Self::Array(a)) => a.get_mut(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Store `value` at `path`, creating intermediate dictionaries (or
    /// appending to arrays when the index equals the length).
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::InvalidPath`] when a segment addresses a scalar
    /// or an out-of-bounds index.
    pub fn set_path(&mut self, path: &[PathSegment], value: Value) -> Result<(), ValueError> {
        let mut current = self;
        for (depth, seg) in path.iter().enumerate() {
            current = current
                .child_or_insert(seg)
                .map_err(|reason| ValueError::InvalidPath {
                    path: format_path(&path[..=depth]),
                    reason,
                })?;
        }
        *current = value;
        Ok(())
    }

    fn child_or_insert(&mut self, seg: &PathSegment) -> Result<&mut Value, String> {
        if self.is_null() {
            *self = match seg {
                PathSegment::Key(_) => Self::dict(),
                PathSegment::Index(_) => Self::Array(Vec::new()),
            };
        }
        match (seg, self) {
            (PathSegment::Key(k), Self::Dict(d)) => Ok(d.entry(k.clone()).or_insert(Self::Null)),
            (PathSegment::Index(i), Self::Array(a)) => {
                if *i == a.len() {
                    a.push(Self::Null);
                }
                let len = a.len();
                a.get_mut(*i)
                    .ok_or_else(|| format!("index {i} out of bounds for array of {len}"))
            }
            (_, other) => Err(format!("cannot descend into {}", other.type_name())),
        }
    }

    /// Remove and return the value at `path`.
    pub fn remove_path(&mut self, path: &[PathSegment]) -> Option<Value> {
        let (last, parents) = path.split_last()?;
        match (last, self.get_path_mut(parents)?) {
            (PathSegment::Key(k), Self::Dict(d)) => d.shift_remove(k),
            (PathSegment::Index(i), Self::Array(a)) if *i < a.len() => Some(a.remove(*i)),
            _ => None,
        }
    }

    /// Recursively merge `other` into `self`.
    ///
    /// Dictionaries merge key by key; any other pairing replaces the base
    /// value, so arrays are overwritten wholesale. Merging the same patch
    /// twice yields the same document as merging it once.
    pub fn deep_merge(&mut self, other: &Value) {
        match (self, other) {
            (Self::Dict(base), Self::Dict(patch)) => {
                for (key, value) in patch {
                    match base.get_mut(key) {
                        Some(existing) => existing.deep_merge(value),
                        None => {
                            base.insert(key.clone(), value.clone());
                        }
                    }
                }
            }
            (slot, value) => *slot = value.clone(),
        }
    }

    /// Every leaf of the tree with its path. Empty containers count as
    /// leaves.
    pub fn leaves(&self) -> Vec<(Vec<PathSegment>, &Value)> {
        let mut out = Vec::new();
        self.collect_leaves(&mut Vec::new(), &mut out);
        out
    }

    fn collect_leaves<'a>(
        &'a self,
        prefix: &mut Vec<PathSegment>,
        out: &mut Vec<(Vec<PathSegment>, &'a Value)>,
    ) {
        match self {
            Self::Dict(d) if !d.is_empty() => {
                for (k, v) in d {
                    prefix.push(PathSegment::Key(k.clone()));
                    v.collect_leaves(prefix, out);
                    prefix.pop();
                }
            }
            Self::Array(a) if !a.is_empty() => {
                for (i, v) in a.iter().enumerate() {
                    prefix.push(PathSegment::Index(i));
                    v.collect_leaves(prefix, out);
                    prefix.pop();
                }
            }
            leaf => out.push((prefix.clone(), leaf)),
        }
    }

    /// Convert to a JSON value, e.g. to deserialize typed structs with serde.
    ///
    /// Dates become RFC 3339 strings and data becomes base64.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => (*b).into(),
            Self::Integer(i) => (*i).into(),
            Self::Real(r) => {
                serde_json::Number::from_f64(*r).map_or(serde_json::Value::Null, Into::into)
            }
            Self::Date(d) => d.to_rfc3339_opts(SecondsFormat::Secs, true).into(),
            Self::Data(bytes) => base64::engine::general_purpose::STANDARD
                .encode(bytes)
                .into(),
            Self::String(s) => s.clone().into(),
            Self::Uid(u) => u.get().into(),
            Self::Array(a) => serde_json::Value::Array(a.iter().map(Self::to_json).collect()),
            Self::Dict(d) => serde_json::Value::Object(
                d.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Convert from a JSON value.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map_or_else(|| Self::Real(n.as_f64().unwrap_or_default()), Self::Integer),
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(a) => Self::Array(a.iter().map(Self::from_json).collect()),
            serde_json::Value::Object(o) => Self::Dict(
                o.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(a: Vec<Value>) -> Self {
        Self::Array(a)
    }
}

impl From<Dict> for Value {
    fn from(d: Dict) -> Self {
        Self::Dict(d)
    }
}

/// Build a [`Value::Dict`] from key/value pairs.
#[macro_export]
macro_rules! dict {
    () => { $crate::Value::Dict($crate::Dict::new()) };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut d = $crate::Dict::new();
        $( d.insert(::std::string::String::from($key), $crate::Value::from($value)); )+
        $crate::Value::Dict(d)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        dict! {
            "X" => dict! { "Y" => 1i64, "Z" => 2i64 },
            "A" => vec![dict! { "k" => "a" }],
        }
    }

    #[test]
    fn test_get_and_set_path() {
        let mut v = sample();
        assert_eq!(
            v.get_path(&parse_path("X.Y")),
            Some(&Value::Integer(1))
        );
        assert_eq!(v.get_path(&parse_path("A.0.k")), Some(&Value::from("a")));

        v.set_path(&parse_path("New.Nested"), Value::Bool(true)).unwrap();
        assert_eq!(v.get_path(&parse_path("New.Nested")), Some(&Value::Bool(true)));

        v.set_path(&parse_path("A.1.k"), "b".into()).unwrap();
        assert_eq!(v.get_path(&parse_path("A.1.k")), Some(&Value::from("b")));
    }

    #[test]
    fn test_set_path_through_scalar_fails() {
        let mut v = sample();
        let err = v.set_path(&parse_path("X.Y.Z"), Value::Null).unwrap_err();
        assert!(matches!(err, ValueError::InvalidPath { .. }));
    }

    #[test]
    fn test_remove_path() {
        let mut v = sample();
        assert_eq!(v.remove_path(&parse_path("X.Y")), Some(Value::Integer(1)));
        assert_eq!(v, dict! { "X" => dict! { "Z" => 2i64 }, "A" => vec![dict! { "k" => "a" }] });
        assert_eq!(v.remove_path(&parse_path("X.Missing")), None);
    }

    #[test]
    fn test_deep_merge_is_idempotent() {
        let mut once = sample();
        let patch = dict! { "X" => dict! { "Y" => 5i64, "W" => "new" }, "A" => Vec::<Value>::new() };
        once.deep_merge(&patch);
        let mut twice = once.clone();
        twice.deep_merge(&patch);
        assert_eq!(once, twice);
        assert_eq!(once.get_path(&parse_path("X.Z")), Some(&Value::Integer(2)));
        assert_eq!(once.get("A"), Some(&Value::Array(vec![])));
    }

    #[test]
    fn test_leaves() {
        let v = sample();
        let paths: Vec<String> = v.leaves().iter().map(|(p, _)| format_path(p)).collect();
        assert_eq!(paths, vec!["X.Y", "X.Z", "A.0.k"]);
    }

    #[test]
    fn test_uid_bounds() {
        assert!(Uid::new(UID_LIMIT - 1).is_ok());
        assert_eq!(Uid::new(UID_LIMIT), Err(ValueError::UidOutOfRange(UID_LIMIT)));
    }

    #[test]
    fn test_json_bridge() {
        let v = dict! { "a" => 1i64, "b" => vec![Value::from("x"), Value::Null] };
        assert_eq!(Value::from_json(&v.to_json()), v);
        assert_eq!(Value::Data(vec![1, 2, 3]).to_json(), serde_json::json!("AQID"));
    }
}
