//! Scanner for the bootloader's LaTeX configuration reference
//! (`Docs/Configuration.tex`).
//!
//! Every documented key lives in an `enumerate` list under a
//! `\subsection{... Properties}` heading:
//!
//! ```text
//! \subsection{Add Properties}\label{acpipropsadd}
//! \begin{enumerate}
//! \item
//!   \texttt{Comment}\\
//!   \textbf{Type}: \texttt{plist\ string}\\
//!   \textbf{Failsafe}: Empty\\
//!   \textbf{Description}: Arbitrary ASCII string ...
//! \end{enumerate}
//! ```

use std::sync::LazyLock;

use efibuild_schema::{Dict, PathSegment, Value};
use indexmap::IndexMap;
use regex::Regex;
use tracing::debug;

static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\\(section|subsection|subsubsection)\*?\{([^}]*)\}").expect("heading pattern")
});
static FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\textbf\{(Type|Failsafe|Description)\}:").expect("field pattern"));
static TEXT_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\(?:texttt|textbf|textit|emph|href\{[^}]*\}|hyperref\[[^\]]*\])\{([^{}]*)\}")
        .expect("command pattern")
});
static TEXTTT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\texttt\{([^{}]*)\}").expect("texttt pattern"));
static INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?(?:0x[0-9A-Fa-f]+|\d+)").expect("integer pattern"));
static VALID_ONLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:valid only|only valid|only applies|applies only) (?:for|to) (\w+)")
        .expect("valid-only pattern")
});

/// One documented key.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaEntry {
    /// Parent paths the key belongs to. Usually one; the shared
    /// `Entry Properties` section seeds both `Misc.Entries` and `Misc.Tools`.
    pub parents: Vec<Vec<String>>,
    pub key: String,
    /// Plist type label (`boolean`, `integer`, `string`, `data`, `array`, `dict`).
    pub ty: String,
    pub failsafe: Value,
    /// Unprocessed item text.
    pub raw: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    pub entries: Vec<SchemaEntry>,
}

impl Schema {
    /// Nested dictionary of failsafe values. Array parents hold a single
    /// template dictionary.
    pub fn tree(&self) -> Value {
        let mut root = Value::dict();
        for entry in &self.entries {
            for parent in &entry.parents {
                let parent_path: Vec<PathSegment> =
                    parent.iter().map(|s| PathSegment::Key(s.clone())).collect();
                if let Some(slot) = root.get_path_mut(&parent_path) {
                    if !matches!(slot, Value::Dict(_)) {
                        *slot = Value::dict();
                    }
                }
                let mut path = parent_path;
                path.push(PathSegment::Key(entry.key.clone()));
                if root.get_path(&path).is_none() {
                    if let Err(e) = root.set_path(&path, entry.failsafe.clone()) {
                        debug!(key = %entry.key, "skipping failsafe: {e}");
                    }
                }
            }
        }
        root
    }

    /// Flattened `Parent.Key` path -> raw item text.
    pub fn raw(&self) -> IndexMap<String, String> {
        let mut out = IndexMap::new();
        for entry in &self.entries {
            for parent in &entry.parents {
                let mut key = parent.join(".");
                key.push('.');
                key.push_str(&entry.key);
                out.insert(key, entry.raw.clone());
            }
        }
        out
    }

    /// `(parent, key, failsafe)` for every seeded location.
    pub fn leaves(&self) -> impl Iterator<Item = (&[String], &str, &Value)> {
        self.entries.iter().flat_map(|e| {
            e.parents
                .iter()
                .map(move |p| (p.as_slice(), e.key.as_str(), &e.failsafe))
        })
    }
}

/// Remove markup, keeping command arguments.
pub fn strip_latex(text: &str) -> String {
    let mut out = text.to_string();
    loop {
        let next = TEXT_COMMAND.replace_all(&out, "$1").into_owned();
        if next == out {
            break;
        }
        out = next;
    }
    out.replace("\\\\", " ")
        .replace("\\ ", " ")
        .replace("\\_", "_")
        .replace("\\#", "#")
        .replace("\\&", "&")
        .replace("\\%", "%")
        .replace('~', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Upstream names that disagree with the sample document.
fn rename_parent(section: &[String]) -> Vec<Vec<String>> {
    let joined = section.join(".");
    match joined.as_str() {
        "Misc.Entry" => vec![
            vec!["Misc".into(), "Entries".into()],
            vec!["Misc".into(), "Tools".into()],
        ],
        "PlatformInfo.Memory.Device" => vec![vec![
            "PlatformInfo".into(),
            "Memory".into(),
            "Devices".into(),
        ]],
        _ => vec![section.to_vec()],
    }
}

fn failsafe_value(ty: &str, text: &str) -> Value {
    let literal = TEXTTT
        .captures(text)
        .map(|c| strip_latex(&c[1]))
        .unwrap_or_default();
    let clean = strip_latex(text);
    let empty = clean.is_empty() || clean.starts_with("Empty") || clean.starts_with("None");

    match ty {
        "boolean" => Value::Bool(literal == "true" || (literal.is_empty() && clean.starts_with("true"))),
        "integer" => {
            let source = if literal.is_empty() { &clean } else { &literal };
            let parsed = INTEGER.find(source).and_then(|m| {
                let s = m.as_str();
                match s.strip_prefix("0x") {
                    Some(hex) => i64::from_str_radix(hex, 16).ok(),
                    None => s.parse().ok(),
                }
            });
            Value::Integer(parsed.unwrap_or_default())
        }
        "string" if empty => Value::String(String::new()),
        "string" => Value::String(if literal.is_empty() { clean } else { literal }),
        "data" | "multidata" => Value::Data(Vec::new()),
        "array" => Value::Array(Vec::new()),
        "dict" => Value::Dict(Dict::new()),
        _ => Value::Null,
    }
}

/// Split an item into its `Type`, `Failsafe` and `Description` fields.
fn item_fields(item: &str) -> IndexMap<String, String> {
    let mut fields = IndexMap::new();
    let marks: Vec<_> = FIELD.captures_iter(item).collect();
    for (i, caps) in marks.iter().enumerate() {
        let Some(whole) = caps.get(0) else { continue };
        let end = marks
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(item.len(), |m| m.start());
        fields.insert(caps[1].to_string(), item[whole.end()..end].trim().to_string());
    }
    fields
}

fn parse_item(parent: &[String], item: &str) -> Option<SchemaEntry> {
    let key = strip_latex(&TEXTTT.captures(item)?[1]);
    if key.is_empty() || key.contains(' ') {
        return None;
    }
    let fields = item_fields(item);
    let ty_text = strip_latex(fields.get("Type")?);
    let ty = ty_text
        .trim_start_matches("plist")
        .trim()
        .split([',', ' '])
        .next()
        .unwrap_or_default()
        .to_string();
    let failsafe = failsafe_value(&ty, fields.get("Failsafe").map_or("", String::as_str));

    let mut parents = rename_parent(parent);
    if let Some(description) = fields.get("Description") {
        if let Some(caps) = VALID_ONLY.captures(&strip_latex(description)) {
            let only = &caps[1];
            let narrowed: Vec<_> = parents
                .iter()
                .filter(|p| p.last().is_some_and(|l| l == only))
                .cloned()
                .collect();
            if !narrowed.is_empty() {
                parents = narrowed;
            }
        }
    }

    Some(SchemaEntry {
        parents,
        key,
        ty,
        failsafe,
        raw: item.trim().to_string(),
    })
}

/// Heading text `X Y Properties` relative to `base`, as path segments.
fn heading_path(base: &[String], title: &str) -> Option<Vec<String>> {
    let title = strip_latex(title);
    let name = title.strip_suffix("Properties")?.trim();
    let mut path = base.to_vec();
    let mut words: Vec<&str> = name.split_whitespace().collect();
    if let (Some(first), Some(last)) = (words.first(), base.last()) {
        if first == last {
            words.remove(0);
        }
    }
    if !words.is_empty() {
        path.push(words.concat());
    }
    Some(path)
}

/// Parse the reference document.
pub fn parse(tex: &str) -> Schema {
    let mut schema = Schema::default();
    let mut section: Option<String> = None;
    let mut subsection: Option<Vec<String>> = None;
    let mut current: Option<Vec<String>> = None;
    let mut depth = 0usize;
    let mut item: Option<String> = None;

    let mut flush = |item: &mut Option<String>, parent: &Option<Vec<String>>| {
        if let (Some(text), Some(parent)) = (item.take(), parent) {
            schema.entries.extend(parse_item(parent, &text));
        }
    };

    for line in tex.lines() {
        let trimmed = line.trim();
        if let Some(caps) = HEADING.captures(trimmed) {
            flush(&mut item, &current);
            let title = caps[2].trim();
            match &caps[1] {
                "section" => {
                    section = (!title.is_empty() && !title.contains(' ')).then(|| title.to_string());
                    subsection = None;
                    current = None;
                }
                "subsection" => {
                    let base: Vec<String> = section.iter().cloned().collect();
                    subsection = section.as_ref().and_then(|_| heading_path(&base, title));
                    current = subsection.clone();
                }
                _ => {
                    let base = subsection
                        .clone()
                        .or_else(|| section.as_ref().map(|s| vec![s.clone()]));
                    current = base.and_then(|b| heading_path(&b, title));
                }
            }
            depth = 0;
            continue;
        }

        if trimmed.starts_with("\\begin{enumerate}") || trimmed.starts_with("\\begin{itemize}") {
            depth += 1;
        } else if trimmed.starts_with("\\end{enumerate}") || trimmed.starts_with("\\end{itemize}") {
            if depth == 1 {
                flush(&mut item, &current);
            }
            depth = depth.saturating_sub(1);
            if let Some(text) = item.as_mut() {
                text.push_str(line);
                text.push('\n');
            }
            continue;
        }

        if depth == 1 && trimmed.starts_with("\\item") {
            flush(&mut item, &current);
            item = Some(trimmed.trim_start_matches("\\item").to_string() + "\n");
            continue;
        }
        if let Some(text) = item.as_mut() {
            text.push_str(line);
            text.push('\n');
        }
    }
    flush(&mut item, &current);
    schema
}

#[cfg(test)]
mod tests {
    use super::*;
    use efibuild_schema::parse_path;

    const TEX: &str = r"
\section{Introduction}\label{introduction}
\begin{enumerate}
\item
  \texttt{Nothing}\\
  Not a key.
\end{enumerate}

\section{ACPI}\label{acpi}
\subsection{Properties}\label{acpiprops}
\begin{enumerate}
\item
  \texttt{Add}\\
  \textbf{Type}: \texttt{plist\ array}\\
  \textbf{Failsafe}: Empty\\
  \textbf{Description}: Load selected tables.
\end{enumerate}

\subsection{Add Properties}\label{acpipropsadd}
\begin{enumerate}
\item
  \texttt{Comment}\\
  \textbf{Type}: \texttt{plist\ string}\\
  \textbf{Failsafe}: Empty\\
  \textbf{Description}: Arbitrary ASCII string.
\item
  \texttt{Enabled}\\
  \textbf{Type}: \texttt{plist\ boolean}\\
  \textbf{Failsafe}: \texttt{false}\\
  \textbf{Description}: Set to \texttt{true} to add this table:
  \begin{itemize}
  \item \texttt{Nested} is not a key
  \end{itemize}
\end{enumerate}

\section{Misc}\label{misc}
\subsection{Entry Properties}\label{miscentryprops}
\begin{enumerate}
\item
  \texttt{Arguments}\\
  \textbf{Type}: \texttt{plist\ string}\\
  \textbf{Failsafe}: Empty\\
  \textbf{Description}: Arbitrary arguments.
\item
  \texttt{RealPath}\\
  \textbf{Type}: \texttt{plist\ boolean}\\
  \textbf{Failsafe}: \texttt{false}\\
  \textbf{Description}: Pass full path. This option is valid only for \texttt{Tools}.
\end{enumerate}

\section{PlatformInfo}\label{platforminfo}
\subsection{Memory Properties}\label{platforminfomemory}
\begin{enumerate}
\item
  \texttt{FormFactor}\\
  \textbf{Type}: \texttt{plist\ integer}, 8 bit\\
  \textbf{Failsafe}: \texttt{0x02}\\
  \textbf{Description}: Memory form factor.
\end{enumerate}
\subsubsection{Memory Device Properties}\label{platforminfomemorydevice}
\begin{enumerate}
\item
  \texttt{Size}\\
  \textbf{Type}: \texttt{plist\ integer}\\
  \textbf{Failsafe}: \texttt{0}\\
  \textbf{Description}: Size in megabytes.
\end{enumerate}
";

    #[test]
    fn test_parse_entries() {
        let schema = parse(TEX);
        let keys: Vec<_> = schema.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["Add", "Comment", "Enabled", "Arguments", "RealPath", "FormFactor", "Size"]
        );
        let enabled = &schema.entries[2];
        assert_eq!(enabled.ty, "boolean");
        assert_eq!(enabled.failsafe, Value::Bool(false));
        assert_eq!(enabled.parents, vec![vec!["ACPI".to_string(), "Add".to_string()]]);
    }

    #[test]
    fn test_renames_and_narrowing() {
        let schema = parse(TEX);
        let raw = schema.raw();
        assert!(raw.contains_key("Misc.Entries.Arguments"));
        assert!(raw.contains_key("Misc.Tools.Arguments"));
        assert!(raw.contains_key("Misc.Tools.RealPath"));
        assert!(!raw.contains_key("Misc.Entries.RealPath"));
        assert!(raw.contains_key("PlatformInfo.Memory.Devices.Size"));
    }

    #[test]
    fn test_tree() {
        let tree = parse(TEX).tree();
        assert_eq!(
            tree.get_path(&parse_path("PlatformInfo.Memory.FormFactor")),
            Some(&Value::Integer(2))
        );
        assert_eq!(
            tree.get_path(&parse_path("ACPI.Add.Comment")),
            Some(&Value::String(String::new()))
        );
    }

    #[test]
    fn test_tree_skips_keys_under_scalars() {
        let entry = |parent: &[&str], key: &str, failsafe: Value| SchemaEntry {
            parents: vec![parent.iter().map(|s| (*s).to_string()).collect()],
            key: key.into(),
            ty: failsafe.type_name().into(),
            failsafe,
            raw: String::new(),
        };
        let schema = Schema {
            entries: vec![
                entry(&["Misc"], "Debug", Value::Integer(0)),
                entry(&["Misc", "Debug", "Inner"], "Flag", Value::Bool(false)),
                entry(&["Misc"], "Boot", Value::Bool(true)),
            ],
        };
        let tree = schema.tree();
        assert_eq!(tree.get_path(&parse_path("Misc.Debug")), Some(&Value::Integer(0)));
        assert_eq!(tree.get_path(&parse_path("Misc.Boot")), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_strip_latex() {
        assert_eq!(
            strip_latex(r"See \hyperref[x]{the \texttt{Add\_Entry}} section\\"),
            "See the Add_Entry section"
        );
    }
}
