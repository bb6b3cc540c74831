//! Version parsing and range matching
//!
//! Supports:
//! - Keywords: `latest`, `oldest`, `*`
//! - Ranges: `~1.2.3`, `^1.2.3`, `>1.0`, `<=2`, `==1.4.0`, `!=1.4.0`
//! - Exact: `1.2.3` (compared numerically, so `v1.2.3` also matches)
//!
//! Tags in the wild are messy (`v1.0.6`, `1.2`, `2.0.0-release`), so parsing
//! pads missing components and falls back to the first numeric run.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;

/// Suffixes stripped before parsing; upstream release tags carry them.
const STRIPPED_SUFFIXES: [&str; 4] = ["-release", "-debug", "-prerelease", "-stable"];

static NUMERIC_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9][0-9.]*").expect("numeric run pattern"));

/// A version reduced to `(major, minor, patch)` plus optional labels.
///
/// Ordering and equality only consider the numeric triple.
#[derive(Debug, Clone)]
pub struct ParsedVersion {
    /// Major component.
    pub major: u64,
    /// Minor component.
    pub minor: u64,
    /// Patch component.
    pub patch: u64,
    /// Pre-release label, if any.
    pub pre: Option<String>,
    /// Build metadata, if any.
    pub build: Option<String>,
}

impl ParsedVersion {
    /// Construct a plain numeric version.
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: None,
            build: None,
        }
    }

    fn key(&self) -> (u64, u64, u64) {
        (self.major, self.minor, self.patch)
    }
}

impl PartialEq for ParsedVersion {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ParsedVersion {}

impl PartialOrd for ParsedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ParsedVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl std::fmt::Display for ParsedVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{pre}")?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{build}")?;
        }
        Ok(())
    }
}

/// A binary comparison between two versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `==`
    Eq,
    /// `!=`
    Ne,
}

impl Comparator {
    /// Operator symbols, longest first so prefix matching is unambiguous.
    const SYMBOLS: [(&'static str, Comparator); 6] = [
        (">=", Self::Ge),
        ("<=", Self::Le),
        ("==", Self::Eq),
        ("!=", Self::Ne),
        (">", Self::Gt),
        ("<", Self::Lt),
    ];

    /// Split a leading operator off `s`.
    pub fn split_prefix(s: &str) -> Option<(Self, &str)> {
        Self::SYMBOLS
            .iter()
            .find_map(|(sym, op)| s.strip_prefix(sym).map(|rest| (*op, rest)))
    }

    /// Whether `ordering` (of left against right) satisfies the operator.
    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
        }
    }
}

impl std::str::FromStr for Comparator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::split_prefix(s) {
            Some((op, "")) => Ok(op),
            _ => Err(format!("Unknown comparison operator: {s}")),
        }
    }
}

/// Strip any range prefix, a leading `v`, and known release suffixes.
fn strip_decorations(s: &str) -> &str {
    let mut s = s.trim();
    if let Some((_, rest)) = Comparator::split_prefix(s) {
        s = rest;
    } else if let Some(rest) = s.strip_prefix(['~', '^']) {
        s = rest;
    }
    s = s.trim().trim_start_matches(['v', 'V']);
    for suffix in STRIPPED_SUFFIXES {
        let cut = s.len().saturating_sub(suffix.len());
        if s.len() > suffix.len() && s.get(cut..).is_some_and(|t| t.eq_ignore_ascii_case(suffix)) {
            s = &s[..cut];
            break;
        }
    }
    s
}

/// Pad `1` / `1.2` to three components so strict semver accepts them.
fn pad_components(s: &str) -> String {
    let split = s.find(['-', '+']).unwrap_or(s.len());
    let (core, rest) = s.split_at(split);
    let mut core = core.to_string();
    if !core.is_empty() && core.chars().all(|c| c.is_ascii_digit() || c == '.') {
        for _ in core.matches('.').count()..2 {
            core.push_str(".0");
        }
    }
    core + rest
}

/// Parse a version string, tolerating prefixes, suffixes and short forms.
///
/// Returns `None` when the string contains no digits at all.
pub fn parse_version(s: &str) -> Option<ParsedVersion> {
    let s = strip_decorations(s);
    if let Ok(v) = semver::Version::parse(&pad_components(s)) {
        return Some(ParsedVersion {
            major: v.major,
            minor: v.minor,
            patch: v.patch,
            pre: (!v.pre.is_empty()).then(|| v.pre.to_string()),
            build: (!v.build.is_empty()).then(|| v.build.to_string()),
        });
    }

    let run = NUMERIC_RUN.find(s)?.as_str();
    let mut parts = run
        .split('.')
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<u64>().unwrap_or(0));
    Some(ParsedVersion::new(
        parts.next()?,
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    ))
}

/// Compare two version strings with `op`. Unparseable input never
/// satisfies any comparison.
pub fn compare(left: &str, right: &str, op: Comparator) -> bool {
    match (parse_version(left), parse_version(right)) {
        (Some(l), Some(r)) => op.holds(l.cmp(&r)),
        _ => false,
    }
}

/// A parsed version specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpecifier {
    /// Highest available version.
    Latest,
    /// Lowest available version.
    Oldest,
    /// `*`: whatever a sibling package bundles; resolves like `latest`.
    Any,
    /// `~x.y.z`: same major and minor, at least `x.y.z`.
    Tilde(ParsedVersion),
    /// `^x.y.z`: same major, at least `x.y.z`.
    Caret(ParsedVersion),
    /// Comparison against a version.
    Compare(Comparator, ParsedVersion),
    /// Bare version, matched numerically.
    Exact(ParsedVersion),
    /// Anything else; matched verbatim against tag names.
    Literal(String),
}

impl VersionSpecifier {
    /// Classify a specifier string.
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        match trimmed {
            "latest" => return Self::Latest,
            "oldest" => return Self::Oldest,
            "*" => return Self::Any,
            _ => {}
        }

        let ranged = if let Some((op, rest)) = Comparator::split_prefix(trimmed) {
            parse_version(rest).map(|v| Self::Compare(op, v))
        } else if let Some(rest) = trimmed.strip_prefix('~') {
            parse_version(rest).map(Self::Tilde)
        } else if let Some(rest) = trimmed.strip_prefix('^') {
            parse_version(rest).map(Self::Caret)
        } else if looks_like_version(trimmed) {
            parse_version(trimmed).map(Self::Exact)
        } else {
            None
        };
        ranged.unwrap_or_else(|| Self::Literal(trimmed.to_string()))
    }

    /// Whether the specifier selects among several versions rather than
    /// naming one.
    pub fn is_range(&self) -> bool {
        !matches!(self, Self::Exact(_) | Self::Literal(_))
    }

    /// Whether `version` satisfies the specifier.
    pub fn matches(&self, version: &ParsedVersion) -> bool {
        match self {
            Self::Latest | Self::Oldest | Self::Any => true,
            Self::Tilde(base) => {
                version >= base && version.major == base.major && version.minor == base.minor
            }
            Self::Caret(base) => version >= base && version.major == base.major,
            Self::Compare(op, base) => op.holds(version.cmp(base)),
            Self::Exact(base) => version == base,
            Self::Literal(_) => false,
        }
    }
}

/// Bare version strings: optional `v`, then digits and dots, then an
/// optional label.
fn looks_like_version(s: &str) -> bool {
    let s = s.strip_prefix(['v', 'V']).unwrap_or(s);
    s.chars().next().is_some_and(|c| c.is_ascii_digit())
}

/// Whether `s` is a range or keyword rather than a concrete tag.
pub fn is_range_specifier(s: &str) -> bool {
    VersionSpecifier::parse(s).is_range()
}

/// Pick the best entry of `available` for `specifier`.
///
/// `oldest` picks the minimum satisfying version; everything else picks the
/// maximum. Specifiers that are neither keywords, ranges nor versions only
/// match a tag with the identical string.
pub fn resolve_specifier<'a, S: AsRef<str>>(available: &'a [S], specifier: &str) -> Option<&'a S> {
    let spec = VersionSpecifier::parse(specifier);
    match &spec {
        VersionSpecifier::Literal(literal) => {
            return available.iter().find(|v| v.as_ref() == literal);
        }
        VersionSpecifier::Exact(_) => {
            if let Some(hit) = available.iter().find(|v| v.as_ref() == specifier.trim()) {
                return Some(hit);
            }
        }
        _ => {}
    }

    let candidates = available
        .iter()
        .filter_map(|v| parse_version(v.as_ref()).map(|p| (p, v)))
        .filter(|(p, _)| spec.matches(p));

    let best = if spec == VersionSpecifier::Oldest {
        candidates.min_by(|a, b| a.0.cmp(&b.0))
    } else {
        candidates.max_by(|a, b| a.0.cmp(&b.0))
    };
    best.map(|(_, v)| v)
}

/// Minimum version a library must satisfy given every consumer's request:
/// the highest requested version, as a caret range. `None` when nobody
/// requests the library.
pub fn minimum_version<'a, I>(requests: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    requests
        .into_iter()
        .filter_map(parse_version)
        .max()
        .map(|v| format!("^{}.{}.{}", v.major, v.minor, v.patch))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAGS: [&str; 6] = ["1.2.2", "1.2.3", "1.2.4", "1.3.0", "1.3.1", "2.0.0"];

    #[test]
    fn test_parse_tolerant() {
        assert_eq!(parse_version("v1.0.6"), Some(ParsedVersion::new(1, 0, 6)));
        assert_eq!(parse_version("1.2"), Some(ParsedVersion::new(1, 2, 0)));
        assert_eq!(parse_version("2.0.0-release"), Some(ParsedVersion::new(2, 0, 0)));
        assert_eq!(parse_version("^1.4"), Some(ParsedVersion::new(1, 4, 0)));
        assert_eq!(parse_version("Build 1.02.3 final"), Some(ParsedVersion::new(1, 2, 3)));
        assert_eq!(parse_version("master"), None);

        let pre = parse_version("1.0.0-beta.1").unwrap();
        assert_eq!(pre.pre.as_deref(), Some("beta.1"));
    }

    #[test]
    fn test_ranges() {
        assert_eq!(resolve_specifier(&TAGS, "~1.2.2"), Some(&"1.2.4"));
        assert_eq!(resolve_specifier(&TAGS, "^1.2.2"), Some(&"1.3.1"));
        assert_eq!(resolve_specifier(&TAGS, "latest"), Some(&"2.0.0"));
        assert_eq!(resolve_specifier(&TAGS, "oldest"), Some(&"1.2.2"));
        assert_eq!(resolve_specifier(&TAGS, "<1.3.0"), Some(&"1.2.4"));
        assert_eq!(resolve_specifier(&TAGS, ">=2"), Some(&"2.0.0"));
        assert_eq!(resolve_specifier(&TAGS, "!=2.0.0"), Some(&"1.3.1"));
        assert_eq!(resolve_specifier(&TAGS, "^3.0.0"), None);
    }

    #[test]
    fn test_exact_and_literal() {
        let tags = ["v1.0.0", "1.1.0", "nightly"];
        assert_eq!(resolve_specifier(&tags, "1.0.0"), Some(&"v1.0.0"));
        assert_eq!(resolve_specifier(&tags, "1.1.0"), Some(&"1.1.0"));
        assert_eq!(resolve_specifier(&tags, "nightly"), Some(&"nightly"));
        assert_eq!(resolve_specifier(&tags, "foo"), None);
    }

    #[test]
    fn test_compare_is_antisymmetric() {
        for a in TAGS {
            for b in TAGS {
                assert_eq!(compare(a, b, Comparator::Lt), compare(b, a, Comparator::Gt));
                assert!(compare(a, b, Comparator::Le) || compare(b, a, Comparator::Le));
            }
        }
    }

    #[test]
    fn test_minimum_version() {
        assert_eq!(minimum_version(["1.0", "1.2"]), Some("^1.2.0".to_string()));
        assert_eq!(minimum_version(std::iter::empty()), None);
    }

    #[test]
    fn test_is_range() {
        assert!(is_range_specifier("latest"));
        assert!(is_range_specifier("~1.0"));
        assert!(!is_range_specifier("1.0.0"));
        assert!(!is_range_specifier("nightly"));
    }
}
