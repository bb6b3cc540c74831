//! Bootloader configuration pipeline: patches, component tables, schema
//! failsafes.

pub mod tables;
pub mod tags;

use std::path::{Path, PathBuf};

use efibuild_schema::{PathSegment, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::parsers::manifest as doc;
use crate::parsers::plist::read_plist;
use crate::parsers::schema::Schema;

pub use tables::{ACPI_SOURCES_DIR, component_records, rewrite_table, rewrite_tables};
pub use tags::{Tag, TagKind, apply_tag, parse_tags};

/// Configuration path inside the output tree.
pub const CONFIG_PATH: &str = "EFI/OC/config.plist";
/// Sample configuration shipped with the bootloader.
pub const SAMPLE_PATH: &str = "Docs/Sample.plist";
/// Configuration reference shipped with the bootloader.
pub const REFERENCE_PATH: &str = "Docs/Configuration.tex";

/// A document to merge into the configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    pub tags: Vec<Tag>,
    pub body: Value,
    pub source: Option<PathBuf>,
}

impl Patch {
    /// A patch in the manifest language, with `tags` read from frontmatter.
    pub fn parse(text: &str, flags: &[String]) -> Result<Self> {
        let document = doc::parse(text, flags)?;
        Ok(Self {
            tags: parse_tags(document.frontmatter.as_ref())?,
            body: document.body,
            source: None,
        })
    }

    /// Load a patch file; `.plist` files are property lists without tags.
    pub fn load(path: &Path, flags: &[String]) -> Result<Self> {
        let is_plist = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("plist"));
        let mut patch = if is_plist {
            Self {
                body: read_plist(path)?,
                ..Self::default()
            }
        } else {
            Self::parse(&std::fs::read_to_string(path)?, flags)?
        };
        patch.source = Some(path.to_path_buf());
        Ok(patch)
    }
}

/// Apply `patch`'s tags to `base`, then deep-merge what remains of it.
///
/// # Errors
///
/// [`Error::SchemaViolation`] for tags that cannot be applied.
pub fn apply_patch(base: &mut Value, patch: &Patch) -> Result<()> {
    let mut body = patch.body.clone();
    for tag in &patch.tags {
        debug!(tag = tag.kind.as_str(), path = %efibuild_schema::format_path(&tag.path), "applying tag");
        apply_tag(base, &mut body, tag)?;
    }
    if !body.is_null() {
        base.deep_merge(&body);
    }
    Ok(())
}

fn key_path(parent: &[String]) -> Vec<PathSegment> {
    parent.iter().map(|s| PathSegment::Key(s.clone())).collect()
}

/// Insert failsafe values for keys the configuration leaves out.
///
/// Only locations the sample configuration carries are filled. For array
/// tables each element missing the key receives the failsafe.
pub fn apply_schema_defaults(config: &mut Value, sample: &Value, schema: &Schema) -> Result<usize> {
    let mut inserted = 0usize;
    for (parent, key, failsafe) in schema.leaves() {
        let parent_path = key_path(parent);
        if sample.get_path(&parent_path).is_none() {
            continue;
        }
        match config.get_path_mut(&parent_path) {
            Some(Value::Array(items)) => {
                for item in items.iter_mut() {
                    if let Value::Dict(fields) = item {
                        if !fields.contains_key(key) {
                            fields.insert(key.to_string(), failsafe.clone());
                            inserted += 1;
                        }
                    }
                }
            }
            Some(Value::Dict(fields)) => {
                if !fields.contains_key(key) {
                    fields.insert(key.to_string(), failsafe.clone());
                    inserted += 1;
                }
            }
            Some(_) => {}
            None => {
                if sample.get_path(&parent_path).is_some_and(|s| matches!(s, Value::Dict(_))) {
                    let mut path = parent_path;
                    path.push(PathSegment::Key(key.to_string()));
                    config.set_path(&path, failsafe.clone())?;
                    inserted += 1;
                }
            }
        }
    }
    Ok(inserted)
}

/// Load the configuration at `path`, which must be a dictionary.
pub fn load_config(path: &Path) -> Result<Value> {
    if !path.is_file() {
        return Err(Error::PathNotFound(path.to_path_buf()));
    }
    match read_plist(path)? {
        config @ Value::Dict(_) => Ok(config),
        other => Err(Error::SchemaViolation(format!(
            "{} must hold a dictionary, got {}",
            path.display(),
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::schema::SchemaEntry;
    use efibuild_schema::{dict, parse_path};

    fn patch(body: Value, tags: Vec<Tag>) -> Patch {
        Patch {
            tags,
            body,
            source: None,
        }
    }

    #[test]
    fn test_empty_delete() {
        let mut base = dict! { "X" => dict! { "Y" => 1_i64, "Z" => 2_i64 } };
        let p = patch(
            dict! { "X" => dict! { "Y" => Value::Null } },
            vec![Tag {
                kind: TagKind::Delete,
                path: parse_path("X.Y"),
                options: None,
            }],
        );
        apply_patch(&mut base, &p).unwrap();
        assert_eq!(base, dict! { "X" => dict! { "Z" => 2_i64 } });
    }

    #[test]
    fn test_override_by_primary_key() {
        let mut base = dict! {
            "A" => vec![dict! { "k" => "a", "v" => 1_i64 }, dict! { "k" => "b", "v" => 2_i64 }],
        };
        let p = patch(
            dict! { "A" => vec![dict! { "k" => "b", "v" => 99_i64 }] },
            vec![Tag {
                kind: TagKind::Override,
                path: parse_path("A.0"),
                options: Some("k".into()),
            }],
        );
        apply_patch(&mut base, &p).unwrap();
        assert_eq!(
            base,
            dict! {
                "A" => vec![dict! { "k" => "a", "v" => 1_i64 }, dict! { "k" => "b", "v" => 99_i64 }],
            }
        );
    }

    #[test]
    fn test_untagged_patch_is_deep_merge_and_idempotent() {
        let base = dict! { "A" => dict! { "x" => 1_i64 }, "L" => vec![Value::from(1_i64)] };
        let p = patch(dict! { "A" => dict! { "y" => 2_i64 }, "L" => vec![Value::from(3_i64)] }, vec![]);

        let mut once = base.clone();
        apply_patch(&mut once, &p).unwrap();
        let mut merged = base.clone();
        merged.deep_merge(&p.body);
        assert_eq!(once, merged);

        let mut twice = once.clone();
        apply_patch(&mut twice, &p).unwrap();
        assert_eq!(twice, once);
    }

    #[test]
    fn test_patch_from_manifest_language() {
        let text = "---\ntags:\n  - [\"@append\", Kernel.Args, \" \"]\n---\nKernel:\n  Args: debug=0x100\n";
        let p = Patch::parse(text, &[]).unwrap();
        assert_eq!(p.tags.len(), 1);
        let mut base = dict! { "Kernel" => dict! { "Args" => "-v" } };
        apply_patch(&mut base, &p).unwrap();
        assert_eq!(base, dict! { "Kernel" => dict! { "Args" => "-v debug=0x100" } });
    }

    #[test]
    fn test_schema_defaults() {
        let schema = Schema {
            entries: vec![
                SchemaEntry {
                    parents: vec![vec!["Kernel".into(), "Add".into()]],
                    key: "MinKernel".into(),
                    ty: "string".into(),
                    failsafe: Value::from(""),
                    raw: String::new(),
                },
                SchemaEntry {
                    parents: vec![vec!["Misc".into(), "Debug".into()]],
                    key: "Target".into(),
                    ty: "integer".into(),
                    failsafe: Value::Integer(0),
                    raw: String::new(),
                },
                SchemaEntry {
                    parents: vec![vec!["Unknown".into()]],
                    key: "Key".into(),
                    ty: "boolean".into(),
                    failsafe: Value::Bool(false),
                    raw: String::new(),
                },
            ],
        };
        let sample = dict! {
            "Kernel" => dict! { "Add" => Vec::<Value>::new() },
            "Misc" => dict! { "Debug" => dict! { "Target" => 3_i64 } },
        };
        let mut config = dict! {
            "Kernel" => dict! { "Add" => vec![dict! { "BundlePath" => "Lilu.kext" }] },
            "Misc" => dict! { "Debug" => dict!() },
        };
        let inserted = apply_schema_defaults(&mut config, &sample, &schema).unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(
            config,
            dict! {
                "Kernel" => dict! { "Add" => vec![dict! { "BundlePath" => "Lilu.kext", "MinKernel" => "" }] },
                "Misc" => dict! { "Debug" => dict! { "Target" => 0_i64 } },
            }
        );
    }
}
