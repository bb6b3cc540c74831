//! The user-authored build manifest.

use std::path::{Path, PathBuf};

use efibuild_schema::{BuildVariant, Category, Dict, Target, Value};
use tracing::warn;

use crate::error::{Error, Result};
use crate::parsers::manifest as doc;

/// Specifier of the bootloader when the manifest does not name one.
pub const BOOTLOADER_REPO: &str = "acidanthera/OpenCorePkg";
/// Entry name of the synthesized bootloader.
pub const BOOTLOADER_NAME: &str = "OpenCore";
/// Specifier meaning "shipped inside a sibling package".
pub const BUNDLED: &str = "*";

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub category: Category,
    pub name: String,
    /// Specifier string, or a mapping with `specifier` and overrides.
    pub specifier: Value,
    pub build: Option<BuildVariant>,
    pub properties: Option<Value>,
    /// Plugin bundles to promote out of this entry's package.
    pub bundled: Vec<String>,
    pub filepath: Option<String>,
}

impl ManifestEntry {
    fn from_value(category: Category, name: &str, value: &Value) -> Result<Self> {
        let mut entry = Self {
            category,
            name: name.to_string(),
            specifier: value.clone(),
            build: None,
            properties: None,
            bundled: Vec::new(),
            filepath: None,
        };
        let Value::Dict(fields) = value else {
            if value.as_str().is_none() {
                return Err(Error::SpecifierSyntax(format!(
                    "{category}.{name}: expected a string or mapping, got {}",
                    value.type_name()
                )));
            }
            return Ok(entry);
        };

        if let Some(build) = fields.get("build").and_then(Value::as_str) {
            entry.build = Some(build.parse().map_err(Error::SpecifierSyntax)?);
        }
        entry.properties = fields.get("properties").cloned();
        entry.filepath = fields.get("__filepath").and_then(Value::as_str).map(String::from);
        entry.bundled = match fields.get("bundled") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            Some(Value::String(one)) => vec![one.clone()],
            _ => Vec::new(),
        };
        Ok(entry)
    }

    /// The bare specifier string.
    pub fn specifier_str(&self) -> &str {
        match &self.specifier {
            Value::String(s) => s,
            other => other
                .get("specifier")
                .and_then(Value::as_str)
                .unwrap_or(&self.name),
        }
    }

    /// Whether this entry points into a sibling package instead of naming
    /// a source of its own.
    pub fn is_bundled(&self) -> bool {
        self.specifier_str().trim() == BUNDLED
    }

    /// Destination relative to the output tree.
    pub fn filepath(&self) -> String {
        self.filepath
            .clone()
            .unwrap_or_else(|| self.category.default_filepath(&self.name))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub frontmatter: Dict,
    /// Bootloader version pin.
    pub version: Option<String>,
    pub build: BuildVariant,
    pub target: Target,
    pub flags: Vec<String>,
    /// Sorted by `(category, name)`.
    pub entries: Vec<ManifestEntry>,
    /// Directory relative local specifiers are resolved against.
    pub base_dir: PathBuf,
}

impl Manifest {
    pub fn load(path: &Path, flags: &[String]) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::parse(&text, &base, flags)
    }

    pub fn parse(text: &str, base_dir: &Path, flags: &[String]) -> Result<Self> {
        let document = doc::parse(text, flags)?;
        let frontmatter = match document.frontmatter {
            Some(Value::Dict(d)) => d,
            Some(Value::Null) | None => Dict::new(),
            Some(other) => {
                return Err(Error::SchemaViolation(format!(
                    "frontmatter must be a mapping, got {}",
                    other.type_name()
                )));
            }
        };

        let text_field = |key: &str| frontmatter.get(key).and_then(Value::as_str);
        let build = match text_field("build") {
            Some(b) => b.parse().map_err(Error::SchemaViolation)?,
            None => BuildVariant::default(),
        };
        let target = match text_field("target") {
            Some(t) => t.parse().map_err(Error::SchemaViolation)?,
            None => Target::default(),
        };
        let version = text_field("version").map(String::from);
        let mut all_flags: Vec<String> = flags.to_vec();
        if let Some(Value::Array(listed)) = frontmatter.get("flags") {
            all_flags.extend(listed.iter().filter_map(|v| v.as_str().map(String::from)));
        }

        let mut entries = Vec::new();
        match &document.body {
            Value::Dict(sections) => {
                for (section, items) in sections {
                    let Ok(category) = section.parse::<Category>() else {
                        warn!(section = %section, "ignoring unknown manifest section");
                        continue;
                    };
                    match items {
                        Value::Dict(items) => {
                            for (name, value) in items {
                                entries.push(ManifestEntry::from_value(category, name, value)?);
                            }
                        }
                        Value::Null => {}
                        other => {
                            return Err(Error::SchemaViolation(format!(
                                "section {category} must be a mapping, got {}",
                                other.type_name()
                            )));
                        }
                    }
                }
            }
            Value::Null => {}
            other => {
                return Err(Error::SchemaViolation(format!(
                    "manifest must be a mapping, got {}",
                    other.type_name()
                )));
            }
        }

        if !entries.iter().any(|e| e.category == Category::OpenCorePkg) {
            let mut spec = Dict::new();
            spec.insert("specifier".into(), Value::from(BOOTLOADER_REPO));
            spec.insert(
                "tag".into(),
                Value::from(version.clone().unwrap_or_else(|| "latest".into())),
            );
            entries.push(ManifestEntry::from_value(
                Category::OpenCorePkg,
                BOOTLOADER_NAME,
                &Value::Dict(spec),
            )?);
        }
        entries.sort_by(|a, b| (a.category, &a.name).cmp(&(b.category, &b.name)));

        Ok(Self {
            frontmatter,
            version,
            build,
            target,
            flags: all_flags,
            entries,
            base_dir: base_dir.to_path_buf(),
        })
    }

    pub fn get(&self, category: Category, name: &str) -> Option<&ManifestEntry> {
        self.entries
            .iter()
            .find(|e| e.category == category && e.name == name)
    }

    pub fn contains(&self, category: Category, name: &str) -> bool {
        self.get(category, name).is_some()
    }

    pub fn in_category(&self, category: Category) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(move |e| e.category == category)
    }

    /// The bootloader entry (always present after parsing).
    pub fn bootloader(&self) -> Option<&ManifestEntry> {
        self.in_category(Category::OpenCorePkg).next()
    }

    /// Every `(category, name)` expected in the output tree, bundled
    /// plugin names included.
    pub fn expected_outputs(&self) -> Vec<(Category, String)> {
        let mut out = Vec::new();
        for entry in &self.entries {
            if entry.category == Category::OpenCorePkg {
                continue;
            }
            out.push((entry.category, entry.name.clone()));
            out.extend(entry.bundled.iter().map(|b| (entry.category, b.clone())));
        }
        out.sort();
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = "\
---
version: 1.0.2
build: DEBUG
flags: [LAPTOP]
---
Kexts:
  VirtualSMC:
    specifier: acidanthera/VirtualSMC
    bundled: [SMCBatteryManager, SMCProcessor]
  Lilu: acidanthera/Lilu=latest
@ifdef LAPTOP
  VoodooPS2Controller: acidanthera/VoodooPS2
@endif
ACPI:
  SSDT-EC: ./SSDT-EC.dsl
Drivers:
  HfsPlus: '*'
";

    #[test]
    fn test_parse_manifest() {
        let manifest = Manifest::parse(MANIFEST, Path::new("/work"), &[]).unwrap();
        assert_eq!(manifest.build, BuildVariant::Debug);
        assert_eq!(manifest.version.as_deref(), Some("1.0.2"));

        let order: Vec<_> = manifest
            .entries
            .iter()
            .map(|e| format!("{}/{}", e.category, e.name))
            .collect();
        assert_eq!(
            order,
            vec![
                "OpenCorePkg/OpenCore",
                "ACPI/SSDT-EC",
                "Drivers/HfsPlus",
                "Kexts/Lilu",
                "Kexts/VirtualSMC",
                "Kexts/VoodooPS2Controller",
            ]
        );

        let oc = manifest.bootloader().unwrap();
        assert_eq!(oc.specifier.get("tag"), Some(&Value::from("1.0.2")));
        assert_eq!(oc.filepath(), "EFI/OC/OpenCore.efi");

        let smc = manifest.get(Category::Kexts, "VirtualSMC").unwrap();
        assert_eq!(smc.bundled, vec!["SMCBatteryManager", "SMCProcessor"]);
        assert_eq!(smc.specifier_str(), "acidanthera/VirtualSMC");
        assert!(manifest.get(Category::Drivers, "HfsPlus").unwrap().is_bundled());
        assert_eq!(
            manifest.get(Category::Acpi, "SSDT-EC").unwrap().filepath(),
            "EFI/OC/ACPI/SSDT-EC.aml"
        );
    }

    #[test]
    fn test_expected_outputs_include_bundled() {
        let manifest = Manifest::parse(MANIFEST, Path::new("/work"), &[]).unwrap();
        let outputs = manifest.expected_outputs();
        assert!(outputs.contains(&(Category::Kexts, "SMCProcessor".to_string())));
        assert!(!outputs.iter().any(|(c, _)| *c == Category::OpenCorePkg));
    }

    #[test]
    fn test_bad_build_variant() {
        let err = Manifest::parse("---\nbuild: FAST\n---\n", Path::new("."), &[]).unwrap_err();
        assert!(matches!(err, Error::SchemaViolation(_)));
    }
}
