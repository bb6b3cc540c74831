//! Component tables (`ACPI.Add`, `UEFI.Drivers`, `Kernel.Add`,
//! `Misc.Tools`) rebuilt from the assembled output tree.

use std::collections::BTreeMap;
use std::path::Path;

use efibuild_schema::{Category, Dict, PathSegment, Value};
use tracing::{debug, warn};

use crate::acpi::{self, AcpiOrder};
use crate::error::Result;
use crate::io::fs::{GlobOptions, PathExt, glob};
use crate::kexts::{KextInfo, KextOrder, read_kext, sort_dependencies};

/// Directory the build phase keeps ACPI sources in, relative to the
/// output root.
pub const ACPI_SOURCES_DIR: &str = "Docs/ACPI";

fn entries(root: &Path, category: Category) -> Result<Vec<String>> {
    let dir = root.join(category.output_dir());
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let pattern = format!("*{}", category.extension());
    Ok(glob(&dir, &pattern, &GlobOptions::default())?
        .iter()
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(String::from))
        .collect())
}

fn record(fields: &[(&str, Value)]) -> Value {
    let mut d = Dict::new();
    for (k, v) in fields {
        d.insert((*k).to_string(), v.clone());
    }
    Value::Dict(d)
}

/// ACPI table order from the sources kept next to the output tree. Tables
/// without a source follow in name order.
pub fn acpi_order(root: &Path) -> Result<AcpiOrder> {
    let dir = root.join(ACPI_SOURCES_DIR);
    if !dir.is_dir() {
        return Ok(AcpiOrder::default());
    }
    let sources = glob(&dir, "*.dsl", &GlobOptions::default())?
        .into_iter()
        .map(|p| (p.stem_str().to_string(), p))
        .collect();
    acpi::sort_tables(&acpi::scan_tables(&sources)?)
}

/// Kext metadata for every bundle in the output tree, keyed by bundle stem.
/// Kernel ranges are taken from `existing` records.
pub fn scan_kexts(root: &Path, existing: &[Value]) -> Result<BTreeMap<String, KextInfo>> {
    let mut kexts = BTreeMap::new();
    for file_name in entries(root, Category::Kexts)? {
        let bundle = root.join(Category::Kexts.output_dir()).join(&file_name);
        let mut info = read_kext(&bundle)?;
        if let Some(previous) = existing
            .iter()
            .find(|r| r.get("BundlePath").and_then(Value::as_str) == Some(file_name.as_str()))
        {
            let text = |k: &str| {
                previous
                    .get(k)
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
            };
            info.min_kernel = text("MinKernel");
            info.max_kernel = text("MaxKernel");
        }
        kexts.insert(Path::new(&file_name).stem_str().to_string(), info);
    }
    Ok(kexts)
}

/// Records for `category`, in load order.
pub fn component_records(root: &Path, category: Category, existing: &[Value]) -> Result<Vec<Value>> {
    let files = entries(root, category)?;
    let records = match category {
        Category::Acpi => {
            let order = acpi_order(root)?;
            let mut ordered: Vec<String> = order
                .order
                .iter()
                .map(|name| format!("{name}.aml"))
                .filter(|f| files.contains(f))
                .collect();
            ordered.extend(files.iter().filter(|f| !ordered.contains(f)).cloned().collect::<Vec<_>>());
            ordered
                .into_iter()
                .map(|f| record(&[("Path", f.into()), ("Enabled", true.into())]))
                .collect()
        }
        Category::Drivers => files
            .into_iter()
            .map(|f| record(&[("Path", f.into()), ("Enabled", true.into())]))
            .collect(),
        Category::Tools => files
            .into_iter()
            .map(|f| {
                record(&[
                    ("Name", f.clone().into()),
                    ("Path", f.into()),
                    ("Enabled", true.into()),
                ])
            })
            .collect(),
        Category::Kexts => {
            let kexts = scan_kexts(root, existing)?;
            let order = sort_dependencies(&kexts)?;
            report_kext_order(&order);
            order
                .order
                .iter()
                .map(|name| {
                    let info = &kexts[name];
                    let mut fields = vec![
                        ("BundlePath", Value::from(format!("{name}.kext"))),
                        ("PlistPath", Value::from(info.plist_path.clone())),
                    ];
                    let bundle = root.join(Category::Kexts.output_dir()).join(format!("{name}.kext"));
                    if let Some(exe) = info.executable_path().filter(|e| bundle.join(e).is_file()) {
                        fields.push(("ExecutablePath", exe.into()));
                    }
                    fields.push(("Enabled", true.into()));
                    record(&fields)
                })
                .collect()
        }
        Category::OpenCorePkg => Vec::new(),
    };
    Ok(records)
}

fn report_kext_order(order: &KextOrder) {
    for (id, names) in &order.duplicates {
        warn!(identifier = %id, kexts = ?names, "duplicate kext identifier with overlapping kernel range");
    }
    for (kext, id) in &order.unresolved {
        warn!(kext = %kext, dependency = %id, "kext dependency is not in the tree");
    }
    for (name, minimum) in &order.minimums {
        if let Some(min) = minimum {
            debug!(kext = %name, minimum = %min, "required library version");
        }
    }
}

/// Replace the table for `category` in `config` with `records`. Unless
/// `clean`, fields of existing records with the same key survive.
pub fn rewrite_table(config: &mut Value, category: Category, records: Vec<Value>, clean: bool) -> Result<()> {
    let Some(location) = category.config_path() else {
        return Ok(());
    };
    let path: Vec<PathSegment> = location.iter().map(|s| PathSegment::from(*s)).collect();
    let key = category.record_key();
    let existing: Vec<Value> = config
        .get_path(&path)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let table = records
        .into_iter()
        .map(|rec| {
            let id = rec.get(key).cloned();
            match existing.iter().find(|e| !clean && id.is_some() && e.get(key).cloned() == id) {
                Some(previous) => {
                    let mut merged = previous.clone();
                    merged.deep_merge(&rec);
                    merged
                }
                None => rec,
            }
        })
        .collect();
    config.set_path(&path, Value::Array(table))?;
    Ok(())
}

/// Deep-merge `properties` into the record of `category` whose key is `id`.
/// Returns whether a record matched.
pub fn merge_record(config: &mut Value, category: Category, id: &str, properties: &Value) -> bool {
    let Some(location) = category.config_path() else {
        return false;
    };
    let path: Vec<PathSegment> = location.iter().map(|s| PathSegment::from(*s)).collect();
    let key = category.record_key();
    let Some(Value::Array(records)) = config.get_path_mut(&path) else {
        return false;
    };
    match records
        .iter_mut()
        .find(|r| r.get(key).and_then(Value::as_str) == Some(id))
    {
        Some(record) => {
            record.deep_merge(properties);
            true
        }
        None => false,
    }
}

/// Rebuild every component table from the tree at `root`.
pub fn rewrite_tables(config: &mut Value, root: &Path, clean: bool) -> Result<()> {
    for category in Category::COMPONENTS {
        let existing: Vec<Value> = category
            .config_path()
            .and_then(|loc| {
                let path: Vec<PathSegment> = loc.iter().map(|s| PathSegment::from(*s)).collect();
                config.get_path(&path).and_then(Value::as_array).cloned()
            })
            .unwrap_or_default();
        let records = component_records(root, category, &existing)?;
        debug!(category = %category, records = records.len(), "rewriting component table");
        rewrite_table(config, category, records, clean)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use efibuild_schema::dict;
    use std::fs;
    use tempfile::tempdir;

    fn write_kext(root: &Path, name: &str, id: &str, deps: &[&str]) {
        let bundle = root.join("EFI/OC/Kexts").join(format!("{name}.kext"));
        fs::create_dir_all(bundle.join("Contents/MacOS")).unwrap();
        fs::write(bundle.join("Contents/MacOS").join(name), b"bin").unwrap();
        let libs: String = deps
            .iter()
            .map(|d| format!("<key>{d}</key><string>1.0.0</string>"))
            .collect();
        let plist = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict>
<key>CFBundleIdentifier</key><string>{id}</string>
<key>CFBundleExecutable</key><string>{name}</string>
<key>CFBundleVersion</key><string>1.0.0</string>
<key>OSBundleLibraries</key><dict>{libs}</dict>
</dict></plist>"#
        );
        fs::write(bundle.join("Contents/Info.plist"), plist).unwrap();
    }

    #[test]
    fn test_kext_table_in_dependency_order() {
        let dir = tempdir().unwrap();
        write_kext(dir.path(), "WhateverGreen", "as.vit9696.WEG", &["as.vit9696.Lilu"]);
        write_kext(dir.path(), "Lilu", "as.vit9696.Lilu", &[]);

        let records = component_records(dir.path(), Category::Kexts, &[]).unwrap();
        let bundles: Vec<_> = records
            .iter()
            .map(|r| r.get("BundlePath").and_then(Value::as_str).unwrap())
            .collect();
        assert_eq!(bundles, vec!["Lilu.kext", "WhateverGreen.kext"]);
        assert_eq!(
            records[0].get("ExecutablePath"),
            Some(&Value::from("Contents/MacOS/Lilu"))
        );
        assert_eq!(records[0].get("PlistPath"), Some(&Value::from("Contents/Info.plist")));
    }

    #[test]
    fn test_acpi_table_follows_source_order() {
        let dir = tempdir().unwrap();
        let acpi = dir.path().join("EFI/OC/ACPI");
        let sources = dir.path().join(ACPI_SOURCES_DIR);
        fs::create_dir_all(&acpi).unwrap();
        fs::create_dir_all(&sources).unwrap();
        for name in ["SSDT-A", "SSDT-B", "SSDT-Z"] {
            fs::write(acpi.join(format!("{name}.aml")), b"aml").unwrap();
        }
        fs::write(
            sources.join("SSDT-A.dsl"),
            "DefinitionBlock (\"\", \"SSDT\", 2, \"ACDT\", \"A\", 0) { Scope (_SB) { Device (ZZZZ) {} } }",
        )
        .unwrap();
        fs::write(
            sources.join("SSDT-B.dsl"),
            "DefinitionBlock (\"\", \"SSDT\", 2, \"ACDT\", \"B\", 0) { External (_SB.ZZZZ, DeviceObj) Scope (_SB.ZZZZ) { Name (FOO, One) } }",
        )
        .unwrap();

        let records = component_records(dir.path(), Category::Acpi, &[]).unwrap();
        let paths: Vec<_> = records
            .iter()
            .map(|r| r.get("Path").and_then(Value::as_str).unwrap())
            .collect();
        assert_eq!(paths, vec!["SSDT-A.aml", "SSDT-B.aml", "SSDT-Z.aml"]);
    }

    #[test]
    fn test_rewrite_merges_unless_clean() {
        let mut config = dict! {
            "UEFI" => dict! {
                "Drivers" => vec![
                    dict! { "Path" => "OpenRuntime.efi", "Arguments" => "x", "Enabled" => false },
                    dict! { "Path" => "Gone.efi", "Enabled" => true },
                ],
            },
        };
        let records = vec![dict! { "Path" => "OpenRuntime.efi", "Enabled" => true }];
        rewrite_table(&mut config, Category::Drivers, records.clone(), false).unwrap();
        assert_eq!(
            config.get("UEFI").and_then(|u| u.get("Drivers")),
            Some(&Value::from(vec![
                dict! { "Path" => "OpenRuntime.efi", "Arguments" => "x", "Enabled" => true },
            ]))
        );

        rewrite_table(&mut config, Category::Drivers, records.clone(), true).unwrap();
        assert_eq!(
            config.get("UEFI").and_then(|u| u.get("Drivers")),
            Some(&Value::from(records))
        );
    }
}
