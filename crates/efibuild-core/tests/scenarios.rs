//! End-to-end runs of the three phases against fixture packages.

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use efibuild_core::config::CONFIG_PATH;
use efibuild_core::ops::{self, Context, PatchOptions};
use efibuild_core::parsers::plist::read_plist;
use efibuild_core::{CatalogConfig, Environment, NullReporter, ResolveOptions};
use efibuild_schema::{Category, Value, parse_path};
use mockito::{Matcher, Server};
use tempfile::{TempDir, tempdir};

const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
	<key>ACPI</key>
	<dict>
		<key>Add</key>
		<array>
			<dict>
				<key>Comment</key>
				<string>My custom DSDT</string>
				<key>Enabled</key>
				<false/>
				<key>Path</key>
				<string>DSDT.aml</string>
			</dict>
		</array>
	</dict>
	<key>Kernel</key>
	<dict>
		<key>Add</key>
		<array>
			<dict>
				<key>BundlePath</key>
				<string>Lilu.kext</string>
				<key>Comment</key>
				<string>Patch engine</string>
				<key>Enabled</key>
				<true/>
			</dict>
		</array>
	</dict>
	<key>Misc</key>
	<dict>
		<key>Tools</key>
		<array/>
	</dict>
	<key>UEFI</key>
	<dict>
		<key>Drivers</key>
		<array>
			<dict>
				<key>Arguments</key>
				<string></string>
				<key>Enabled</key>
				<true/>
				<key>Path</key>
				<string>OpenRuntime.efi</string>
			</dict>
		</array>
	</dict>
</dict>
</plist>
"#;

fn touch(path: &Path, contents: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn kext(root: &Path, name: &str, id: &str, deps: &[&str]) {
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
    touch(&root.join("Contents/Info.plist"), plist.as_bytes());
    touch(&root.join("Contents/MacOS").join(name), b"bin");
}

fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default();
        for (name, contents) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(contents).unwrap();
        }
        zip.finish().unwrap();
    }
    cursor.into_inner()
}

fn context(dir: &Path, config: CatalogConfig) -> Context {
    let env = Environment {
        output: dir.join("dist"),
        cache_root: Some(dir.join("cache")),
        ..Environment::default()
    };
    Context::github(env, config, Arc::new(NullReporter)).unwrap()
}

fn table<'a>(config: &'a Value, path: &str) -> &'a [Value] {
    config
        .get_path(&parse_path(path))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn keys<'a>(records: &'a [Value], key: &str) -> Vec<&'a str> {
    records
        .iter()
        .filter_map(|r| r.get(key).and_then(Value::as_str))
        .collect()
}

/// A workspace with a local bootloader, one local table, two local kext
/// packages and a manifest listing them.
fn local_workspace() -> (TempDir, PathBuf, PathBuf) {
    let dir = tempdir().unwrap();
    let root = dir.path();

    let oc = root.join("OpenCorePkg");
    touch(&oc.join("X64/EFI/BOOT/BOOTx64.efi"), b"boot");
    touch(&oc.join("X64/EFI/OC/OpenCore.efi"), b"oc");
    touch(&oc.join("X64/EFI/OC/Drivers/OpenRuntime.efi"), b"rt");
    touch(&oc.join("X64/EFI/OC/Drivers/OpenHfsPlus.efi"), b"hfs");
    touch(&oc.join("IA32/EFI/OC/OpenCore.efi"), b"oc32");
    touch(&oc.join("Docs/Sample.plist"), SAMPLE.as_bytes());

    touch(&root.join("ACPI/SSDT-EC.aml"), b"aml");

    kext(&root.join("Lilu/Release/Lilu.kext"), "Lilu", "as.vit9696.Lilu", &[]);
    kext(&root.join("Lilu/Debug/Lilu.kext"), "Lilu", "as.vit9696.Lilu", &[]);

    let ps2 = root.join("VoodooPS2/Release/VoodooPS2Controller.kext");
    kext(&ps2, "VoodooPS2Controller", "as.acidanthera.voodoo.driver.PS2Controller", &[]);
    kext(
        &ps2.join("Contents/PlugIns/VoodooPS2Keyboard.kext"),
        "VoodooPS2Keyboard",
        "as.acidanthera.voodoo.driver.PS2Keyboard",
        &["as.acidanthera.voodoo.driver.PS2Controller"],
    );
    kext(
        &ps2.join("Contents/PlugIns/VoodooPS2Mouse.kext"),
        "VoodooPS2Mouse",
        "as.acidanthera.voodoo.driver.PS2Mouse",
        &["as.acidanthera.voodoo.driver.PS2Controller"],
    );

    let manifest = root.join("efibuild.yml");
    fs::write(
        &manifest,
        "\
---
build: RELEASE
target: X64
---
OpenCorePkg:
  OpenCore: ./OpenCorePkg
ACPI:
  SSDT-EC: ./ACPI/SSDT-EC.aml
Drivers:
  OpenRuntime: '*'
Kexts:
  Lilu:
    specifier: ./Lilu
    properties:
      MinKernel: 20.0.0
  VoodooPS2Controller:
    specifier: ./VoodooPS2
    bundled: [VoodooPS2Keyboard]
",
    )
    .unwrap();
    let lockfile = root.join("efibuild.lock");
    (dir, manifest, lockfile)
}

fn offline() -> CatalogConfig {
    CatalogConfig::single_host("http://127.0.0.1:9")
}

#[tokio::test]
async fn test_local_build_and_patch() {
    let (dir, manifest, lockfile) = local_workspace();
    let ctx = context(dir.path(), offline());

    ops::run(
        &ctx,
        &manifest,
        &lockfile,
        ResolveOptions::default(),
        &PatchOptions::default(),
    )
    .await
    .unwrap();

    let out = dir.path().join("dist");
    assert!(out.join("EFI/BOOT/BOOTx64.efi").is_file());
    assert!(out.join("EFI/OC/OpenCore.efi").is_file());
    assert!(out.join("EFI/OC/ACPI/SSDT-EC.aml").is_file());
    assert!(out.join("EFI/OC/Drivers/OpenRuntime.efi").is_file());
    assert!(!out.join("EFI/OC/Drivers/OpenHfsPlus.efi").exists());
    assert!(out.join("EFI/OC/Kexts/Lilu.kext/Contents/Info.plist").is_file());
    assert!(out.join("EFI/OC/Kexts/VoodooPS2Keyboard.kext/Contents/Info.plist").is_file());

    let controller = out.join("EFI/OC/Kexts/VoodooPS2Controller.kext/Contents/PlugIns");
    assert!(!controller.join("VoodooPS2Keyboard.kext").exists());
    // Not listed as bundled, so pruned.
    assert!(!controller.join("VoodooPS2Mouse.kext").exists());

    let config = read_plist(&out.join(CONFIG_PATH)).unwrap();
    assert_eq!(keys(table(&config, "ACPI.Add"), "Path"), vec!["SSDT-EC.aml"]);

    let drivers = table(&config, "UEFI.Drivers");
    assert_eq!(keys(drivers, "Path"), vec!["OpenRuntime.efi"]);
    assert_eq!(drivers[0].get("Arguments"), Some(&Value::from("")));

    let kexts = table(&config, "Kernel.Add");
    let bundles = keys(kexts, "BundlePath");
    assert_eq!(bundles.len(), 3);
    let position = |name: &str| bundles.iter().position(|b| *b == name).unwrap();
    assert!(position("VoodooPS2Controller.kext") < position("VoodooPS2Keyboard.kext"));

    let lilu = &kexts[position("Lilu.kext")];
    assert_eq!(lilu.get("MinKernel"), Some(&Value::from("20.0.0")));
    assert_eq!(lilu.get("Comment"), Some(&Value::from("Patch engine")));
    assert_eq!(lilu.get("ExecutablePath"), Some(&Value::from("Contents/MacOS/Lilu")));
    assert!(table(&config, "Misc.Tools").is_empty());
}

#[tokio::test]
async fn test_resolve_is_stable() {
    let (dir, manifest, lockfile) = local_workspace();
    let ctx = context(dir.path(), offline());

    ops::resolve(&ctx, &manifest, &lockfile, ResolveOptions::default())
        .await
        .unwrap();
    let first = fs::read_to_string(&lockfile).unwrap();

    let again = ops::resolve(&ctx, &manifest, &lockfile, ResolveOptions::default())
        .await
        .unwrap();
    assert!(again.report.resolved.is_empty());
    assert_eq!(fs::read_to_string(&lockfile).unwrap(), first);

    let entry = again.lockfile.get(Category::Kexts, "Lilu").unwrap();
    assert!(entry.path.is_some());
    assert_eq!(entry.filepath, "EFI/OC/Kexts/Lilu.kext");
}

#[tokio::test]
async fn test_build_requires_lockfile_entries() {
    let (dir, manifest, lockfile) = local_workspace();
    let ctx = context(dir.path(), offline());

    let err = ops::build_locked(&ctx, &manifest, &lockfile).await.unwrap_err();
    assert!(err.to_string().contains("resolve first"));
}

#[tokio::test]
async fn test_missing_bundled_output_fails_build() {
    let (dir, manifest, lockfile) = local_workspace();
    let text = fs::read_to_string(&manifest).unwrap();
    fs::write(&manifest, format!("{text}Tools:\n  OpenShell: '*'\n")).unwrap();
    let ctx = context(dir.path(), offline());

    ops::resolve(&ctx, &manifest, &lockfile, ResolveOptions::default())
        .await
        .unwrap();
    let err = ops::build_locked(&ctx, &manifest, &lockfile).await.unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("OpenShell"), "{message}");
    assert!(message.contains("EFI/OC/Tools/OpenShell.efi"), "{message}");
}

#[tokio::test]
async fn test_patch_file_applies_tags() {
    let (dir, manifest, lockfile) = local_workspace();
    let patch = dir.path().join("patch.yml");
    fs::write(
        &patch,
        "\
---
tags:
  - [\"@delete\", Misc.Tools]
  - [\"@override\", Kernel.Add.0, BundlePath]
---
Misc:
  Tools: ~
Kernel:
  Add:
    - BundlePath: Lilu.kext
      PlistPath: Contents/Info.plist
      Enabled: false
  Quirks:
    DisableIoMapper: true
",
    )
    .unwrap();
    let ctx = context(dir.path(), offline());

    ops::run(
        &ctx,
        &manifest,
        &lockfile,
        ResolveOptions::default(),
        &PatchOptions {
            clean: true,
            patches: vec![patch],
        },
    )
    .await
    .unwrap();

    let config = read_plist(&dir.path().join("dist").join(CONFIG_PATH)).unwrap();
    assert_eq!(
        config.get_path(&parse_path("Kernel.Quirks.DisableIoMapper")),
        Some(&Value::Bool(true))
    );
    // Patches land after the tables are rebuilt.
    assert_eq!(config.get_path(&parse_path("Misc.Tools")), None);
    let kexts = table(&config, "Kernel.Add");
    assert_eq!(kexts.len(), 3);
    let lilu = kexts
        .iter()
        .find(|r| r.get("BundlePath").and_then(Value::as_str) == Some("Lilu.kext"))
        .unwrap();
    assert_eq!(lilu.get("Enabled"), Some(&Value::Bool(false)));
    assert_eq!(lilu.get("Comment"), None);
}

#[tokio::test]
async fn test_remote_bootloader_dry_run() {
    let mut server = Server::new_async().await;
    let url = server.url();

    let package = zip_bytes(&[
        ("X64/EFI/BOOT/BOOTx64.efi", b"boot"),
        ("X64/EFI/OC/OpenCore.efi", b"oc"),
        ("X64/EFI/OC/Drivers/OpenRuntime.efi", b"rt"),
        ("X64/EFI/OC/Resources/Font/Terminus.hex", b"font"),
        ("Docs/Sample.plist", SAMPLE.as_bytes()),
        ("Utilities/ocvalidate/ocvalidate", b"bin"),
    ]);
    let companion = zip_bytes(&[
        ("OcBinaryData-master/Drivers/HfsPlus.efi", b"hfs"),
        ("OcBinaryData-master/Resources/Audio/OCEFIAudio_VoiceOver_Boot.mp3", b"mp3"),
    ]);

    let _tags = server
        .mock("GET", "/repos/acidanthera/OpenCorePkg/tags")
        .match_query(Matcher::Any)
        .with_body(r#"[{"name": "1.0.2"}, {"name": "1.0.1"}]"#)
        .create_async()
        .await;
    let _release = server
        .mock("GET", "/repos/acidanthera/OpenCorePkg/releases/tags/1.0.2")
        .with_body(format!(
            r#"{{"html_url": "{url}/acidanthera/OpenCorePkg/releases/tag/1.0.2",
                "assets": [
                  {{"name": "OpenCore-1.0.2-DEBUG.zip", "browser_download_url": "{url}/dl/OpenCore-1.0.2-DEBUG.zip"}},
                  {{"name": "OpenCore-1.0.2-RELEASE.zip", "browser_download_url": "{url}/dl/OpenCore-1.0.2-RELEASE.zip"}}
                ]}}"#
        ))
        .create_async()
        .await;
    let _download = server
        .mock("GET", "/dl/OpenCore-1.0.2-RELEASE.zip")
        .with_body(package)
        .create_async()
        .await;
    let _companion = server
        .mock("GET", "/acidanthera/OcBinaryData/archive/master.zip")
        .with_body(companion)
        .create_async()
        .await;

    let dir = tempdir().unwrap();
    let manifest = dir.path().join("efibuild.yml");
    fs::write(&manifest, "---\nbuild: RELEASE\n---\nACPI: {}\n").unwrap();
    let lockfile = dir.path().join("efibuild.lock");
    let ctx = context(dir.path(), CatalogConfig::single_host(&url));

    ops::run(
        &ctx,
        &manifest,
        &lockfile,
        ResolveOptions::default(),
        &PatchOptions::default(),
    )
    .await
    .unwrap();

    let out = dir.path().join("dist");
    assert!(out.join("EFI/OC/OpenCore.efi").is_file());
    assert!(out.join("EFI/OC/Resources/Font/Terminus.hex").is_file());
    assert!(out.join("EFI/OC/Resources/Audio/OCEFIAudio_VoiceOver_Boot.mp3").is_file());
    assert!(out.join("Utilities/ocvalidate/ocvalidate").is_file());
    let acpi = out.join("EFI/OC/ACPI");
    assert!(acpi.is_dir());
    assert_eq!(fs::read_dir(&acpi).unwrap().count(), 0);
    assert_eq!(fs::read_dir(out.join("EFI/OC/Drivers")).unwrap().count(), 0);

    let config = read_plist(&out.join(CONFIG_PATH)).unwrap();
    for path in ["ACPI.Add", "UEFI.Drivers", "Kernel.Add", "Misc.Tools"] {
        assert!(table(&config, path).is_empty(), "{path} should be empty");
    }

    let lock = efibuild_core::Lockfile::load(&lockfile).unwrap();
    let oc = lock.get(Category::OpenCorePkg, "OpenCore").unwrap();
    assert_eq!(oc.version.as_deref(), Some("1.0.2"));
    assert!(oc.url.as_deref().is_some_and(|u| u.ends_with("OpenCore-1.0.2-RELEASE.zip")));
    assert!(oc.checksum.as_deref().is_some_and(|c| c.starts_with("SHA256:")));
}
