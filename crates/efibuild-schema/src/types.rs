//! Component categories, lockfile kinds, and build selectors.

use serde::{Deserialize, Serialize};

/// The section of the build manifest (and of the EFI tree) a component
/// belongs to.
///
/// Declaration order is the iteration order used everywhere a manifest or
/// lockfile is walked.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Category {
    /// The bootloader package itself.
    OpenCorePkg,
    /// ACPI tables (SSDTs).
    #[serde(rename = "ACPI")]
    Acpi,
    /// UEFI drivers.
    Drivers,
    /// Kernel extensions.
    Kexts,
    /// UEFI tools.
    Tools,
}

impl Category {
    /// Every category in iteration order.
    pub const ALL: [Category; 5] = [
        Self::OpenCorePkg,
        Self::Acpi,
        Self::Drivers,
        Self::Kexts,
        Self::Tools,
    ];

    /// Categories that are assembled into `EFI/OC/<category>` and listed in
    /// a configuration table.
    pub const COMPONENTS: [Category; 4] = [Self::Acpi, Self::Drivers, Self::Kexts, Self::Tools];

    /// Section name used in manifests, lockfiles and the EFI tree.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenCorePkg => "OpenCorePkg",
            Self::Acpi => "ACPI",
            Self::Drivers => "Drivers",
            Self::Kexts => "Kexts",
            Self::Tools => "Tools",
        }
    }

    /// Lockfile kind derived from the category.
    pub fn kind(&self) -> Kind {
        match self {
            Self::Acpi => Kind::Ssdt,
            Self::Kexts => Kind::Kext,
            Self::OpenCorePkg | Self::Drivers | Self::Tools => Kind::Binary,
        }
    }

    /// File extension (with dot) of materialized components.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Acpi => ".aml",
            Self::Kexts => ".kext",
            Self::OpenCorePkg | Self::Drivers | Self::Tools => ".efi",
        }
    }

    /// Output directory relative to the tree root.
    pub fn output_dir(&self) -> String {
        match self {
            Self::OpenCorePkg => "EFI/OC".to_string(),
            other => format!("EFI/OC/{}", other.as_str()),
        }
    }

    /// Default `__filepath` for an entry called `name`.
    pub fn default_filepath(&self, name: &str) -> String {
        match self {
            Self::OpenCorePkg => "EFI/OC/OpenCore.efi".to_string(),
            other => format!("{}/{name}{}", other.output_dir(), other.extension()),
        }
    }

    /// Location of the component table inside the bootloader configuration.
    pub fn config_path(&self) -> Option<[&'static str; 2]> {
        match self {
            Self::OpenCorePkg => None,
            Self::Acpi => Some(["ACPI", "Add"]),
            Self::Drivers => Some(["UEFI", "Drivers"]),
            Self::Kexts => Some(["Kernel", "Add"]),
            Self::Tools => Some(["Misc", "Tools"]),
        }
    }

    /// Key identifying a record in the component table.
    pub fn record_key(&self) -> &'static str {
        match self {
            Self::Kexts => "BundlePath",
            _ => "Path",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown category: {s}"))
    }
}

/// Kind recorded in the lockfile for each entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    /// Secondary system description table.
    #[serde(rename = "SSDT")]
    Ssdt,
    /// Kernel extension bundle.
    Kext,
    /// EFI binary.
    Binary,
}

impl Kind {
    /// Lockfile spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ssdt => "SSDT",
            Self::Kext => "Kext",
            Self::Binary => "Binary",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build variant selected for release assets and kext bundles.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum BuildVariant {
    /// Optimized release build.
    #[default]
    Release,
    /// Debug build with logging.
    Debug,
    /// Unoptimized debug build.
    Noopt,
}

impl BuildVariant {
    /// Manifest spelling (`RELEASE`, `DEBUG`, `NOOPT`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Release => "RELEASE",
            Self::Debug => "DEBUG",
            Self::Noopt => "NOOPT",
        }
    }

    /// Path component that marks a bundle built for the opposite variant.
    ///
    /// Release builds skip `Debug` directories and vice versa.
    pub fn excluded_component(&self) -> &'static str {
        match self {
            Self::Release => "Debug",
            Self::Debug | Self::Noopt => "Release",
        }
    }
}

impl std::fmt::Display for BuildVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "RELEASE" => Ok(Self::Release),
            "DEBUG" => Ok(Self::Debug),
            "NOOPT" => Ok(Self::Noopt),
            _ => Err(format!("Unknown build variant: {s}")),
        }
    }
}

/// Firmware architecture of the bootloader package.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default,
)]
pub enum Target {
    /// 64-bit firmware.
    #[default]
    X64,
    /// 32-bit firmware.
    #[serde(rename = "IA32")]
    Ia32,
}

impl Target {
    /// Directory name inside the bootloader archive.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X64 => "X64",
            Self::Ia32 => "IA32",
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "X64" => Ok(Self::X64),
            "IA32" => Ok(Self::Ia32),
            _ => Err(format!("Unknown target: {s}")),
        }
    }
}

/// Name of a host tool binary as shipped in the bootloader's `Utilities/`.
///
/// macOS builds carry the bare name, Linux builds a `.linux` suffix and
/// Windows builds `.exe`.
pub fn host_binary_name(stem: &str) -> String {
    #[cfg(target_os = "windows")]
    {
        format!("{stem}.exe")
    }
    #[cfg(target_os = "linux")]
    {
        format!("{stem}.linux")
    }
    #[cfg(not(any(target_os = "windows", target_os = "linux")))]
    {
        stem.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_paths() {
        assert_eq!(Category::Acpi.default_filepath("SSDT-EC"), "EFI/OC/ACPI/SSDT-EC.aml");
        assert_eq!(Category::Kexts.default_filepath("Lilu"), "EFI/OC/Kexts/Lilu.kext");
        assert_eq!(Category::Tools.default_filepath("Shell"), "EFI/OC/Tools/Shell.efi");
        assert_eq!(Category::OpenCorePkg.default_filepath("OpenCore"), "EFI/OC/OpenCore.efi");
        assert_eq!(Category::Kexts.config_path(), Some(["Kernel", "Add"]));
    }

    #[test]
    fn test_category_order_and_parse() {
        let mut shuffled = vec![Category::Tools, Category::Acpi, Category::OpenCorePkg];
        shuffled.sort();
        assert_eq!(shuffled, vec![Category::OpenCorePkg, Category::Acpi, Category::Tools]);
        assert_eq!("acpi".parse::<Category>().unwrap(), Category::Acpi);
        assert!("Bogus".parse::<Category>().is_err());
    }

    #[test]
    fn test_kinds() {
        assert_eq!(Category::Acpi.kind(), Kind::Ssdt);
        assert_eq!(Category::Kexts.kind(), Kind::Kext);
        assert_eq!(Category::Drivers.kind(), Kind::Binary);
    }

    #[test]
    fn test_variants() {
        assert_eq!("debug".parse::<BuildVariant>().unwrap(), BuildVariant::Debug);
        assert_eq!(BuildVariant::Release.excluded_component(), "Debug");
        assert_eq!("ia32".parse::<Target>().unwrap(), Target::Ia32);
    }
}
