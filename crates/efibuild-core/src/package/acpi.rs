//! ACPI tables: pair compiled (`.aml`) and source (`.dsl`) forms, using
//! `iasl` to produce whichever one is missing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::io::fs::PathExt;

/// ACPI compiler/disassembler binary.
pub const COMPILER: &str = "iasl";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcpiTable {
    /// File found in the package.
    pub extracted: PathBuf,
    /// Compiled table, when one exists or could be produced.
    pub path: Option<PathBuf>,
    /// Source, when one exists or could be produced.
    pub source: Option<PathBuf>,
}

/// Locate the compiler on `PATH`.
pub fn find_compiler() -> Option<PathBuf> {
    which::which(COMPILER).ok()
}

fn run(compiler: &Path, args: &[&str], cwd: &Path, subject: &Path) -> Result<()> {
    debug!(tool = %compiler.display(), ?args, "running ACPI compiler");
    let output = Command::new(compiler).args(args).current_dir(cwd).output()?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let message = if stderr.trim().is_empty() { stdout } else { stderr };
    Err(Error::Tool {
        tool: COMPILER.to_string(),
        path: subject.to_path_buf(),
        message: message.trim().to_string(),
    })
}

fn compile(compiler: &Path, source: &Path) -> Result<PathBuf> {
    let dir = source.parent().unwrap_or(Path::new("."));
    let prefix = dir.join(source.stem_str());
    run(
        compiler,
        &["-p", &prefix.to_string_lossy(), &source.to_string_lossy()],
        dir,
        source,
    )?;
    Ok(prefix.with_extension("aml"))
}

fn disassemble(compiler: &Path, table: &Path) -> Result<PathBuf> {
    let dir = table.parent().unwrap_or(Path::new("."));
    run(compiler, &["-d", &table.to_string_lossy()], dir, table)?;
    Ok(table.with_extension("dsl"))
}

/// Every table under `root`, keyed by file stem.
///
/// With a compiler, sources are compiled and tables disassembled so both
/// forms exist. Without one, or when disassembly fails, tables are kept as
/// found.
pub fn collect_tables(root: &Path, compiler: Option<&Path>) -> Result<BTreeMap<String, AcpiTable>> {
    let mut tables: BTreeMap<String, AcpiTable> = BTreeMap::new();
    for entry in WalkDir::new(root).sort_by_file_name().into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(ext) = path.extension().map(|e| e.to_string_lossy().to_ascii_lowercase()) else {
            continue;
        };
        let slot = match ext.as_str() {
            "aml" | "dsl" => tables.entry(path.stem_str().to_string()).or_default(),
            _ => continue,
        };
        if slot.extracted.as_os_str().is_empty() {
            slot.extracted = path.to_path_buf();
        }
        if ext == "aml" {
            slot.path.get_or_insert_with(|| path.to_path_buf());
        } else {
            slot.source.get_or_insert_with(|| path.to_path_buf());
        }
    }

    for (name, table) in &mut tables {
        match (table.path.clone(), table.source.clone(), compiler) {
            (Some(_), Some(_), _) => {}
            (None, Some(source), Some(iasl)) => table.path = Some(compile(iasl, &source)?),
            (Some(aml), None, Some(iasl)) => match disassemble(iasl, &aml) {
                Ok(source) => table.source = Some(source),
                Err(e) => warn!(table = %name, "keeping table without source: {e}"),
            },
            (None, Some(_), None) => {
                warn!(table = %name, "{COMPILER} not found; source will not be compiled");
            }
            (Some(_), None, None) => {
                warn!(table = %name, "{COMPILER} not found; table cannot be ordered");
            }
            (None, None, _) => {}
        }
    }
    Ok(tables)
}
