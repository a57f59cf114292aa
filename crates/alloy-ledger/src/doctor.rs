use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::Result;
use walkdir::WalkDir;

use crate::checksum;
use crate::ledger::{self, Ledger};
use crate::types::Op;

/// Outcome of a single diagnostic probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagStatus {
    Ok,
    Warning,
    Error,
}

impl DiagStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiagnosticResult {
    pub name: String,
    pub status: DiagStatus,
    pub message: String,
}

/// Configuration for the integrity checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct DoctorOptions {
    pub verbose: bool,
    /// Also verify that every installed path still exists with the right
    /// content. Slow for packages with many files.
    pub check_files: bool,
}

/// Findings for a single package ledger.
#[derive(Debug, Default)]
pub struct LedgerIntegrityResult {
    pub package: String,
    /// Set when the ledger itself could not be parsed.
    pub parse_error: Option<anyhow::Error>,
    /// Referenced backup files that no longer exist.
    pub missing_backups: Vec<PathBuf>,
    /// Installed paths that no longer exist.
    pub orphaned_files: Vec<PathBuf>,
    /// Installed paths whose content, link target, or object type no
    /// longer match the ledger. Annotated with the kind of mismatch where
    /// it is not a plain content divergence.
    pub modified_files: Vec<String>,
    pub entry_count: usize,
}

impl LedgerIntegrityResult {
    pub fn has_issues(&self) -> bool {
        self.parse_error.is_some()
            || !self.missing_backups.is_empty()
            || !self.orphaned_files.is_empty()
            || !self.modified_files.is_empty()
    }
}

/// Probes existence, readability, and writability of the alloy state root
/// and its `ledgers`, `backups`, and `cache` subdirectories.
pub fn check_directory_permissions(root: &Path) -> Vec<DiagnosticResult> {
    let mut results = Vec::new();

    match fs::metadata(root) {
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            results.push(DiagnosticResult {
                name: "alloy directory".to_string(),
                status: DiagStatus::Ok,
                message: format!(
                    "{} does not exist yet (will be created on first install)",
                    root.display()
                ),
            });
            return results;
        }
        Err(err) => {
            results.push(DiagnosticResult {
                name: "alloy directory".to_string(),
                status: DiagStatus::Error,
                message: format!("cannot access {}: {err}", root.display()),
            });
            return results;
        }
        Ok(meta) if !meta.is_dir() => {
            results.push(DiagnosticResult {
                name: "alloy directory".to_string(),
                status: DiagStatus::Error,
                message: format!("{} exists but is not a directory", root.display()),
            });
            return results;
        }
        Ok(_) => {}
    }

    match fs::read_dir(root) {
        Ok(entries) => results.push(DiagnosticResult {
            name: "alloy directory readable".to_string(),
            status: DiagStatus::Ok,
            message: format!("{} is readable ({} entries)", root.display(), entries.count()),
        }),
        Err(err) => results.push(DiagnosticResult {
            name: "alloy directory readable".to_string(),
            status: DiagStatus::Error,
            message: format!("cannot read {}: {err}", root.display()),
        }),
    }
    results.push(probe_writable("alloy directory writable", root));

    for subdir in ["ledgers", "backups", "cache"] {
        let name = format!("{subdir} directory");
        let path = root.join(subdir);
        match fs::metadata(&path) {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                results.push(DiagnosticResult {
                    name,
                    status: DiagStatus::Ok,
                    message: format!(
                        "{} does not exist yet (will be created when needed)",
                        path.display()
                    ),
                });
            }
            Err(err) => results.push(DiagnosticResult {
                name,
                status: DiagStatus::Error,
                message: format!("cannot access {}: {err}", path.display()),
            }),
            Ok(meta) if !meta.is_dir() => results.push(DiagnosticResult {
                name,
                status: DiagStatus::Error,
                message: format!("{} exists but is not a directory", path.display()),
            }),
            Ok(_) => results.push(probe_writable(&name, &path)),
        }
    }

    results
}

/// Write probe: create and remove a sentinel file.
fn probe_writable(name: &str, dir: &Path) -> DiagnosticResult {
    let sentinel = dir.join(".alloy-doctor-probe");
    match File::create(&sentinel) {
        Ok(_) => {
            let _ = fs::remove_file(&sentinel);
            DiagnosticResult {
                name: name.to_string(),
                status: DiagStatus::Ok,
                message: format!("{} is writable", dir.display()),
            }
        }
        Err(err) => DiagnosticResult {
            name: name.to_string(),
            status: DiagStatus::Error,
            message: format!("cannot write to {}: {err}", dir.display()),
        },
    }
}

/// Verifies one package ledger against the filesystem and the backup
/// store.
pub fn check_ledger_integrity(
    ledger_dir: &Path,
    _backup_dir: &Path,
    pkg: &str,
    opts: &DoctorOptions,
) -> LedgerIntegrityResult {
    let mut result = LedgerIntegrityResult {
        package: pkg.to_string(),
        ..LedgerIntegrityResult::default()
    };

    let ledger = match Ledger::open(ledger_dir, pkg) {
        Ok(ledger) => ledger,
        Err(err) => {
            result.parse_error = Some(err);
            return result;
        }
    };
    result.entry_count = ledger.entries.len();

    for entry in &ledger.entries {
        if let Some(backup_path) = entry.original.as_ref().and_then(|o| o.backup_path.as_ref()) {
            if !backup_path.exists() {
                result.missing_backups.push(backup_path.clone());
            }
        }

        if !opts.check_files {
            continue;
        }

        match entry.op {
            Op::FileCreate | Op::FileOverwrite | Op::HardlinkCreate => {
                let Ok(meta) = fs::symlink_metadata(&entry.path) else {
                    result.orphaned_files.push(entry.path.clone());
                    continue;
                };
                if meta.is_file() {
                    if let Some(expected) = &entry.checksum {
                        if let Ok(false) = checksum::verify(&entry.path, expected) {
                            result.modified_files.push(entry.path.display().to_string());
                        }
                    }
                } else {
                    result
                        .modified_files
                        .push(format!("{} (not a file)", entry.path.display()));
                }
            }
            Op::SymlinkCreate => {
                let Ok(meta) = fs::symlink_metadata(&entry.path) else {
                    result.orphaned_files.push(entry.path.clone());
                    continue;
                };
                if !meta.file_type().is_symlink() {
                    result
                        .modified_files
                        .push(format!("{} (not a symlink)", entry.path.display()));
                } else if let Some(recorded) = &entry.target {
                    if let Ok(current) = fs::read_link(&entry.path) {
                        if &current != recorded {
                            result.modified_files.push(entry.path.display().to_string());
                        }
                    }
                }
            }
            Op::DirCreate => match fs::metadata(&entry.path) {
                Err(_) => result.orphaned_files.push(entry.path.clone()),
                Ok(meta) if !meta.is_dir() => result
                    .modified_files
                    .push(format!("{} (not a directory)", entry.path.display())),
                Ok(_) => {}
            },
            Op::FileDelete => {}
        }
    }

    result
}

/// Runs [`check_ledger_integrity`] over every ledger in the directory.
pub fn check_all_ledgers(
    ledger_dir: &Path,
    backup_dir: &Path,
    opts: &DoctorOptions,
) -> Result<Vec<LedgerIntegrityResult>> {
    let packages = ledger::list(ledger_dir)?;
    Ok(packages
        .iter()
        .map(|pkg| check_ledger_integrity(ledger_dir, backup_dir, pkg, opts))
        .collect())
}

/// Walks the backup tree and reports every regular file not referenced by
/// any ledger's `backup_path`.
pub fn find_orphaned_backups(ledger_dir: &Path, backup_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut referenced: HashSet<PathBuf> = HashSet::new();
    for pkg in ledger::list(ledger_dir)? {
        // Unparseable ledgers cannot vouch for their backups; skip them.
        let Ok(ledger) = Ledger::open(ledger_dir, &pkg) else {
            continue;
        };
        for entry in &ledger.entries {
            if let Some(backup_path) = entry.original.as_ref().and_then(|o| o.backup_path.as_ref())
            {
                referenced.insert(backup_path.clone());
            }
        }
    }

    if !backup_dir.exists() {
        return Ok(Vec::new());
    }

    let mut orphans = Vec::new();
    for item in WalkDir::new(backup_dir) {
        let Ok(item) = item else {
            continue;
        };
        if !item.file_type().is_file() {
            continue;
        }
        if !referenced.contains(item.path()) {
            orphans.push(item.path().to_path_buf());
        }
    }
    orphans.sort();
    Ok(orphans)
}
