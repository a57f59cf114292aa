use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use tracing::warn;

use crate::backup::copy_synced;
use crate::checksum;
use crate::fsmeta;
use crate::ledger::Ledger;
use crate::types::{Entry, Op};

/// Failure to undo a single entry. Replay never aborts on these; they are
/// collected so the caller can decide whether the result is acceptable.
#[derive(Debug)]
pub struct ReplayError {
    pub entry: Entry,
    pub error: anyhow::Error,
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "replay {} {}: {:#}",
            self.entry.op,
            self.entry.path.display(),
            self.error
        )
    }
}

/// Outcome of a reverse replay.
#[derive(Debug, Default)]
pub struct ReplayResult {
    /// Entries whose undo was performed.
    pub processed: usize,
    /// Entries skipped because they were already undone or no longer
    /// describe the object on disk.
    pub skipped: usize,
    /// Per-entry failures; replay continues past these.
    pub errors: Vec<ReplayError>,
    /// Paths whose current content or link target diverged from what the
    /// ledger recorded at install time.
    pub modified_files: Vec<PathBuf>,
}

impl ReplayResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Configuration for a reverse replay.
#[derive(Default)]
pub struct ReplayOptions<'a> {
    /// Perform no filesystem changes; every entry still yields its planned
    /// action label.
    pub dry_run: bool,
    /// Proceed with the undo even when drift is detected. Without it,
    /// drift halts that entry's undo but not the rest of the replay.
    pub force: bool,
    /// Gates the per-entry callback.
    pub verbose: bool,
    /// Retain restored backups instead of unlinking them.
    pub keep_backups: bool,
    /// Called with each entry and its action label when `verbose` is set.
    pub on_entry: Option<&'a dyn Fn(&Entry, &str)>,
}

/// Undoes every ledger entry in reverse (LIFO) order.
///
/// This is the uninstall mechanism, and with `force` it is also the
/// mid-install rollback. Failures accumulate per entry so that as much of
/// the undo as possible completes; the function itself never fails.
pub fn reverse_replay(ledger: &Ledger, opts: &ReplayOptions) -> ReplayResult {
    let mut result = ReplayResult::default();

    for entry in ledger.reverse_entries() {
        let outcome = undo_entry(entry, opts);

        if opts.verbose {
            if let Some(on_entry) = opts.on_entry {
                let label = match &outcome {
                    Ok(Undo::Applied { label, .. }) | Ok(Undo::Skipped { label }) => *label,
                    Ok(Undo::DriftBlocked) => "modified",
                    Err(_) => "error",
                };
                on_entry(entry, label);
            }
        }

        match outcome {
            Ok(Undo::Applied { drifted, .. }) => {
                result.processed += 1;
                if drifted {
                    result.modified_files.push(entry.path.clone());
                }
            }
            Ok(Undo::Skipped { .. }) => result.skipped += 1,
            Ok(Undo::DriftBlocked) => {
                result.modified_files.push(entry.path.clone());
                result.errors.push(ReplayError {
                    entry: entry.clone(),
                    error: anyhow!("file was modified externally"),
                });
            }
            Err(error) => result.errors.push(ReplayError {
                entry: entry.clone(),
                error,
            }),
        }
    }

    result
}

enum Undo {
    Applied { label: &'static str, drifted: bool },
    Skipped { label: &'static str },
    /// Drift detected and `force` not set; the undo was not performed.
    DriftBlocked,
}

fn undo_entry(entry: &Entry, opts: &ReplayOptions) -> Result<Undo> {
    match entry.op {
        Op::FileCreate => undo_file_create(entry, opts),
        Op::FileDelete => undo_file_delete(entry, opts),
        Op::FileOverwrite => undo_file_overwrite(entry, opts),
        Op::DirCreate => undo_dir_create(entry, opts),
        Op::SymlinkCreate => undo_symlink_create(entry, opts),
        Op::HardlinkCreate => undo_hardlink_create(entry, opts),
    }
}

/// Undoes a file creation by deleting the file, provided it still matches
/// the recorded checksum (or no checksum was recorded).
fn undo_file_create(entry: &Entry, opts: &ReplayOptions) -> Result<Undo> {
    let Some(meta) = stat_link(&entry.path)? else {
        return Ok(Undo::Skipped { label: "skip (not found)" });
    };
    if !meta.is_file() {
        return Ok(Undo::Skipped { label: "skip (not a file)" });
    }

    let mut drifted = false;
    if let Some(expected) = &entry.checksum {
        if !checksum::verify(&entry.path, expected)? {
            if !opts.force {
                return Ok(Undo::DriftBlocked);
            }
            drifted = true;
        }
    }

    if opts.dry_run {
        return Ok(Undo::Applied { label: "would delete", drifted });
    }

    fs::remove_file(&entry.path)
        .with_context(|| format!("failed to remove file: {}", entry.path.display()))?;
    Ok(Undo::Applied { label: "deleted", drifted })
}

/// Restores a deleted file from its backup, or re-creates a deleted
/// symlink from its recorded target.
fn undo_file_delete(entry: &Entry, opts: &ReplayOptions) -> Result<Undo> {
    let Some(original) = &entry.original else {
        bail!("no original file information");
    };

    if stat_link(&entry.path)?.is_some() {
        return Ok(Undo::Skipped { label: "skip (exists)" });
    }

    if opts.dry_run {
        return Ok(Undo::Applied { label: "would restore", drifted: false });
    }

    ensure_parent(&entry.path)?;

    if let Some(target) = &original.target {
        make_symlink(target, &entry.path)?;
        return Ok(Undo::Applied { label: "restored", drifted: false });
    }

    let Some(backup_path) = &original.backup_path else {
        bail!("no backup path");
    };
    copy_synced(backup_path, &entry.path).with_context(|| {
        format!(
            "failed to restore {} from backup {}",
            entry.path.display(),
            backup_path.display()
        )
    })?;
    restore_metadata(&entry.path, original.mode, original.mtime);
    discard_backup(backup_path, opts);

    Ok(Undo::Applied { label: "restored", drifted: false })
}

/// Restores the pre-install content of an overwritten file from its backup.
fn undo_file_overwrite(entry: &Entry, opts: &ReplayOptions) -> Result<Undo> {
    let Some(original) = &entry.original else {
        bail!("no original file information");
    };
    let Some(backup_path) = &original.backup_path else {
        bail!("no backup path");
    };

    // A missing destination is not drift: the recorded install state can no
    // longer be contradicted, and the original still wants restoring.
    let mut drifted = false;
    if let Some(expected) = &entry.checksum {
        if stat_link(&entry.path)?.is_some() && !checksum::verify(&entry.path, expected)? {
            if !opts.force {
                return Ok(Undo::DriftBlocked);
            }
            drifted = true;
        }
    }

    if opts.dry_run {
        return Ok(Undo::Applied { label: "would restore", drifted });
    }

    match fs::remove_file(&entry.path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to remove file: {}", entry.path.display()));
        }
    }

    ensure_parent(&entry.path)?;
    copy_synced(backup_path, &entry.path).with_context(|| {
        format!(
            "failed to restore {} from backup {}",
            entry.path.display(),
            backup_path.display()
        )
    })?;
    restore_metadata(&entry.path, original.mode, original.mtime);
    discard_backup(backup_path, opts);

    Ok(Undo::Applied { label: "restored", drifted })
}

/// Removes a created directory, but only when it is empty. Leftover
/// children are either user data or entries this replay could not undo;
/// removing them would violate the restore-original-state contract.
fn undo_dir_create(entry: &Entry, opts: &ReplayOptions) -> Result<Undo> {
    let Some(meta) = stat_link(&entry.path)? else {
        return Ok(Undo::Skipped { label: "skip (not found)" });
    };
    if !meta.is_dir() {
        return Ok(Undo::Skipped { label: "skip (not a directory)" });
    }

    if opts.dry_run {
        return Ok(Undo::Applied { label: "would remove", drifted: false });
    }

    let mut children = fs::read_dir(&entry.path)
        .with_context(|| format!("failed to read directory: {}", entry.path.display()))?;
    if children.next().is_some() {
        return Ok(Undo::Skipped { label: "skip (not empty)" });
    }

    fs::remove_dir(&entry.path)
        .with_context(|| format!("failed to remove directory: {}", entry.path.display()))?;
    Ok(Undo::Applied { label: "removed", drifted: false })
}

/// Removes a created symlink, provided it still points where the ledger
/// says it should.
fn undo_symlink_create(entry: &Entry, opts: &ReplayOptions) -> Result<Undo> {
    let Some(meta) = stat_link(&entry.path)? else {
        return Ok(Undo::Skipped { label: "skip (not found)" });
    };
    if !meta.file_type().is_symlink() {
        return Ok(Undo::Skipped { label: "skip (not a symlink)" });
    }

    let mut drifted = false;
    if let Some(recorded) = &entry.target {
        let current = fs::read_link(&entry.path)
            .with_context(|| format!("failed to read symlink: {}", entry.path.display()))?;
        if &current != recorded {
            if !opts.force {
                return Ok(Undo::DriftBlocked);
            }
            drifted = true;
        }
    }

    if opts.dry_run {
        return Ok(Undo::Applied { label: "would remove", drifted });
    }

    fs::remove_file(&entry.path)
        .with_context(|| format!("failed to remove symlink: {}", entry.path.display()))?;
    Ok(Undo::Applied { label: "removed", drifted })
}

/// Removes a created hard link. The recorded checksum is not re-verified:
/// the content is shared with the link target, so a divergence says
/// nothing about this path specifically.
fn undo_hardlink_create(entry: &Entry, opts: &ReplayOptions) -> Result<Undo> {
    let Some(meta) = stat_link(&entry.path)? else {
        return Ok(Undo::Skipped { label: "skip (not found)" });
    };
    if !meta.is_file() {
        return Ok(Undo::Skipped { label: "skip (not a file)" });
    }

    if opts.dry_run {
        return Ok(Undo::Applied { label: "would remove", drifted: false });
    }

    fs::remove_file(&entry.path)
        .with_context(|| format!("failed to remove hardlink: {}", entry.path.display()))?;
    Ok(Undo::Applied { label: "removed", drifted: false })
}

fn stat_link(path: &Path) -> Result<Option<fs::Metadata>> {
    match fs::symlink_metadata(path) {
        Ok(meta) => Ok(Some(meta)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to stat: {}", path.display())),
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parent directory: {}", parent.display()))?;
    }
    Ok(())
}

/// Mode and mtime restoration are best-effort: the content is back, which
/// is the part that matters.
fn restore_metadata(path: &Path, mode: u32, mtime: chrono::DateTime<chrono::Utc>) {
    if let Err(err) = fsmeta::set_permission_bits(path, mode) {
        warn!(path = %path.display(), %err, "failed to restore permissions");
    }
    if let Err(err) = fsmeta::set_modified_at(path, mtime) {
        warn!(path = %path.display(), %err, "failed to restore mtime");
    }
}

fn discard_backup(backup_path: &Path, opts: &ReplayOptions) {
    if opts.keep_backups {
        return;
    }
    if let Err(err) = fs::remove_file(backup_path) {
        warn!(path = %backup_path.display(), %err, "failed to remove backup");
    }
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)
        .with_context(|| format!("failed to create symlink: {}", link.display()))
}

#[cfg(not(unix))]
fn make_symlink(_target: &Path, link: &Path) -> Result<()> {
    bail!(
        "cannot restore symlink on this platform: {}",
        link.display()
    )
}
