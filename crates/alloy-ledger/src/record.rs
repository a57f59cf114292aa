use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;

use crate::backup::BackupStore;
use crate::checksum;
use crate::fsmeta;
use crate::ledger::Ledger;
use crate::types::{Entry, Op, OriginalFile};

/// High-level recording API for one package installation.
///
/// Wraps the install's [`Ledger`] and performs the pre-mutation
/// bookkeeping (stat, hash, backup) each entry kind requires, so the step
/// executor only ever deals in completed mutations.
#[derive(Debug)]
pub struct Recorder {
    ledger: Ledger,
    backups: BackupStore,
}

impl Recorder {
    /// Backups for overwritten and deleted files land in
    /// `<backup_root>/<package>/`, keyed by content checksum.
    pub fn new(ledger: Ledger, backup_root: impl Into<PathBuf>) -> Self {
        let backups = BackupStore::new(backup_root, ledger.header.package.clone());
        Self { ledger, backups }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Hands the ledger back, e.g. for rollback after a failed step.
    pub fn into_ledger(self) -> Ledger {
        self.ledger
    }

    /// Closes the underlying ledger, fsyncing it.
    pub fn close(mut self) -> Result<()> {
        self.ledger.close()
    }

    /// Records creation of a new file, hashing it for the drift sentinel.
    pub fn record_file_create(&mut self, path: &Path) -> Result<()> {
        let meta = fs::symlink_metadata(path)
            .with_context(|| format!("failed to stat file: {}", path.display()))?;
        let sum = checksum::hash_file(path)?;
        let (uid, gid) = fsmeta::ownership(&meta);

        self.ledger.record(Entry {
            timestamp: Some(Utc::now()),
            mode: Some(fsmeta::permission_bits(&meta)),
            uid: Some(uid),
            gid: Some(gid),
            size: Some(meta.len()),
            checksum: Some(sum),
            ..Entry::new(Op::FileCreate, path)
        })
    }

    /// Captures the state of whatever currently lives at `path`, backing up
    /// regular files, so the caller can overwrite it. Returns `None` when
    /// nothing exists there, the benign nothing-to-back-up case.
    ///
    /// Call this before the destructive write, then
    /// [`record_file_overwrite`](Self::record_file_overwrite) after it.
    pub fn prepare_overwrite(&mut self, path: &Path) -> Result<Option<OriginalFile>> {
        let Some(meta) = stat_existing(path)? else {
            return Ok(None);
        };

        if meta.file_type().is_symlink() {
            return Ok(Some(self.capture_symlink(path, &meta)?));
        }

        let sum = checksum::hash_file(path)?;
        let backup_path = self.backups.put(path, &sum)?;
        let (uid, gid) = fsmeta::ownership(&meta);

        Ok(Some(OriginalFile {
            mode: fsmeta::permission_bits(&meta),
            uid,
            gid,
            size: Some(meta.len()),
            checksum: Some(sum),
            backup_path: Some(backup_path),
            target: None,
            mtime: fsmeta::modified_at(&meta),
        }))
    }

    /// Records an overwrite whose original was captured by
    /// [`prepare_overwrite`](Self::prepare_overwrite).
    pub fn record_file_overwrite(
        &mut self,
        path: &Path,
        original: OriginalFile,
        new_checksum: String,
        new_size: u64,
        new_mode: u32,
    ) -> Result<()> {
        let meta = fs::symlink_metadata(path)
            .with_context(|| format!("failed to stat file: {}", path.display()))?;
        let (uid, gid) = fsmeta::ownership(&meta);

        self.ledger.record(Entry {
            timestamp: Some(Utc::now()),
            mode: Some(new_mode),
            uid: Some(uid),
            gid: Some(gid),
            size: Some(new_size),
            checksum: Some(new_checksum),
            original: Some(original),
            ..Entry::new(Op::FileOverwrite, path)
        })
    }

    /// Records deletion of a file or symlink, backing up regular files
    /// first. Returns `false` when nothing exists at `path`, in which case
    /// no entry is emitted.
    ///
    /// The caller performs the actual removal.
    pub fn record_file_delete(&mut self, path: &Path) -> Result<bool> {
        let Some(meta) = stat_existing(path)? else {
            return Ok(false);
        };

        let original = if meta.file_type().is_symlink() {
            self.capture_symlink(path, &meta)?
        } else {
            let sum = checksum::hash_file(path)?;
            let backup_path = self.backups.put(path, &sum)?;
            let (uid, gid) = fsmeta::ownership(&meta);
            OriginalFile {
                mode: fsmeta::permission_bits(&meta),
                uid,
                gid,
                size: Some(meta.len()),
                checksum: Some(sum),
                backup_path: Some(backup_path),
                target: None,
                mtime: fsmeta::modified_at(&meta),
            }
        };

        self.ledger.record(Entry {
            timestamp: Some(Utc::now()),
            original: Some(original),
            ..Entry::new(Op::FileDelete, path)
        })?;
        Ok(true)
    }

    /// Records creation of a directory.
    pub fn record_dir_create(&mut self, path: &Path) -> Result<()> {
        let meta = fs::symlink_metadata(path)
            .with_context(|| format!("failed to stat directory: {}", path.display()))?;
        let (uid, gid) = fsmeta::ownership(&meta);

        self.ledger.record(Entry {
            timestamp: Some(Utc::now()),
            mode: Some(fsmeta::permission_bits(&meta)),
            uid: Some(uid),
            gid: Some(gid),
            ..Entry::new(Op::DirCreate, path)
        })
    }

    /// Records creation of a symbolic link pointing at `target`.
    pub fn record_symlink_create(&mut self, path: &Path, target: &Path) -> Result<()> {
        let meta = fs::symlink_metadata(path)
            .with_context(|| format!("failed to stat symlink: {}", path.display()))?;
        let (uid, gid) = fsmeta::ownership(&meta);

        self.ledger.record(Entry {
            timestamp: Some(Utc::now()),
            mode: Some(fsmeta::permission_bits(&meta)),
            uid: Some(uid),
            gid: Some(gid),
            target: Some(target.to_path_buf()),
            ..Entry::new(Op::SymlinkCreate, path)
        })
    }

    /// Records creation of a hard link, hashing the linked content.
    pub fn record_hardlink_create(&mut self, path: &Path, target: &Path) -> Result<()> {
        let meta = fs::symlink_metadata(path)
            .with_context(|| format!("failed to stat hardlink: {}", path.display()))?;
        let sum = checksum::hash_file(path)?;
        let (uid, gid) = fsmeta::ownership(&meta);

        self.ledger.record(Entry {
            timestamp: Some(Utc::now()),
            mode: Some(fsmeta::permission_bits(&meta)),
            uid: Some(uid),
            gid: Some(gid),
            size: Some(meta.len()),
            checksum: Some(sum),
            target: Some(target.to_path_buf()),
            ..Entry::new(Op::HardlinkCreate, path)
        })
    }

    fn capture_symlink(&self, path: &Path, meta: &fs::Metadata) -> Result<OriginalFile> {
        let target = fs::read_link(path)
            .with_context(|| format!("failed to read symlink: {}", path.display()))?;
        let (uid, gid) = fsmeta::ownership(meta);
        Ok(OriginalFile {
            mode: fsmeta::permission_bits(meta),
            uid,
            gid,
            size: None,
            checksum: None,
            backup_path: None,
            target: Some(target),
            mtime: fsmeta::modified_at(meta),
        })
    }
}

fn stat_existing(path: &Path) -> Result<Option<fs::Metadata>> {
    match fs::symlink_metadata(path) {
        Ok(meta) => Ok(Some(meta)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => {
            Err(err).with_context(|| format!("failed to stat file: {}", path.display()))
        }
    }
}
