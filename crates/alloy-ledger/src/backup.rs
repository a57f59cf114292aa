use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Content-addressed backup store for a single package.
///
/// Files displaced by an install are copied to
/// `<root>/<package>/<hex-sha256>` before the destructive write. Identical
/// originals dedupe to one backup file.
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
    package: String,
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>, package: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            package: package.into(),
        }
    }

    /// The per-package backup directory.
    pub fn package_dir(&self) -> PathBuf {
        self.root.join(&self.package)
    }

    /// Where a backup with the given content checksum lives.
    pub fn backup_path(&self, checksum: &str) -> PathBuf {
        self.package_dir().join(checksum)
    }

    /// Copies the file at `path` into the store, keyed by its content
    /// checksum. An existing target is assumed equal and the copy is
    /// skipped. Returns the backup path.
    pub fn put(&self, path: &Path, checksum: &str) -> Result<PathBuf> {
        let dir = self.package_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create backup directory: {}", dir.display()))?;

        let backup_path = self.backup_path(checksum);
        if backup_path.exists() {
            return Ok(backup_path);
        }

        if let Err(err) = copy_synced(path, &backup_path) {
            let _ = fs::remove_file(&backup_path);
            return Err(err).with_context(|| {
                format!(
                    "failed to back up {} to {}",
                    path.display(),
                    backup_path.display()
                )
            });
        }

        Ok(backup_path)
    }
}

/// Copies `src` to `dst` and fsyncs the destination.
pub(crate) fn copy_synced(src: &Path, dst: &Path) -> io::Result<()> {
    let mut reader = File::open(src)?;
    let mut writer = File::create(dst)?;
    io::copy(&mut reader, &mut writer)?;
    writer.sync_all()
}
