use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};

use alloy_core::{InstallStep, StepAction};
use alloy_ledger::{hash_file, Recorder};

/// Executes a single install step against the live filesystem, recording
/// each mutation through the recorder.
pub(crate) fn execute_step(
    step: &InstallStep,
    src_dir: &Path,
    recorder: &mut Recorder,
) -> Result<()> {
    match &step.action {
        StepAction::Run { command, workdir } => {
            execute_run(command, workdir.as_deref(), src_dir)
        }
        StepAction::Copy { src, dest, mode } => {
            execute_copy(src, dest, mode.as_deref(), src_dir, recorder)
        }
        StepAction::Mkdir { path, mode } => execute_mkdir(path, mode.as_deref(), recorder),
        StepAction::Symlink { src, dest } => execute_symlink(src, dest, recorder),
    }
}

/// Runs a shell command in the (optional) working directory beneath the
/// extracted source, inheriting stdout and stderr.
///
/// File mutations performed by the command are invisible to the ledger;
/// uninstall cannot undo a `make install`. Known limitation.
fn execute_run(command: &str, workdir: Option<&str>, src_dir: &Path) -> Result<()> {
    let cwd = match workdir {
        Some(rel) => src_dir.join(rel),
        None => src_dir.to_path_buf(),
    };

    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(&cwd)
        .status()
        .with_context(|| format!("failed to start command: {command}"))?;
    if !status.success() {
        bail!("command failed with {status}: {command}");
    }
    Ok(())
}

fn execute_copy(
    src: &str,
    dest: &str,
    mode: Option<&str>,
    src_dir: &Path,
    recorder: &mut Recorder,
) -> Result<()> {
    let src = src_dir.join(src);
    let dest = PathBuf::from(dest);

    let mode = match mode {
        Some(raw) => parse_mode(raw)?,
        // Preserve the source permission bits; 0644 when even the stat
        // fails (the copy itself will surface the real error).
        None => fs::metadata(&src)
            .map(|meta| permission_bits(&meta))
            .unwrap_or(0o644),
    };

    // Parent directories materialised here are deliberately unrecorded:
    // only explicit mkdir steps own directories.
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    let original = recorder
        .prepare_overwrite(&dest)
        .context("failed to prepare overwrite")?;

    copy_file(&src, &dest, mode)?;

    let sum = hash_file(&dest)?;
    let meta = fs::metadata(&dest)
        .with_context(|| format!("failed to stat destination: {}", dest.display()))?;

    match original {
        Some(original) => recorder.record_file_overwrite(&dest, original, sum, meta.len(), mode),
        None => recorder.record_file_create(&dest),
    }
}

fn execute_mkdir(path: &str, mode: Option<&str>, recorder: &mut Recorder) -> Result<()> {
    let path = PathBuf::from(path);
    let mode = match mode {
        Some(raw) => parse_mode(raw)?,
        None => 0o755,
    };

    if let Ok(meta) = fs::metadata(&path) {
        if meta.is_dir() {
            // Already present before this install; not ours to own.
            return Ok(());
        }
    }

    for dir in mkdir_all_recording(&path, mode)? {
        recorder
            .record_dir_create(&dir)
            .context("failed to record dir create")?;
    }
    Ok(())
}

fn execute_symlink(target: &str, link: &str, recorder: &mut Recorder) -> Result<()> {
    let target = PathBuf::from(target);
    let link = PathBuf::from(link);

    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    match fs::symlink_metadata(&link) {
        Ok(meta) => {
            if meta.file_type().is_symlink() {
                if let Ok(existing) = fs::read_link(&link) {
                    if existing == target {
                        return Ok(());
                    }
                }
            }
            fs::remove_file(&link)
                .with_context(|| format!("failed to remove existing: {}", link.display()))?;
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to stat: {}", link.display()));
        }
    }

    make_symlink(&target, &link)?;
    recorder.record_symlink_create(&link, &target)
}

/// Copies `src` to `dest`, fsyncs, and applies the permission bits.
pub(crate) fn copy_file(src: &Path, dest: &Path, mode: u32) -> Result<()> {
    let mut reader =
        File::open(src).with_context(|| format!("failed to open source: {}", src.display()))?;
    let mut writer = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(dest)
        .with_context(|| format!("failed to create destination: {}", dest.display()))?;

    io::copy(&mut reader, &mut writer)
        .with_context(|| format!("failed to copy to {}", dest.display()))?;
    writer
        .sync_all()
        .with_context(|| format!("failed to sync {}", dest.display()))?;
    drop(writer);

    set_permission_bits(dest, mode)
        .with_context(|| format!("failed to chmod {}", dest.display()))
}

/// Creates a directory and any missing parents with the requested mode,
/// returning the directories actually created, outermost first.
pub(crate) fn mkdir_all_recording(path: &Path, mode: u32) -> Result<Vec<PathBuf>> {
    let mut to_create = Vec::new();
    let mut current = path;

    loop {
        match fs::metadata(current) {
            Ok(_) => break,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to stat: {}", current.display()));
            }
        }
        to_create.push(current.to_path_buf());
        match current.parent() {
            Some(parent) if parent != current => current = parent,
            _ => break,
        }
    }

    to_create.reverse();
    for dir in &to_create {
        fs::create_dir(dir)
            .with_context(|| format!("failed to create directory: {}", dir.display()))?;
        set_permission_bits(dir, mode)
            .with_context(|| format!("failed to chmod {}", dir.display()))?;
    }

    Ok(to_create)
}

/// Parses an octal permission string such as `"0755"`.
pub(crate) fn parse_mode(raw: &str) -> Result<u32> {
    u32::from_str_radix(raw, 8).map_err(|err| anyhow!("invalid mode '{raw}': {err}"))
}

#[cfg(unix)]
fn permission_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(_meta: &fs::Metadata) -> u32 {
    0o644
}

#[cfg(unix)]
fn set_permission_bits(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_permission_bits(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)
        .with_context(|| format!("failed to create symlink: {}", link.display()))
}

#[cfg(not(unix))]
fn make_symlink(_target: &Path, link: &Path) -> Result<()> {
    bail!("symlinks are not supported on this platform: {}", link.display())
}
