use std::path::Path;
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use tempfile::TempDir;

use alloy_core::{PackageDef, SourceKind};
use alloy_ledger::verify;

/// Materialises the package source into a fresh temporary directory.
///
/// The returned [`TempDir`] owns the extracted tree; dropping it removes
/// everything.
pub(crate) fn fetch_source(def: &PackageDef, progress: &dyn Fn(&str)) -> Result<TempDir> {
    let source = def.expanded_source();
    let src_dir = TempDir::with_prefix(format!("alloy-{}-", def.name))
        .context("failed to create temporary source directory")?;

    match source.kind() {
        Some(SourceKind::Url) => {
            let url = source.url.as_deref().unwrap_or_default();
            let sha256 = source.sha256.as_deref().unwrap_or_default();
            fetch_url(url, sha256, source.strip.unwrap_or(0), src_dir.path(), progress)?;
        }
        Some(SourceKind::Binary) => {
            let url = source.binary.as_deref().unwrap_or_default();
            let sha256 = source.sha256.as_deref().unwrap_or_default();
            fetch_binary(url, sha256, &def.name, src_dir.path(), progress)?;
        }
        Some(SourceKind::Git) => {
            let repo = source.git.as_deref().unwrap_or_default();
            fetch_git(repo, source.git_ref.as_deref(), src_dir.path(), progress)?;
        }
        None => bail!("package '{}' has no source", def.name),
    }

    Ok(src_dir)
}

/// Downloads an archive, verifies its checksum, and extracts it.
fn fetch_url(
    url: &str,
    expected_sha256: &str,
    strip: u32,
    dest_dir: &Path,
    progress: &dyn Fn(&str),
) -> Result<()> {
    progress(&format!("Downloading {url}"));

    let download_dir = TempDir::with_prefix("alloy-download-")
        .context("failed to create download directory")?;
    let archive_name = url.rsplit('/').next().unwrap_or("archive");
    let archive_path = download_dir.path().join(archive_name);

    download(url, &archive_path)?;

    if !verify(&archive_path, expected_sha256)? {
        bail!("checksum mismatch for {url} (expected {expected_sha256})");
    }
    progress("Download complete, checksum verified");

    extract_archive(&archive_path, url, strip, dest_dir)
}

/// Downloads a standalone binary and marks it executable.
fn fetch_binary(
    url: &str,
    expected_sha256: &str,
    name: &str,
    dest_dir: &Path,
    progress: &dyn Fn(&str),
) -> Result<()> {
    progress(&format!("Downloading binary {url}"));

    let bin_path = dest_dir.join(name);
    download(url, &bin_path)?;

    if !verify(&bin_path, expected_sha256)? {
        bail!("checksum mismatch for {url} (expected {expected_sha256})");
    }

    set_executable(&bin_path)
        .with_context(|| format!("failed to chmod {}", bin_path.display()))?;
    progress("Download complete, checksum verified");
    Ok(())
}

/// Shallow-clones a git repository.
fn fetch_git(
    repo: &str,
    git_ref: Option<&str>,
    dest_dir: &Path,
    progress: &dyn Fn(&str),
) -> Result<()> {
    progress(&format!("Cloning {repo}"));

    let mut command = Command::new("git");
    command.arg("clone").arg("--depth").arg("1");
    if let Some(git_ref) = git_ref {
        command.arg("--branch").arg(git_ref);
    }
    command.arg(repo).arg(dest_dir);
    run_command(&mut command, "git clone failed")
}

fn download(url: &str, out_path: &Path) -> Result<()> {
    download_with_curl(url, out_path).or_else(|curl_err| {
        download_with_wget(url, out_path)
            .map_err(|wget_err| anyhow!("{curl_err:#}; {wget_err:#}"))
    })
}

fn download_with_curl(url: &str, out_path: &Path) -> Result<()> {
    let mut command = Command::new("curl");
    command
        .arg("-fsSL")
        .arg("--retry")
        .arg("2")
        .arg("-o")
        .arg(out_path)
        .arg(url);
    run_command(&mut command, "curl download failed")
}

fn download_with_wget(url: &str, out_path: &Path) -> Result<()> {
    let mut command = Command::new("wget");
    command.arg("-q").arg("-O").arg(out_path).arg(url);
    run_command(&mut command, "wget download failed")
}

/// Dispatches extraction on the archive suffix. Unpacking leans on host
/// `tar`/`unzip`, which also own path-traversal hygiene.
fn extract_archive(archive_path: &Path, url: &str, strip: u32, dest_dir: &Path) -> Result<()> {
    let lower = url.to_ascii_lowercase();

    let tar_flag = if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        Some("-xzf")
    } else if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
        Some("-xJf")
    } else if lower.ends_with(".tar.bz2") || lower.ends_with(".tbz2") {
        Some("-xjf")
    } else if lower.ends_with(".tar") {
        Some("-xf")
    } else {
        None
    };

    if let Some(flag) = tar_flag {
        let mut command = Command::new("tar");
        command.arg(flag).arg(archive_path).arg("-C").arg(dest_dir);
        if strip > 0 {
            command.arg(format!("--strip-components={strip}"));
        }
        return run_command(&mut command, "tar extraction failed");
    }

    if lower.ends_with(".zip") {
        let mut command = Command::new("unzip");
        command.arg("-q").arg(archive_path).arg("-d").arg(dest_dir);
        return run_command(&mut command, "unzip extraction failed");
    }

    bail!("unsupported archive format: {url}")
}

fn run_command(command: &mut Command, context_message: &str) -> Result<()> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    Err(anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}

#[cfg(unix)]
fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
