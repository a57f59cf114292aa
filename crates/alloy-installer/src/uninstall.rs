use std::path::Path;

use anyhow::{anyhow, Result};

use alloy_ledger::{self as ledger, Entry, Ledger, ReplayOptions, ReplayResult};

/// Configuration for a package removal.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    pub dry_run: bool,
    /// Remove files even when they drifted from the recorded state.
    pub force: bool,
    pub verbose: bool,
    /// Retain restored backups instead of unlinking them.
    pub keep_backups: bool,
}

/// Removes an installed package by reverse-replaying its ledger.
///
/// The ledger file is deleted only after a clean, non-dry-run replay; a
/// replay with errors leaves it in place so the removal can be retried.
/// Returns the replay result for the caller to render and judge.
pub fn uninstall_package(
    ledger_dir: &Path,
    name: &str,
    opts: &RemoveOptions,
    on_entry: Option<&dyn Fn(&Entry, &str)>,
) -> Result<ReplayResult> {
    if !ledger::exists(ledger_dir, name) {
        return Err(anyhow!("package '{name}' is not installed"));
    }

    let ledger = Ledger::open(ledger_dir, name)?;
    let result = ledger::reverse_replay(
        &ledger,
        &ReplayOptions {
            dry_run: opts.dry_run,
            force: opts.force,
            verbose: opts.verbose,
            keep_backups: opts.keep_backups,
            on_entry,
        },
    );

    if !opts.dry_run && !result.has_errors() {
        ledger.delete()?;
    }

    Ok(result)
}
