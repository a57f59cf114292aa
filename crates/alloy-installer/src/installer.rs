use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::warn;

use alloy_core::{InstallStep, PackageDef, StepAction};
use alloy_ledger::{self as ledger, Ledger, Recorder, ReplayOptions};

use crate::fetch;
use crate::steps::execute_step;

/// Orchestrates package installation: fetch, ledger, step execution, and
/// rollback on failure.
pub struct Installer {
    /// Directory containing package definitions (`<name>.toml`).
    pub packages_dir: PathBuf,
    pub ledger_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub dry_run: bool,
    pub verbose: bool,
    /// Progress reporting hook; silent when unset.
    pub on_progress: Option<Box<dyn Fn(&str)>>,
}

impl Installer {
    /// An installer over the default `~/.alloy` layout.
    pub fn new() -> Result<Self> {
        Ok(Self {
            packages_dir: PathBuf::from("packages"),
            ledger_dir: ledger::default_ledger_dir()?,
            backup_dir: ledger::default_backup_dir()?,
            dry_run: false,
            verbose: false,
            on_progress: None,
        })
    }

    /// Installs a package by name: loads its definition, fetches the
    /// source, and executes the install steps under a fresh ledger.
    pub fn install(&self, name: &str) -> Result<()> {
        self.progress(&format!("Loading package definition for {name}"));
        let def = self.load_package(name)?;

        if ledger::exists(&self.ledger_dir, name) {
            return Err(anyhow!("package '{name}' is already installed"));
        }

        if self.dry_run {
            return self.dry_run_install(&def);
        }

        let source = def.expanded_source();
        self.progress(&format!("Fetching source from {}", source.location()));
        let src_dir = fetch::fetch_source(&def, &|msg| self.progress(msg))?;

        let steps = def.expanded_steps(src_dir.path());
        self.install_steps(name, source.location(), &steps, src_dir.path())?;

        self.progress(&format!("Successfully installed {}@{}", def.name, def.version));
        Ok(())
    }

    /// Executes resolved install steps under a fresh ledger. This is the
    /// engine entry point; `install` feeds it after fetching.
    ///
    /// Any step error rolls the ledger back with `force`, deletes it, and
    /// surfaces the original error naming the failing step.
    pub fn install_steps(
        &self,
        name: &str,
        source: &str,
        steps: &[InstallStep],
        src_dir: &Path,
    ) -> Result<()> {
        let ledger = Ledger::create(&self.ledger_dir, name, source)?;
        let mut recorder = Recorder::new(ledger, &self.backup_dir);

        self.progress(&format!("Executing {} install steps", steps.len()));
        for (index, step) in steps.iter().enumerate() {
            self.progress(&format!(
                "Step {}/{}: {}",
                index + 1,
                steps.len(),
                describe_step(step)
            ));

            if let Err(err) = execute_step(step, src_dir, &mut recorder) {
                self.progress("Error during installation, rolling back...");
                self.rollback(recorder.into_ledger());
                return Err(err)
                    .with_context(|| format!("step {} ({})", index + 1, step.action.kind()));
            }
        }

        recorder.close()
    }

    fn dry_run_install(&self, def: &PackageDef) -> Result<()> {
        let source = def.expanded_source();
        self.progress(&format!(
            "[dry-run] Would fetch source from {}",
            source.location()
        ));

        let steps = def.expanded_steps(Path::new("/tmp/source"));
        self.progress(&format!(
            "[dry-run] Would execute {} install steps:",
            steps.len()
        ));
        for (index, step) in steps.iter().enumerate() {
            self.progress(&format!(
                "[dry-run]   Step {}: {}",
                index + 1,
                describe_step(step)
            ));
        }

        self.progress("[dry-run] Dry run complete, no changes made");
        Ok(())
    }

    fn load_package(&self, name: &str) -> Result<PackageDef> {
        let path = self.packages_dir.join(format!("{name}.toml"));
        PackageDef::parse_file(&path)
    }

    /// Undoes a partial installation. Forced: a half-written install has no
    /// original state worth preserving over a clean rollback.
    fn rollback(&self, mut ledger: Ledger) {
        if let Err(err) = ledger.close() {
            warn!(%err, "failed to close ledger before rollback");
        }

        let on_entry = |entry: &ledger::Entry, action: &str| {
            self.progress(&format!(
                "  Rollback: {} {} -> {action}",
                entry.op,
                entry.path.display()
            ));
        };
        let result = ledger::reverse_replay(
            &ledger,
            &ReplayOptions {
                force: true,
                verbose: self.verbose,
                on_entry: Some(&on_entry),
                ..ReplayOptions::default()
            },
        );

        for failure in &result.errors {
            self.progress(&format!(
                "  Rollback failed for {}: {:#}",
                failure.entry.path.display(),
                failure.error
            ));
        }

        if let Err(err) = ledger.delete() {
            warn!(%err, "failed to delete ledger after rollback");
        }
    }

    fn progress(&self, message: &str) {
        if let Some(on_progress) = &self.on_progress {
            on_progress(message);
        }
    }
}

pub(crate) fn describe_step(step: &InstallStep) -> String {
    match &step.action {
        StepAction::Run { command, .. } => format!("run: {command}"),
        StepAction::Copy { src, dest, .. } => format!("copy: {src} -> {dest}"),
        StepAction::Mkdir { path, .. } => format!("mkdir: {path}"),
        StepAction::Symlink { src, dest } => format!("symlink: {src} -> {dest}"),
    }
}
