use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};

use alloy_core::PackageDef;
use alloy_installer::{uninstall_package, Installer, RemoveOptions};
use alloy_ledger::{
    self as ledger, check_all_ledgers, check_directory_permissions, find_orphaned_backups,
    DiagStatus, DoctorOptions, Ledger, Op,
};

mod render;

/// A fast, opinionated package manager that installs software directly
/// onto your system and guarantees complete removal.
#[derive(Parser, Debug)]
#[command(name = "alloy", version, about, long_about = None)]
struct Cli {
    /// Run without making any changes to the system
    #[arg(long, global = true)]
    dry_run: bool,

    /// Show detailed output
    #[arg(long, global = true)]
    verbose: bool,

    /// Directory containing package definitions
    #[arg(long, global = true, default_value = "packages")]
    packages_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install a package
    Install {
        /// Name of the package to install
        package: String,
    },
    /// Remove an installed package
    Remove {
        /// Name of the package to remove
        package: String,

        /// Remove files even if they were modified externally
        #[arg(long)]
        force: bool,

        /// Keep backup files after restoring them
        #[arg(long)]
        keep_backups: bool,
    },
    /// List installed packages
    List,
    /// Show information about a package
    Info {
        /// Name of the package
        package: String,
    },
    /// Check system health and diagnose issues
    Doctor {
        /// Also verify installed files against their recorded checksums
        #[arg(long)]
        check_files: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Install { ref package } => cmd_install(&cli, package),
        Commands::Remove {
            ref package,
            force,
            keep_backups,
        } => cmd_remove(&cli, package, force, keep_backups),
        Commands::List => cmd_list(&cli),
        Commands::Info { ref package } => cmd_info(&cli, package),
        Commands::Doctor { check_files } => cmd_doctor(check_files),
    }
}

fn cmd_install(cli: &Cli, package: &str) -> Result<()> {
    let mut installer = Installer::new()?;
    installer.packages_dir = cli.packages_dir.clone();
    installer.dry_run = cli.dry_run;
    installer.verbose = cli.verbose;

    if cli.dry_run {
        println!("[dry-run] No changes will be made to the system");
    }

    let spinner = render::phase_spinner(&format!("installing {package}"));
    {
        let spinner = spinner.clone();
        installer.on_progress = Some(Box::new(move |message| {
            spinner.println(message);
            spinner.set_message(message.to_string());
        }));
    }

    let outcome = installer.install(package);
    spinner.finish_and_clear();
    outcome
}

fn cmd_remove(cli: &Cli, package: &str, force: bool, keep_backups: bool) -> Result<()> {
    let ledger_dir = ledger::default_ledger_dir()?;

    println!("Removing {package}");
    if cli.dry_run {
        println!("[dry-run] No changes will be made to the system");
    }

    let verbose = cli.verbose;
    let on_entry = |entry: &ledger::Entry, action: &str| {
        println!("  {} {} -> {action}", entry.op, entry.path.display());
    };
    let result = uninstall_package(
        &ledger_dir,
        package,
        &RemoveOptions {
            dry_run: cli.dry_run,
            force,
            verbose,
            keep_backups,
        },
        Some(&on_entry),
    )?;

    if !result.modified_files.is_empty() {
        println!("\nWarning: the following files were modified externally:");
        for path in &result.modified_files {
            println!("  {}", path.display());
        }
        if !force {
            println!("Use --force to remove anyway");
        }
    }

    if result.has_errors() {
        println!("\nErrors occurred during removal:");
        for failure in &result.errors {
            println!("  {}: {:#}", failure.entry.path.display(), failure.error);
        }
        return Err(anyhow!(
            "removal of '{package}' completed with {} error(s); ledger retained",
            result.errors.len()
        ));
    }

    println!(
        "Successfully removed {package} ({} entries processed, {} skipped)",
        result.processed, result.skipped
    );
    Ok(())
}

fn cmd_list(cli: &Cli) -> Result<()> {
    let ledger_dir = ledger::default_ledger_dir()?;
    let packages = ledger::list(&ledger_dir)?;

    if packages.is_empty() {
        println!("No packages installed");
        return Ok(());
    }

    println!("Installed packages ({}):", packages.len());
    for name in &packages {
        if !cli.verbose {
            println!("  {name}");
            continue;
        }
        match Ledger::open(&ledger_dir, name) {
            Ok(ledg) => {
                let files = ledg.filter_by_op(Op::FileCreate).len()
                    + ledg.filter_by_op(Op::FileOverwrite).len();
                println!("  {name}");
                println!(
                    "    Installed: {}",
                    ledg.header.installed_at.format("%Y-%m-%d %H:%M:%S")
                );
                println!("    Source: {}", ledg.header.source);
                println!("    Files: {files}");
            }
            Err(_) => println!("  {name} (error reading ledger)"),
        }
    }
    Ok(())
}

fn cmd_info(cli: &Cli, package: &str) -> Result<()> {
    let def_path = cli.packages_dir.join(format!("{package}.toml"));
    let def = PackageDef::parse_file(&def_path).ok();

    let ledger_dir = ledger::default_ledger_dir()?;
    let ledg = if ledger::exists(&ledger_dir, package) {
        Some(Ledger::open(&ledger_dir, package).with_context(|| {
            format!("failed to read ledger for installed package '{package}'")
        })?)
    } else {
        None
    };

    if def.is_none() && ledg.is_none() {
        return Err(anyhow!("package '{package}' not found"));
    }

    println!("Package: {package}");

    if let Some(def) = &def {
        println!("Version: {}", def.version);
        if let Some(description) = &def.description {
            println!("Description: {description}");
        }
        if let Some(homepage) = &def.homepage {
            println!("Homepage: {homepage}");
        }
        if let Some(license) = &def.license {
            println!("License: {license}");
        }
        let kind = def
            .source
            .kind()
            .map(|kind| kind.as_str())
            .unwrap_or("none");
        println!("Source: {} ({kind})", def.source.location());
    }

    match &ledg {
        Some(ledg) => {
            println!("\nInstallation:");
            println!("  Status: installed");
            println!(
                "  Installed at: {}",
                ledg.header.installed_at.format("%Y-%m-%d %H:%M:%S")
            );
            println!("  Source: {}", ledg.header.source);
            println!("  Files created: {}", ledg.filter_by_op(Op::FileCreate).len());
            println!(
                "  Files overwritten: {}",
                ledg.filter_by_op(Op::FileOverwrite).len()
            );
            println!(
                "  Directories created: {}",
                ledg.filter_by_op(Op::DirCreate).len()
            );
            println!(
                "  Symlinks created: {}",
                ledg.filter_by_op(Op::SymlinkCreate).len()
            );
        }
        None => println!("\nStatus: not installed"),
    }
    Ok(())
}

fn cmd_doctor(check_files: bool) -> Result<()> {
    println!("Running system health check...\n");

    let root = ledger::alloy_home()?;
    let mut issues = 0usize;

    for diag in check_directory_permissions(&root) {
        println!("{}", render::status_line(diag.status, &diag.message));
        if diag.status == DiagStatus::Error {
            issues += 1;
        }
    }

    let ledger_dir = ledger::default_ledger_dir()?;
    let backup_dir = ledger::default_backup_dir()?;
    let opts = DoctorOptions {
        verbose: false,
        check_files,
    };

    for result in check_all_ledgers(&ledger_dir, &backup_dir, &opts)? {
        if let Some(err) = &result.parse_error {
            println!(
                "{}",
                render::status_line(
                    DiagStatus::Error,
                    &format!("ledger for '{}' is unreadable: {err:#}", result.package)
                )
            );
            issues += 1;
            continue;
        }
        if result.has_issues() {
            println!(
                "{}",
                render::status_line(
                    DiagStatus::Warning,
                    &format!(
                        "'{}': {} missing backup(s), {} orphaned file(s), {} modified file(s)",
                        result.package,
                        result.missing_backups.len(),
                        result.orphaned_files.len(),
                        result.modified_files.len()
                    )
                )
            );
            issues += 1;
        } else {
            println!(
                "{}",
                render::status_line(
                    DiagStatus::Ok,
                    &format!("'{}': {} entries intact", result.package, result.entry_count)
                )
            );
        }
    }

    let orphans = find_orphaned_backups(&ledger_dir, &backup_dir)?;
    if orphans.is_empty() {
        println!("{}", render::status_line(DiagStatus::Ok, "no orphaned backups"));
    } else {
        println!(
            "{}",
            render::status_line(
                DiagStatus::Warning,
                &format!("{} orphaned backup(s) in {}", orphans.len(), backup_dir.display())
            )
        );
        for orphan in &orphans {
            println!("    {}", orphan.display());
        }
    }

    println!();
    if issues > 0 {
        return Err(anyhow!("found {issues} issue(s)"));
    }
    println!("All checks passed!");
    Ok(())
}
