//! Install ledger for the alloy package manager.
//!
//! Every file system mutation performed on behalf of a package is recorded
//! in a per-package append-only ledger (`~/.alloy/ledgers/<pkg>.jsonl`).
//! Uninstall replays that ledger in reverse, restoring overwritten
//! originals from the content-addressed backup store and refusing, unless
//! forced, to remove files something else has modified since.

mod backup;
mod checksum;
mod doctor;
mod fsmeta;
mod ledger;
mod record;
mod replay;
mod types;

pub use backup::BackupStore;
pub use checksum::{hash_bytes, hash_file, hash_stream, verify};
pub use doctor::{
    check_all_ledgers, check_directory_permissions, check_ledger_integrity,
    find_orphaned_backups, DiagStatus, DiagnosticResult, DoctorOptions, LedgerIntegrityResult,
};
pub use ledger::{
    alloy_home, default_backup_dir, default_ledger_dir, exists, ledger_path, list, Ledger,
    LedgerStream,
};
pub use record::Recorder;
pub use replay::{reverse_replay, ReplayError, ReplayOptions, ReplayResult};
pub use types::{Entry, Header, Op, OriginalFile, CURRENT_VERSION};

#[cfg(test)]
mod tests;
