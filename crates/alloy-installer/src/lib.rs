//! Install engine for the alloy package manager.
//!
//! Interprets a package's resolved install steps against the live
//! filesystem, recording every mutation in the package's ledger so the
//! whole installation can be undone, including halfway through when a
//! step fails and the ledger-so-far is rolled back.

mod fetch;
mod installer;
mod steps;
mod uninstall;

pub use installer::Installer;
pub use uninstall::{uninstall_package, RemoveOptions};
