//! Package definitions for the alloy package manager.
//!
//! A package is a TOML document naming a source (archive URL, git
//! repository, or standalone binary) and an ordered install program of
//! copy / mkdir / symlink / run steps. Template variables such as
//! `{{version}}` and `{{bindir}}` are expanded here; the install engine
//! only ever sees resolved steps.

mod package;
mod steps;

pub use package::{InstallPaths, PackageDef, Source, SourceKind};
pub use steps::{host_platform, InstallStep, StepAction};

#[cfg(test)]
mod tests;
