use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// One element of a package's ordered install program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallStep {
    #[serde(flatten)]
    pub action: StepAction,

    /// Restrict the step to specific `<os>-<arch>` hosts. Empty means
    /// every platform.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<String>,
}

/// The step payload, tagged by `type` in the package definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    /// Execute a shell command beneath the extracted source directory.
    Run {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workdir: Option<String>,
    },
    /// Copy a file out of the source tree to an absolute destination.
    Copy {
        src: String,
        dest: String,
        /// Octal permission string, e.g. `"0755"`. Defaults to the source
        /// file's own permission bits.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
    },
    /// Create a directory (and any missing parents).
    Mkdir {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
    },
    /// Create a symlink at `dest` pointing to `src`.
    Symlink { src: String, dest: String },
}

impl StepAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Run { .. } => "run",
            Self::Copy { .. } => "copy",
            Self::Mkdir { .. } => "mkdir",
            Self::Symlink { .. } => "symlink",
        }
    }
}

impl InstallStep {
    pub(crate) fn validate(&self) -> Result<()> {
        match &self.action {
            StepAction::Run { command, .. } => {
                if command.trim().is_empty() {
                    return Err(anyhow!("run step requires a command"));
                }
            }
            StepAction::Copy { src, dest, .. } => {
                if src.trim().is_empty() {
                    return Err(anyhow!("copy step requires src"));
                }
                if dest.trim().is_empty() {
                    return Err(anyhow!("copy step requires dest"));
                }
            }
            StepAction::Mkdir { path, .. } => {
                if path.trim().is_empty() {
                    return Err(anyhow!("mkdir step requires path"));
                }
            }
            StepAction::Symlink { src, dest } => {
                if src.trim().is_empty() {
                    return Err(anyhow!("symlink step requires src"));
                }
                if dest.trim().is_empty() {
                    return Err(anyhow!("symlink step requires dest"));
                }
            }
        }
        Ok(())
    }

    pub fn matches_platform(&self, platform: &str) -> bool {
        self.platforms.is_empty() || self.platforms.iter().any(|p| p == platform)
    }
}

/// The `<os>-<arch>` identifier of the running host, e.g.
/// `linux-x86_64` or `macos-aarch64`.
pub fn host_platform() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}
