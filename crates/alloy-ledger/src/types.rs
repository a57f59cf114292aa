use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current ledger format version. Ledgers declaring a newer version are
/// refused outright.
pub const CURRENT_VERSION: u32 = 1;

/// A file system operation recorded in the ledger. The serialized names are
/// the wire format of the log and must never change for a given version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    FileCreate,
    FileDelete,
    FileOverwrite,
    DirCreate,
    SymlinkCreate,
    HardlinkCreate,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileCreate => "file_create",
            Self::FileDelete => "file_delete",
            Self::FileOverwrite => "file_overwrite",
            Self::DirCreate => "dir_create",
            Self::SymlinkCreate => "symlink_create",
            Self::HardlinkCreate => "hardlink_create",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded mutation. Serialized as a single JSON line; fields that do
/// not apply to the operation are absent from the output, never null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub op: Op,
    pub path: PathBuf,

    /// Wall-clock instant of the operation. Filled in by
    /// [`Ledger::record`](crate::Ledger::record) when unset.
    #[serde(rename = "ts", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Unix permission bits, present for file/dir/symlink creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,

    /// Byte length; files and hardlinks only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// Hex SHA-256 of the content at install time. Acts as the drift
    /// sentinel on replay: absent means "unconditionally undo".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    /// Link target; symlinks and hardlinks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PathBuf>,

    /// Pre-existing object displaced by this operation; `file_overwrite`
    /// and `file_delete` only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<OriginalFile>,
}

impl Entry {
    /// A bare entry with every optional field unset.
    pub fn new(op: Op, path: impl Into<PathBuf>) -> Self {
        Self {
            op,
            path: path.into(),
            timestamp: None,
            mode: None,
            uid: None,
            gid: None,
            size: None,
            checksum: None,
            target: None,
            original: None,
        }
    }
}

/// State of a file or symlink captured before a destructive mutation,
/// sufficient to restore it during reverse replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginalFile {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// Hex SHA-256 of the original content; regular files only. The backup
    /// file is content-addressed by this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,

    /// Set when the original was a symlink; such originals have no backup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PathBuf>,

    pub mtime: DateTime<Utc>,
}

/// Ledger metadata; always the first line of a ledger file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    pub package: String,
    pub installed_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_checksum: Option<String>,
}
