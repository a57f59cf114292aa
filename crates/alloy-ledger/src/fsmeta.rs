use std::fs::Metadata;
use std::io;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use filetime::FileTime;

/// Owner ids of a file. Hosts that do not expose ownership report `(0, 0)`,
/// a degraded but valid state.
#[cfg(unix)]
pub(crate) fn ownership(meta: &Metadata) -> (u32, u32) {
    use std::os::unix::fs::MetadataExt;
    (meta.uid(), meta.gid())
}

#[cfg(not(unix))]
pub(crate) fn ownership(_meta: &Metadata) -> (u32, u32) {
    (0, 0)
}

/// Permission bits of a file, masked to the unix mode space.
#[cfg(unix)]
pub(crate) fn permission_bits(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
pub(crate) fn permission_bits(meta: &Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(unix)]
pub(crate) fn set_permission_bits(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub(crate) fn set_permission_bits(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

pub(crate) fn modified_at(meta: &Metadata) -> DateTime<Utc> {
    let mtime = FileTime::from_last_modification_time(meta);
    Utc.timestamp_opt(mtime.unix_seconds(), mtime.nanoseconds())
        .single()
        .unwrap_or_default()
}

pub(crate) fn set_modified_at(path: &Path, when: DateTime<Utc>) -> io::Result<()> {
    let mtime = FileTime::from_unix_time(when.timestamp(), when.timestamp_subsec_nanos());
    filetime::set_file_mtime(path, mtime)
}
