//! Small filesystem helpers shared by the staleness checks and the scheduler.

use filetime::FileTime;
use std::path::Path;

/// MTime info gathered for a file.  This also models "file is absent".
/// It's not using an Option<> just because it makes the code using it easier
/// to follow.  Stamps are seconds since the epoch, as floats, which is also
/// how they are persisted in hash records.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum MTime {
    Missing,
    Stamp(f64),
}

/// Converts a FileTime to float seconds since the epoch.
pub fn secs_of(time: FileTime) -> f64 {
    time.unix_seconds() as f64 + f64::from(time.nanoseconds()) * 1e-9
}

/// stat() an on-disk path, following symlinks, producing its MTime.
pub fn stat(path: &Path) -> std::io::Result<MTime> {
    Ok(match std::fs::metadata(path) {
        Ok(meta) => MTime::Stamp(secs_of(FileTime::from_last_modification_time(&meta))),
        Err(err) => {
            if err.kind() == std::io::ErrorKind::NotFound {
                MTime::Missing
            } else {
                return Err(err);
            }
        }
    })
}

/// Whether anything, including a dangling symlink, exists at a path.
pub fn lexists(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

/// Removes a file, treating "already gone" as success.
pub fn remove_file(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Creates the parent directory of a path, if it has one.
pub fn create_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
