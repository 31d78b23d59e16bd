pub mod walk;

pub use walk::{DiskFile, WalkError, Walker};

use crate::error::{Error, Result};
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, MAIN_SEPARATOR};
use std::time::{SystemTime, UNIX_EPOCH};

/// Canonical absolute form of a scan root, always ending in the path
/// separator. Every prefix-scoped store query uses this string.
pub fn normalize_root(root: &Path) -> Result<String> {
    let canonical = fs::canonicalize(root)?;
    if !canonical.is_dir() {
        return Err(Error::InvalidRoot(format!(
            "{} is not a directory",
            root.display()
        )));
    }
    with_trailing_separator(&canonical).ok_or_else(|| {
        Error::InvalidRoot(format!("{} is not valid UTF-8", canonical.display()))
    })
}

/// Directory key for the inventory. `None` when the path is not valid UTF-8,
/// since a lossy conversion would let distinct paths share one key.
pub fn with_trailing_separator(path: &Path) -> Option<String> {
    let mut s = path.to_str()?.to_string();
    if !s.ends_with(MAIN_SEPARATOR) {
        s.push(MAIN_SEPARATOR);
    }
    Some(s)
}

/// Modification time as signed nanoseconds since the Unix epoch.
pub fn modified_nanos(metadata: &Metadata) -> io::Result<i64> {
    nanos_since_epoch(metadata.modified()?)
}

fn nanos_since_epoch(time: SystemTime) -> io::Result<i64> {
    let out_of_range =
        |_| io::Error::new(io::ErrorKind::InvalidData, "modification time out of range");
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).map_err(out_of_range),
        Err(e) => i64::try_from(e.duration().as_nanos())
            .map(|n| -n)
            .map_err(out_of_range),
    }
}
