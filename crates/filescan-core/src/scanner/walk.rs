use super::with_trailing_separator;
use crate::config::ScanOptions;
use glob::Pattern;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::error;
use walkdir::{DirEntry, WalkDir};

/// A regular file found under the scan root.
#[derive(Debug, Clone)]
pub struct DiskFile {
    pub path: PathBuf,
    /// Parent directory with a trailing separator.
    pub dirpath: String,
    pub filename: String,
}

/// An entry the walk had to skip.
#[derive(Error, Debug)]
pub enum WalkError {
    #[error("{0}")]
    Unreadable(#[from] walkdir::Error),

    /// Files and directories whose path cannot be an inventory key.
    #[error("{} is not valid UTF-8", .0.display())]
    NonUtf8(PathBuf),
}

impl WalkError {
    pub fn path(&self) -> Option<&Path> {
        match self {
            WalkError::Unreadable(e) => e.path(),
            WalkError::NonUtf8(path) => Some(path),
        }
    }
}

/// Serial, sorted directory traversal that never follows symlinks and prunes
/// ignored directories before descending into them.
pub struct Walker {
    ignore_dirs: HashSet<String>,
    ignore_patterns: Vec<Pattern>,
}

impl Walker {
    pub fn new(options: &ScanOptions) -> Self {
        let ignore_patterns = options
            .ignore_patterns
            .iter()
            .filter_map(|glob| match Pattern::new(glob) {
                Ok(p) => Some(p),
                Err(e) => {
                    error!("Invalid glob pattern '{}': {}", glob, e);
                    None
                }
            })
            .collect();

        Self {
            ignore_dirs: options.ignore_dirs.iter().cloned().collect(),
            ignore_patterns,
        }
    }

    fn is_ignored(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return false;
        }
        if entry.file_type().is_dir() {
            let name = entry.file_name().to_string_lossy();
            if self.ignore_dirs.contains(name.as_ref()) {
                return true;
            }
        }
        self.ignore_patterns
            .iter()
            .any(|pattern| pattern.matches_path(entry.path()))
    }

    /// Regular files under `root`. Entries that cannot be read or named come
    /// through as errors; traversal carries on with their siblings.
    pub fn walk<'a>(&'a self, root: &Path) -> Walk<'a> {
        Walk {
            walker: self,
            inner: WalkDir::new(root)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter(),
        }
    }
}

pub struct Walk<'a> {
    walker: &'a Walker,
    inner: walkdir::IntoIter,
}

impl Iterator for Walk<'_> {
    type Item = Result<DiskFile, WalkError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e.into())),
            };
            let is_dir = entry.file_type().is_dir();
            if self.walker.is_ignored(&entry) {
                if is_dir {
                    self.inner.skip_current_dir();
                }
                continue;
            }
            if !is_dir && !entry.file_type().is_file() {
                continue;
            }
            if entry.path().to_str().is_none() {
                if is_dir {
                    self.inner.skip_current_dir();
                }
                return Some(Err(WalkError::NonUtf8(entry.into_path())));
            }
            if !is_dir {
                if let Some(file) = to_disk_file(entry) {
                    return Some(Ok(file));
                }
            }
        }
    }
}

fn to_disk_file(entry: DirEntry) -> Option<DiskFile> {
    let path = entry.into_path();
    let dirpath = with_trailing_separator(path.parent()?)?;
    let filename = path.file_name()?.to_str()?.to_string();
    Some(DiskFile {
        path,
        dirpath,
        filename,
    })
}
