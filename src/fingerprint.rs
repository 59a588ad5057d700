//! File fingerprints used to detect changes without reading contents.

use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

/// Failure to stat a file that was about to be fingerprinted.
#[derive(Debug, Error)]
#[error("stat {path}: {source}")]
pub struct StatError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl From<StatError> for io::Error {
    fn from(err: StatError) -> Self {
        io::Error::new(err.source.kind(), err.to_string())
    }
}

/// Modification time, size and mode of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub modified: Option<SystemTime>,
    pub size: u64,
    pub mode: u32,
}

/// Bit set in [`Fingerprint::mode`] for directories.
pub const MODE_DIR: u32 = 1 << 31;

impl Fingerprint {
    /// Build a fingerprint from metadata already at hand.
    pub fn from_metadata(meta: &Metadata) -> Self {
        let mut mode = permission_bits(meta);
        if meta.is_dir() {
            mode |= MODE_DIR;
        }
        Self { modified: meta.modified().ok(), size: meta.len(), mode }
    }

    /// Stat `path` and fingerprint it.
    pub fn of(path: &Path) -> Result<Self, StatError> {
        std::fs::metadata(path)
            .map(|meta| Self::from_metadata(&meta))
            .map_err(|source| StatError { path: path.to_path_buf(), source })
    }

    pub fn is_dir(&self) -> bool {
        self.mode & MODE_DIR != 0
    }

    /// Whether `other` describes a different state of the same entry.
    ///
    /// Directories compare by mode only; their size and mtime move whenever
    /// a child is touched.
    pub fn differs(&self, other: &Fingerprint) -> bool {
        if self.mode != other.mode {
            return true;
        }
        if self.is_dir() {
            return false;
        }
        self.modified != other.modified || self.size != other.size
    }
}

#[cfg(unix)]
fn permission_bits(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}
