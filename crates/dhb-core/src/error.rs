use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DhbError>;

#[derive(Debug, Error)]
pub enum DhbError {
    #[error("cannot open source '{}': {source}", path.display())]
    OpenSource { path: PathBuf, source: io::Error },

    #[error("cannot create destination '{}': {source}", path.display())]
    CreateDestination { path: PathBuf, source: io::Error },

    #[error("read error on '{}': {source}", path.display())]
    ReadIo { path: PathBuf, source: io::Error },

    #[error("write error on '{}': {source}", path.display())]
    WriteIo { path: PathBuf, source: io::Error },

    #[error("hard link to '{}' failed: {source}", path.display())]
    HardLink { path: PathBuf, source: io::Error },

    #[error("manifest '{}' is corrupt: {reason}", path.display())]
    ManifestCorrupt { path: PathBuf, reason: String },

    #[error("destination out of space: need {needed} bytes but only {available} available")]
    OutOfSpace { needed: u64, available: u64 },

    #[error("cannot reclaim space: no deletable backup sets remain")]
    ReclaimExhausted,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

impl DhbError {
    /// Errors that abort the whole run. Everything else is a per-file
    /// failure the directory walk records and continues past.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DhbError::OutOfSpace { .. } | DhbError::ReclaimExhausted
        )
    }
}
