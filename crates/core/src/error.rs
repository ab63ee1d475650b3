use crate::session::Activity;
use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort an operation before it touches the filesystem.
#[derive(Debug, Error)]
pub enum Error {
    #[error("directory does not exist: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot start: {active} is still in progress")]
    Busy { active: Activity },

    #[error("backup log I/O failed at {}: {source}", .path.display())]
    BackupLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backup log {} is corrupt at line {line}: {source}", .path.display())]
    CorruptBackupLog {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// An image that could not be turned into a fingerprint.
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decode {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("no decodable preview image in {}", .0.display())]
    NoPreview(PathBuf),
}

/// A single plan entry that could not be renamed.
#[derive(Debug, Error)]
pub enum RenameIoError {
    #[error("source file vanished: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("target already exists: {}", .0.display())]
    TargetExists(PathBuf),

    #[error("rename {} -> {} failed: {source}", .from.display(), .to.display())]
    Io {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A logged rename that could not be undone.
#[derive(Debug, Error)]
pub enum RestoreIoError {
    #[error("renamed file is missing: {}", .0.display())]
    RenamedFileMissing(PathBuf),

    #[error("original path is occupied: {}", .0.display())]
    OriginalOccupied(PathBuf),

    #[error("rename {} -> {} failed: {source}", .from.display(), .to.display())]
    Io {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
