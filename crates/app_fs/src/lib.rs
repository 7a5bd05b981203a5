//! StreamVio File System Access Layer
//!
//! Provides:
//! - Path string normalization (no I/O)
//! - Root discovery with an ordered fallback policy
//! - Directory browsing and creation
//! - Permission diagnosis and repair

pub mod path;
mod browser;
mod permissions;

pub use browser::{
    default_root_candidates, sort_entries, DirectoryListing, FilesystemAccessor, FilesystemEntry,
    RootStrategy, DEFAULT_MEDIA_FOLDER,
};
pub use permissions::{
    current_account, suggested_command, PermissionDiagnostics, PermissionStatus, ProbeState,
    RepairResult,
};

use std::io;
use thiserror::Error;

/// File system errors
#[derive(Error, Debug)]
pub enum FsError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {path} ({hint})")]
    PermissionDenied { path: String, hint: String },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl FsError {
    /// Classify an OS error for `path`
    pub fn from_io(error: io::Error, path: &str) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => FsError::NotFound(path.to_string()),
            io::ErrorKind::PermissionDenied => FsError::PermissionDenied {
                path: path.to_string(),
                hint: permissions::remediation_hint(path),
            },
            io::ErrorKind::InvalidInput => FsError::InvalidPath(format!("{}: {}", path, error)),
            io::ErrorKind::AlreadyExists => FsError::Conflict(format!("Already exists: {}", path)),
            _ => FsError::Io(error),
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_error_carries_hint() {
        let err = FsError::from_io(io::Error::from(io::ErrorKind::PermissionDenied), "/srv/media");
        match err {
            FsError::PermissionDenied { path, hint } => {
                assert_eq!(path, "/srv/media");
                assert!(hint.contains("/srv/media"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
