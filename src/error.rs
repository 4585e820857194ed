use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised by the acquisition, patching, and install pipeline.
///
/// Every operation below the manager returns `Result<T, ManagerError>`; the manager turns
/// whatever reaches it into a status string for the shell.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server returned HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid mod package: {0}")]
    InvalidPackage(String),

    #[error("files not properly installed: missing {}", .missing.display())]
    IncompleteInstall { missing: PathBuf },

    #[error("cache metadata unreadable: {0}")]
    CacheCorruption(String),

    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ManagerError>;

impl ManagerError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        ManagerError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Recoverable failures that allow falling back to a cached copy.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            ManagerError::Network(_) | ManagerError::HttpStatus { .. }
        )
    }
}

impl From<reqwest::Error> for ManagerError {
    fn from(err: reqwest::Error) -> Self {
        match (err.status(), err.url()) {
            (Some(status), Some(url)) => ManagerError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            },
            _ => ManagerError::Network(err.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ManagerError {
    fn from(err: tokio::task::JoinError) -> Self {
        ManagerError::Task(err.to_string())
    }
}

impl From<serde_json::Error> for ManagerError {
    fn from(err: serde_json::Error) -> Self {
        ManagerError::Parse(err.to_string())
    }
}
