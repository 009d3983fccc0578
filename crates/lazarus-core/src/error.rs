//! Error types for image access and scanning.
//!
//! Only [`ImageOpenError`] is fatal to a scan. Everything that goes wrong
//! with a single entry is an [`EntryAccessError`], which the scanner absorbs
//! and records as a [`ScanWarning`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The image, its filesystem or its root directory could not be opened.
#[derive(Debug, Error)]
pub enum ImageOpenError {
    /// Image file does not exist.
    #[error("Image not found: {path}")]
    NotFound { path: PathBuf },

    /// Image file exists but could not be read or mapped.
    #[error("Cannot read image {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No supported filesystem was recognised.
    #[error("Unrecognised filesystem in {path}")]
    UnknownFilesystem { path: PathBuf },

    /// Filesystem metadata (boot sector, allocation table) is unusable.
    #[error("Corrupt filesystem metadata: {message}")]
    Corrupt { message: String },

    /// Root directory could not be opened.
    #[error("Cannot open root directory: {0}")]
    RootDirectory(#[source] EntryAccessError),
}

impl ImageOpenError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }

    /// Wrap a low-level parsing failure.
    pub fn corrupt(error: &anyhow::Error) -> Self {
        Self::Corrupt {
            message: format!("{error:#}"),
        }
    }
}

/// A single directory or file entry could not be accessed.
#[derive(Debug, Clone, Error)]
pub enum EntryAccessError {
    /// Directory contents could not be listed.
    #[error("Cannot list directory {directory}: {message}")]
    ListDirectory { directory: String, message: String },

    /// Entry could not be opened as a directory.
    #[error("Cannot open {name} as a directory: {message}")]
    OpenDirectory { name: String, message: String },

    /// Content bytes could not be retrieved.
    #[error("Cannot read content of {name}: {message}")]
    ContentRead { name: String, message: String },

    /// Entry name is not valid text.
    #[error("Name is not valid text: {lossy}")]
    NameDecode { lossy: String },
}

impl EntryAccessError {
    /// Short machine-friendly kind, mirrored into [`WarningKind`].
    pub fn kind(&self) -> WarningKind {
        match self {
            Self::ListDirectory { .. } | Self::OpenDirectory { .. } => WarningKind::DirectoryAccess,
            Self::ContentRead { .. } => WarningKind::ContentRead,
            Self::NameDecode { .. } => WarningKind::NameDecode,
        }
    }
}

/// Kind of scan warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    /// Directory could not be listed or opened.
    DirectoryAccess,
    /// Candidate content could not be read; preview degraded to empty.
    ContentRead,
    /// Name contained invalid text and was decoded lossily.
    NameDecode,
    /// Directory already visited in this scan.
    DirectoryCycle,
    /// Maximum traversal depth reached.
    DepthLimit,
}

/// Non-fatal problem encountered during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWarning {
    /// Logical path where the warning occurred.
    pub path: String,
    /// Human-readable message.
    pub message: String,
    /// Kind of warning.
    pub kind: WarningKind,
}

impl ScanWarning {
    /// Create a new scan warning.
    pub fn new(path: impl Into<String>, message: impl Into<String>, kind: WarningKind) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
        }
    }

    /// Create a warning from an absorbed entry fault.
    pub fn from_access_error(path: impl Into<String>, error: &EntryAccessError) -> Self {
        Self::new(path, error.to_string(), error.kind())
    }
}
