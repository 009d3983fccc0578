//! Backup payloads and the sink interface remote backends implement.
//!
//! The core performs no network I/O. A [`BackupSink`] receives a payload and
//! a [`CredentialToken`] obtained elsewhere.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recovery::RecoveryCandidate;

/// Fallback MIME type
pub const OCTET_STREAM: &str = "application/octet-stream";

/// MIME type inferred from a file name's extension.
pub fn mime_type_for(name: &str) -> &'static str {
    let extension = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_lowercase(),
        _ => return OCTET_STREAM,
    };

    match extension.as_str() {
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tiff" => "image/tiff",
        "txt" | "log" | "cfg" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        "json" => "application/json",
        "rtf" => "application/rtf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "odt" => "application/vnd.oasis.opendocument.text",
        "ods" => "application/vnd.oasis.opendocument.spreadsheet",
        "odp" => "application/vnd.oasis.opendocument.presentation",
        "zip" => "application/zip",
        "rar" => "application/vnd.rar",
        "7z" => "application/x-7z-compressed",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "wmv" => "video/x-ms-wmv",
        _ => OCTET_STREAM,
    }
}

/// What gets uploaded for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPayload {
    pub name: String,
    pub mime_type: &'static str,
    pub content: Vec<u8>,
}

impl BackupPayload {
    /// Payload carrying the candidate's preview buffer.
    pub fn from_candidate<N>(candidate: &RecoveryCandidate<N>) -> Result<Self, BackupError> {
        if !candidate.preview_available {
            return Err(BackupError::NoContent {
                name: candidate.name.clone(),
            });
        }
        Ok(Self {
            name: candidate.name.clone(),
            mime_type: candidate.mime_type(),
            content: candidate.preview.clone(),
        })
    }
}

/// Bearer credential for a backup backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialToken {
    bearer: String,
    expires_at: DateTime<Utc>,
}

impl CredentialToken {
    pub fn new(bearer: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            bearer: bearer.into(),
            expires_at,
        }
    }

    pub fn bearer(&self) -> &str {
        &self.bearer
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for CredentialToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialToken")
            .field("bearer", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Identifier the backend assigned to an uploaded payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteId(pub String);

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Credential expired at {expired_at}")]
    CredentialExpired { expired_at: DateTime<Utc> },

    #[error("No content available for {name}")]
    NoContent { name: String },

    #[error("Upload failed: {message}")]
    Upload { message: String },
}

/// A remote destination for backups.
pub trait BackupSink {
    fn upload(
        &mut self,
        payload: &BackupPayload,
        token: &CredentialToken,
    ) -> Result<RemoteId, BackupError>;
}

/// Build a payload for `candidate` and hand it to `sink`.
///
/// Expired tokens are rejected before the sink is called.
pub fn backup_candidate<N, S: BackupSink + ?Sized>(
    sink: &mut S,
    candidate: &RecoveryCandidate<N>,
    token: &CredentialToken,
    now: DateTime<Utc>,
) -> Result<RemoteId, BackupError> {
    if token.is_expired_at(now) {
        return Err(BackupError::CredentialExpired {
            expired_at: token.expires_at(),
        });
    }

    let payload = BackupPayload::from_candidate(candidate)?;
    let remote_id = sink.upload(&payload, token)?;
    tracing::info!(
        "Backed up {} ({}, {} bytes) as {}",
        candidate.path,
        payload.mime_type,
        payload.content.len(),
        remote_id
    );
    Ok(remote_id)
}
