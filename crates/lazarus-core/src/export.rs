//! Writing candidate contents out of the image.
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::error::EntryAccessError;
use crate::fs::ImageAccess;
use crate::recovery::RecoveryCandidate;

/// Bytes requested from the adapter per read during a full export
const EXPORT_CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Destination already exists: {path}")]
    AlreadyExists { path: PathBuf },

    #[error("Cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No preview was captured for {name}")]
    PreviewUnavailable { name: String },

    #[error(transparent)]
    Read(#[from] EntryAccessError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExportOptions {
    /// Replace an existing destination file
    pub overwrite: bool,
}

/// What an export wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportReport {
    pub path: PathBuf,
    pub bytes_written: u64,
    pub sha256: String,
    /// False when the data ended before the candidate's recorded size
    pub complete: bool,
}

/// Write a candidate's preview buffer to `dest`.
pub fn export_preview<N>(
    candidate: &RecoveryCandidate<N>,
    dest: &Path,
    options: ExportOptions,
) -> Result<ExportReport, ExportError> {
    if !candidate.preview_available {
        return Err(ExportError::PreviewUnavailable {
            name: candidate.name.clone(),
        });
    }

    let mut writer = create_destination(dest, options)?;
    writer
        .write_all(&candidate.preview)
        .and_then(|_| writer.flush())
        .map_err(|source| io_error(dest, source))?;

    tracing::info!(
        "Exported preview of {} ({} bytes) to {}",
        candidate.path,
        candidate.preview.len(),
        dest.display()
    );

    Ok(ExportReport {
        path: dest.to_path_buf(),
        bytes_written: candidate.preview.len() as u64,
        sha256: format!("{:x}", Sha256::digest(&candidate.preview)),
        complete: candidate.preview.len() as u64 == candidate.size,
    })
}

/// Re-read a candidate's data through `image`, up to its recorded size, and
/// write it to `dest`.
///
/// A partially written destination is removed when a read or write fails.
pub fn export_full<A: ImageAccess>(
    image: &A,
    candidate: &RecoveryCandidate<A::Node>,
    dest: &Path,
    options: ExportOptions,
) -> Result<ExportReport, ExportError> {
    let writer = create_destination(dest, options)?;

    match copy_content(image, candidate, writer, dest) {
        Ok((bytes_written, sha256)) => {
            let complete = bytes_written == candidate.size;
            if !complete {
                tracing::warn!(
                    "{}: data ended after {} of {} bytes",
                    candidate.path,
                    bytes_written,
                    candidate.size
                );
            }
            tracing::info!(
                "Exported {} ({} bytes) to {}",
                candidate.path,
                bytes_written,
                dest.display()
            );
            Ok(ExportReport {
                path: dest.to_path_buf(),
                bytes_written,
                sha256,
                complete,
            })
        }
        Err(e) => {
            if let Err(remove_err) = std::fs::remove_file(dest) {
                tracing::warn!("Cannot remove partial export {}: {}", dest.display(), remove_err);
            }
            Err(e)
        }
    }
}

fn copy_content<A: ImageAccess>(
    image: &A,
    candidate: &RecoveryCandidate<A::Node>,
    mut writer: BufWriter<File>,
    dest: &Path,
) -> Result<(u64, String), ExportError> {
    let mut hasher = Sha256::new();
    let mut offset = 0u64;

    while offset < candidate.size {
        let wanted = (candidate.size - offset).min(EXPORT_CHUNK_SIZE as u64) as usize;
        let chunk = image.read_content(&candidate.node, offset, wanted)?;
        if chunk.is_empty() {
            break;
        }
        let chunk = &chunk[..chunk.len().min(wanted)];

        writer
            .write_all(chunk)
            .map_err(|source| io_error(dest, source))?;
        hasher.update(chunk);
        offset += chunk.len() as u64;
    }

    writer.flush().map_err(|source| io_error(dest, source))?;
    Ok((offset, format!("{:x}", hasher.finalize())))
}

fn create_destination(dest: &Path, options: ExportOptions) -> Result<BufWriter<File>, ExportError> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;
    }

    let mut open = OpenOptions::new();
    open.write(true);
    if options.overwrite {
        open.create(true).truncate(true);
    } else {
        open.create_new(true);
    }

    let file = open.open(dest).map_err(|source| match source.kind() {
        std::io::ErrorKind::AlreadyExists => ExportError::AlreadyExists {
            path: dest.to_path_buf(),
        },
        _ => io_error(dest, source),
    })?;

    Ok(BufWriter::new(file))
}

fn io_error(path: &Path, source: std::io::Error) -> ExportError {
    ExportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// File name to export a candidate under: its own name with path separators
/// and control characters replaced, or `recovered_file_<index>.dat`.
pub fn default_export_name<N>(candidate: &RecoveryCandidate<N>, index: usize) -> String {
    let cleaned: String = candidate
        .name
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        format!("recovered_file_{}.dat", index)
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::memory::{MemoryFile, MemoryImage, MemoryNodeId};
    use crate::fs::Allocation;

    fn candidate_for(
        image: &mut MemoryImage,
        name: &str,
        content: &[u8],
    ) -> RecoveryCandidate<MemoryNodeId> {
        let root = image.root();
        let node = image.add_file(root, MemoryFile::new(name, content.to_vec()).unallocated());
        RecoveryCandidate {
            name: name.to_string(),
            path: format!("/{name}"),
            size: content.len() as u64,
            allocation: Allocation::Unallocated,
            recovery_time: None,
            preview: content[..content.len().min(4)].to_vec(),
            preview_available: true,
            node,
        }
    }

    #[test]
    fn test_export_preview() {
        let mut image = MemoryImage::new();
        let candidate = candidate_for(&mut image, "a.txt", b"abcdefgh");
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested/out/a.txt");

        let report = export_preview(&candidate, &dest, ExportOptions::default()).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"abcd");
        assert_eq!(report.bytes_written, 4);
        assert!(!report.complete);
        assert_eq!(
            report.sha256,
            "88d4266fd4e6338d13b845fcf289579d209c897823b9217da3e161936f031589"
        );
    }

    #[test]
    fn test_export_full_rereads_content() {
        let mut image = MemoryImage::new();
        let content: Vec<u8> = (0..3 * EXPORT_CHUNK_SIZE + 17).map(|i| (i % 251) as u8).collect();
        let candidate = candidate_for(&mut image, "big.zip", &content);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("big.zip");

        let report = export_full(&image, &candidate, &dest, ExportOptions::default()).unwrap();
        assert!(report.complete);
        assert_eq!(report.bytes_written, content.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), content);
        assert_eq!(report.sha256, format!("{:x}", Sha256::digest(&content)));
    }

    #[test]
    fn test_export_full_short_data() {
        let mut image = MemoryImage::new();
        let mut candidate = candidate_for(&mut image, "short.txt", b"only this");
        candidate.size = 100;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("short.txt");

        let report = export_full(&image, &candidate, &dest, ExportOptions::default()).unwrap();
        assert_eq!(report.bytes_written, 9);
        assert!(!report.complete);
    }

    #[test]
    fn test_refuses_to_overwrite() {
        let mut image = MemoryImage::new();
        let candidate = candidate_for(&mut image, "a.txt", b"new");
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.txt");
        std::fs::write(&dest, b"old").unwrap();

        let err = export_preview(&candidate, &dest, ExportOptions::default()).unwrap_err();
        assert!(matches!(err, ExportError::AlreadyExists { .. }));
        assert_eq!(std::fs::read(&dest).unwrap(), b"old");

        export_preview(&candidate, &dest, ExportOptions { overwrite: true }).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
    }

    #[test]
    fn test_failed_read_removes_partial_file() {
        let mut image = MemoryImage::new();
        let candidate = candidate_for(&mut image, "gone.pdf", b"%PDF-1.7");
        image.fail_read(candidate.node);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("gone.pdf");

        let err = export_full(&image, &candidate, &dest, ExportOptions::default()).unwrap_err();
        assert!(matches!(err, ExportError::Read(EntryAccessError::ContentRead { .. })));
        assert!(!dest.exists());
    }

    #[test]
    fn test_unavailable_preview() {
        let mut image = MemoryImage::new();
        let mut candidate = candidate_for(&mut image, "a.txt", b"data");
        candidate.preview.clear();
        candidate.preview_available = false;
        let dir = tempfile::tempdir().unwrap();

        let err = export_preview(&candidate, &dir.path().join("a.txt"), ExportOptions::default())
            .unwrap_err();
        assert!(matches!(err, ExportError::PreviewUnavailable { .. }));
    }

    #[test]
    fn test_default_export_name() {
        let mut image = MemoryImage::new();
        let mut candidate = candidate_for(&mut image, "report.pdf", b"");
        assert_eq!(default_export_name(&candidate, 3), "report.pdf");

        candidate.name = "../etc/passwd\u{0}.txt".to_string();
        assert_eq!(default_export_name(&candidate, 3), ".._etc_passwd_.txt");

        candidate.name = "..".to_string();
        assert_eq!(default_export_name(&candidate, 3), "recovered_file_3.dat");
    }
}
