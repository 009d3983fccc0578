use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub mod backup;
pub mod config;
pub mod error;
pub mod export;
pub mod fs;
pub mod recovery;

pub use config::ScanConfig;
pub use error::{EntryAccessError, ImageOpenError, ScanWarning, WarningKind};
pub use fs::exfat::ExFatNode;
pub use fs::{open_image, Allocation, DirectoryEntry, EntryKind, ExFatImage, ImageAccess, MemoryImage};
pub use recovery::{
    CandidateSummary, RecordStore, RecoveryCandidate, RecoveryScanner, ScanOutcome, ScanProgress,
    ScanStats,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileSystemType {
    ExFat,
}

impl std::fmt::Display for FileSystemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileSystemType::ExFat => write!(f, "exFAT"),
        }
    }
}

/// A completed scan of one image file.
///
/// Keeps the opened image so candidates can be re-read for export.
#[derive(Debug)]
pub struct ScanSession {
    pub id: Uuid,
    pub image_path: PathBuf,
    pub fs_type: FileSystemType,
    pub image: ExFatImage,
    pub config: ScanConfig,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: ScanOutcome<ExFatNode>,
}

impl ScanSession {
    pub fn candidates(&self) -> &RecordStore<ExFatNode> {
        &self.outcome.candidates
    }

    pub fn warnings(&self) -> &[ScanWarning] {
        &self.outcome.warnings
    }

    /// Serializable summary of the session.
    pub fn report(&self) -> ScanReport {
        ScanReport {
            session_id: self.id,
            image_path: self.image_path.clone(),
            fs_type: self.fs_type,
            image_size: self.image.image_size(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            scan_duration_ms: (self.finished_at - self.started_at)
                .num_milliseconds()
                .max(0) as u64,
            config: self.config.clone(),
            stats: self.outcome.stats.clone(),
            candidates: self.outcome.candidates.summaries(),
            warnings: self.outcome.warnings.clone(),
        }
    }
}

/// Scan results in a form that can be written to disk and read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub session_id: Uuid,
    pub image_path: PathBuf,
    pub fs_type: FileSystemType,
    pub image_size: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scan_duration_ms: u64,
    pub config: ScanConfig,
    pub stats: ScanStats,
    pub candidates: Vec<CandidateSummary>,
    pub warnings: Vec<ScanWarning>,
}

impl ScanReport {
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Cannot write report {}", path.display()))?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read report {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Invalid report {}", path.display()))
    }
}

/// Open an image file and scan it for recovery candidates.
pub fn scan_image(image_path: &Path, config: ScanConfig) -> Result<ScanSession, ImageOpenError> {
    scan_image_with(image_path, RecoveryScanner::new(config))
}

/// Open an image file and scan it with a prepared scanner.
pub fn scan_image_with(
    image_path: &Path,
    scanner: RecoveryScanner,
) -> Result<ScanSession, ImageOpenError> {
    let id = Uuid::new_v4();
    tracing::info!("Session {}: scanning {}", id, image_path.display());

    let image = open_image(image_path)?;
    let started_at = Utc::now();
    let outcome = scanner.scan_at(&image, started_at)?;
    let finished_at = Utc::now();

    tracing::info!(
        "Session {}: {} candidates, {} warnings in {} ms",
        id,
        outcome.candidates.len(),
        outcome.warnings.len(),
        (finished_at - started_at).num_milliseconds()
    );

    Ok(ScanSession {
        id,
        image_path: image_path.to_path_buf(),
        fs_type: FileSystemType::ExFat,
        image,
        config: scanner.config().clone(),
        started_at,
        finished_at,
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_json_roundtrip() {
        let now = Utc::now();
        let report = ScanReport {
            session_id: Uuid::new_v4(),
            image_path: PathBuf::from("/evidence/usb.img"),
            fs_type: FileSystemType::ExFat,
            image_size: 8192,
            started_at: now,
            finished_at: now,
            scan_duration_ms: 0,
            config: ScanConfig::default(),
            stats: ScanStats::default(),
            candidates: Vec::new(),
            warnings: vec![ScanWarning::new("/x", "boom", WarningKind::DirectoryAccess)],
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        report.save_json(&path).unwrap();
        assert_eq!(ScanReport::load_json(&path).unwrap(), report);
    }

    #[test]
    fn test_filesystem_display() {
        assert_eq!(FileSystemType::ExFat.to_string(), "exFAT");
    }
}
