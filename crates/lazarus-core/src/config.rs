//! Scan configuration types.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Hard upper bound on a candidate's preview buffer.
pub const MAX_PREVIEW_BYTES: usize = 1024 * 1024;

/// Files touched within this many days count as recent.
pub const DEFAULT_RECENT_WINDOW_DAYS: i64 = 7;

/// Directory nesting deeper than this is not traversed.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Extensions of user documents, media and archives worth surfacing.
pub const USER_FILE_EXTENSIONS: &[&str] = &[
    ".txt", ".doc", ".docx", ".pdf", ".jpg", ".jpeg", ".png", ".mp3", ".mp4", ".xls", ".xlsx",
    ".ppt", ".pptx", ".csv", ".zip", ".rar", ".7z", ".rtf", ".odt", ".ods", ".odp", ".gif", ".bmp",
    ".tiff", ".wav", ".avi", ".mov", ".wmv", ".html", ".htm", ".xml", ".json", ".log", ".cfg",
];

/// Configuration for a recovery scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Preview buffer size per candidate, clamped to [`MAX_PREVIEW_BYTES`].
    pub preview_limit: usize,

    /// Recency window in days for the created/modified check.
    pub recent_window_days: i64,

    /// Maximum directory depth below the root.
    pub max_depth: usize,

    /// Extension allow-list, matched case-insensitively against name suffixes.
    pub extensions: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            preview_limit: MAX_PREVIEW_BYTES,
            recent_window_days: DEFAULT_RECENT_WINDOW_DAYS,
            max_depth: DEFAULT_MAX_DEPTH,
            extensions: USER_FILE_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl ScanConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config {}", path.display()))?;
        let config: ScanConfig = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        config.validate()?;
        Ok(config.normalized())
    }

    /// Reject settings that cannot describe a meaningful scan.
    pub fn validate(&self) -> Result<()> {
        if self.recent_window_days < 0 {
            anyhow::bail!("Recent window cannot be negative ({} days)", self.recent_window_days);
        }
        if chrono::Duration::try_days(self.recent_window_days).is_none() {
            anyhow::bail!("Recent window of {} days is out of range", self.recent_window_days);
        }
        if self.extensions.iter().any(|e| e.trim_start_matches('.').is_empty()) {
            anyhow::bail!("Extension list contains an empty entry");
        }
        Ok(())
    }

    /// Lower-case extensions, give each a leading dot and clamp the preview
    /// limit.
    pub fn normalized(mut self) -> Self {
        self.extensions = self
            .extensions
            .iter()
            .map(|e| {
                let e = e.trim().to_lowercase();
                if e.starts_with('.') {
                    e
                } else {
                    format!(".{e}")
                }
            })
            .collect();
        self.preview_limit = self.preview_limit.min(MAX_PREVIEW_BYTES);
        self
    }

    /// Recency window as a duration, saturating for out-of-range day counts.
    pub fn recent_window(&self) -> chrono::Duration {
        let saturated = if self.recent_window_days < 0 {
            chrono::Duration::zero()
        } else {
            chrono::Duration::MAX
        };
        chrono::Duration::try_days(self.recent_window_days).unwrap_or(saturated)
    }
}
