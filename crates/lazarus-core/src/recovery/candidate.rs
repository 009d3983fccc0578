//! Recovery candidates and the ordered store that holds one scan's results.

use std::borrow::Cow;
use std::ops::Index;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::backup::mime_type_for;
use crate::fs::Allocation;

/// Format used for recovery timestamps
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A file entry judged worth presenting for review, export or backup.
///
/// Built once by the scanner and never modified; the store only hands out
/// shared references.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryCandidate<N> {
    /// Display name, lossily decoded
    pub name: String,
    /// Logical path from the root, `/`-separated
    pub path: String,
    /// Size from filesystem metadata
    pub size: u64,
    pub allocation: Allocation,
    /// Modification time if deleted, creation time otherwise
    pub recovery_time: Option<DateTime<Utc>>,
    /// Prefix of the file's data, at most `min(size, preview limit)` bytes
    pub preview: Vec<u8>,
    /// False when the content read failed and `preview` was left empty
    pub preview_available: bool,
    /// Adapter reference for re-reading the full content
    pub node: N,
}

impl<N> RecoveryCandidate<N> {
    pub fn is_deleted(&self) -> bool {
        self.allocation == Allocation::Unallocated
    }

    /// Recovery timestamp as `YYYY-MM-DD HH:MM:SS`, or `unknown`.
    pub fn recovery_timestamp(&self) -> String {
        self.recovery_time
            .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Lower-cased extension without the dot, if any.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        (!stem.is_empty() && !ext.is_empty()).then(|| ext.to_lowercase())
    }

    pub fn mime_type(&self) -> &'static str {
        mime_type_for(&self.name)
    }

    /// Preview decoded as text, invalid sequences replaced.
    pub fn preview_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.preview)
    }

    /// Whether the preview looks like text rather than binary data.
    pub fn preview_is_text(&self) -> bool {
        looks_like_text(&self.preview)
    }

    /// Hex SHA-256 of the preview buffer.
    pub fn preview_sha256(&self) -> String {
        format!("{:x}", Sha256::digest(&self.preview))
    }

    /// Serializable view without the preview bytes or adapter node.
    pub fn summary(&self) -> CandidateSummary {
        CandidateSummary {
            name: self.name.clone(),
            path: self.path.clone(),
            size: self.size,
            deleted: self.is_deleted(),
            recovery_timestamp: self.recovery_timestamp(),
            mime_type: self.mime_type().to_string(),
            preview_len: self.preview.len(),
            preview_sha256: self.preview_sha256(),
            preview_available: self.preview_available,
        }
    }
}

/// Report-friendly description of a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub deleted: bool,
    pub recovery_timestamp: String,
    pub mime_type: String,
    pub preview_len: usize,
    pub preview_sha256: String,
    pub preview_available: bool,
}

/// Candidates of one scan, in traversal order.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordStore<N> {
    candidates: Vec<RecoveryCandidate<N>>,
}

impl<N> Default for RecordStore<N> {
    fn default() -> Self {
        Self {
            candidates: Vec::new(),
        }
    }
}

impl<N> RecordStore<N> {
    pub(crate) fn push(&mut self, candidate: RecoveryCandidate<N>) {
        self.candidates.push(candidate);
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RecoveryCandidate<N>> {
        self.candidates.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RecoveryCandidate<N>> {
        self.candidates.iter()
    }

    pub fn as_slice(&self) -> &[RecoveryCandidate<N>] {
        &self.candidates
    }

    /// Find the first candidate at a logical path.
    pub fn find_by_path(&self, path: &str) -> Option<&RecoveryCandidate<N>> {
        self.candidates.iter().find(|c| c.path == path)
    }

    pub fn summaries(&self) -> Vec<CandidateSummary> {
        self.candidates.iter().map(RecoveryCandidate::summary).collect()
    }
}

impl<N> Index<usize> for RecordStore<N> {
    type Output = RecoveryCandidate<N>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.candidates[index]
    }
}

impl<'a, N> IntoIterator for &'a RecordStore<N> {
    type Item = &'a RecoveryCandidate<N>;
    type IntoIter = std::slice::Iter<'a, RecoveryCandidate<N>>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.iter()
    }
}

/// Check if data looks like text
pub fn looks_like_text(data: &[u8]) -> bool {
    if data.is_empty() {
        return false;
    }

    if std::str::from_utf8(data).is_ok() && !data.contains(&0) {
        return true;
    }

    // Simple heuristic: check if most bytes are printable ASCII or whitespace
    let sample = &data[..data.len().min(1024)];
    let printable_count = sample
        .iter()
        .filter(|&&b| (0x20..=0x7E).contains(&b) || b == 0x09 || b == 0x0A || b == 0x0D)
        .count();

    (printable_count as f32 / sample.len() as f32) > 0.8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candidate(name: &str, preview: &[u8]) -> RecoveryCandidate<()> {
        RecoveryCandidate {
            name: name.to_string(),
            path: format!("/{name}"),
            size: preview.len() as u64,
            allocation: Allocation::Unallocated,
            recovery_time: Some(Utc.with_ymd_and_hms(2024, 4, 1, 8, 5, 9).unwrap()),
            preview: preview.to_vec(),
            preview_available: true,
            node: (),
        }
    }

    #[test]
    fn test_recovery_timestamp_format() {
        let c = candidate("old.txt", b"hi");
        assert_eq!(c.recovery_timestamp(), "2024-04-01 08:05:09");

        let mut unknown = c.clone();
        unknown.recovery_time = None;
        assert_eq!(unknown.recovery_timestamp(), "unknown");
    }

    #[test]
    fn test_extension() {
        assert_eq!(candidate("Photo.JPG", b"").extension().as_deref(), Some("jpg"));
        assert_eq!(candidate("archive.tar.gz", b"").extension().as_deref(), Some("gz"));
        assert_eq!(candidate(".bashrc", b"").extension(), None);
        assert_eq!(candidate("README", b"").extension(), None);
    }

    #[test]
    fn test_summary() {
        let c = candidate("notes.txt", b"hello");
        let summary = c.summary();
        assert_eq!(summary.path, "/notes.txt");
        assert!(summary.deleted);
        assert_eq!(summary.mime_type, "text/plain");
        assert_eq!(summary.preview_len, 5);
        assert_eq!(
            summary.preview_sha256,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_text_detection() {
        assert!(looks_like_text(b"Hello, world! This is plain text."));
        assert!(looks_like_text("naïve café".as_bytes()));
        assert!(!looks_like_text(&[0x00, 0xFF, 0x80, 0x7F, 0x90]));
        assert!(!looks_like_text(b""));
    }

    #[test]
    fn test_store_order_and_lookup() {
        let mut store = RecordStore::default();
        store.push(candidate("b.txt", b"b"));
        store.push(candidate("a.txt", b"a"));
        store.push(candidate("b.txt", b"second"));

        assert_eq!(store.len(), 3);
        let names: Vec<_> = store.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["b.txt", "a.txt", "b.txt"]);
        assert_eq!(store.find_by_path("/b.txt").unwrap().preview, b"b");
        assert_eq!(store[1].name, "a.txt");
        assert!(store.get(3).is_none());
    }
}
