//! Depth-first recovery scan over any [`ImageAccess`] implementation
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ScanConfig;
use crate::error::{ImageOpenError, ScanWarning, WarningKind};
use crate::fs::{DirectoryEntry, DirectoryHandle, ImageAccess};
use crate::recovery::candidate::{RecordStore, RecoveryCandidate};
use crate::recovery::classifier::{Decision, EntryClassifier};

/// Counters gathered while scanning
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub entries_examined: u64,
    pub directories_visited: u64,
    pub candidates: u64,
    pub deleted_candidates: u64,
    pub content_read_failures: u64,
}

/// Progress snapshot handed to the progress callback after each directory
#[derive(Debug, Clone)]
pub struct ScanProgress {
    pub current_path: String,
    pub directories_visited: u64,
    pub candidates_found: u64,
}

/// Result of a completed scan
#[derive(Debug, Clone)]
pub struct ScanOutcome<N> {
    pub candidates: RecordStore<N>,
    pub stats: ScanStats,
    pub warnings: Vec<ScanWarning>,
    /// Reference time the recency window was measured against
    pub scanned_at: DateTime<Utc>,
}

/// Mutable state threaded through the traversal
struct ScanState<N> {
    store: RecordStore<N>,
    stats: ScanStats,
    warnings: Vec<ScanWarning>,
    visited: HashSet<u64>,
}

impl<N> ScanState<N> {
    fn new() -> Self {
        Self {
            store: RecordStore::default(),
            stats: ScanStats::default(),
            warnings: Vec::new(),
            visited: HashSet::new(),
        }
    }

    fn warn(&mut self, warning: ScanWarning) {
        tracing::warn!("{}: {}", warning.path, warning.message);
        self.warnings.push(warning);
    }
}

/// Walks an image from the root and collects recovery candidates.
pub struct RecoveryScanner {
    config: ScanConfig,
    classifier: EntryClassifier,
    progress_callback: Option<Box<dyn Fn(ScanProgress) + Send + Sync>>,
}

impl Default for RecoveryScanner {
    fn default() -> Self {
        Self::new(ScanConfig::default())
    }
}

impl RecoveryScanner {
    pub fn new(config: ScanConfig) -> Self {
        let config = config.normalized();
        Self {
            classifier: EntryClassifier::new(&config),
            config,
            progress_callback: None,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: Fn(ScanProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
    }

    /// Scan `image`, measuring recency against the current time.
    pub fn scan<A: ImageAccess>(&self, image: &A) -> Result<ScanOutcome<A::Node>, ImageOpenError> {
        self.scan_at(image, Utc::now())
    }

    /// Scan `image` with an explicit reference time.
    ///
    /// Only a failure to open the root directory aborts the scan. Every
    /// other fault is recorded as a warning and the walk continues.
    pub fn scan_at<A: ImageAccess>(
        &self,
        image: &A,
        now: DateTime<Utc>,
    ) -> Result<ScanOutcome<A::Node>, ImageOpenError> {
        let root = image.open_root().map_err(ImageOpenError::RootDirectory)?;

        tracing::info!(
            "Starting recovery scan (window {} days, preview limit {} bytes, max depth {})",
            self.config.recent_window_days,
            self.config.preview_limit,
            self.config.max_depth
        );

        let mut state = ScanState::new();
        state.visited.insert(root.id);
        self.walk(image, &root, "", 0, now, &mut state);

        tracing::info!(
            "Scan complete: {} candidates ({} deleted) from {} entries in {} directories, {} warnings",
            state.stats.candidates,
            state.stats.deleted_candidates,
            state.stats.entries_examined,
            state.stats.directories_visited,
            state.warnings.len()
        );

        Ok(ScanOutcome {
            candidates: state.store,
            stats: state.stats,
            warnings: state.warnings,
            scanned_at: now,
        })
    }

    fn walk<A: ImageAccess>(
        &self,
        image: &A,
        directory: &DirectoryHandle<A::Node>,
        path: &str,
        depth: usize,
        now: DateTime<Utc>,
        state: &mut ScanState<A::Node>,
    ) {
        state.stats.directories_visited += 1;

        let entries = match image.list_entries(directory) {
            Ok(entries) => entries,
            Err(e) => {
                state.warn(ScanWarning::from_access_error(display_path(path), &e));
                return;
            }
        };

        tracing::debug!("{}: {} entries", display_path(path), entries.len());

        for entry in &entries {
            state.stats.entries_examined += 1;

            let decision = self.classifier.classify(entry, now);
            tracing::debug!(
                "{}/{}: {:?} {:?}",
                path,
                entry.display_name(),
                entry.kind,
                decision
            );

            match decision {
                Decision::Skip => {}
                Decision::Recurse => self.descend(image, entry, path, depth, now, state),
                Decision::EvaluateAsCandidate => self.evaluate(image, entry, path, state),
            }
        }

        if let Some(callback) = &self.progress_callback {
            callback(ScanProgress {
                current_path: display_path(path).to_string(),
                directories_visited: state.stats.directories_visited,
                candidates_found: state.stats.candidates,
            });
        }
    }

    fn descend<A: ImageAccess>(
        &self,
        image: &A,
        entry: &DirectoryEntry<A::Node>,
        path: &str,
        depth: usize,
        now: DateTime<Utc>,
        state: &mut ScanState<A::Node>,
    ) {
        let child_path = format!("{}/{}", path, entry_name(entry, path, state));

        if depth >= self.config.max_depth {
            state.warn(ScanWarning::new(
                child_path,
                format!("Not descending below depth {}", self.config.max_depth),
                WarningKind::DepthLimit,
            ));
            return;
        }

        let handle = match image.open_subdirectory(entry) {
            Ok(handle) => handle,
            Err(e) => {
                state.warn(ScanWarning::from_access_error(child_path, &e));
                return;
            }
        };

        if !state.visited.insert(handle.id) {
            state.warn(ScanWarning::new(
                child_path,
                format!("Directory {} already visited", handle.id),
                WarningKind::DirectoryCycle,
            ));
            return;
        }

        self.walk(image, &handle, &child_path, depth + 1, now, state);
    }

    fn evaluate<A: ImageAccess>(
        &self,
        image: &A,
        entry: &DirectoryEntry<A::Node>,
        path: &str,
        state: &mut ScanState<A::Node>,
    ) {
        let name = entry_name(entry, path, state);
        let file_path = format!("{}/{}", path, name);
        let preview_len = entry.size.min(self.config.preview_limit as u64) as usize;

        let (preview, preview_available) = if preview_len == 0 {
            (Vec::new(), true)
        } else {
            match image.read_content(&entry.node, 0, preview_len) {
                Ok(mut data) => {
                    data.truncate(preview_len);
                    (data, true)
                }
                Err(e) => {
                    state.stats.content_read_failures += 1;
                    state.warn(ScanWarning::from_access_error(file_path.clone(), &e));
                    (Vec::new(), false)
                }
            }
        };

        let candidate = RecoveryCandidate {
            name,
            path: file_path,
            size: entry.size,
            allocation: entry.allocation,
            recovery_time: self.classifier.recovery_time(entry),
            preview,
            preview_available,
            node: entry.node.clone(),
        };

        tracing::debug!(
            "Candidate {} ({} bytes, {}, preview {} bytes)",
            candidate.path,
            candidate.size,
            if candidate.is_deleted() { "deleted" } else { "recent" },
            candidate.preview.len()
        );

        state.stats.candidates += 1;
        if candidate.is_deleted() {
            state.stats.deleted_candidates += 1;
        }
        state.store.push(candidate);
    }
}

/// Decoded entry name; invalid names are decoded lossily and reported.
fn entry_name<N>(entry: &DirectoryEntry<N>, path: &str, state: &mut ScanState<N>) -> String {
    match entry.decode_name() {
        Ok(name) => name.to_string(),
        Err(e) => {
            let lossy = entry.display_name().into_owned();
            state.warn(ScanWarning::from_access_error(format!("{}/{}", path, lossy), &e));
            lossy
        }
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

/// Scan with default configuration.
pub fn scan<A: ImageAccess>(image: &A) -> Result<ScanOutcome<A::Node>, ImageOpenError> {
    RecoveryScanner::default().scan(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::memory::{MemoryFile, MemoryImage};
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_empty_image() {
        let image = MemoryImage::new();
        let outcome = RecoveryScanner::default().scan_at(&image, now()).unwrap();

        assert!(outcome.candidates.is_empty());
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.stats.directories_visited, 1);
        assert_eq!(outcome.scanned_at, now());
    }

    #[test]
    fn test_paths_are_slash_joined_from_root() {
        let mut image = MemoryImage::new();
        let root = image.root();
        let a = image.add_directory(root, "a");
        let b = image.add_directory(a, "b");
        image.add_file(b, MemoryFile::new("deep.txt", "x").unallocated());
        image.add_file(root, MemoryFile::new("top.txt", "y").unallocated());

        let outcome = RecoveryScanner::default().scan_at(&image, now()).unwrap();
        let paths: Vec<_> = outcome.candidates.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["/a/b/deep.txt", "/top.txt"]);
    }

    #[test]
    fn test_zero_size_candidate_has_empty_preview() {
        let mut image = MemoryImage::new();
        let root = image.root();
        let file = image.add_file(root, MemoryFile::new("empty.txt", "").unallocated());
        image.fail_read(file);

        let outcome = RecoveryScanner::default().scan_at(&image, now()).unwrap();
        let candidate = &outcome.candidates[0];
        assert!(candidate.preview.is_empty());
        assert!(candidate.preview_available);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_preview_limit_from_config() {
        let mut image = MemoryImage::new();
        let root = image.root();
        image.add_file(root, MemoryFile::new("big.log", vec![b'a'; 4096]).unallocated());

        let scanner = RecoveryScanner::new(ScanConfig {
            preview_limit: 100,
            ..Default::default()
        });
        let outcome = scanner.scan_at(&image, now()).unwrap();
        assert_eq!(outcome.candidates[0].preview.len(), 100);
        assert_eq!(outcome.candidates[0].size, 4096);
    }

    #[test]
    fn test_depth_limit() {
        let mut image = MemoryImage::new();
        let root = image.root();
        let one = image.add_directory(root, "one");
        let two = image.add_directory(one, "two");
        image.add_file(one, MemoryFile::new("shallow.txt", "s").unallocated());
        image.add_file(two, MemoryFile::new("deep.txt", "d").unallocated());

        let scanner = RecoveryScanner::new(ScanConfig {
            max_depth: 1,
            ..Default::default()
        });
        let outcome = scanner.scan_at(&image, now()).unwrap();

        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].path, "/one/shallow.txt");
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].kind, WarningKind::DepthLimit);
        assert_eq!(outcome.warnings[0].path, "/one/two");
    }

    #[test]
    fn test_invalid_name_is_decoded_lossily() {
        let mut image = MemoryImage::new();
        let root = image.root();
        image.add_file(
            root,
            MemoryFile::new(b"caf\xe9.txt".to_vec(), "menu").unallocated(),
        );

        let outcome = RecoveryScanner::default().scan_at(&image, now()).unwrap();
        assert_eq!(outcome.candidates[0].name, "caf\u{FFFD}.txt");
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].kind, WarningKind::NameDecode);
    }

    #[test]
    fn test_stats() {
        let mut image = MemoryImage::new();
        let root = image.root();
        let docs = image.add_directory(root, "docs");
        image.add_file(docs, MemoryFile::new("a.txt", "a").unallocated());
        image.add_file(docs, MemoryFile::new("b.txt", "b").created(now() - Duration::hours(1)));
        image.add_file(docs, MemoryFile::new("c.bin", "c").unallocated());

        let outcome = RecoveryScanner::default().scan_at(&image, now()).unwrap();
        assert_eq!(
            outcome.stats,
            ScanStats {
                entries_examined: 4,
                directories_visited: 2,
                candidates: 2,
                deleted_candidates: 1,
                content_read_failures: 0,
            }
        );
    }

    #[test]
    fn test_progress_callback() {
        let mut image = MemoryImage::new();
        let root = image.root();
        image.add_directory(root, "a");
        image.add_directory(root, "b");

        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let mut scanner = RecoveryScanner::default();
        scanner.set_progress_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        scanner.scan_at(&image, now()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
