//! Per-entry classification: recurse, evaluate as a recovery candidate, or
//! skip.
//!
//! A regular file qualifies when its name carries an allow-listed extension
//! AND it is either unallocated (deleted) or was created/modified inside the
//! recency window. The recency half also matches files that were never
//! deleted.

use chrono::{DateTime, Duration, Utc};

use crate::config::ScanConfig;
use crate::fs::{DirectoryEntry, EntryKind};

/// Outcome of classifying one directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Recurse,
    EvaluateAsCandidate,
    Skip,
}

/// Classification policy built from a [`ScanConfig`].
#[derive(Debug, Clone)]
pub struct EntryClassifier {
    extensions: Vec<String>,
    recent_window: Duration,
}

impl Default for EntryClassifier {
    fn default() -> Self {
        Self::new(&ScanConfig::default())
    }
}

impl EntryClassifier {
    pub fn new(config: &ScanConfig) -> Self {
        let config = config.clone().normalized();
        Self {
            recent_window: config.recent_window(),
            extensions: config.extensions,
        }
    }

    /// Decide what the scanner does with `entry`.
    pub fn classify<N>(&self, entry: &DirectoryEntry<N>, now: DateTime<Utc>) -> Decision {
        if entry.is_dot_entry() {
            return Decision::Skip;
        }

        match entry.kind {
            EntryKind::Directory => Decision::Recurse,
            EntryKind::Other => Decision::Skip,
            EntryKind::RegularFile => {
                let extension_match = self.matches_extension(&entry.display_name());
                let is_deleted = entry.is_unallocated();
                let is_recent =
                    self.is_recent(entry.modified, now) || self.is_recent(entry.created, now);

                if extension_match && (is_deleted || is_recent) {
                    Decision::EvaluateAsCandidate
                } else {
                    Decision::Skip
                }
            }
        }
    }

    /// Case-insensitive suffix match against the allow-list.
    pub fn matches_extension(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.extensions.iter().any(|ext| lower.ends_with(ext.as_str()))
    }

    /// Whether `now - time` is shorter than the recency window.
    ///
    /// Absent timestamps are not recent. Timestamps after `now` give a
    /// negative age and count as recent.
    pub fn is_recent(&self, time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match time {
            Some(time) => now - time < self.recent_window,
            None => false,
        }
    }

    /// Timestamp that justifies recovering `entry`: the modification time of
    /// an unallocated entry, otherwise the creation time.
    pub fn recovery_time<N>(&self, entry: &DirectoryEntry<N>) -> Option<DateTime<Utc>> {
        if entry.is_unallocated() {
            entry.modified
        } else {
            entry.created
        }
    }
}

/// Classify with the default allow-list and a 7 day window.
pub fn classify<N>(entry: &DirectoryEntry<N>, now: DateTime<Utc>) -> Decision {
    EntryClassifier::default().classify(entry, now)
}
