//! Candidate classification, the recovery scanner and its results.
pub mod candidate;
pub mod classifier;
pub mod scanner;

pub use candidate::{looks_like_text, CandidateSummary, RecordStore, RecoveryCandidate};
pub use classifier::{classify, Decision, EntryClassifier};
pub use scanner::{scan, RecoveryScanner, ScanOutcome, ScanProgress, ScanStats};
