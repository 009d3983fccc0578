/// Common types and utilities for image access
pub mod types;

pub use types::BlockDevice;
