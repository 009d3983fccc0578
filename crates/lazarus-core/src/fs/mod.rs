//! Image access: the capability contract the scanner walks, filesystem
//! detection, and the adapters that implement the contract.
use std::borrow::Cow;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod common;
pub mod exfat;
pub mod memory;

use crate::error::{EntryAccessError, ImageOpenError};
use crate::FileSystemType;
use common::BlockDevice;

pub use exfat::ExFatImage;
pub use memory::MemoryImage;

/// Type of a directory entry as reported by the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    RegularFile,
    Directory,
    Other,
}

/// Whether the filesystem still considers the entry's storage live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Allocation {
    Allocated,
    Unallocated,
}

/// One entry of a directory listing.
///
/// `node` is the adapter's own reference to the entry; the scanner never
/// looks inside it, it only hands it back to the adapter.
#[derive(Debug, Clone)]
pub struct DirectoryEntry<N> {
    /// Raw, filesystem-encoded name. May not be valid UTF-8.
    pub name: Vec<u8>,
    /// The adapter already substituted invalid characters while decoding
    /// the on-disk name (e.g. unpaired UTF-16 surrogates).
    pub name_replaced: bool,
    pub kind: EntryKind,
    /// Size from metadata, authoritative even for unallocated entries.
    pub size: u64,
    pub allocation: Allocation,
    pub modified: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub node: N,
}

impl<N> DirectoryEntry<N> {
    /// `.` and `..` pseudo-entries.
    pub fn is_dot_entry(&self) -> bool {
        self.name == b"." || self.name == b".."
    }

    /// Best-effort text form of the name.
    pub fn display_name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }

    /// Decode the name, reporting invalid text instead of hiding it.
    pub fn decode_name(&self) -> Result<&str, EntryAccessError> {
        let lossy = || EntryAccessError::NameDecode {
            lossy: self.display_name().into_owned(),
        };
        if self.name_replaced {
            return Err(lossy());
        }
        std::str::from_utf8(&self.name).map_err(|_| lossy())
    }

    pub fn is_unallocated(&self) -> bool {
        self.allocation == Allocation::Unallocated
    }
}

/// An opened directory.
///
/// `id` identifies the directory on disk (inode, first cluster, ...) and is
/// what the scanner uses to detect cycles.
#[derive(Debug, Clone)]
pub struct DirectoryHandle<N> {
    pub id: u64,
    pub node: N,
}

/// Capabilities the recovery scanner needs from an opened image.
pub trait ImageAccess {
    /// Adapter-specific reference to an entry.
    type Node: Clone + fmt::Debug;

    /// Open the filesystem's root directory.
    fn open_root(&self) -> Result<DirectoryHandle<Self::Node>, EntryAccessError>;

    /// Enumerate a directory in filesystem order.
    fn list_entries(
        &self,
        directory: &DirectoryHandle<Self::Node>,
    ) -> Result<Vec<DirectoryEntry<Self::Node>>, EntryAccessError>;

    /// Open a directory entry as a directory.
    fn open_subdirectory(
        &self,
        entry: &DirectoryEntry<Self::Node>,
    ) -> Result<DirectoryHandle<Self::Node>, EntryAccessError>;

    /// Read up to `length` bytes of an entry's data starting at `offset`.
    ///
    /// May return fewer bytes than requested when the data ends first.
    fn read_content(
        &self,
        node: &Self::Node,
        offset: u64,
        length: usize,
    ) -> Result<Vec<u8>, EntryAccessError>;
}

/// Detect file system type from device/image
pub fn detect_filesystem(device_path: &Path) -> Result<Option<FileSystemType>, ImageOpenError> {
    let device = BlockDevice::open(device_path)?;
    Ok(detect_on_device(&device))
}

/// Get human-readable file system information
pub fn get_filesystem_info(device_path: &Path) -> Result<String, ImageOpenError> {
    let device = BlockDevice::open(device_path)?;

    match detect_on_device(&device) {
        Some(FileSystemType::ExFat) => {
            exfat::get_filesystem_info(&device).map_err(|e| ImageOpenError::corrupt(&e))
        }
        None => Err(ImageOpenError::UnknownFilesystem {
            path: device_path.to_path_buf(),
        }),
    }
}

/// Open an image and the filesystem inside it.
pub fn open_image(image_path: &Path) -> Result<ExFatImage, ImageOpenError> {
    let device = BlockDevice::open(image_path)?;

    match detect_on_device(&device) {
        Some(FileSystemType::ExFat) => ExFatImage::new(device),
        None => Err(ImageOpenError::UnknownFilesystem {
            path: image_path.to_path_buf(),
        }),
    }
}

/// Whether a path carries one of the raw image extensions (`.img`, `.dd`).
pub fn is_raw_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("img") || ext.eq_ignore_ascii_case("dd"))
        .unwrap_or(false)
}

fn detect_on_device(device: &BlockDevice) -> Option<FileSystemType> {
    // exFAT boot sector at sector 0
    let sector0 = device.read_sector(0).ok()?;
    exfat::is_exfat_boot_sector(sector0).then_some(FileSystemType::ExFat)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &[u8]) -> DirectoryEntry<()> {
        DirectoryEntry {
            name: name.to_vec(),
            name_replaced: false,
            kind: EntryKind::RegularFile,
            size: 0,
            allocation: Allocation::Allocated,
            modified: None,
            created: None,
            node: (),
        }
    }

    #[test]
    fn test_dot_entries() {
        assert!(entry(b".").is_dot_entry());
        assert!(entry(b"..").is_dot_entry());
        assert!(!entry(b"...").is_dot_entry());
        assert!(!entry(b".profile").is_dot_entry());
    }

    #[test]
    fn test_name_decoding() {
        assert_eq!(entry(b"report.pdf").decode_name().unwrap(), "report.pdf");

        let bad = entry(b"caf\xe9.txt");
        assert!(matches!(
            bad.decode_name(),
            Err(EntryAccessError::NameDecode { .. })
        ));
        assert_eq!(bad.display_name(), "caf\u{FFFD}.txt");

        // Valid UTF-8 that the adapter produced by substitution
        let mut replaced = entry("caf\u{FFFD}.txt".as_bytes());
        replaced.name_replaced = true;
        assert!(matches!(
            replaced.decode_name(),
            Err(EntryAccessError::NameDecode { .. })
        ));
        assert_eq!(replaced.display_name(), "caf\u{FFFD}.txt");
    }

    #[test]
    fn test_raw_image_extensions() {
        assert!(is_raw_image_path(Path::new("disk.img")));
        assert!(is_raw_image_path(Path::new("/evidence/USB.DD")));
        assert!(!is_raw_image_path(Path::new("disk.vmdk")));
        assert!(!is_raw_image_path(Path::new("img")));
    }

    #[test]
    fn test_open_missing_image() {
        let err = open_image(Path::new("/definitely/not/here.img")).unwrap_err();
        assert!(matches!(err, ImageOpenError::NotFound { .. }));
    }
}
