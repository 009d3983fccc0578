//! Memory-mapped access to raw image files

use anyhow::Result;
use memmap2::MmapOptions;
use std::fs::File;
use std::path::Path;

use crate::error::ImageOpenError;

/// Sector size assumed for boot-sector probing
pub const SECTOR_SIZE: u64 = 512;

/// A memory-mapped image file for efficient large file access
#[derive(Debug)]
pub struct BlockDevice {
    _file: File,
    mmap: memmap2::Mmap,
    size: u64,
}

impl BlockDevice {
    /// Open a raw image file read-only
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ImageOpenError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| ImageOpenError::io(path, e))?;
        let size = file
            .metadata()
            .map_err(|e| ImageOpenError::io(path, e))?
            .len();

        // The image is opened read-only and never written through the map.
        let mmap = unsafe { MmapOptions::new().map(&file) }.map_err(|e| ImageOpenError::io(path, e))?;

        tracing::debug!("Mapped {} ({} bytes)", path.display(), size);

        Ok(BlockDevice {
            _file: file,
            mmap,
            size,
        })
    }

    /// Get the size of the image in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read an exact slice of bytes from the image
    pub fn read_bytes(&self, offset: u64, length: usize) -> Result<&[u8]> {
        let start = usize::try_from(offset)
            .map_err(|_| anyhow::anyhow!("Offset {} does not fit in memory", offset))?;
        let end = start
            .checked_add(length)
            .ok_or_else(|| anyhow::anyhow!("Read range overflows at offset {}", offset))?;

        if end > self.mmap.len() {
            anyhow::bail!("Read beyond end of image: {} > {}", end, self.mmap.len());
        }

        Ok(&self.mmap[start..end])
    }

    /// Read up to `length` bytes, stopping at the end of the image
    pub fn read_bytes_clamped(&self, offset: u64, length: usize) -> Result<&[u8]> {
        if offset >= self.mmap.len() as u64 {
            anyhow::bail!("Offset {} beyond end of image ({} bytes)", offset, self.mmap.len());
        }
        let available = self.mmap.len() - offset as usize;
        self.read_bytes(offset, length.min(available))
    }

    /// Read a single sector (512 bytes)
    pub fn read_sector(&self, sector: u64) -> Result<&[u8]> {
        let offset = sector
            .checked_mul(SECTOR_SIZE)
            .ok_or_else(|| anyhow::anyhow!("Sector {} out of range", sector))?;
        self.read_bytes(offset, SECTOR_SIZE as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn device_with(bytes: &[u8]) -> (tempfile::NamedTempFile, BlockDevice) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        let device = BlockDevice::open(file.path()).unwrap();
        (file, device)
    }

    #[test]
    fn test_read_bounds() {
        let data: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
        let (_file, device) = device_with(&data);

        assert_eq!(device.size(), 1024);
        assert_eq!(device.read_bytes(10, 4).unwrap(), &data[10..14]);
        assert!(device.read_bytes(1000, 100).is_err());
        assert!(device.read_bytes(u64::MAX, 1).is_err());
        assert_eq!(device.read_sector(1).unwrap(), &data[512..1024]);
        assert!(device.read_sector(2).is_err());
    }

    #[test]
    fn test_clamped_read() {
        let (_file, device) = device_with(&[7u8; 100]);

        assert_eq!(device.read_bytes_clamped(90, 50).unwrap().len(), 10);
        assert!(device.read_bytes_clamped(100, 1).is_err());
    }

    #[test]
    fn test_open_missing() {
        let err = BlockDevice::open("/no/such/image.dd").unwrap_err();
        assert!(matches!(err, ImageOpenError::NotFound { .. }));
    }
}
