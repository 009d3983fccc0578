//! exFAT boot sector, allocation table and directory parsing, and the
//! [`ImageAccess`](crate::fs::ImageAccess) adapter built on them.
use std::fmt;

use anyhow::Result;
use byteorder::{ByteOrder, LittleEndian};
use encoding_rs::UTF_16LE;

use super::common::BlockDevice;

pub mod adapter;
pub mod directory;
pub mod fat;

pub use adapter::{ExFatImage, ExFatNode};

/// OEM name field of every exFAT boot sector
const EXFAT_SIGNATURE: &[u8; 8] = b"EXFAT   ";

const BOOT_SECTOR_SIZE: usize = 512;

/// Geometry fields of the main boot sector. Offsets and lengths are in
/// sectors unless the name says otherwise.
#[derive(Debug, Clone)]
pub struct ExFatBootSector {
    pub partition_offset: u64,
    pub volume_length: u64,
    pub fat_offset: u32,
    pub fat_length: u32,
    pub cluster_heap_offset: u32,
    pub cluster_count: u32,
    pub first_cluster_of_root_directory: u32,
    pub volume_serial_number: u32,
    pub file_system_revision: u16,
    pub volume_flags: u16,
    pub bytes_per_sector_shift: u8,
    pub sectors_per_cluster_shift: u8,
    pub number_of_fats: u8,
    pub percent_in_use: u8,
}

impl ExFatBootSector {
    /// Read the geometry fields of a 512-byte main boot sector.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < BOOT_SECTOR_SIZE {
            anyhow::bail!("Boot sector needs {} bytes, got {}", BOOT_SECTOR_SIZE, data.len());
        }
        if !is_exfat_boot_sector(data) {
            anyhow::bail!("OEM name is not EXFAT");
        }

        // Bytes 11..64 are the zeroed legacy BPB area
        let boot_sector = ExFatBootSector {
            partition_offset: LittleEndian::read_u64(&data[64..72]),
            volume_length: LittleEndian::read_u64(&data[72..80]),
            fat_offset: LittleEndian::read_u32(&data[80..84]),
            fat_length: LittleEndian::read_u32(&data[84..88]),
            cluster_heap_offset: LittleEndian::read_u32(&data[88..92]),
            cluster_count: LittleEndian::read_u32(&data[92..96]),
            first_cluster_of_root_directory: LittleEndian::read_u32(&data[96..100]),
            volume_serial_number: LittleEndian::read_u32(&data[100..104]),
            file_system_revision: LittleEndian::read_u16(&data[104..106]),
            volume_flags: LittleEndian::read_u16(&data[106..108]),
            bytes_per_sector_shift: data[108],
            sectors_per_cluster_shift: data[109],
            number_of_fats: data[110],
            // 111 is the INT 13h drive number
            percent_in_use: data[112],
        };
        boot_sector.validate()?;

        Ok(boot_sector)
    }

    /// Reject geometry that would make every later offset meaningless
    fn validate(&self) -> Result<()> {
        if !(9..=12).contains(&self.bytes_per_sector_shift) {
            anyhow::bail!("Bytes-per-sector shift {} out of range", self.bytes_per_sector_shift);
        }
        if self.sectors_per_cluster_shift > 25 - self.bytes_per_sector_shift {
            anyhow::bail!(
                "Sectors-per-cluster shift {} out of range",
                self.sectors_per_cluster_shift
            );
        }
        if self.cluster_count == 0 {
            anyhow::bail!("Cluster heap is empty");
        }
        if self.first_cluster_of_root_directory < fat::FIRST_DATA_CLUSTER {
            anyhow::bail!(
                "Root directory cluster {} is not a data cluster",
                self.first_cluster_of_root_directory
            );
        }
        Ok(())
    }

    pub fn bytes_per_sector(&self) -> u32 {
        1 << self.bytes_per_sector_shift
    }

    pub fn sectors_per_cluster(&self) -> u32 {
        1 << self.sectors_per_cluster_shift
    }

    /// Cluster size in bytes (at most 32 MiB)
    pub fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_sector() * self.sectors_per_cluster()
    }
}

/// Whether `data` starts with an exFAT boot sector (OEM name at offset 3).
pub fn is_exfat_boot_sector(data: &[u8]) -> bool {
    data.get(3..11) == Some(&EXFAT_SIGNATURE[..])
}

/// Human-readable geometry summary of the volume in `device`.
pub fn get_filesystem_info(device: &BlockDevice) -> Result<String> {
    let boot_sector = ExFatBootSector::parse(device.read_sector(0)?)?;
    Ok(boot_sector.to_string())
}

impl fmt::Display for ExFatBootSector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MIB: u64 = 1024 * 1024;
        let heap_bytes = self.cluster_count as u64 * self.bytes_per_cluster() as u64;

        writeln!(f, "exFAT volume (serial 0x{:08X})", self.volume_serial_number)?;
        writeln!(
            f,
            "  Sectors:       {} bytes, {} per cluster ({} byte clusters)",
            self.bytes_per_sector(),
            self.sectors_per_cluster(),
            self.bytes_per_cluster()
        )?;
        writeln!(
            f,
            "  Volume:        {} MiB ({} sectors)",
            self.volume_length.saturating_mul(self.bytes_per_sector() as u64) / MIB,
            self.volume_length
        )?;
        writeln!(f, "  Cluster Count: {} ({} MiB heap)", self.cluster_count, heap_bytes / MIB)?;
        writeln!(
            f,
            "  FAT:           sector {}, {} sectors, {} cop{}",
            self.fat_offset,
            self.fat_length,
            self.number_of_fats,
            if self.number_of_fats == 1 { "y" } else { "ies" }
        )?;
        writeln!(f, "  Root:          cluster {}", self.first_cluster_of_root_directory)?;
        write!(
            f,
            "  Revision:      {}.{:02}, {}% in use",
            self.file_system_revision >> 8,
            self.file_system_revision & 0xFF,
            self.percent_in_use
        )
    }
}

/// Decode a UTF-16LE name fragment, stopping at the first null.
///
/// Invalid code units are replaced; the flag reports whether any were.
pub fn decode_utf16_name(utf16_data: &[u8]) -> (String, bool) {
    let mut end = 0;
    while end + 1 < utf16_data.len() && (utf16_data[end] != 0 || utf16_data[end + 1] != 0) {
        end += 2;
    }

    let (decoded, had_errors) = UTF_16LE.decode_without_bom_handling(&utf16_data[..end]);
    (decoded.into_owned(), !had_errors)
}
