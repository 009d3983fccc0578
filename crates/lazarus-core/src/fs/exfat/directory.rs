//! exFAT directory parsing.
//!
//! A directory is a run of 32-byte slots. Files and directories are
//! described by an entry set: a File slot, a Stream Extension slot and one or
//! more File Name slots. The high bit of each type byte is the in-use flag,
//! and deleting a file only clears it, so deleted sets (0x05/0x40/0x41) parse
//! exactly like live ones (0x85/0xC0/0xC1).

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};

use super::decode_utf16_name;

pub const ENTRY_SIZE: usize = 32;

pub const ENTRY_TYPE_FILE: u8 = 0x85;
pub const ENTRY_TYPE_STREAM: u8 = 0xC0;
pub const ENTRY_TYPE_FILENAME: u8 = 0xC1;
pub const ENTRY_TYPE_BITMAP: u8 = 0x81;
pub const ENTRY_TYPE_UPCASE: u8 = 0x82;
pub const ENTRY_TYPE_LABEL: u8 = 0x83;

pub const ENTRY_TYPE_FILE_DELETED: u8 = 0x05;
pub const ENTRY_TYPE_STREAM_DELETED: u8 = 0x40;
pub const ENTRY_TYPE_FILENAME_DELETED: u8 = 0x41;

const IN_USE: u8 = 0x80;

pub const ATTR_READ_ONLY: u16 = 0x01;
pub const ATTR_HIDDEN: u16 = 0x02;
pub const ATTR_SYSTEM: u16 = 0x04;
pub const ATTR_DIRECTORY: u16 = 0x10;
pub const ATTR_ARCHIVE: u16 = 0x20;

/// Stream extension flag: data is one contiguous run, FAT is not used
pub const FLAG_NO_FAT_CHAIN: u8 = 0x02;

/// A File slot is followed by one Stream slot and 1..=17 name slots
const SECONDARY_COUNT: std::ops::RangeInclusive<u8> = 2..=18;

/// UTF-16 code units per File Name slot
const NAME_UNITS_PER_SLOT: usize = 15;

/// One directory slot.
#[derive(Debug, Clone)]
pub enum DirectorySlot {
    File { entry: FileEntry, in_use: bool },
    Stream { entry: StreamExtensionEntry, in_use: bool },
    Name { entry: FileNameEntry, in_use: bool },
    EndOfDirectory,
    /// Bitmap, up-case table, volume label, vendor or unknown slot
    Other(u8),
}

impl DirectorySlot {
    /// Classify a slot by the low seven bits of its type byte.
    ///
    /// `raw` must hold at least [`ENTRY_SIZE`] bytes.
    pub fn parse(raw: &[u8]) -> Self {
        let entry_type = raw[0];
        let in_use = entry_type & IN_USE != 0;

        match entry_type & !IN_USE {
            _ if entry_type == 0 => DirectorySlot::EndOfDirectory,
            t if t == ENTRY_TYPE_FILE_DELETED => DirectorySlot::File {
                entry: FileEntry::parse(raw),
                in_use,
            },
            t if t == ENTRY_TYPE_STREAM_DELETED => DirectorySlot::Stream {
                entry: StreamExtensionEntry::parse(raw),
                in_use,
            },
            t if t == ENTRY_TYPE_FILENAME_DELETED => DirectorySlot::Name {
                entry: FileNameEntry::parse(raw),
                in_use,
            },
            _ => DirectorySlot::Other(entry_type),
        }
    }
}

/// Primary slot of an entry set.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub secondary_count: u8,
    pub set_checksum: u16,
    pub file_attributes: u16,
    pub create_timestamp: u32,
    pub modify_timestamp: u32,
    pub access_timestamp: u32,
    /// 10 ms units added to the creation time (0-199)
    pub create_10ms: u8,
    pub modify_10ms: u8,
    /// Bit 7 marks the offset as valid; bits 0-6 count 15 minute steps
    pub create_utc_offset: u8,
    pub modify_utc_offset: u8,
}

impl FileEntry {
    fn parse(raw: &[u8]) -> Self {
        FileEntry {
            secondary_count: raw[1],
            set_checksum: LittleEndian::read_u16(&raw[2..4]),
            file_attributes: LittleEndian::read_u16(&raw[4..6]),
            create_timestamp: LittleEndian::read_u32(&raw[8..12]),
            modify_timestamp: LittleEndian::read_u32(&raw[12..16]),
            access_timestamp: LittleEndian::read_u32(&raw[16..20]),
            create_10ms: raw[20],
            modify_10ms: raw[21],
            create_utc_offset: raw[22],
            modify_utc_offset: raw[23],
        }
    }

    pub fn is_directory(&self) -> bool {
        self.file_attributes & ATTR_DIRECTORY != 0
    }

    pub fn created_time(&self) -> Option<DateTime<Utc>> {
        decode_timestamp(self.create_timestamp, self.create_10ms, self.create_utc_offset)
    }

    pub fn modified_time(&self) -> Option<DateTime<Utc>> {
        decode_timestamp(self.modify_timestamp, self.modify_10ms, self.modify_utc_offset)
    }
}

/// Size and location of an entry set's data.
#[derive(Debug, Clone)]
pub struct StreamExtensionEntry {
    pub general_flags: u8,
    /// Name length in UTF-16 code units
    pub name_length: u8,
    pub name_hash: u16,
    pub valid_data_length: u64,
    pub first_cluster: u32,
    pub data_length: u64,
}

impl StreamExtensionEntry {
    fn parse(raw: &[u8]) -> Self {
        StreamExtensionEntry {
            general_flags: raw[1],
            name_length: raw[3],
            name_hash: LittleEndian::read_u16(&raw[4..6]),
            valid_data_length: LittleEndian::read_u64(&raw[8..16]),
            first_cluster: LittleEndian::read_u32(&raw[20..24]),
            data_length: LittleEndian::read_u64(&raw[24..32]),
        }
    }

    pub fn is_contiguous(&self) -> bool {
        self.general_flags & FLAG_NO_FAT_CHAIN != 0
    }
}

/// Up to 15 UTF-16 code units of a name.
#[derive(Debug, Clone)]
pub struct FileNameEntry {
    pub file_name: String,
    /// False when invalid UTF-16 was replaced
    pub valid: bool,
}

impl FileNameEntry {
    fn parse(raw: &[u8]) -> Self {
        let (file_name, valid) = decode_utf16_name(&raw[2..2 + NAME_UNITS_PER_SLOT * 2]);
        FileNameEntry { file_name, valid }
    }
}

/// A complete, parsed entry set.
#[derive(Debug, Clone)]
pub struct FileEntrySet {
    pub file_entry: FileEntry,
    pub stream_extension: StreamExtensionEntry,
    pub filename: String,
    /// Whether every name fragment was valid UTF-16
    pub name_valid: bool,
    /// File or stream slot has its in-use bit cleared
    pub is_deleted: bool,
}

impl FileEntrySet {
    /// Assemble a set from its slots, starting with the File slot.
    fn from_slots(slots: &[DirectorySlot]) -> Option<Self> {
        let (file_entry, file_in_use) = match slots.first()? {
            DirectorySlot::File { entry, in_use } => (entry.clone(), *in_use),
            _ => return None,
        };
        let count = file_entry.secondary_count as usize;
        if slots.len() < count + 1 {
            return None;
        }

        let (stream_extension, stream_in_use) = match &slots[1] {
            DirectorySlot::Stream { entry, in_use } => (entry.clone(), *in_use),
            _ => return None,
        };

        let mut filename = String::new();
        let mut name_valid = true;
        for slot in &slots[2..=count] {
            match slot {
                DirectorySlot::Name { entry, .. } => {
                    name_valid &= entry.valid;
                    filename.push_str(&entry.file_name);
                }
                _ => name_valid = false,
            }
        }

        let name_length = stream_extension.name_length as usize;
        if filename.chars().count() > name_length {
            filename = filename.chars().take(name_length).collect();
        }

        Some(FileEntrySet {
            file_entry,
            stream_extension,
            filename,
            name_valid,
            is_deleted: !file_in_use || !stream_in_use,
        })
    }
}

/// Every parseable entry set in `dir_data`, live and deleted, in on-disk
/// order. Parsing stops at the first end-of-directory slot.
pub fn parse_directory(dir_data: &[u8]) -> Vec<FileEntrySet> {
    let slots: Vec<DirectorySlot> = dir_data
        .chunks_exact(ENTRY_SIZE)
        .map(DirectorySlot::parse)
        .take_while(|slot| !matches!(slot, DirectorySlot::EndOfDirectory))
        .collect();

    let mut sets = Vec::new();
    let mut i = 0;
    while i < slots.len() {
        let DirectorySlot::File { entry, .. } = &slots[i] else {
            i += 1;
            continue;
        };

        if !SECONDARY_COUNT.contains(&entry.secondary_count) {
            tracing::debug!(
                "Slot {}: secondary count {} out of range",
                i,
                entry.secondary_count
            );
            i += 1;
            continue;
        }

        let set_len = entry.secondary_count as usize + 1;
        match FileEntrySet::from_slots(&slots[i..]) {
            Some(set) => {
                sets.push(set);
                i += set_len;
            }
            None => {
                tracing::debug!("Slot {}: incomplete entry set", i);
                i += 1;
            }
        }
    }

    sets
}

/// Decode a DOS-packed exFAT timestamp.
///
/// Returns `None` for zero or impossible dates so that corrupt metadata is
/// treated as absent.
pub fn decode_timestamp(raw: u32, increment_10ms: u8, utc_offset: u8) -> Option<DateTime<Utc>> {
    if raw == 0 {
        return None;
    }

    let year = 1980 + (raw >> 25) as i32;
    let month = (raw >> 21) & 0x0F;
    let day = (raw >> 16) & 0x1F;
    let hour = (raw >> 11) & 0x1F;
    let minute = (raw >> 5) & 0x3F;
    let second = (raw & 0x1F) * 2;

    let mut local = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
    if increment_10ms <= 199 {
        local += Duration::milliseconds(increment_10ms as i64 * 10);
    }

    let offset_minutes = if utc_offset & 0x80 != 0 {
        (((utc_offset << 1) as i8) >> 1) as i64 * 15
    } else {
        0
    };

    Some((local - Duration::minutes(offset_minutes)).and_utc())
}

/// Pack a time into the exFAT timestamp layout (2 second resolution).
pub fn encode_timestamp(time: &NaiveDateTime) -> u32 {
    let year = (time.year() - 1980).clamp(0, 127) as u32;
    (year << 25)
        | (time.month() << 21)
        | (time.day() << 16)
        | (time.hour() << 11)
        | (time.minute() << 5)
        | (time.second() / 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16(name: &str) -> Vec<u8> {
        name.encode_utf16().flat_map(|c| c.to_le_bytes()).collect()
    }

    fn file_set(name: &str, attributes: u16, first_cluster: u32, size: u64, deleted: bool) -> Vec<u8> {
        let mut out = vec![0u8; ENTRY_SIZE * 3];
        out[0] = if deleted { ENTRY_TYPE_FILE_DELETED } else { ENTRY_TYPE_FILE };
        out[1] = 2;
        out[4..6].copy_from_slice(&attributes.to_le_bytes());

        let stream = &mut out[ENTRY_SIZE..ENTRY_SIZE * 2];
        stream[0] = if deleted { ENTRY_TYPE_STREAM_DELETED } else { ENTRY_TYPE_STREAM };
        stream[1] = 0x01 | FLAG_NO_FAT_CHAIN;
        stream[3] = name.encode_utf16().count() as u8;
        stream[8..16].copy_from_slice(&size.to_le_bytes());
        stream[20..24].copy_from_slice(&first_cluster.to_le_bytes());
        stream[24..32].copy_from_slice(&size.to_le_bytes());

        let name_entry = &mut out[ENTRY_SIZE * 2..];
        name_entry[0] = if deleted { ENTRY_TYPE_FILENAME_DELETED } else { ENTRY_TYPE_FILENAME };
        let encoded = utf16(name);
        name_entry[2..2 + encoded.len()].copy_from_slice(&encoded);
        out
    }

    #[test]
    fn test_slot_classification() {
        let mut raw = [0u8; ENTRY_SIZE];
        assert!(matches!(DirectorySlot::parse(&raw), DirectorySlot::EndOfDirectory));

        raw[0] = ENTRY_TYPE_FILE;
        assert!(matches!(DirectorySlot::parse(&raw), DirectorySlot::File { in_use: true, .. }));
        raw[0] = ENTRY_TYPE_FILE_DELETED;
        assert!(matches!(DirectorySlot::parse(&raw), DirectorySlot::File { in_use: false, .. }));
        raw[0] = ENTRY_TYPE_FILENAME_DELETED;
        assert!(matches!(DirectorySlot::parse(&raw), DirectorySlot::Name { in_use: false, .. }));

        for other in [ENTRY_TYPE_BITMAP, ENTRY_TYPE_UPCASE, ENTRY_TYPE_LABEL] {
            raw[0] = other;
            assert!(matches!(DirectorySlot::parse(&raw), DirectorySlot::Other(t) if t == other));
        }
    }

    #[test]
    fn test_file_attributes() {
        let mut raw = [0u8; ENTRY_SIZE];
        raw[4..6].copy_from_slice(&(ATTR_DIRECTORY | ATTR_HIDDEN).to_le_bytes());
        assert!(FileEntry::parse(&raw).is_directory());

        raw[4..6].copy_from_slice(&(ATTR_ARCHIVE | ATTR_READ_ONLY | ATTR_SYSTEM).to_le_bytes());
        assert!(!FileEntry::parse(&raw).is_directory());
    }

    #[test]
    fn test_parse_directory_mixed_sets() {
        let mut dir = Vec::new();
        dir.extend(file_set("docs", ATTR_DIRECTORY, 3, 512, false));
        // Bitmap slot in the middle is skipped
        let mut bitmap = [0u8; ENTRY_SIZE];
        bitmap[0] = ENTRY_TYPE_BITMAP;
        dir.extend_from_slice(&bitmap);
        dir.extend(file_set("old.txt", ATTR_ARCHIVE, 5, 11, true));
        dir.extend_from_slice(&[0u8; ENTRY_SIZE]);
        // Anything after the end marker is ignored
        dir.extend(file_set("ghost.txt", ATTR_ARCHIVE, 9, 1, false));

        let sets = parse_directory(&dir);
        assert_eq!(sets.len(), 2);

        assert_eq!(sets[0].filename, "docs");
        assert!(sets[0].file_entry.is_directory());
        assert!(!sets[0].is_deleted);

        assert_eq!(sets[1].filename, "old.txt");
        assert!(sets[1].is_deleted);
        assert!(sets[1].name_valid);
        assert_eq!(sets[1].stream_extension.first_cluster, 5);
        assert_eq!(sets[1].stream_extension.data_length, 11);
        assert!(sets[1].stream_extension.is_contiguous());
    }

    #[test]
    fn test_long_name_spans_slots() {
        let name = "quarterly-report-final.pdf";
        let units = utf16(name);
        let mut dir = vec![0u8; ENTRY_SIZE * 4];
        dir[0] = ENTRY_TYPE_FILE;
        dir[1] = 3;
        dir[ENTRY_SIZE] = ENTRY_TYPE_STREAM;
        dir[ENTRY_SIZE + 3] = name.len() as u8;
        for (slot, chunk) in units.chunks(NAME_UNITS_PER_SLOT * 2).enumerate() {
            let base = ENTRY_SIZE * (2 + slot);
            dir[base] = ENTRY_TYPE_FILENAME;
            dir[base + 2..base + 2 + chunk.len()].copy_from_slice(chunk);
        }

        let sets = parse_directory(&dir);
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].filename, name);
    }

    #[test]
    fn test_invalid_secondary_count_is_skipped() {
        let mut dir = file_set("a.txt", ATTR_ARCHIVE, 4, 1, false);
        dir[1] = 0;
        assert!(parse_directory(&dir).is_empty());

        dir[1] = 5; // more slots than the directory holds
        assert!(parse_directory(&dir).is_empty());
    }

    #[test]
    fn test_lossy_name_fragment() {
        let mut dir = file_set("ab", ATTR_ARCHIVE, 4, 1, false);
        // Unpaired high surrogate in the first character
        dir[ENTRY_SIZE * 2 + 2] = 0x00;
        dir[ENTRY_SIZE * 2 + 3] = 0xD8;

        let sets = parse_directory(&dir);
        assert_eq!(sets.len(), 1);
        assert!(!sets[0].name_valid);
        assert!(sets[0].filename.contains('\u{FFFD}'));
    }

    #[test]
    fn test_timestamp_decoding() {
        let time = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 30, 44)
            .unwrap();
        let raw = encode_timestamp(&time);

        assert_eq!(decode_timestamp(raw, 0, 0).unwrap(), time.and_utc());
        // 150 * 10ms
        assert_eq!(
            decode_timestamp(raw, 150, 0).unwrap(),
            (time + Duration::milliseconds(1500)).and_utc()
        );
        // +2h (8 * 15 minutes): stored local time is ahead of UTC
        assert_eq!(
            decode_timestamp(raw, 0, 0x80 | 8).unwrap(),
            (time - Duration::hours(2)).and_utc()
        );
        // -1h (-4 in 7-bit two's complement)
        assert_eq!(
            decode_timestamp(raw, 0, 0x80 | 0x7C).unwrap(),
            (time + Duration::hours(1)).and_utc()
        );
    }

    #[test]
    fn test_invalid_timestamps_are_absent() {
        assert!(decode_timestamp(0, 0, 0).is_none());
        // Month 13
        assert!(decode_timestamp((44 << 25) | (13 << 21) | (1 << 16), 0, 0).is_none());
        // Day 0
        assert!(decode_timestamp((44 << 25) | (5 << 21), 0, 0).is_none());
        // 31 double-seconds = 62 seconds
        assert!(decode_timestamp((44 << 25) | (5 << 21) | (1 << 16) | 31, 0, 0).is_none());
    }
}
