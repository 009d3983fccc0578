//! exFAT implementation of [`ImageAccess`].
//!
//! In-use entry sets are reported as allocated, deleted entry sets (type byte
//! with the high bit cleared) as unallocated. Deleting a file also frees its
//! FAT chain, so deleted files are read as one contiguous run from their
//! first cluster, which is what the data looked like for the common
//! NoFatChain case.

use anyhow::Result;

use super::directory::{parse_directory, FileEntrySet};
use super::fat::FatTable;
use super::ExFatBootSector;
use crate::error::{EntryAccessError, ImageOpenError};
use crate::fs::common::BlockDevice;
use crate::fs::{Allocation, DirectoryEntry, DirectoryHandle, EntryKind, ImageAccess};

/// Directories larger than this are treated as corrupt.
const MAX_DIRECTORY_BYTES: u64 = 256 * 1024 * 1024;

/// Location of an entry's data in the cluster heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExFatNode {
    pub first_cluster: u32,
    pub data_length: u64,
    /// Data is one run of clusters (NoFatChain flag)
    pub contiguous: bool,
    pub deleted: bool,
}

/// An opened exFAT image.
#[derive(Debug)]
pub struct ExFatImage {
    device: BlockDevice,
    boot_sector: ExFatBootSector,
    fat_table: FatTable,
}

impl ExFatImage {
    /// Parse the boot sector and FAT of an opened image.
    pub fn new(device: BlockDevice) -> Result<Self, ImageOpenError> {
        let sector0 = device.read_sector(0).map_err(|e| ImageOpenError::corrupt(&e))?;
        let boot_sector = ExFatBootSector::parse(sector0).map_err(|e| ImageOpenError::corrupt(&e))?;
        let fat_table =
            FatTable::from_device(&device, &boot_sector).map_err(|e| ImageOpenError::corrupt(&e))?;

        tracing::info!(
            "exFAT volume: {} clusters of {} bytes, {} free, root at cluster {}",
            fat_table.cluster_count(),
            fat_table.cluster_size(),
            fat_table.free_cluster_count(),
            boot_sector.first_cluster_of_root_directory
        );

        Ok(Self {
            device,
            boot_sector,
            fat_table,
        })
    }

    pub fn boot_sector(&self) -> &ExFatBootSector {
        &self.boot_sector
    }

    /// Image size in bytes
    pub fn image_size(&self) -> u64 {
        self.device.size()
    }

    /// Read `[offset, offset + length)` of a node's data, clamped to its
    /// data length.
    fn read_data(&self, node: &ExFatNode, offset: u64, length: usize) -> Result<Vec<u8>> {
        let end = offset.saturating_add(length as u64).min(node.data_length);
        if offset >= end {
            return Ok(Vec::new());
        }
        let wanted = (end - offset) as usize;

        let first_offset = self
            .fat_table
            .cluster_offset(node.first_cluster)
            .ok_or_else(|| anyhow::anyhow!("Invalid first cluster {}", node.first_cluster))?;

        if node.contiguous || node.deleted {
            let start = first_offset
                .checked_add(offset)
                .ok_or_else(|| anyhow::anyhow!("Data offset overflows"))?;
            let data = self.device.read_bytes_clamped(start, wanted)?;
            if data.len() < wanted {
                tracing::debug!(
                    "Run at cluster {} truncated by end of image ({} of {} bytes)",
                    node.first_cluster,
                    data.len(),
                    wanted
                );
            }
            return Ok(data.to_vec());
        }

        let cluster_size = self.fat_table.cluster_size() as u64;
        let chain = self.fat_table.get_chain(node.first_cluster);
        let mut out = Vec::with_capacity(wanted);
        let mut position = offset;

        while position < end {
            let Some(&cluster) = chain.get((position / cluster_size) as usize) else {
                break;
            };
            let within = position % cluster_size;
            let take = (cluster_size - within).min(end - position);
            let base = self
                .fat_table
                .cluster_offset(cluster)
                .ok_or_else(|| anyhow::anyhow!("Invalid cluster {} in chain", cluster))?;
            out.extend_from_slice(self.device.read_bytes(base + within, take as usize)?);
            position += take;
        }

        if out.is_empty() {
            anyhow::bail!("FAT chain from cluster {} holds no data", node.first_cluster);
        }
        if out.len() < wanted {
            tracing::debug!(
                "FAT chain from cluster {} ended after {} of {} bytes",
                node.first_cluster,
                out.len(),
                wanted
            );
        }

        Ok(out)
    }

    fn to_directory_entry(&self, set: FileEntrySet) -> DirectoryEntry<ExFatNode> {
        if !set.name_valid {
            tracing::debug!("Entry name '{}' contains invalid UTF-16", set.filename);
        }

        let kind = if set.file_entry.is_directory() {
            EntryKind::Directory
        } else {
            EntryKind::RegularFile
        };
        let allocation = if set.is_deleted {
            Allocation::Unallocated
        } else {
            Allocation::Allocated
        };

        DirectoryEntry {
            kind,
            size: set.stream_extension.data_length,
            allocation,
            modified: set.file_entry.modified_time(),
            created: set.file_entry.created_time(),
            node: ExFatNode {
                first_cluster: set.stream_extension.first_cluster,
                data_length: set.stream_extension.data_length,
                contiguous: set.stream_extension.is_contiguous(),
                deleted: set.is_deleted,
            },
            name: set.filename.into_bytes(),
            name_replaced: !set.name_valid,
        }
    }
}

impl ImageAccess for ExFatImage {
    type Node = ExFatNode;

    fn open_root(&self) -> Result<DirectoryHandle<ExFatNode>, EntryAccessError> {
        let root = self.boot_sector.first_cluster_of_root_directory;
        let chain = self.fat_table.get_chain(root);
        if chain.is_empty() {
            return Err(EntryAccessError::OpenDirectory {
                name: "/".to_string(),
                message: format!("root cluster {} is outside the cluster heap", root),
            });
        }

        // The root directory has no stream extension; its size is its chain
        Ok(DirectoryHandle {
            id: root as u64,
            node: ExFatNode {
                first_cluster: root,
                data_length: chain.len() as u64 * self.fat_table.cluster_size() as u64,
                contiguous: false,
                deleted: false,
            },
        })
    }

    fn list_entries(
        &self,
        directory: &DirectoryHandle<ExFatNode>,
    ) -> Result<Vec<DirectoryEntry<ExFatNode>>, EntryAccessError> {
        let list_error = |message: String| EntryAccessError::ListDirectory {
            directory: format!("cluster {}", directory.node.first_cluster),
            message,
        };

        if directory.node.data_length > MAX_DIRECTORY_BYTES {
            return Err(list_error(format!(
                "directory length {} exceeds {} bytes",
                directory.node.data_length, MAX_DIRECTORY_BYTES
            )));
        }

        let dir_data = self
            .read_data(&directory.node, 0, directory.node.data_length as usize)
            .map_err(|e| list_error(format!("{e:#}")))?;

        let entries: Vec<_> = parse_directory(&dir_data)
            .into_iter()
            .map(|set| self.to_directory_entry(set))
            .collect();

        tracing::debug!(
            "Directory at cluster {}: {} entries",
            directory.node.first_cluster,
            entries.len()
        );

        Ok(entries)
    }

    fn open_subdirectory(
        &self,
        entry: &DirectoryEntry<ExFatNode>,
    ) -> Result<DirectoryHandle<ExFatNode>, EntryAccessError> {
        let open_error = |message: String| EntryAccessError::OpenDirectory {
            name: entry.display_name().into_owned(),
            message,
        };

        if entry.kind != EntryKind::Directory {
            return Err(open_error("not a directory".to_string()));
        }
        if !self.fat_table.is_valid_cluster(entry.node.first_cluster) {
            return Err(open_error(format!(
                "first cluster {} is outside the cluster heap",
                entry.node.first_cluster
            )));
        }

        Ok(DirectoryHandle {
            id: entry.node.first_cluster as u64,
            node: entry.node,
        })
    }

    fn read_content(
        &self,
        node: &ExFatNode,
        offset: u64,
        length: usize,
    ) -> Result<Vec<u8>, EntryAccessError> {
        self.read_data(node, offset, length)
            .map_err(|e| EntryAccessError::ContentRead {
                name: format!("cluster {}", node.first_cluster),
                message: format!("{e:#}"),
            })
    }
}
