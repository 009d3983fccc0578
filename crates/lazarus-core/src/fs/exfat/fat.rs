//! The exFAT allocation table: one 32-bit link per cluster.
//!
//! Deleting a file zeroes its links, so chains are only trusted for
//! allocated entries. Chain walks stop at anything that is not a link into
//! the cluster heap and never revisit a cluster.

use std::collections::HashSet;

use anyhow::{Context, Result};
use byteorder::{ByteOrder, LittleEndian};

use super::ExFatBootSector;
use crate::fs::common::BlockDevice;

/// First cluster number of the cluster heap
pub const FIRST_DATA_CLUSTER: u32 = 2;

const LINK_BYTES: usize = 4;

/// Decoded meaning of one FAT slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatEntry {
    Free,
    Next(u32),
    Bad,
    EndOfChain,
    /// Values 0x00000001 and 0xFFFFFFF0..=0xFFFFFFF6
    Reserved(u32),
}

impl From<u32> for FatEntry {
    fn from(raw: u32) -> Self {
        match raw {
            0 => FatEntry::Free,
            0xFFFF_FFF7 => FatEntry::Bad,
            0xFFFF_FFF8..=0xFFFF_FFFF => FatEntry::EndOfChain,
            1 | 0xFFFF_FFF0..=0xFFFF_FFF6 => FatEntry::Reserved(raw),
            next => FatEntry::Next(next),
        }
    }
}

/// Allocation table plus the heap geometry needed to turn clusters into
/// byte offsets.
#[derive(Debug)]
pub struct FatTable {
    links: Vec<u32>,
    cluster_size: u32,
    cluster_count: u32,
    /// Byte offset of cluster 2
    heap_start: u64,
}

impl FatTable {
    /// Load the first FAT. Only the slots that describe heap clusters are read.
    pub fn from_device(device: &BlockDevice, boot: &ExFatBootSector) -> Result<Self> {
        let sector = boot.bytes_per_sector() as u64;
        let offset = boot.fat_offset as u64 * sector;
        let slots = boot.cluster_count as u64 + FIRST_DATA_CLUSTER as u64;
        let length = (slots * LINK_BYTES as u64).min(boot.fat_length as u64 * sector);

        let raw = device
            .read_bytes(offset, length as usize)
            .with_context(|| format!("FAT at sector {} is outside the image", boot.fat_offset))?;
        let links: Vec<u32> = raw
            .chunks_exact(LINK_BYTES)
            .map(LittleEndian::read_u32)
            .collect();

        tracing::debug!("Loaded {} FAT links from offset 0x{:x}", links.len(), offset);

        Ok(FatTable {
            links,
            cluster_size: boot.bytes_per_cluster(),
            cluster_count: boot.cluster_count,
            heap_start: boot.cluster_heap_offset as u64 * sector,
        })
    }

    /// Whether `cluster` lies inside the cluster heap.
    pub fn is_valid_cluster(&self, cluster: u32) -> bool {
        cluster
            .checked_sub(FIRST_DATA_CLUSTER)
            .is_some_and(|index| index < self.cluster_count)
    }

    pub fn entry(&self, cluster: u32) -> Option<FatEntry> {
        self.links.get(cluster as usize).map(|&raw| FatEntry::from(raw))
    }

    /// Clusters of the chain starting at `start`, in order. Empty when
    /// `start` is not a heap cluster.
    pub fn get_chain(&self, start: u32) -> Vec<u32> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = start;

        while self.is_valid_cluster(current) {
            if !seen.insert(current) {
                tracing::warn!("FAT chain from cluster {} loops back to {}", start, current);
                break;
            }
            chain.push(current);

            match self.entry(current) {
                Some(FatEntry::Next(next)) => current = next,
                _ => break,
            }
        }

        chain
    }

    pub fn cluster_size(&self) -> u32 {
        self.cluster_size
    }

    pub fn cluster_count(&self) -> u32 {
        self.cluster_count
    }

    /// Byte offset of a heap cluster in the image.
    pub fn cluster_offset(&self, cluster: u32) -> Option<u64> {
        self.is_valid_cluster(cluster).then(|| {
            self.heap_start + (cluster - FIRST_DATA_CLUSTER) as u64 * self.cluster_size as u64
        })
    }

    /// Heap clusters whose link is free.
    pub fn free_cluster_count(&self) -> usize {
        self.links
            .iter()
            .skip(FIRST_DATA_CLUSTER as usize)
            .filter(|&&raw| FatEntry::from(raw) == FatEntry::Free)
            .count()
    }
}
