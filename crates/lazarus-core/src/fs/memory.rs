//! In-memory implementation of [`ImageAccess`].
//!
//! Builds a directory tree programmatically, including things a healthy
//! filesystem never contains: `.`/`..` entries, links that form cycles, and
//! entries that fail to list, open or read. Used to exercise the scanner
//! without an on-disk image.

use chrono::{DateTime, Utc};

use crate::error::EntryAccessError;
use crate::fs::{Allocation, DirectoryEntry, DirectoryHandle, EntryKind, ImageAccess};

/// Index of a node in a [`MemoryImage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryNodeId(usize);

/// A file (or special entry) to add to a [`MemoryImage`].
#[derive(Debug, Clone)]
pub struct MemoryFile {
    name: Vec<u8>,
    content: Vec<u8>,
    size: Option<u64>,
    kind: EntryKind,
    allocation: Allocation,
    modified: Option<DateTime<Utc>>,
    created: Option<DateTime<Utc>>,
}

impl MemoryFile {
    /// Allocated regular file with no timestamps.
    pub fn new(name: impl Into<Vec<u8>>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            size: None,
            kind: EntryKind::RegularFile,
            allocation: Allocation::Allocated,
            modified: None,
            created: None,
        }
    }

    pub fn unallocated(mut self) -> Self {
        self.allocation = Allocation::Unallocated;
        self
    }

    pub fn modified(mut self, time: DateTime<Utc>) -> Self {
        self.modified = Some(time);
        self
    }

    pub fn created(mut self, time: DateTime<Utc>) -> Self {
        self.created = Some(time);
        self
    }

    /// Report a metadata size different from the stored content length.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Neither a regular file nor a directory (device, socket, ...).
    pub fn special(mut self) -> Self {
        self.kind = EntryKind::Other;
        self
    }
}

#[derive(Debug, Clone)]
struct Child {
    name: Vec<u8>,
    kind: EntryKind,
    size: u64,
    allocation: Allocation,
    modified: Option<DateTime<Utc>>,
    created: Option<DateTime<Utc>>,
    target: MemoryNodeId,
}

#[derive(Debug, Clone)]
enum NodeData {
    Directory { children: Vec<Child> },
    File { content: Vec<u8> },
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    parent: MemoryNodeId,
    data: NodeData,
    fail_list: bool,
    fail_open: bool,
    fail_read: bool,
}

/// A directory tree held in memory.
///
/// Node ids are only meaningful for the image that issued them. Adding
/// children to a file node panics.
#[derive(Debug, Clone)]
pub struct MemoryImage {
    nodes: Vec<Node>,
}

impl Default for MemoryImage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryImage {
    /// Image containing only an empty root directory.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                name: "/".to_string(),
                parent: MemoryNodeId(0),
                data: NodeData::Directory {
                    children: Vec::new(),
                },
                fail_list: false,
                fail_open: false,
                fail_read: false,
            }],
        }
    }

    pub fn root(&self) -> MemoryNodeId {
        MemoryNodeId(0)
    }

    /// Add an allocated directory under `parent`.
    pub fn add_directory(&mut self, parent: MemoryNodeId, name: &str) -> MemoryNodeId {
        self.add_directory_with(parent, name, Allocation::Allocated)
    }

    /// Add a directory whose entry carries the given allocation state.
    pub fn add_directory_with(
        &mut self,
        parent: MemoryNodeId,
        name: &str,
        allocation: Allocation,
    ) -> MemoryNodeId {
        let id = self.push(name, parent, NodeData::Directory { children: Vec::new() });
        self.push_child(
            parent,
            Child {
                name: name.as_bytes().to_vec(),
                kind: EntryKind::Directory,
                size: 0,
                allocation,
                modified: None,
                created: None,
                target: id,
            },
        );
        id
    }

    /// Add a file under `parent`.
    pub fn add_file(&mut self, parent: MemoryNodeId, file: MemoryFile) -> MemoryNodeId {
        let name = String::from_utf8_lossy(&file.name).into_owned();
        let size = file.size.unwrap_or(file.content.len() as u64);
        let id = self.push(&name, parent, NodeData::File { content: file.content });
        self.push_child(
            parent,
            Child {
                name: file.name,
                kind: file.kind,
                size,
                allocation: file.allocation,
                modified: file.modified,
                created: file.created,
                target: id,
            },
        );
        id
    }

    /// Add a directory entry in `parent` that points at an existing directory.
    pub fn link_directory(&mut self, parent: MemoryNodeId, name: &[u8], target: MemoryNodeId) {
        self.push_child(
            parent,
            Child {
                name: name.to_vec(),
                kind: EntryKind::Directory,
                size: 0,
                allocation: Allocation::Allocated,
                modified: None,
                created: None,
                target,
            },
        );
    }

    /// Add `.` and `..` entries to a directory, as POSIX filesystems report.
    pub fn add_dot_entries(&mut self, directory: MemoryNodeId) {
        let parent = self.nodes[directory.0].parent;
        self.link_directory(directory, b".", directory);
        self.link_directory(directory, b"..", parent);
    }

    /// Listing this directory fails.
    pub fn fail_listing(&mut self, node: MemoryNodeId) {
        self.nodes[node.0].fail_list = true;
    }

    /// Opening this directory fails.
    pub fn fail_open(&mut self, node: MemoryNodeId) {
        self.nodes[node.0].fail_open = true;
    }

    /// Reading this file's content fails.
    pub fn fail_read(&mut self, node: MemoryNodeId) {
        self.nodes[node.0].fail_read = true;
    }

    fn push(&mut self, name: &str, parent: MemoryNodeId, data: NodeData) -> MemoryNodeId {
        self.nodes.push(Node {
            name: name.to_string(),
            parent,
            data,
            fail_list: false,
            fail_open: false,
            fail_read: false,
        });
        MemoryNodeId(self.nodes.len() - 1)
    }

    fn push_child(&mut self, parent: MemoryNodeId, child: Child) {
        match &mut self.nodes[parent.0].data {
            NodeData::Directory { children } => children.push(child),
            NodeData::File { .. } => panic!("cannot add children to a file node"),
        }
    }

    fn open(&self, id: MemoryNodeId, name: &str) -> Result<DirectoryHandle<MemoryNodeId>, EntryAccessError> {
        let open_error = |message: &str| EntryAccessError::OpenDirectory {
            name: name.to_string(),
            message: message.to_string(),
        };

        let node = self.nodes.get(id.0).ok_or_else(|| open_error("dangling node"))?;
        if node.fail_open {
            return Err(open_error("injected open failure"));
        }
        match node.data {
            NodeData::Directory { .. } => Ok(DirectoryHandle {
                id: id.0 as u64,
                node: id,
            }),
            NodeData::File { .. } => Err(open_error("not a directory")),
        }
    }
}

impl ImageAccess for MemoryImage {
    type Node = MemoryNodeId;

    fn open_root(&self) -> Result<DirectoryHandle<MemoryNodeId>, EntryAccessError> {
        self.open(self.root(), "/")
    }

    fn list_entries(
        &self,
        directory: &DirectoryHandle<MemoryNodeId>,
    ) -> Result<Vec<DirectoryEntry<MemoryNodeId>>, EntryAccessError> {
        let node = &self.nodes[directory.node.0];
        let list_error = |message: &str| EntryAccessError::ListDirectory {
            directory: node.name.clone(),
            message: message.to_string(),
        };

        if node.fail_list {
            return Err(list_error("injected listing failure"));
        }
        let NodeData::Directory { children } = &node.data else {
            return Err(list_error("not a directory"));
        };

        Ok(children
            .iter()
            .map(|child| DirectoryEntry {
                name: child.name.clone(),
                name_replaced: false,
                kind: child.kind,
                size: child.size,
                allocation: child.allocation,
                modified: child.modified,
                created: child.created,
                node: child.target,
            })
            .collect())
    }

    fn open_subdirectory(
        &self,
        entry: &DirectoryEntry<MemoryNodeId>,
    ) -> Result<DirectoryHandle<MemoryNodeId>, EntryAccessError> {
        self.open(entry.node, &entry.display_name())
    }

    fn read_content(
        &self,
        node: &MemoryNodeId,
        offset: u64,
        length: usize,
    ) -> Result<Vec<u8>, EntryAccessError> {
        let target = &self.nodes[node.0];
        let read_error = |message: &str| EntryAccessError::ContentRead {
            name: target.name.clone(),
            message: message.to_string(),
        };

        if target.fail_read {
            return Err(read_error("injected read failure"));
        }
        let NodeData::File { content } = &target.data else {
            return Err(read_error("not a file"));
        };

        let start = (offset.min(content.len() as u64)) as usize;
        let end = start.saturating_add(length).min(content.len());
        Ok(content[start..end].to_vec())
    }
}
