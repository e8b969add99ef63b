use std::{
    collections::{HashSet, VecDeque},
    io::{Read, Seek},
    path::{Path, PathBuf},
};

use log::{debug, warn};

use crate::{
    squashfs::{
        DirectoryBody, DirectoryEntry, InodeHeader, InodeRef, InodeType, MetadataCursor,
        MetadataReader, Result, SquashfsError, parse_directory_table,
    },
    utils::JoinEntryName,
};

/// Where a directory's listing lives in the directory table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryLocation {
    pub block: u32,
    pub offset: u16,
    /// Stored size; images written by mksquashfs add 3 bytes for "." and "..".
    pub size: u32,
}

/// One node of the tree, as produced by the walker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodePointer {
    pub path: PathBuf,
    /// Taken from the parent's entry, then replaced by the inode header's type.
    pub inode_type: InodeType,
    /// Start of the inode's metadata block, relative to the inode table.
    pub block: u32,
    pub offset: u16,
    pub inode_number: Option<u32>,
    pub header: Option<InodeHeader>,
    pub directory: Option<DirectoryLocation>,
}

impl InodePointer {
    pub fn root(inode: InodeRef) -> Self {
        Self {
            path: PathBuf::from("/"),
            inode_type: InodeType::BasicDirectory,
            block: inode.block(),
            offset: inode.offset(),
            inode_number: None,
            header: None,
            directory: None,
        }
    }

    pub fn from_entry(owner: &Path, entry: &DirectoryEntry) -> Result<Self> {
        Ok(Self {
            path: owner.join_entry(&entry.name)?,
            inode_type: entry.entry_type()?,
            block: entry.start_block,
            offset: entry.offset,
            inode_number: Some(entry.inode_number()),
            header: None,
            directory: None,
        })
    }

    pub fn inode_ref(&self) -> InodeRef {
        InodeRef::new(self.block, self.offset)
    }

    pub fn is_directory(&self) -> bool {
        self.inode_type.is_directory()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkOptions {
    /// Directories nested deeper than this are not expanded.
    pub max_depth: usize,
}

impl WalkOptions {
    pub const DEFAULT_MAX_DEPTH: usize = 1024;
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            max_depth: Self::DEFAULT_MAX_DEPTH,
        }
    }
}

struct WalkFrame {
    depth: usize,
    entries: VecDeque<InodePointer>,
}

/// Pre-order traversal of the inode/directory graph.
///
/// Yields the root first, then each directory's children in storage order,
/// descending into a directory before moving on to its next sibling. A node
/// that fails to decode is yielded as an error carrying its path and its
/// subtree is skipped; collecting into `Result<Vec<_>>` aborts on the first.
pub struct TreeWalker<'a, R: Read + Seek> {
    metadata: MetadataReader<'a, R>,
    inode_table_start: u64,
    directory_table_start: u64,
    options: WalkOptions,
    visited: HashSet<(u32, u16)>,
    root: Option<InodePointer>,
    stack: Vec<WalkFrame>,
}

impl<'a, R: Read + Seek> TreeWalker<'a, R> {
    pub fn new(
        metadata: MetadataReader<'a, R>,
        root: InodePointer,
        inode_table_start: u64,
        directory_table_start: u64,
    ) -> Self {
        Self {
            metadata,
            inode_table_start,
            directory_table_start,
            options: WalkOptions::default(),
            visited: HashSet::new(),
            root: Some(root),
            stack: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: WalkOptions) -> Self {
        self.options = options;
        self
    }

    /// Walk the whole tree, stopping at the first error.
    pub fn walk(self) -> Result<Vec<InodePointer>> {
        self.collect()
    }

    fn visit(&mut self, mut pointer: InodePointer, depth: usize) -> Result<InodePointer> {
        match self.resolve(&mut pointer, depth) {
            Ok(()) => Ok(pointer),
            Err(source) => Err(SquashfsError::Walk {
                path: pointer.path,
                source: Box::new(source),
            }),
        }
    }

    fn resolve(&mut self, pointer: &mut InodePointer, depth: usize) -> Result<()> {
        let mut cursor = MetadataCursor::new(pointer.block as u64, pointer.offset as usize);
        let bytes = self
            .metadata
            .read_from(self.inode_table_start, &mut cursor, InodeHeader::SIZE)?;
        let header = InodeHeader::parse(&bytes)?;
        let inode_type = header.inode_type()?;

        if let Some(number) = pointer.inode_number
            && number != header.inode_number()
        {
            warn!(
                "{}: entry resolves to inode {}, header says {}",
                pointer.path.display(),
                number,
                header.inode_number()
            );
        }

        pointer.inode_type = inode_type;
        pointer.inode_number = Some(header.inode_number());
        pointer.header = Some(header);

        if !inode_type.is_directory() {
            return Ok(());
        }

        if depth >= self.options.max_depth {
            return Err(SquashfsError::DepthExceeded {
                max_depth: self.options.max_depth,
            });
        }
        if !self.visited.insert((pointer.block, pointer.offset)) {
            return Err(SquashfsError::CycleDetected {
                block: pointer.block,
                offset: pointer.offset,
            });
        }

        // The body follows the header in the stream.
        let body_size = DirectoryBody::size_of(inode_type)?;
        let bytes = self
            .metadata
            .read_from(self.inode_table_start, &mut cursor, body_size)?;
        let body = DirectoryBody::parse(&bytes, inode_type)?;
        pointer.directory = Some(DirectoryLocation {
            block: body.block_index(),
            offset: body.block_offset(),
            size: body.file_size(),
        });

        let listing = self.read_listing(&body, &pointer.path)?;
        let children = parse_directory_table(&listing, &pointer.path)?;
        debug!(
            "{}: {} entries at directory block {:#x} offset {:#x}",
            pointer.path.display(),
            children.len(),
            body.block_index(),
            body.block_offset()
        );

        if !children.is_empty() {
            self.stack.push(WalkFrame {
                depth: depth + 1,
                entries: children.into(),
            });
        }

        Ok(())
    }

    /// Read the stored `file_size` bytes of a listing. mksquashfs counts 3
    /// bytes for "." and ".." that are not in the table, so when the full
    /// span runs off the end of the table the read is retried without them.
    fn read_listing(&mut self, body: &DirectoryBody, path: &Path) -> Result<Vec<u8>> {
        let full = body.file_size() as usize;
        match self.metadata.read(
            self.directory_table_start,
            body.block_index() as u64,
            body.block_offset() as usize,
            full,
        ) {
            Ok(listing) => Ok(listing),
            Err(e) if body.listing_size() < full => {
                debug!(
                    "{}: {} byte listing unreadable ({}), retrying with {}",
                    path.display(),
                    full,
                    e,
                    body.listing_size()
                );
                self.metadata.read(
                    self.directory_table_start,
                    body.block_index() as u64,
                    body.block_offset() as usize,
                    body.listing_size(),
                )
            }
            Err(e) => Err(e),
        }
    }
}

impl<'a, R: Read + Seek> Iterator for TreeWalker<'a, R> {
    type Item = Result<InodePointer>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(root) = self.root.take() {
            return Some(self.visit(root, 0));
        }

        loop {
            let frame = self.stack.last_mut()?;
            match frame.entries.pop_front() {
                Some(pointer) => {
                    let depth = frame.depth;
                    return Some(self.visit(pointer, depth));
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}
