use std::{
    fs::File,
    io::{BufReader, Read, Seek},
    path::Path,
};

use log::{info, warn};

use crate::squashfs::{
    Decompressor, InodeHeader, InodePointer, InodeRef, MetadataReader, Result, SUPERBLOCK_SIZE,
    Superblock, TreeWalker, WalkOptions,
};

/// An opened image: the read handle plus its decoded superblock.
pub struct Volume<R: Read + Seek> {
    reader: R,
    superblock: Superblock,
    decompressor: Option<Box<dyn Decompressor>>,
}

impl Volume<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> Volume<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let bytes = MetadataReader::new(&mut reader)
            .read_exact_at(Superblock::SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE)?;
        let superblock = Superblock::parse(&bytes)?;

        if !superblock.is_supported_version() {
            let (major, minor) = superblock.version();
            warn!("unexpected format version {}.{}, decoding as 4.0", major, minor);
        }
        info!(
            "{} inodes, block size {}, inode table at {:#x}, directory table at {:#x}",
            superblock.inode_count(),
            superblock.block_size(),
            superblock.inode_table_start(),
            superblock.directory_table_start()
        );

        Ok(Self {
            reader,
            superblock,
            decompressor: None,
        })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Install the collaborator used for compressed metadata blocks.
    pub fn set_decompressor(&mut self, decompressor: Box<dyn Decompressor>) {
        self.decompressor = Some(decompressor);
    }

    pub fn metadata(&mut self) -> MetadataReader<'_, R> {
        MetadataReader::new(&mut self.reader).with_decompressor(self.decompressor.as_deref())
    }

    /// Read the common header of the inode at `inode`.
    pub fn read_inode_header(&mut self, inode: InodeRef) -> Result<InodeHeader> {
        let table = self.superblock.inode_table_start();
        let bytes = self.metadata().read(
            table,
            inode.block() as u64,
            inode.offset() as usize,
            InodeHeader::SIZE,
        )?;
        InodeHeader::parse(&bytes)
    }

    /// A walker rooted at the superblock's root inode.
    pub fn walker(&mut self, options: WalkOptions) -> TreeWalker<'_, R> {
        let root = InodePointer::root(self.superblock.root_inode());
        let inode_table = self.superblock.inode_table_start();
        let directory_table = self.superblock.directory_table_start();

        TreeWalker::new(self.metadata(), root, inode_table, directory_table).with_options(options)
    }

    /// Every reachable path, pre-order, aborting on the first error.
    pub fn walk(&mut self) -> Result<Vec<InodePointer>> {
        self.walker(WalkOptions::default()).walk()
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}
