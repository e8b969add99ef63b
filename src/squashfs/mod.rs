mod directory;
mod inode;
mod metadata;
mod superblock;
mod volume;
mod walker;

pub use directory::{
    DirectoryEntry, DirectoryHeader, parse_directory_entries, parse_directory_table,
};
pub use inode::{BasicDirectory, DirectoryBody, ExtendedDirectory, InodeHeader, Mode};
pub use metadata::{Decompressor, MetadataBlock, MetadataCursor, MetadataReader};
pub use superblock::{Compression, Flags, InodeRef, Superblock};
pub use volume::Volume;
pub use walker::{DirectoryLocation, InodePointer, TreeWalker, WalkOptions};

use std::{fmt, path::PathBuf};

use thiserror::Error;

/// "hsqs" read as a little-endian u32.
pub const MAGIC: u32 = 0x7371_7368;
pub const SUPERBLOCK_SIZE: usize = 96;

/// Largest uncompressed payload of a single metadata block.
pub const METADATA_SIZE: usize = 8192;
pub const METADATA_HEADER_SIZE: usize = 2;

pub const INODE_HEADER_SIZE: usize = 16;

pub const DIRECTORY_HEADER_SIZE: usize = 12;
pub const DIRECTORY_ENTRY_MIN_SIZE: usize = 8;
pub const MAX_DIRECTORY_ENTRIES: u32 = 256;
pub const MAX_NAME_SIZE: usize = 256;

/// Directory inode sizes count the implicit "." and ".." entries as 3 bytes
/// that are never stored in the directory table.
pub const DIRECTORY_SIZE_BIAS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum InodeType {
    BasicDirectory = 1,
    BasicFile = 2,
    BasicSymlink = 3,
    BasicBlockDevice = 4,
    BasicCharDevice = 5,
    BasicFifo = 6,
    BasicSocket = 7,
    ExtendedDirectory = 8,
    ExtendedFile = 9,
    ExtendedSymlink = 10,
    ExtendedBlockDevice = 11,
    ExtendedCharDevice = 12,
    ExtendedFifo = 13,
    ExtendedSocket = 14,
}

impl InodeType {
    pub fn from_u16(value: u16) -> Result<Self> {
        Ok(match value {
            1 => Self::BasicDirectory,
            2 => Self::BasicFile,
            3 => Self::BasicSymlink,
            4 => Self::BasicBlockDevice,
            5 => Self::BasicCharDevice,
            6 => Self::BasicFifo,
            7 => Self::BasicSocket,
            8 => Self::ExtendedDirectory,
            9 => Self::ExtendedFile,
            10 => Self::ExtendedSymlink,
            11 => Self::ExtendedBlockDevice,
            12 => Self::ExtendedCharDevice,
            13 => Self::ExtendedFifo,
            14 => Self::ExtendedSocket,
            other => return Err(SquashfsError::UnrecognizedInodeType(other)),
        })
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Self::BasicDirectory | Self::ExtendedDirectory)
    }

    pub fn is_extended(&self) -> bool {
        (*self as u16) >= Self::ExtendedDirectory as u16
    }

    /// Short label used in listings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BasicDirectory | Self::ExtendedDirectory => "dir",
            Self::BasicFile | Self::ExtendedFile => "file",
            Self::BasicSymlink | Self::ExtendedSymlink => "link",
            Self::BasicBlockDevice | Self::ExtendedBlockDevice => "blk",
            Self::BasicCharDevice | Self::ExtendedCharDevice => "chr",
            Self::BasicFifo | Self::ExtendedFifo => "fifo",
            Self::BasicSocket | Self::ExtendedSocket => "sock",
        }
    }
}

impl fmt::Display for InodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum SquashfsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid magic number {found:#010x}, expected 0x73717368")]
    BadMagic { found: u32 },

    #[error("Block size {block_size} has log2 {expected}, but the superblock stores {stored}")]
    InconsistentBlockSize {
        block_size: u32,
        stored: u16,
        expected: u32,
    },

    #[error("Short read at {location}: wanted {expected} bytes, got {actual}")]
    TruncatedRead {
        location: u64,
        expected: usize,
        actual: usize,
    },

    #[error("Compressed metadata block at {location} and no decompressor installed")]
    UnsupportedCompression { location: u64 },

    #[error("Metadata block at {location} holds {size} bytes, max 8192")]
    OversizedBlock { location: u64, size: usize },

    #[error("Offset {offset} is outside the {size} byte metadata block at {location}")]
    OffsetOutsideBlock {
        location: u64,
        offset: usize,
        size: usize,
    },

    #[error("Directory header at {position} declares {count} entries, max 256")]
    OversizedDirectory { position: usize, count: u32 },

    #[error("Directory entry at {position} has a {size} byte name, max 256")]
    OversizedName { position: usize, size: usize },

    #[error("Directory entry at {position} needs {needed} bytes, only {available} left")]
    TruncatedEntry {
        position: usize,
        needed: usize,
        available: usize,
    },

    #[error("Invalid entry name: {0:?}")]
    InvalidEntryName(String),

    #[error("Not a directory: {0}")]
    NotADirectory(InodeType),

    #[error("Unrecognized inode type {0}")]
    UnrecognizedInodeType(u16),

    #[error("Directory at block {block:#x} offset {offset:#x} was already visited")]
    CycleDetected { block: u32, offset: u16 },

    #[error("Directory nesting exceeds {max_depth} levels")]
    DepthExceeded { max_depth: usize },

    #[error("{}: {source}", .path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: Box<SquashfsError>,
    },
}

impl SquashfsError {
    /// Strip any path context added by the walker.
    pub fn root_cause(&self) -> &SquashfsError {
        match self {
            Self::Walk { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, SquashfsError>;
