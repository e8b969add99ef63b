pub mod squashfs;
mod utils;

pub use squashfs::{
    Compression, Decompressor, DirectoryBody, DirectoryEntry, DirectoryHeader, DirectoryLocation,
    Flags, InodeHeader, InodePointer, InodeRef, InodeType, MetadataBlock, MetadataCursor,
    MetadataReader, Mode, Result, SquashfsError, Superblock, TreeWalker, Volume, WalkOptions,
    parse_directory_entries, parse_directory_table,
};
