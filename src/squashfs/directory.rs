use std::path::Path;

use log::trace;
use nom::Finish;
use nom_derive::{NomLE, Parse};

use crate::squashfs::{
    DIRECTORY_ENTRY_MIN_SIZE, DIRECTORY_HEADER_SIZE, InodePointer, InodeType,
    MAX_DIRECTORY_ENTRIES, MAX_NAME_SIZE, Result, SquashfsError,
};

/// Precedes a run of entries that share one inode table block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, NomLE)]
pub struct DirectoryHeader {
    stored_count: u32, // entries - 1
    start_block: u32,
    inode_number: u32,
}

impl DirectoryHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        match Parse::parse(bytes).finish() {
            Ok((_, header)) => Ok(header),
            Err(e) => Err(SquashfsError::Parse(format!("{:?}", e))),
        }
    }

    pub fn count(&self) -> u32 {
        self.stored_count.saturating_add(1)
    }

    /// Start of the inode table block holding the entries' inodes.
    pub fn start_block(&self) -> u32 {
        self.start_block
    }

    /// Base the entries' inode deltas are relative to.
    pub fn inode_number(&self) -> u32 {
        self.inode_number
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, NomLE)]
struct RawEntry {
    offset: u16,
    inode_delta: i16,
    entry_type: u16,
    name_size: u16, // name length - 1
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub offset: u16,
    pub inode_delta: i16,
    /// Raw type tag. Extended inodes are listed with their basic type.
    pub entry_type: u16,
    pub name: Vec<u8>,
    pub start_block: u32,
    pub base_inode_number: u32,
}

impl DirectoryEntry {
    pub fn name_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }

    pub fn entry_type(&self) -> Result<InodeType> {
        InodeType::from_u16(self.entry_type)
    }

    /// Absolute inode number, resolved from the header base and the delta.
    pub fn inode_number(&self) -> u32 {
        self.base_inode_number
            .wrapping_add_signed(self.inode_delta as i32)
    }

    fn parse(bytes: &[u8], position: usize, header: &DirectoryHeader) -> Result<(Self, usize)> {
        let available = bytes.len() - position;
        if available < DIRECTORY_ENTRY_MIN_SIZE {
            return Err(SquashfsError::TruncatedEntry {
                position,
                needed: DIRECTORY_ENTRY_MIN_SIZE,
                available,
            });
        }

        let raw: RawEntry = match Parse::parse(&bytes[position..]).finish() {
            Ok((_, raw)) => raw,
            Err(e) => return Err(SquashfsError::Parse(format!("{:?}", e))),
        };

        let name_size = raw.name_size as usize + 1;
        if name_size > MAX_NAME_SIZE {
            return Err(SquashfsError::OversizedName {
                position,
                size: name_size,
            });
        }

        let size = DIRECTORY_ENTRY_MIN_SIZE + name_size;
        if size > available {
            return Err(SquashfsError::TruncatedEntry {
                position,
                needed: size,
                available,
            });
        }

        let name_start = position + DIRECTORY_ENTRY_MIN_SIZE;
        let entry = Self {
            offset: raw.offset,
            inode_delta: raw.inode_delta,
            entry_type: raw.entry_type,
            name: bytes[name_start..name_start + name_size].to_vec(),
            start_block: header.start_block,
            base_inode_number: header.inode_number,
        };

        Ok((entry, size))
    }
}

/// Decode a directory listing into its entries, in storage order.
pub fn parse_directory_entries(bytes: &[u8]) -> Result<Vec<DirectoryEntry>> {
    let mut entries = Vec::new();
    let mut position = 0;

    while bytes.len() - position >= DIRECTORY_HEADER_SIZE {
        let header = DirectoryHeader::parse(&bytes[position..])?;
        if header.count() > MAX_DIRECTORY_ENTRIES {
            return Err(SquashfsError::OversizedDirectory {
                position,
                count: header.count(),
            });
        }
        position += DIRECTORY_HEADER_SIZE;

        for _ in 0..header.count() {
            let (entry, size) = DirectoryEntry::parse(bytes, position, &header)?;
            trace!(
                "entry {:?} at {}: block {:#x} offset {:#x}",
                entry.name_str(),
                position,
                entry.start_block,
                entry.offset
            );
            entries.push(entry);
            position += size;
        }
    }

    Ok(entries)
}

/// Decode a directory listing owned by `owner` into pointers to its children.
pub fn parse_directory_table(bytes: &[u8], owner: &Path) -> Result<Vec<InodePointer>> {
    parse_directory_entries(bytes)?
        .iter()
        .map(|entry| InodePointer::from_entry(owner, entry))
        .collect()
}
