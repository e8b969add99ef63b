use bitflags::bitflags;
use nom::Finish;
use nom_derive::{NomLE, Parse};

use crate::squashfs::{DIRECTORY_SIZE_BIAS, InodeType, Result, SquashfsError};

/// Leading 16 bytes shared by every inode kind.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, NomLE)]
pub struct InodeHeader {
    inode_type: u16,
    #[nom(Parse = "Mode::parse")]
    mode: Mode,
    uid_index: u16, // into the id table
    gid_index: u16,
    modification_time: u32,
    inode_number: u32,
}

impl InodeHeader {
    pub const SIZE: usize = 16;

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        match Parse::parse(bytes).finish() {
            Ok((_, header)) => Ok(header),
            Err(e) => Err(SquashfsError::Parse(format!("{:?}", e))),
        }
    }

    /// Raw type tag as stored.
    pub fn raw_type(&self) -> u16 {
        self.inode_type
    }

    pub fn inode_type(&self) -> Result<InodeType> {
        InodeType::from_u16(self.inode_type)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn uid_index(&self) -> u16 {
        self.uid_index
    }

    pub fn gid_index(&self) -> u16 {
        self.gid_index
    }

    pub fn modification_time(&self) -> u32 {
        self.modification_time
    }

    pub fn inode_number(&self) -> u32 {
        self.inode_number
    }
}

bitflags! {
    /// Permission bits. The file type lives in the inode type tag, not here.
    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    pub struct Mode: u16 {
        const OtherExecute = 0x001;
        const OtherWrite = 0x002;
        const OtherRead = 0x004;
        const GroupExecute = 0x008;
        const GroupWrite = 0x010;
        const GroupRead = 0x020;
        const OwnerExecute = 0x040;
        const OwnerWrite = 0x080;
        const OwnerRead = 0x100;

        const StickyBit = 0x200;
        const SetGid = 0x400;
        const SetUid = 0x800;
    }
}

impl Mode {
    pub fn parse(input: &[u8]) -> nom::IResult<&[u8], Self> {
        let (input, bits) = nom::number::complete::le_u16(input)?;
        Ok((input, Self::from_bits_retain(bits)))
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, NomLE)]
pub struct BasicDirectory {
    pub block_index: u32,
    pub link_count: u32,
    pub file_size: u16,
    pub block_offset: u16,
    pub parent_inode: u32,
}

impl BasicDirectory {
    pub const SIZE: usize = 16;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, NomLE)]
pub struct ExtendedDirectory {
    pub link_count: u32,
    pub file_size: u32,
    pub block_index: u32,
    pub parent_inode: u32,
    pub index_count: u16,
    pub block_offset: u16,
    pub xattr_index: u32,
}

impl ExtendedDirectory {
    /// Fixed part only; the directory index that may follow is not read.
    pub const SIZE: usize = 24;
}

/// Type specific part of a directory inode, following the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryBody {
    Basic(BasicDirectory),
    Extended(ExtendedDirectory),
}

impl DirectoryBody {
    /// Number of body bytes [`DirectoryBody::parse`] needs for `inode_type`.
    pub fn size_of(inode_type: InodeType) -> Result<usize> {
        match inode_type {
            InodeType::BasicDirectory => Ok(BasicDirectory::SIZE),
            InodeType::ExtendedDirectory => Ok(ExtendedDirectory::SIZE),
            other => Err(SquashfsError::NotADirectory(other)),
        }
    }

    pub fn parse(bytes: &[u8], inode_type: InodeType) -> Result<Self> {
        let parsed = match inode_type {
            InodeType::BasicDirectory => Parse::parse(bytes).finish().map(|(_, b)| Self::Basic(b)),
            InodeType::ExtendedDirectory => {
                Parse::parse(bytes).finish().map(|(_, b)| Self::Extended(b))
            }
            other => return Err(SquashfsError::NotADirectory(other)),
        };

        parsed.map_err(|e: nom::error::Error<&[u8]>| SquashfsError::Parse(format!("{:?}", e)))
    }

    /// Start of the listing's metadata block, relative to the directory table.
    pub fn block_index(&self) -> u32 {
        match self {
            Self::Basic(b) => b.block_index,
            Self::Extended(e) => e.block_index,
        }
    }

    pub fn block_offset(&self) -> u16 {
        match self {
            Self::Basic(b) => b.block_offset,
            Self::Extended(e) => e.block_offset,
        }
    }

    /// Stored listing size. mksquashfs adds 3 bytes for "." and "..".
    pub fn file_size(&self) -> u32 {
        match self {
            Self::Basic(b) => b.file_size as u32,
            Self::Extended(e) => e.file_size,
        }
    }

    /// Listing size with the "." and ".." bytes taken off.
    pub fn listing_size(&self) -> usize {
        self.file_size().saturating_sub(DIRECTORY_SIZE_BIAS) as usize
    }

    pub fn parent_inode(&self) -> u32 {
        match self {
            Self::Basic(b) => b.parent_inode,
            Self::Extended(e) => e.parent_inode,
        }
    }

    pub fn link_count(&self) -> u32 {
        match self {
            Self::Basic(b) => b.link_count,
            Self::Extended(e) => e.link_count,
        }
    }
}
