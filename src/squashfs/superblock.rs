use std::fmt;

use bitflags::bitflags;
use nom::Finish;
use nom_derive::{NomLE, Parse};

use crate::squashfs::{MAGIC, Result, SUPERBLOCK_SIZE, SquashfsError};

/// The fixed 96 byte header at offset 0 of every image.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, NomLE)]
pub struct Superblock {
    magic: u32,
    inode_count: u32,
    modification_time: u32, // Unix seconds
    block_size: u32,
    fragment_count: u32,
    compressor: u16,
    block_log: u16,
    #[nom(Parse = "Flags::parse")]
    flags: Flags,
    id_count: u16,
    version_major: u16,
    version_minor: u16,
    #[nom(Parse = "InodeRef::parse")]
    root_inode: InodeRef,
    bytes_used: u64,

    // Table locations, absolute byte offsets into the image
    id_table_start: u64,
    xattr_table_start: u64,
    inode_table_start: u64,
    directory_table_start: u64,
    fragment_table_start: u64,
    export_table_start: u64,
}

impl Superblock {
    pub const SUPERBLOCK_OFFSET: u64 = 0;
    pub const VERSION_MAJOR: u16 = 4;
    pub const VERSION_MINOR: u16 = 0;

    /// Decode and validate the superblock. Only the magic and the block size
    /// log are checked; table offsets are taken as-is.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let bytes = bytes
            .get(..SUPERBLOCK_SIZE)
            .ok_or(SquashfsError::TruncatedRead {
                location: Self::SUPERBLOCK_OFFSET,
                expected: SUPERBLOCK_SIZE,
                actual: bytes.len(),
            })?;

        let found = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if found != MAGIC {
            return Err(SquashfsError::BadMagic { found });
        }

        let superblock: Superblock = match Parse::parse(bytes).finish() {
            Ok((_, superblock)) => superblock,
            Err(e) => return Err(SquashfsError::Parse(format!("{:?}", e))),
        };

        match superblock.block_size.checked_ilog2() {
            Some(log) if log == superblock.block_log as u32 => Ok(superblock),
            expected => Err(SquashfsError::InconsistentBlockSize {
                block_size: superblock.block_size,
                stored: superblock.block_log,
                expected: expected.unwrap_or(0),
            }),
        }
    }

    pub fn magic(&self) -> u32 {
        self.magic
    }

    pub fn inode_count(&self) -> u32 {
        self.inode_count
    }

    pub fn modification_time(&self) -> u32 {
        self.modification_time
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn block_log(&self) -> u16 {
        self.block_log
    }

    pub fn fragment_count(&self) -> u32 {
        self.fragment_count
    }

    pub fn compressor_id(&self) -> u16 {
        self.compressor
    }

    /// `None` for compressor ids this crate does not know about.
    pub fn compression(&self) -> Option<Compression> {
        Compression::from_u16(self.compressor)
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn id_count(&self) -> u16 {
        self.id_count
    }

    pub fn version(&self) -> (u16, u16) {
        (self.version_major, self.version_minor)
    }

    pub fn is_supported_version(&self) -> bool {
        self.version() == (Self::VERSION_MAJOR, Self::VERSION_MINOR)
    }

    pub fn root_inode(&self) -> InodeRef {
        self.root_inode
    }

    pub fn bytes_used(&self) -> u64 {
        self.bytes_used
    }

    pub fn id_table_start(&self) -> u64 {
        self.id_table_start
    }

    pub fn xattr_table_start(&self) -> u64 {
        self.xattr_table_start
    }

    pub fn inode_table_start(&self) -> u64 {
        self.inode_table_start
    }

    pub fn directory_table_start(&self) -> u64 {
        self.directory_table_start
    }

    pub fn fragment_table_start(&self) -> u64 {
        self.fragment_table_start
    }

    pub fn export_table_start(&self) -> u64 {
        self.export_table_start
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u16 {
        const UncompressedInodes = 0x0001;
        const UncompressedData = 0x0002;
        const Check = 0x0004; // unused since 4.0
        const UncompressedFragments = 0x0008;
        const NoFragments = 0x0010;
        const AlwaysFragments = 0x0020;
        const Duplicates = 0x0040;
        const Exportable = 0x0080;
        const UncompressedXattrs = 0x0100;
        const NoXattrs = 0x0200;
        const CompressorOptions = 0x0400;
        const UncompressedIds = 0x0800;
    }
}

impl Flags {
    pub fn parse(input: &[u8]) -> nom::IResult<&[u8], Self> {
        let (input, bits) = nom::number::complete::le_u16(input)?;
        Ok((input, Self::from_bits_retain(bits)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Compression {
    Gzip = 1,
    Lzma = 2,
    Lzo = 3,
    Xz = 4,
    Lz4 = 5,
    Zstd = 6,
}

impl Compression {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::Gzip),
            2 => Some(Self::Lzma),
            3 => Some(Self::Lzo),
            4 => Some(Self::Xz),
            5 => Some(Self::Lz4),
            6 => Some(Self::Zstd),
            _ => None,
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gzip => "gzip",
            Self::Lzma => "lzma",
            Self::Lzo => "lzo",
            Self::Xz => "xz",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        };
        f.pad(name)
    }
}

/// Packed locator of an inode: the start of its metadata block, relative to
/// the inode table, in bits 16..48 and the offset inside the block's
/// uncompressed payload in bits 0..16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InodeRef(u64);

impl InodeRef {
    pub fn new(block: u32, offset: u16) -> Self {
        Self(((block as u64) << 16) | offset as u64)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn block(&self) -> u32 {
        ((self.0 >> 16) & 0xFFFF_FFFF) as u32
    }

    pub fn offset(&self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    pub fn parse(input: &[u8]) -> nom::IResult<&[u8], Self> {
        let (input, raw) = nom::number::complete::le_u64(input)?;
        Ok((input, Self(raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn superblock_bytes(block_size: u32, block_log: u16) -> Vec<u8> {
        let mut b = Vec::with_capacity(SUPERBLOCK_SIZE);
        b.extend_from_slice(&MAGIC.to_le_bytes());
        b.extend_from_slice(&7u32.to_le_bytes()); // inode count
        b.extend_from_slice(&1_700_000_000u32.to_le_bytes());
        b.extend_from_slice(&block_size.to_le_bytes());
        b.extend_from_slice(&3u32.to_le_bytes()); // fragments
        b.extend_from_slice(&4u16.to_le_bytes()); // xz
        b.extend_from_slice(&block_log.to_le_bytes());
        b.extend_from_slice(&0x00C1u16.to_le_bytes());
        b.extend_from_slice(&2u16.to_le_bytes()); // id count
        b.extend_from_slice(&4u16.to_le_bytes());
        b.extend_from_slice(&0u16.to_le_bytes());
        b.extend_from_slice(&InodeRef::new(0x2010, 0x1a0).raw().to_le_bytes());
        b.extend_from_slice(&0x1_0000u64.to_le_bytes()); // bytes used
        for start in [0x100u64, 0x200, 0x300, 0x400, 0x500, 0x600] {
            b.extend_from_slice(&start.to_le_bytes());
        }
        assert_eq!(b.len(), SUPERBLOCK_SIZE);
        b
    }

    #[test]
    fn decodes_every_field() {
        let sb = Superblock::parse(&superblock_bytes(131072, 17)).unwrap();

        assert_eq!(sb.magic(), MAGIC);
        assert_eq!(sb.inode_count(), 7);
        assert_eq!(sb.modification_time(), 1_700_000_000);
        assert_eq!(sb.block_size(), 131072);
        assert_eq!(sb.block_log(), 17);
        assert_eq!(sb.fragment_count(), 3);
        assert_eq!(sb.compression(), Some(Compression::Xz));
        assert_eq!(
            sb.flags(),
            Flags::UncompressedInodes | Flags::Duplicates | Flags::Exportable
        );
        assert_eq!(sb.id_count(), 2);
        assert_eq!(sb.version(), (4, 0));
        assert!(sb.is_supported_version());
        assert_eq!(sb.root_inode().block(), 0x2010);
        assert_eq!(sb.root_inode().offset(), 0x1a0);
        assert_eq!(sb.bytes_used(), 0x1_0000);
        assert_eq!(sb.id_table_start(), 0x100);
        assert_eq!(sb.xattr_table_start(), 0x200);
        assert_eq!(sb.inode_table_start(), 0x300);
        assert_eq!(sb.directory_table_start(), 0x400);
        assert_eq!(sb.fragment_table_start(), 0x500);
        assert_eq!(sb.export_table_start(), 0x600);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = superblock_bytes(131072, 17);
        bytes[0..4].copy_from_slice(b"sqsh");

        match Superblock::parse(&bytes) {
            Err(SquashfsError::BadMagic { found }) => {
                assert_eq!(found, u32::from_le_bytes(*b"sqsh"))
            }
            other => panic!("expected BadMagic, got {:?}", other),
        }
    }

    #[test]
    fn magic_is_checked_before_block_log() {
        let mut bytes = superblock_bytes(131072, 16);
        bytes[3] = 0;
        assert!(matches!(
            Superblock::parse(&bytes),
            Err(SquashfsError::BadMagic { .. })
        ));
    }

    #[test]
    fn rejects_inconsistent_block_log() {
        for stored in [16, 18] {
            match Superblock::parse(&superblock_bytes(131072, stored)) {
                Err(SquashfsError::InconsistentBlockSize {
                    block_size,
                    stored: s,
                    expected,
                }) => {
                    assert_eq!(block_size, 131072);
                    assert_eq!(s, stored);
                    assert_eq!(expected, 17);
                }
                other => panic!("expected InconsistentBlockSize, got {:?}", other),
            }
        }
    }

    #[test]
    fn log_of_non_power_of_two_truncates() {
        assert!(Superblock::parse(&superblock_bytes(4097, 12)).is_ok());
        assert!(Superblock::parse(&superblock_bytes(0, 0)).is_err());
    }

    #[test]
    fn short_buffer_is_a_truncated_read() {
        let bytes = superblock_bytes(4096, 12);
        assert!(matches!(
            Superblock::parse(&bytes[..40]),
            Err(SquashfsError::TruncatedRead {
                expected: 96,
                actual: 40,
                ..
            })
        ));
    }

    #[test]
    fn decoding_is_idempotent() {
        let bytes = superblock_bytes(4096, 12);
        assert_eq!(
            Superblock::parse(&bytes).unwrap(),
            Superblock::parse(&bytes).unwrap()
        );
    }

    #[test]
    fn inode_ref_packs_block_and_offset() {
        let r = InodeRef::new(0xDEAD_BEEF, 0x1234);
        assert_eq!(r.raw(), 0x0000_DEAD_BEEF_1234);
        assert_eq!(InodeRef::from_raw(r.raw()), r);
        assert_eq!(r.block(), 0xDEAD_BEEF);
        assert_eq!(r.offset(), 0x1234);
    }

    #[test]
    fn unknown_flag_bits_are_kept() {
        let flags = Flags::from_bits_retain(0x8001);
        assert!(flags.contains(Flags::UncompressedInodes));
        assert_eq!(flags.bits(), 0x8001);
    }
}
