use std::io::{Read, Seek, SeekFrom};

use log::{debug, trace};

use crate::squashfs::{METADATA_HEADER_SIZE, METADATA_SIZE, Result, SquashfsError};

/// Pluggable decompression of metadata block payloads.
///
/// The crate ships no implementation. Without one, every compressed block
/// fails with [`SquashfsError::UnsupportedCompression`].
pub trait Decompressor {
    /// Inflate `compressed`, producing at most `max_output` bytes.
    fn decompress(&self, compressed: &[u8], max_output: usize) -> std::io::Result<Vec<u8>>;
}

/// One physical metadata block, already uncompressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataBlock {
    pub location: u64,
    /// Header plus stored payload, i.e. the distance to the next block.
    pub consumed: u64,
    pub payload: Vec<u8>,
}

impl MetadataBlock {
    const UNCOMPRESSED: u16 = 0x8000;
    const SIZE_MASK: u16 = 0x7FFF;
}

/// Reads metadata blocks and logical spans of the metadata stream out of an
/// image. Borrowed per operation from the owning volume.
pub struct MetadataReader<'a, R: Read + Seek> {
    reader: &'a mut R,
    decompressor: Option<&'a dyn Decompressor>,
}

impl<'a, R: Read + Seek> MetadataReader<'a, R> {
    pub fn new(reader: &'a mut R) -> Self {
        Self {
            reader,
            decompressor: None,
        }
    }

    pub fn with_decompressor(mut self, decompressor: Option<&'a dyn Decompressor>) -> Self {
        self.decompressor = decompressor;
        self
    }

    /// Read exactly `len` bytes at `location`, reporting short reads with
    /// their position instead of a bare EOF.
    pub fn read_exact_at(&mut self, location: u64, len: usize) -> Result<Vec<u8>> {
        self.reader.seek(SeekFrom::Start(location))?;

        let mut buffer = Vec::with_capacity(len);
        Read::take(&mut *self.reader, len as u64).read_to_end(&mut buffer)?;

        if buffer.len() != len {
            return Err(SquashfsError::TruncatedRead {
                location,
                expected: len,
                actual: buffer.len(),
            });
        }

        Ok(buffer)
    }

    /// Read the metadata block whose 2 byte header sits at `location`.
    pub fn read_block(&mut self, location: u64) -> Result<MetadataBlock> {
        let header = self.read_exact_at(location, METADATA_HEADER_SIZE)?;
        let header = u16::from_le_bytes([header[0], header[1]]);

        let size = (header & MetadataBlock::SIZE_MASK) as usize;
        let compressed = header & MetadataBlock::UNCOMPRESSED == 0;
        trace!(
            "metadata block at {:#x}: {} stored bytes, compressed: {}",
            location, size, compressed
        );

        let decompressor = match (compressed, self.decompressor) {
            (true, None) => return Err(SquashfsError::UnsupportedCompression { location }),
            (true, Some(decompressor)) => Some(decompressor),
            (false, _) => None,
        };

        let payload_location = location.saturating_add(METADATA_HEADER_SIZE as u64);
        let stored = self.read_exact_at(payload_location, size)?;
        let payload = match decompressor {
            Some(decompressor) => decompressor.decompress(&stored, METADATA_SIZE)?,
            None => stored,
        };
        if payload.len() > METADATA_SIZE {
            return Err(SquashfsError::OversizedBlock {
                location,
                size: payload.len(),
            });
        }

        Ok(MetadataBlock {
            location,
            consumed: (METADATA_HEADER_SIZE + size) as u64,
            payload,
        })
    }

    /// Read `length` bytes of the logical metadata stream.
    ///
    /// The first block's header is at `table_start + block_start`; the span
    /// begins `inner_offset` bytes into that block's payload and continues
    /// through as many following blocks as needed.
    pub fn read(
        &mut self,
        table_start: u64,
        block_start: u64,
        inner_offset: usize,
        length: usize,
    ) -> Result<Vec<u8>> {
        let mut cursor = MetadataCursor::new(block_start, inner_offset);
        self.read_from(table_start, &mut cursor, length)
    }

    /// Like [`MetadataReader::read`], but continues from `cursor` and leaves
    /// it just past the last byte returned.
    pub fn read_from(
        &mut self,
        table_start: u64,
        cursor: &mut MetadataCursor,
        length: usize,
    ) -> Result<Vec<u8>> {
        // `length` comes from the image; grow as blocks arrive.
        let mut data = Vec::with_capacity(length.min(METADATA_SIZE));
        if length == 0 {
            return Ok(data);
        }

        let location = table_start.saturating_add(cursor.block);
        debug!(
            "reading {} metadata bytes at {:#x}+{:#x}",
            length, location, cursor.offset
        );

        let mut block = self.read_block(location)?;
        if cursor.offset > block.payload.len() {
            return Err(SquashfsError::OffsetOutsideBlock {
                location,
                offset: cursor.offset,
                size: block.payload.len(),
            });
        }

        loop {
            let wanted = length - data.len();
            let available = &block.payload[cursor.offset..];
            if available.len() >= wanted {
                data.extend_from_slice(&available[..wanted]);
                cursor.offset += wanted;
                return Ok(data);
            }

            data.extend_from_slice(available);
            cursor.block = cursor.block.saturating_add(block.consumed);
            cursor.offset = 0;
            block = self.read_block(table_start.saturating_add(cursor.block))?;
        }
    }
}

/// A position in a metadata table: the block header's offset relative to
/// the table start, and an offset into that block's uncompressed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetadataCursor {
    pub block: u64,
    pub offset: usize,
}

impl MetadataCursor {
    pub fn new(block: u64, offset: usize) -> Self {
        Self { block, offset }
    }
}
