#![allow(dead_code)]

//! Builds small uncompressed squashfs images in memory.

use std::io::Cursor;

pub const MAGIC: u32 = 0x7371_7368;
pub const SUPERBLOCK_SIZE: usize = 96;

pub enum Node {
    File(&'static str),
    Symlink(&'static str),
    Dir(&'static str, Vec<Node>),
}

pub fn file(name: &'static str) -> Node {
    Node::File(name)
}

pub fn dir(name: &'static str, children: Vec<Node>) -> Node {
    Node::Dir(name, children)
}

/// A metadata stream before it is cut into blocks.
#[derive(Default)]
struct Stream {
    bytes: Vec<u8>,
}

impl Stream {
    fn position(&self) -> usize {
        self.bytes.len()
    }
}

pub struct ImageBuilder {
    /// Payload bytes per metadata block; real images use 8192.
    pub block_capacity: usize,
    pub extended_directories: bool,
    /// Store directory sizes without the 3 bytes mksquashfs adds for "." and "..".
    pub exact_directory_sizes: bool,
    /// When set, metadata blocks are stored "compressed" with this transform.
    pub compress: Option<fn(&[u8]) -> Vec<u8>>,
    pub block_size: u32,
    pub block_log: u16,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self {
            block_capacity: 8192,
            extended_directories: false,
            exact_directory_sizes: false,
            compress: None,
            block_size: 131072,
            block_log: 17,
        }
    }
}

struct Written {
    position: usize,
    number: u32,
    basic_type: u16,
}

pub struct Image {
    pub bytes: Vec<u8>,
    pub inode_table_start: u64,
    pub directory_table_start: u64,
    pub inode_count: u32,
}

impl Image {
    pub fn cursor(&self) -> Cursor<Vec<u8>> {
        Cursor::new(self.bytes.clone())
    }
}

impl ImageBuilder {
    pub fn build(&self, root: &Node) -> Image {
        let mut inodes = Stream::default();
        let mut listings = Stream::default();
        let mut next_number = 1;

        let root = self.write_node(root, &mut inodes, &mut listings, &mut next_number);
        let (root_block, root_offset) = self.locate(root.position);

        let inode_table = self.blocks(&inodes.bytes);
        let directory_table = self.blocks(&listings.bytes);

        let inode_table_start = SUPERBLOCK_SIZE as u64;
        let directory_table_start = inode_table_start + inode_table.len() as u64;
        let end = directory_table_start + directory_table.len() as u64;

        let mut bytes = superblock(
            self.block_size,
            self.block_log,
            next_number - 1,
            ((root_block as u64) << 16) | root_offset as u64,
            [end, end, inode_table_start, directory_table_start, end, end],
        );
        bytes.extend(inode_table);
        bytes.extend(directory_table);

        Image {
            bytes,
            inode_table_start,
            directory_table_start,
            inode_count: next_number - 1,
        }
    }

    /// Block start (relative to its table) and inner offset of a stream position.
    pub fn locate(&self, position: usize) -> (u32, u16) {
        let index = position / self.block_capacity;
        let block = index * (self.block_capacity + 2);
        (block as u32, (position % self.block_capacity) as u16)
    }

    fn blocks(&self, stream: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in stream.chunks(self.block_capacity) {
            match self.compress {
                Some(compress) => {
                    let stored = compress(chunk);
                    assert_eq!(stored.len(), chunk.len(), "transform must keep the length");
                    out.extend_from_slice(&(stored.len() as u16).to_le_bytes());
                    out.extend(stored);
                }
                None => {
                    out.extend_from_slice(&(chunk.len() as u16 | 0x8000).to_le_bytes());
                    out.extend_from_slice(chunk);
                }
            }
        }
        out
    }

    fn write_node(
        &self,
        node: &Node,
        inodes: &mut Stream,
        listings: &mut Stream,
        next_number: &mut u32,
    ) -> Written {
        match node {
            Node::File(_) => {
                let number = take(next_number);
                let position = inodes.position();
                inodes.bytes.extend(inode_header(2, number));
                inodes.bytes.extend([0u8; 16]);
                Written {
                    position,
                    number,
                    basic_type: 2,
                }
            }
            Node::Symlink(_) => {
                let number = take(next_number);
                let position = inodes.position();
                inodes.bytes.extend(inode_header(3, number));
                inodes.bytes.extend(1u32.to_le_bytes()); // link count
                inodes.bytes.extend(1u32.to_le_bytes());
                inodes.bytes.push(b'x');
                Written {
                    position,
                    number,
                    basic_type: 3,
                }
            }
            Node::Dir(_, children) => {
                let written: Vec<(&str, Written)> = children
                    .iter()
                    .map(|child| {
                        (
                            name_of(child),
                            self.write_node(child, inodes, listings, next_number),
                        )
                    })
                    .collect();

                let listing_position = listings.position();
                let listing = self.listing(&written);
                listings.bytes.extend(&listing);
                let (dir_block, dir_offset) = self.locate(listing_position);
                let bias = if self.exact_directory_sizes { 0 } else { 3 };
                let file_size = listing.len() as u32 + bias;

                let number = take(next_number);
                let position = inodes.position();
                if self.extended_directories {
                    inodes.bytes.extend(inode_header(8, number));
                    inodes.bytes.extend(2u32.to_le_bytes());
                    inodes.bytes.extend(file_size.to_le_bytes());
                    inodes.bytes.extend(dir_block.to_le_bytes());
                    inodes.bytes.extend(0u32.to_le_bytes());
                    inodes.bytes.extend(0u16.to_le_bytes());
                    inodes.bytes.extend(dir_offset.to_le_bytes());
                    inodes.bytes.extend(u32::MAX.to_le_bytes());
                } else {
                    inodes.bytes.extend(inode_header(1, number));
                    inodes.bytes.extend(dir_block.to_le_bytes());
                    inodes.bytes.extend(2u32.to_le_bytes());
                    inodes.bytes.extend((file_size as u16).to_le_bytes());
                    inodes.bytes.extend(dir_offset.to_le_bytes());
                    inodes.bytes.extend(0u32.to_le_bytes());
                }

                Written {
                    position,
                    number,
                    basic_type: 1,
                }
            }
        }
    }

    /// One header per run of children sharing an inode block, at most 256 each.
    fn listing(&self, children: &[(&str, Written)]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut index = 0;
        while index < children.len() {
            let (block, _) = self.locate(children[index].1.position);
            let run: Vec<_> = children[index..]
                .iter()
                .take_while(|(_, w)| self.locate(w.position).0 == block)
                .take(256)
                .collect();

            let base = run[0].1.number;
            out.extend((run.len() as u32 - 1).to_le_bytes());
            out.extend(block.to_le_bytes());
            out.extend(base.to_le_bytes());
            for (name, w) in &run {
                let (_, offset) = self.locate(w.position);
                out.extend(offset.to_le_bytes());
                out.extend(((w.number as i64 - base as i64) as i16).to_le_bytes());
                out.extend(w.basic_type.to_le_bytes());
                out.extend((name.len() as u16 - 1).to_le_bytes());
                out.extend(name.as_bytes());
            }
            index += run.len();
        }
        out
    }
}

fn take(next_number: &mut u32) -> u32 {
    let number = *next_number;
    *next_number += 1;
    number
}

fn name_of(node: &Node) -> &'static str {
    match node {
        Node::File(name) | Node::Symlink(name) | Node::Dir(name, _) => *name,
    }
}

fn inode_header(inode_type: u16, number: u32) -> Vec<u8> {
    let mut b = inode_type.to_le_bytes().to_vec();
    b.extend(0o755u16.to_le_bytes());
    b.extend(0u16.to_le_bytes());
    b.extend(0u16.to_le_bytes());
    b.extend(1_650_000_000u32.to_le_bytes());
    b.extend(number.to_le_bytes());
    b
}

pub fn superblock(
    block_size: u32,
    block_log: u16,
    inode_count: u32,
    root: u64,
    tables: [u64; 6],
) -> Vec<u8> {
    let mut b = Vec::with_capacity(SUPERBLOCK_SIZE);
    b.extend(MAGIC.to_le_bytes());
    b.extend(inode_count.to_le_bytes());
    b.extend(1_650_000_000u32.to_le_bytes());
    b.extend(block_size.to_le_bytes());
    b.extend(0u32.to_le_bytes());
    b.extend(1u16.to_le_bytes()); // gzip
    b.extend(block_log.to_le_bytes());
    b.extend(0x0001u16.to_le_bytes());
    b.extend(1u16.to_le_bytes());
    b.extend(4u16.to_le_bytes());
    b.extend(0u16.to_le_bytes());
    b.extend(root.to_le_bytes());
    b.extend(tables[5].to_le_bytes()); // bytes used
    for start in tables {
        b.extend(start.to_le_bytes());
    }
    assert_eq!(b.len(), SUPERBLOCK_SIZE);
    b
}
