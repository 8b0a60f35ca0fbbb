//! On-disk structures.
//!
//! ```text
//! block 0                   superblock
//! blocks 1..=fat_blocks     FAT, 2048 little-endian u16 entries per block
//! block root_index          root directory, 128 entries of 32 bytes
//! blocks data_start..       file contents
//! ```
//!
//! Fixed-width records are encoded with bincode's legacy configuration
//! (little-endian, fixed-size integers, no length prefix for arrays), which
//! produces exactly the packed layout above.

use blockdev::{Block, BLOCK_SIZE};
use serde::{Deserialize, Serialize};

use crate::{FsError, Result, FAT_ENTRIES_PER_BLOCK, FILE_MAX_COUNT};

pub const SIGNATURE: [u8; 8] = *b"ECS150FS";

pub const DIR_ENTRY_SIZE: usize = 32;

/// Width of the NUL-padded name field, terminator included.
pub const NAME_FIELD_LEN: usize = 16;

pub const FAT_EOC: u16 = 0xFFFF;
pub const FAT_FREE: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperBlock {
    pub signature: [u8; 8],
    pub total_blocks: u16,
    pub root_index: u16,
    pub data_start: u16,
    pub data_blocks: u16,
    pub fat_blocks: u8,
}

impl SuperBlock {
    /// Lay out a volume of `total_blocks` blocks, giving the FAT as few
    /// blocks as can index every remaining data block.
    pub fn for_store(total_blocks: u32) -> Result<Self> {
        if total_blocks < 4 {
            return Err(FsError::InvalidVolume(format!(
                "{} blocks cannot hold a superblock, FAT, directory and data",
                total_blocks
            )));
        }
        let total = u16::try_from(total_blocks).map_err(|_| {
            FsError::InvalidVolume(format!(
                "{} blocks exceeds the 16-bit block count",
                total_blocks
            ))
        })?;

        let mut fat_blocks: u16 = 1;
        loop {
            let data_blocks = total - 2 - fat_blocks;
            if fat_blocks as usize * FAT_ENTRIES_PER_BLOCK >= data_blocks as usize {
                let fat_blocks = u8::try_from(fat_blocks).map_err(|_| {
                    FsError::InvalidVolume("FAT does not fit in 255 blocks".to_string())
                })?;
                let root_index = fat_blocks as u16 + 1;
                return Ok(Self {
                    signature: SIGNATURE,
                    total_blocks: total,
                    root_index,
                    data_start: root_index + 1,
                    data_blocks,
                    fat_blocks,
                });
            }
            fat_blocks += 1;
        }
    }

    pub fn decode(block: &Block) -> Result<Self> {
        Ok(bincode::deserialize(&block[..])?)
    }

    pub fn encode(&self) -> Result<Block> {
        let mut block = [0u8; BLOCK_SIZE];
        bincode::serialize_into(&mut block[..], self)?;
        Ok(block)
    }

    /// Check the signature and that the regions tile the store exactly.
    pub fn validate(&self, store_blocks: u32) -> Result<()> {
        if self.signature != SIGNATURE {
            return Err(FsError::InvalidVolume(format!(
                "bad signature {:?}",
                String::from_utf8_lossy(&self.signature)
            )));
        }
        if self.fat_blocks == 0 || self.root_index != self.fat_blocks as u16 + 1 {
            return Err(FsError::InvalidVolume(format!(
                "root directory at block {} does not follow {} FAT blocks",
                self.root_index, self.fat_blocks
            )));
        }
        if self.data_start != self.root_index + 1 {
            return Err(FsError::InvalidVolume(format!(
                "data region starts at {}, expected {}",
                self.data_start,
                self.root_index + 1
            )));
        }
        if self.data_start as u32 + self.data_blocks as u32 != self.total_blocks as u32 {
            return Err(FsError::InvalidVolume(format!(
                "{} data blocks from block {} do not end at block count {}",
                self.data_blocks, self.data_start, self.total_blocks
            )));
        }
        if self.total_blocks as u32 != store_blocks {
            return Err(FsError::InvalidVolume(format!(
                "superblock describes {} blocks, store has {}",
                self.total_blocks, store_blocks
            )));
        }
        if (self.fat_blocks as usize) * FAT_ENTRIES_PER_BLOCK < self.data_blocks as usize {
            return Err(FsError::InvalidVolume(format!(
                "{} FAT blocks cannot index {} data blocks",
                self.fat_blocks, self.data_blocks
            )));
        }
        Ok(())
    }

    pub fn data_block(&self, block: u16) -> u32 {
        self.data_start as u32 + block as u32
    }
}

/// Directory record exactly as stored; an all-NUL name marks a free slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDirEntry {
    pub name: [u8; NAME_FIELD_LEN],
    pub size: u32,
    pub first_block: u16,
    pub padding: [u8; 10],
}

impl RawDirEntry {
    pub const EMPTY: RawDirEntry = RawDirEntry {
        name: [0; NAME_FIELD_LEN],
        size: 0,
        first_block: FAT_EOC,
        padding: [0; 10],
    };

    pub fn is_free(&self) -> bool {
        self.name[0] == 0
    }

    pub fn name_bytes(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_FIELD_LEN);
        &self.name[..len]
    }
}

pub fn decode_directory(block: &Block) -> Result<Vec<RawDirEntry>> {
    block
        .chunks_exact(DIR_ENTRY_SIZE)
        .take(FILE_MAX_COUNT)
        .map(|chunk| bincode::deserialize(chunk).map_err(FsError::from))
        .collect()
}

pub fn encode_directory(entries: &[RawDirEntry]) -> Result<Block> {
    let mut block = [0u8; BLOCK_SIZE];
    for (entry, chunk) in entries
        .iter()
        .zip(block.chunks_exact_mut(DIR_ENTRY_SIZE))
    {
        bincode::serialize_into(chunk, entry)?;
    }
    Ok(block)
}
