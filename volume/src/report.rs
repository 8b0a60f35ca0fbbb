use std::fmt;

use serde::Serialize;

use crate::layout::FAT_EOC;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeInfo {
    pub total_blocks: u16,
    pub fat_blocks: u8,
    pub root_index: u16,
    pub data_start: u16,
    pub data_blocks: u16,
    pub free_data_blocks: usize,
    pub directory_capacity: usize,
    pub free_directory_entries: usize,
}

impl fmt::Display for VolumeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "FS Info:")?;
        writeln!(f, "total_blk_count={}", self.total_blocks)?;
        writeln!(f, "fat_blk_count={}", self.fat_blocks)?;
        writeln!(f, "rdir_blk={}", self.root_index)?;
        writeln!(f, "data_blk={}", self.data_start)?;
        writeln!(f, "data_blk_count={}", self.data_blocks)?;
        writeln!(f, "fat_free_ratio={}/{}", self.free_data_blocks, self.data_blocks)?;
        write!(
            f,
            "rdir_free_ratio={}/{}",
            self.free_directory_entries, self.directory_capacity
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u32,
    pub first_block: Option<u16>,
}

impl fmt::Display for FileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "file: {}, size: {}, data_blk: {}",
            self.name,
            self.size,
            self.first_block.unwrap_or(FAT_EOC)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChain {
    pub name: String,
    pub size: u32,
    pub blocks: Vec<u16>,
}

/// Result of walking every chain on a mounted volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub data_blocks: usize,
    pub free_blocks: usize,
    pub used_blocks: usize,
    /// Allocated blocks that no directory entry reaches.
    pub orphaned_blocks: Vec<u16>,
    pub files: Vec<FileChain>,
}

impl ChainReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned_blocks.is_empty()
    }
}

impl fmt::Display for ChainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for file in &self.files {
            writeln!(f, "{}: {} bytes in {} blocks", file.name, file.size, file.blocks.len())?;
        }
        write!(
            f,
            "blocks: {} used, {} free, {} orphaned of {}",
            self.used_blocks,
            self.free_blocks,
            self.orphaned_blocks.len(),
            self.data_blocks
        )
    }
}
