use std::collections::HashSet;
use std::io;

use crate::{check_range, Block, BlockStore, Result, BLOCK_SIZE};

/// In-memory block store. Individual blocks can be marked as failing to
/// simulate device errors.
#[derive(Debug, Clone)]
pub struct MemDisk {
    blocks: Vec<Block>,
    faulty: HashSet<u32>,
}

impl MemDisk {
    pub fn new(block_count: u32) -> Self {
        Self {
            blocks: vec![[0u8; BLOCK_SIZE]; block_count as usize],
            faulty: HashSet::new(),
        }
    }

    /// Every subsequent read or write of `index` fails with an I/O error.
    pub fn fail_block(&mut self, index: u32) {
        self.faulty.insert(index);
    }

    pub fn heal_block(&mut self, index: u32) {
        self.faulty.remove(&index);
    }

    /// Raw view of a block, bypassing fault injection.
    pub fn block(&self, index: u32) -> &Block {
        &self.blocks[index as usize]
    }

    fn check(&self, index: u32) -> Result<()> {
        check_range(index, self.block_count())?;
        if self.faulty.contains(&index) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("injected fault on block {}", index),
            )
            .into());
        }
        Ok(())
    }
}

impl BlockStore for MemDisk {
    fn block_count(&self) -> u32 {
        self.blocks.len() as u32
    }

    fn read_block(&mut self, index: u32, buf: &mut Block) -> Result<()> {
        self.check(index)?;
        buf.copy_from_slice(&self.blocks[index as usize]);
        Ok(())
    }

    fn write_block(&mut self, index: u32, buf: &Block) -> Result<()> {
        self.check(index)?;
        self.blocks[index as usize].copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BlockError;

    #[test]
    fn test_fault_injection() {
        let mut disk = MemDisk::new(3);
        let block = [7u8; BLOCK_SIZE];
        disk.write_block(1, &block).unwrap();

        disk.fail_block(1);
        let mut out = [0u8; BLOCK_SIZE];
        assert!(matches!(disk.read_block(1, &mut out), Err(BlockError::Io(_))));
        assert!(matches!(disk.write_block(1, &out), Err(BlockError::Io(_))));
        assert_eq!(disk.block(1)[0], 7);

        disk.heal_block(1);
        disk.read_block(1, &mut out).unwrap();
        assert_eq!(out, block);
    }
}
