use blockdev::{Block, BLOCK_SIZE};

use crate::layout::{FAT_EOC, FAT_FREE};
use crate::{FsError, Result, FAT_ENTRIES_PER_BLOCK};

/// Data block 0 can never be a successor (its index would read as "free"),
/// so it is reserved at format time and never handed out.
pub const RESERVED_BLOCK: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Free,
    End,
    Next(u16),
}

impl From<u16> for Link {
    fn from(raw: u16) -> Self {
        match raw {
            FAT_FREE => Link::Free,
            FAT_EOC => Link::End,
            next => Link::Next(next),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fat {
    entries: Vec<u16>,
    free: usize,
}

impl Fat {
    pub fn new(data_blocks: u16) -> Self {
        let mut entries = vec![FAT_FREE; data_blocks as usize];
        if let Some(first) = entries.first_mut() {
            *first = FAT_EOC;
        }
        Self::from_entries(entries)
    }

    pub fn decode(blocks: &[Block], data_blocks: u16) -> Result<Self> {
        let capacity = blocks.len() * FAT_ENTRIES_PER_BLOCK;
        if capacity < data_blocks as usize {
            return Err(FsError::InvalidVolume(format!(
                "{} FAT blocks hold {} entries, need {}",
                blocks.len(),
                capacity,
                data_blocks
            )));
        }

        let entries: Vec<u16> = blocks
            .iter()
            .flat_map(|block| block.chunks_exact(2))
            .take(data_blocks as usize)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        let fat = Self::from_entries(entries);
        for (index, &raw) in fat.entries.iter().enumerate() {
            if let Link::Next(next) = Link::from(raw) {
                if next as usize >= fat.entries.len() {
                    return Err(FsError::InvalidVolume(format!(
                        "FAT entry {} links to block {} beyond {} data blocks",
                        index,
                        next,
                        fat.entries.len()
                    )));
                }
            }
        }
        Ok(fat)
    }

    /// Encode FAT block `index`; entries past the table are written as zero.
    pub fn encode_block(&self, index: usize) -> Block {
        let mut block = [0u8; BLOCK_SIZE];
        let start = index * FAT_ENTRIES_PER_BLOCK;
        let end = (start + FAT_ENTRIES_PER_BLOCK).min(self.entries.len());
        if start < end {
            for (raw, out) in self.entries[start..end]
                .iter()
                .zip(block.chunks_exact_mut(2))
            {
                out.copy_from_slice(&raw.to_le_bytes());
            }
        }
        block
    }

    fn from_entries(entries: Vec<u16>) -> Self {
        let mut fat = Self { entries, free: 0 };
        fat.free = fat.count_free_blocks();
        fat
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn link(&self, block: u16) -> Link {
        Link::from(self.entries[block as usize])
    }

    pub fn free_blocks(&self) -> usize {
        self.free
    }

    /// First-fit: the lowest-indexed free block, or `None` when full.
    pub fn find_free_block(&self) -> Option<u16> {
        self.entries
            .iter()
            .enumerate()
            .skip(RESERVED_BLOCK as usize + 1)
            .find(|(_, &raw)| raw == FAT_FREE)
            .map(|(index, _)| index as u16)
    }

    pub fn count_free_blocks(&self) -> usize {
        self.entries
            .iter()
            .skip(RESERVED_BLOCK as usize + 1)
            .filter(|&&raw| raw == FAT_FREE)
            .count()
    }

    pub fn next(&self, block: u16) -> Result<Option<u16>> {
        let raw = self.entries.get(block as usize).copied().ok_or_else(|| {
            FsError::InvalidVolume(format!(
                "chain reaches block {} beyond {} data blocks",
                block,
                self.entries.len()
            ))
        })?;
        match Link::from(raw) {
            Link::End => Ok(None),
            Link::Next(next) => Ok(Some(next)),
            Link::Free => Err(FsError::InvalidVolume(format!(
                "chain runs into free block {}",
                block
            ))),
        }
    }

    pub fn chain(&self, first: Option<u16>) -> Chain<'_> {
        Chain {
            fat: self,
            cursor: first,
            steps: 0,
        }
    }

    /// Block holding byte `offset` of the chain starting at `first`, or
    /// `None` when the chain is shorter than that.
    pub fn block_at_offset(&self, first: Option<u16>, offset: u64) -> Result<Option<u16>> {
        let hops = offset / BLOCK_SIZE as u64;
        let mut chain = self.chain(first);
        let mut current = chain.next().transpose()?;
        for _ in 0..hops {
            if current.is_none() {
                break;
            }
            current = chain.next().transpose()?;
        }
        Ok(current)
    }

    pub fn chain_tail(&self, first: u16) -> Result<u16> {
        let mut tail = first;
        for block in self.chain(Some(first)) {
            tail = block?;
        }
        Ok(tail)
    }

    pub fn chain_len(&self, first: Option<u16>) -> Result<usize> {
        self.chain(first).try_fold(0, |len, block| block.map(|_| len + 1))
    }

    // New end of chain, linked after `tail` when given.
    pub fn allocate_after(&mut self, tail: Option<u16>) -> Option<u16> {
        let block = self.find_free_block()?;
        if let Some(tail) = tail {
            self.entries[tail as usize] = block;
        }
        self.entries[block as usize] = FAT_EOC;
        self.free -= 1;
        tracing::debug!("Allocated data block {} after {:?}", block, tail);
        Some(block)
    }

    pub fn free_chain(&mut self, first: Option<u16>) -> Result<usize> {
        let blocks = self.chain(first).collect::<Result<Vec<_>>>()?;
        if blocks.contains(&RESERVED_BLOCK) {
            return Err(FsError::InvalidVolume(format!(
                "chain includes reserved block {}",
                RESERVED_BLOCK
            )));
        }
        for &block in &blocks {
            self.entries[block as usize] = FAT_FREE;
        }
        self.free += blocks.len();
        Ok(blocks.len())
    }
}

/// Walks a chain; yields an error instead of looping forever on a cycle.
pub struct Chain<'a> {
    fat: &'a Fat,
    cursor: Option<u16>,
    steps: usize,
}

impl Iterator for Chain<'_> {
    type Item = Result<u16>;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.cursor?;
        if self.steps >= self.fat.len() {
            self.cursor = None;
            return Some(Err(FsError::InvalidVolume(format!(
                "chain through block {} does not terminate",
                block
            ))));
        }
        self.steps += 1;
        match self.fat.next(block) {
            Ok(next) => {
                self.cursor = next;
                Some(Ok(block))
            }
            Err(err) => {
                self.cursor = None;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_of(fat: &Fat, first: u16) -> Vec<u16> {
        fat.chain(Some(first)).collect::<Result<Vec<_>>>().unwrap()
    }

    #[test]
    fn test_fresh_table() {
        let fat = Fat::new(10);
        assert_eq!(fat.len(), 10);
        assert_eq!(fat.link(0), Link::End);
        assert_eq!(fat.free_blocks(), 9);
        assert_eq!(fat.count_free_blocks(), 9);
        assert_eq!(fat.find_free_block(), Some(1));
    }

    #[test]
    fn test_allocation_is_first_fit() {
        let mut fat = Fat::new(8);
        let a = fat.allocate_after(None).unwrap();
        let b = fat.allocate_after(Some(a)).unwrap();
        let c = fat.allocate_after(None).unwrap();
        assert_eq!((a, b, c), (1, 2, 3));

        fat.free_chain(Some(a)).unwrap();
        assert_eq!(fat.find_free_block(), Some(1));
        assert_eq!(fat.free_blocks(), 6);

        let d = fat.allocate_after(Some(c)).unwrap();
        assert_eq!(d, 1);
        assert_eq!(chain_of(&fat, c), vec![3, 1]);
    }

    #[test]
    fn test_full_volume() {
        let mut fat = Fat::new(3);
        let a = fat.allocate_after(None).unwrap();
        fat.allocate_after(Some(a)).unwrap();
        assert_eq!(fat.free_blocks(), 0);
        assert_eq!(fat.allocate_after(Some(a)), None);
        assert_eq!(fat.find_free_block(), None);
    }

    #[test]
    fn test_block_at_offset() {
        let mut fat = Fat::new(8);
        let a = fat.allocate_after(None).unwrap();
        let b = fat.allocate_after(Some(a)).unwrap();
        let c = fat.allocate_after(Some(b)).unwrap();
        let bs = BLOCK_SIZE as u64;

        assert_eq!(fat.block_at_offset(Some(a), 0).unwrap(), Some(a));
        assert_eq!(fat.block_at_offset(Some(a), bs - 1).unwrap(), Some(a));
        assert_eq!(fat.block_at_offset(Some(a), bs).unwrap(), Some(b));
        assert_eq!(fat.block_at_offset(Some(a), 2 * bs + 10).unwrap(), Some(c));
        assert_eq!(fat.block_at_offset(Some(a), 3 * bs).unwrap(), None);
        assert_eq!(fat.block_at_offset(None, 0).unwrap(), None);

        assert_eq!(fat.chain_tail(a).unwrap(), c);
        assert_eq!(fat.chain_len(Some(a)).unwrap(), 3);
        assert_eq!(fat.chain_len(None).unwrap(), 0);
    }

    #[test]
    fn test_cycle_is_detected() {
        let mut fat = Fat::new(4);
        let a = fat.allocate_after(None).unwrap();
        let b = fat.allocate_after(Some(a)).unwrap();
        fat.entries[b as usize] = a;

        assert!(matches!(fat.chain_len(Some(a)), Err(FsError::InvalidVolume(_))));
        assert!(matches!(fat.chain_tail(a), Err(FsError::InvalidVolume(_))));
    }

    #[test]
    fn test_chain_into_free_block_is_detected() {
        let mut fat = Fat::new(4);
        let a = fat.allocate_after(None).unwrap();
        fat.entries[a as usize] = 3;
        assert!(matches!(fat.chain_len(Some(a)), Err(FsError::InvalidVolume(_))));
    }

    #[test]
    fn test_encode_decode_blocks() {
        let mut fat = Fat::new(3000);
        let a = fat.allocate_after(None).unwrap();
        fat.entries[2999] = FAT_EOC;
        fat.entries[a as usize] = 2999;

        let blocks = vec![fat.encode_block(0), fat.encode_block(1)];
        assert_eq!(u16::from_le_bytes([blocks[0][0], blocks[0][1]]), FAT_EOC);
        assert_eq!(u16::from_le_bytes([blocks[0][2], blocks[0][3]]), 2999);
        // entries past the table stay zero
        let tail = (3000 - FAT_ENTRIES_PER_BLOCK) * 2;
        assert!(blocks[1][tail..].iter().all(|&b| b == 0));

        let decoded = Fat::decode(&blocks, 3000).unwrap();
        assert_eq!(chain_of(&decoded, a), vec![1, 2999]);
        assert_eq!(decoded.free_blocks(), 2997);
    }

    #[test]
    fn test_free_chain_refuses_reserved_block() {
        let mut fat = Fat::new(8);
        let a = fat.allocate_after(None).unwrap();
        fat.entries[a as usize] = RESERVED_BLOCK;

        assert!(matches!(fat.free_chain(Some(a)), Err(FsError::InvalidVolume(_))));
        assert!(matches!(
            fat.free_chain(Some(RESERVED_BLOCK)),
            Err(FsError::InvalidVolume(_))
        ));
        assert_eq!(fat.free_blocks(), fat.count_free_blocks());
        assert_eq!(fat.link(RESERVED_BLOCK), Link::End);
    }

    #[test]
    fn test_decode_rejects_dangling_link() {
        let mut block = [0u8; BLOCK_SIZE];
        block[2..4].copy_from_slice(&50u16.to_le_bytes());
        assert!(matches!(Fat::decode(&[block], 10), Err(FsError::InvalidVolume(_))));
    }

    proptest::proptest! {
        #[test]
        fn test_free_count_tracks_table(ops in proptest::collection::vec(0u8..3, 1..200)) {
            let mut fat = Fat::new(64);
            let mut heads: Vec<u16> = Vec::new();
            for op in ops {
                match op {
                    0 => {
                        if let Some(block) = fat.allocate_after(None) {
                            heads.push(block);
                        }
                    }
                    1 => {
                        if let Some(&head) = heads.last() {
                            let tail = fat.chain_tail(head).unwrap();
                            fat.allocate_after(Some(tail));
                        }
                    }
                    _ => {
                        if let Some(head) = heads.pop() {
                            fat.free_chain(Some(head)).unwrap();
                        }
                    }
                }
                proptest::prop_assert_eq!(fat.free_blocks(), fat.count_free_blocks());
                let used: usize = heads.iter().map(|&h| fat.chain_len(Some(h)).unwrap()).sum();
                proptest::prop_assert_eq!(used + fat.free_blocks() + 1, fat.len());
            }
        }
    }
}
