//! Byte-range transfers over block chains.
//!
//! Each call stages partial blocks through one block-sized scratch buffer
//! that lives only for the duration of the call.

use blockdev::{Block, BlockStore, BLOCK_SIZE};
use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::session::Fd;
use crate::volume::MountedVolume;
use crate::Result;

const ZERO_BLOCK: Block = [0u8; BLOCK_SIZE];

impl<S: BlockStore> MountedVolume<S> {
    pub(crate) fn read(&mut self, fd: Fd, length: usize) -> Result<Bytes> {
        let offset = self.sessions.get(fd)?.offset;
        let slot = self.resolve(fd)?;
        if length == 0 {
            return Ok(Bytes::new());
        }

        let entry = self.entry(slot)?;
        let (first_block, size) = (entry.first_block, entry.size);
        let wanted = length.min(size.saturating_sub(offset) as usize);

        let mut out = BytesMut::with_capacity(wanted);
        let mut scratch = [0u8; BLOCK_SIZE];
        let mut intra = offset as usize % BLOCK_SIZE;
        let mut cursor = self.fat.block_at_offset(first_block, offset as u64)?;

        while out.len() < wanted {
            let Some(block) = cursor else {
                break;
            };
            self.store
                .read_block(self.superblock.data_block(block), &mut scratch)?;
            let len = (BLOCK_SIZE - intra).min(wanted - out.len());
            out.extend_from_slice(&scratch[intra..intra + len]);
            intra = 0;
            cursor = self.fat.next(block)?;
        }

        let session = self.sessions.get_mut(fd)?;
        session.offset = (offset as usize + out.len()).min(size as usize) as u32;
        debug!("Read {} of {} bytes from {} at {}", out.len(), length, fd, offset);
        Ok(out.freeze())
    }

    pub(crate) fn write(&mut self, fd: Fd, data: &[u8]) -> Result<usize> {
        let offset = self.sessions.get(fd)?.offset;
        let slot = self.resolve(fd)?;
        if data.is_empty() {
            return Ok(0);
        }
        if self.entry(slot)?.first_block.is_none() && self.fat.free_blocks() == 0 {
            warn!("Volume full: nothing written to {}", fd);
            return Ok(0);
        }

        let Some((mut block, mut fresh)) = self.locate_for_write(slot, offset)? else {
            warn!("Volume full: cannot reach offset {} for {}", offset, fd);
            return Ok(0);
        };

        let mut scratch = [0u8; BLOCK_SIZE];
        let mut intra = offset as usize % BLOCK_SIZE;
        let mut written = 0;

        loop {
            let len = (BLOCK_SIZE - intra).min(data.len() - written);
            let target = self.superblock.data_block(block);

            // Partial blocks keep whatever bytes they already hold.
            if len < BLOCK_SIZE {
                if fresh {
                    scratch.fill(0);
                } else {
                    self.store.read_block(target, &mut scratch)?;
                }
            }
            scratch[intra..intra + len].copy_from_slice(&data[written..written + len]);
            self.store.write_block(target, &scratch)?;

            written += len;
            intra = 0;
            if written == data.len() {
                break;
            }

            (block, fresh) = match self.fat.next(block)? {
                Some(next) => (next, false),
                None => match self.fat.allocate_after(Some(block)) {
                    Some(next) => (next, true),
                    None => {
                        warn!(
                            "Volume full: short write of {} of {} bytes to {}",
                            written,
                            data.len(),
                            fd
                        );
                        break;
                    }
                },
            };
        }

        let entry = self.entry_mut(slot)?;
        entry.size = entry
            .size
            .saturating_add(u32::try_from(written).unwrap_or(u32::MAX));
        debug!(
            "Wrote {} bytes to {} at {}, size now {}",
            written, fd, offset, entry.size
        );
        Ok(written)
    }

    // Block holding `offset` and whether it is freshly allocated. Missing
    // blocks are all allocated or none are; skipped ones are zeroed.
    fn locate_for_write(&mut self, slot: usize, offset: u32) -> Result<Option<(u16, bool)>> {
        let hops = offset as usize / BLOCK_SIZE;
        let first_block = self.entry(slot)?.first_block;

        if let Some(block) = self.fat.block_at_offset(first_block, offset as u64)? {
            return Ok(Some((block, false)));
        }

        let missing = hops + 1 - self.fat.chain_len(first_block)?;
        if self.fat.free_blocks() < missing {
            return Ok(None);
        }

        let mut tail = match first_block {
            Some(first) => Some(self.fat.chain_tail(first)?),
            None => None,
        };
        for remaining in (0..missing).rev() {
            let Some(block) = self.fat.allocate_after(tail) else {
                return Ok(None);
            };
            if tail.is_none() {
                self.entry_mut(slot)?.first_block = Some(block);
            }
            if remaining > 0 {
                self.zero_block(block)?;
            }
            tail = Some(block);
        }
        Ok(tail.map(|block| (block, true)))
    }

    fn zero_block(&mut self, block: u16) -> Result<()> {
        self.store
            .write_block(self.superblock.data_block(block), &ZERO_BLOCK)?;
        Ok(())
    }
}
