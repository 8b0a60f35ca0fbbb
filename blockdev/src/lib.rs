mod file;
mod memory;

pub use file::FileDisk;
pub use memory::MemDisk;

/// Size in bytes of every block on every store.
pub const BLOCK_SIZE: usize = 4096;

pub type Block = [u8; BLOCK_SIZE];

pub type Result<T> = std::result::Result<T, BlockError>;

#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Block {index} out of range: store has {count} blocks")]
    OutOfRange { index: u32, count: u32 },

    #[error("Invalid disk image: {0}")]
    InvalidImage(String),
}

/// Synchronous block-addressed storage with a fixed block count.
///
/// Transfers are always exactly one block of [`BLOCK_SIZE`] bytes.
pub trait BlockStore {
    fn block_count(&self) -> u32;

    fn read_block(&mut self, index: u32, buf: &mut Block) -> Result<()>;

    fn write_block(&mut self, index: u32, buf: &Block) -> Result<()>;

    /// Flush and release the store.
    fn close(self) -> Result<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

impl<T: BlockStore + ?Sized> BlockStore for &mut T {
    fn block_count(&self) -> u32 {
        (**self).block_count()
    }

    fn read_block(&mut self, index: u32, buf: &mut Block) -> Result<()> {
        (**self).read_block(index, buf)
    }

    fn write_block(&mut self, index: u32, buf: &Block) -> Result<()> {
        (**self).write_block(index, buf)
    }
}

pub(crate) fn check_range(index: u32, count: u32) -> Result<()> {
    if index >= count {
        return Err(BlockError::OutOfRange { index, count });
    }
    Ok(())
}
