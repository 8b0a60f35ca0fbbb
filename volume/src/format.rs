use blockdev::BlockStore;
use tracing::info;

use crate::directory::Directory;
use crate::fat::Fat;
use crate::layout::SuperBlock;
use crate::Result;

/// Write an empty volume spanning the whole store. Data blocks are left
/// untouched.
pub fn format<S: BlockStore + ?Sized>(store: &mut S) -> Result<SuperBlock> {
    let superblock = SuperBlock::for_store(store.block_count())?;
    store.write_block(0, &superblock.encode()?)?;

    let fat = Fat::new(superblock.data_blocks);
    for index in 0..superblock.fat_blocks as usize {
        store.write_block(1 + index as u32, &fat.encode_block(index))?;
    }

    store.write_block(
        superblock.root_index as u32,
        &Directory::default().encode()?,
    )?;

    info!(
        "Formatted volume: {} blocks, {} FAT blocks, {} data blocks",
        superblock.total_blocks, superblock.fat_blocks, superblock.data_blocks
    );
    Ok(superblock)
}
