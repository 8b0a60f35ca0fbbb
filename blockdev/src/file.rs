use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::{check_range, Block, BlockError, BlockStore, Result, BLOCK_SIZE};

/// A disk image file addressed in blocks.
#[derive(Debug)]
pub struct FileDisk {
    path: PathBuf,
    file: File,
    block_count: u32,
}

impl FileDisk {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let len = file.metadata()?.len();
        if len == 0 || len % BLOCK_SIZE as u64 != 0 {
            return Err(BlockError::InvalidImage(format!(
                "{} is {} bytes, not a non-zero multiple of {}",
                path.display(),
                len,
                BLOCK_SIZE
            )));
        }
        let block_count = u32::try_from(len / BLOCK_SIZE as u64).map_err(|_| {
            BlockError::InvalidImage(format!("{} has too many blocks", path.display()))
        })?;

        tracing::debug!("Opened disk image {:?} ({} blocks)", path, block_count);

        Ok(Self {
            path,
            file,
            block_count,
        })
    }

    /// Create (or truncate) a zero-filled image of `block_count` blocks.
    pub fn create<P: AsRef<Path>>(path: P, block_count: u32) -> Result<Self> {
        if block_count == 0 {
            return Err(BlockError::InvalidImage(
                "an image needs at least one block".to_string(),
            ));
        }

        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(block_count as u64 * BLOCK_SIZE as u64)?;

        tracing::info!("Created disk image {:?} ({} blocks)", path, block_count);

        Ok(Self {
            path,
            file,
            block_count,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn seek_to(&mut self, index: u32) -> Result<()> {
        check_range(index, self.block_count)?;
        self.file
            .seek(SeekFrom::Start(index as u64 * BLOCK_SIZE as u64))?;
        Ok(())
    }
}

impl BlockStore for FileDisk {
    fn block_count(&self) -> u32 {
        self.block_count
    }

    fn read_block(&mut self, index: u32, buf: &mut Block) -> Result<()> {
        self.seek_to(index)?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_block(&mut self, index: u32, buf: &Block) -> Result<()> {
        self.seek_to(index)?;
        self.file.write_all(buf)?;
        Ok(())
    }

    fn close(mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        tracing::debug!("Closed disk image {:?}", self.path);
        Ok(())
    }
}
