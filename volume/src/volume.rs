use blockdev::{BlockStore, BLOCK_SIZE};
use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::config::{DeletePolicy, VolumeConfig};
use crate::directory::{DirEntry, Directory, FileName};
use crate::fat::{Fat, Link, RESERVED_BLOCK};
use crate::layout::SuperBlock;
use crate::report::{ChainReport, FileChain, FileInfo, VolumeInfo};
use crate::session::{Fd, SessionTable};
use crate::{FsError, Result};

/// In-memory state of a mounted volume. Owns the store until unmount.
pub(crate) struct MountedVolume<S> {
    pub(crate) store: S,
    pub(crate) superblock: SuperBlock,
    pub(crate) fat: Fat,
    pub(crate) directory: Directory,
    pub(crate) sessions: SessionTable,
    pub(crate) config: VolumeConfig,
}

impl<S: BlockStore> MountedVolume<S> {
    pub(crate) fn load(mut store: S, config: VolumeConfig) -> Result<Self> {
        let mut block = [0u8; BLOCK_SIZE];
        store.read_block(0, &mut block)?;

        let superblock = SuperBlock::decode(&block)?;
        if let Err(err) = superblock.validate(store.block_count()) {
            warn!("Refusing to mount: {}", err);
            return Err(err);
        }

        let mut fat_blocks = Vec::with_capacity(superblock.fat_blocks as usize);
        for index in 0..superblock.fat_blocks as u32 {
            store.read_block(1 + index, &mut block)?;
            fat_blocks.push(block);
        }
        let fat = Fat::decode(&fat_blocks, superblock.data_blocks)?;

        store.read_block(superblock.root_index as u32, &mut block)?;
        let directory = Directory::decode(&block, superblock.data_blocks)?;

        info!(
            "Mounted volume: {} blocks, {}/{} data blocks free, {}/{} directory entries free",
            superblock.total_blocks,
            fat.free_blocks(),
            superblock.data_blocks,
            directory.free_count(),
            directory.capacity()
        );

        Ok(Self {
            store,
            superblock,
            fat,
            directory,
            sessions: SessionTable::default(),
            config,
        })
    }

    /// Write the superblock, every FAT block, then the root directory.
    fn flush(&mut self) -> Result<()> {
        self.store.write_block(0, &self.superblock.encode()?)?;
        for index in 0..self.superblock.fat_blocks as usize {
            self.store
                .write_block(1 + index as u32, &self.fat.encode_block(index))?;
        }
        self.store
            .write_block(self.superblock.root_index as u32, &self.directory.encode()?)?;
        Ok(())
    }

    pub(crate) fn resolve(&self, fd: Fd) -> Result<usize> {
        let session = self.sessions.get(fd)?;
        self.directory
            .position(&session.name)
            .ok_or_else(|| FsError::StaleSession {
                fd: fd.as_raw(),
                name: session.name.to_string(),
            })
    }

    pub(crate) fn entry(&self, slot: usize) -> Result<&DirEntry> {
        self.directory
            .get(slot)
            .ok_or_else(|| FsError::NotFound(format!("directory slot {}", slot)))
    }

    pub(crate) fn entry_mut(&mut self, slot: usize) -> Result<&mut DirEntry> {
        self.directory
            .get_mut(slot)
            .ok_or_else(|| FsError::NotFound(format!("directory slot {}", slot)))
    }

    fn verify(&self) -> Result<ChainReport> {
        let mut owners: Vec<Option<usize>> = vec![None; self.fat.len()];
        let mut files: Vec<FileChain> = Vec::new();

        for entry in self.directory.entries() {
            let blocks = self
                .fat
                .chain(entry.first_block)
                .collect::<Result<Vec<_>>>()?;
            for &block in &blocks {
                if let Some(owner) = owners[block as usize] {
                    return Err(FsError::InvalidVolume(format!(
                        "block {} is shared by {} and {}",
                        block, files[owner].name, entry.name
                    )));
                }
                owners[block as usize] = Some(files.len());
            }
            files.push(FileChain {
                name: entry.name.to_string(),
                size: entry.size,
                blocks,
            });
        }

        let orphaned_blocks: Vec<u16> = (0..self.fat.len() as u16)
            .filter(|&block| block != RESERVED_BLOCK)
            .filter(|&block| owners[block as usize].is_none())
            .filter(|&block| self.fat.link(block) != Link::Free)
            .collect();

        Ok(ChainReport {
            data_blocks: self.fat.len(),
            free_blocks: self.fat.count_free_blocks(),
            used_blocks: files.iter().map(|file| file.blocks.len()).sum(),
            orphaned_blocks,
            files,
        })
    }
}

/// Exclusive handle to at most one mounted volume.
///
/// Every operation other than [`FileSystem::mount`] fails with
/// [`FsError::NotMounted`] while nothing is mounted. Changes to the FAT and
/// directory live in memory until [`FileSystem::unmount`].
pub struct FileSystem<S: BlockStore> {
    config: VolumeConfig,
    volume: Option<MountedVolume<S>>,
}

impl<S: BlockStore> Default for FileSystem<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: BlockStore> FileSystem<S> {
    pub fn new() -> Self {
        Self::with_config(VolumeConfig::default())
    }

    pub fn with_config(config: VolumeConfig) -> Self {
        Self {
            config,
            volume: None,
        }
    }

    pub fn config(&self) -> &VolumeConfig {
        &self.config
    }

    pub fn is_mounted(&self) -> bool {
        self.volume.is_some()
    }

    fn mounted(&self) -> Result<&MountedVolume<S>> {
        self.volume.as_ref().ok_or(FsError::NotMounted)
    }

    fn mounted_mut(&mut self) -> Result<&mut MountedVolume<S>> {
        self.volume.as_mut().ok_or(FsError::NotMounted)
    }

    pub fn mount(&mut self, store: S) -> Result<()> {
        if self.volume.is_some() {
            return Err(FsError::AlreadyMounted);
        }
        self.volume = Some(MountedVolume::load(store, self.config.clone())?);
        Ok(())
    }

    /// Flush metadata and hand the store back. Every session must be closed.
    ///
    /// If a write fails the volume stays mounted and the image is left in an
    /// undefined state.
    pub fn unmount(&mut self) -> Result<S> {
        let volume = self.mounted_mut()?;
        let live = volume.sessions.live();
        if live > 0 {
            return Err(FsError::SessionsStillOpen(live));
        }
        volume.flush()?;

        let volume = self.volume.take().ok_or(FsError::NotMounted)?;
        info!("Unmounted volume ({} data blocks free)", volume.fat.free_blocks());
        Ok(volume.store)
    }

    pub fn info(&self) -> Result<VolumeInfo> {
        let volume = self.mounted()?;
        let sb = &volume.superblock;
        Ok(VolumeInfo {
            total_blocks: sb.total_blocks,
            fat_blocks: sb.fat_blocks,
            root_index: sb.root_index,
            data_start: sb.data_start,
            data_blocks: sb.data_blocks,
            free_data_blocks: volume.fat.free_blocks(),
            directory_capacity: volume.directory.capacity(),
            free_directory_entries: volume.directory.free_count(),
        })
    }

    /// Files in directory order. The iterator can be requested again at
    /// any time to restart the listing.
    pub fn list(&self) -> Result<impl Iterator<Item = FileInfo> + '_> {
        let volume = self.mounted()?;
        Ok(volume.directory.entries().map(|entry| FileInfo {
            name: entry.name.to_string(),
            size: entry.size,
            first_block: entry.first_block,
        }))
    }

    pub fn count_free_blocks(&self) -> Result<usize> {
        Ok(self.mounted()?.fat.count_free_blocks())
    }

    /// Walk every chain, checking that no block has two owners and that
    /// each chain terminates.
    pub fn verify(&self) -> Result<ChainReport> {
        self.mounted()?.verify()
    }

    pub fn create(&mut self, name: &str) -> Result<()> {
        let volume = self.mounted_mut()?;
        let name = FileName::new(name)?;
        let slot = volume.directory.insert(name.clone())?;
        debug!("Created {} in directory slot {}", name, slot);
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> Result<()> {
        let volume = self.mounted_mut()?;
        let name = FileName::new(name)?;
        let first_block = volume
            .directory
            .find(&name)
            .ok_or_else(|| FsError::NotFound(name.to_string()))?
            .first_block;
        if volume.sessions.is_open(&name) {
            return Err(FsError::FileOpen(name.to_string()));
        }

        match volume.config.delete_policy {
            DeletePolicy::Reclaim => {
                let freed = volume.fat.free_chain(first_block)?;
                debug!("Deleted {} and freed {} blocks", name, freed);
            }
            DeletePolicy::Orphan => {
                let orphaned = volume.fat.chain_len(first_block)?;
                debug!("Deleted {} leaving {} blocks orphaned", name, orphaned);
            }
        }
        volume.directory.remove(&name);
        Ok(())
    }

    pub fn open(&mut self, name: &str) -> Result<Fd> {
        let volume = self.mounted_mut()?;
        let name = FileName::new(name)?;
        if volume.directory.find(&name).is_none() {
            return Err(FsError::NotFound(name.to_string()));
        }
        let fd = volume.sessions.open(name)?;
        debug!("Opened {}", fd);
        Ok(fd)
    }

    pub fn close(&mut self, fd: Fd) -> Result<()> {
        let volume = self.mounted_mut()?;
        let session = volume.sessions.close(fd)?;
        debug!("Closed {} ({})", fd, session.name);
        Ok(())
    }

    /// Move the cursor, clamping to end of file. Returns the new offset.
    pub fn seek(&mut self, fd: Fd, offset: u64) -> Result<u32> {
        let volume = self.mounted_mut()?;
        let slot = volume.resolve(fd)?;
        let size = volume.entry(slot)?.size;
        let clamped = offset.min(size as u64) as u32;
        volume.sessions.get_mut(fd)?.offset = clamped;
        Ok(clamped)
    }

    pub fn tell(&self, fd: Fd) -> Result<u32> {
        Ok(self.mounted()?.sessions.get(fd)?.offset)
    }

    pub fn stat(&self, fd: Fd) -> Result<u32> {
        let volume = self.mounted()?;
        let slot = volume.resolve(fd)?;
        Ok(volume.entry(slot)?.size)
    }

    pub fn read(&mut self, fd: Fd, length: usize) -> Result<Bytes> {
        self.mounted_mut()?.read(fd, length)
    }

    /// Write `data` at the cursor, growing the file as needed. Returns how
    /// many bytes were placed, which is short when the volume fills up.
    /// The cursor does not move; seek explicitly to continue past the data.
    pub fn write(&mut self, fd: Fd, data: &[u8]) -> Result<usize> {
        self.mounted_mut()?.write(fd, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format;
    use blockdev::MemDisk;

    fn mounted(blocks: u32) -> FileSystem<MemDisk> {
        let mut disk = MemDisk::new(blocks);
        format(&mut disk).unwrap();
        let mut fs = FileSystem::new();
        fs.mount(disk).unwrap();
        fs
    }

    #[test]
    fn test_operations_need_a_mount() {
        let mut fs: FileSystem<MemDisk> = FileSystem::new();
        assert!(matches!(fs.info(), Err(FsError::NotMounted)));
        assert!(matches!(fs.list().map(|_| ()), Err(FsError::NotMounted)));
        assert!(matches!(fs.create("a"), Err(FsError::NotMounted)));
        assert!(matches!(fs.delete("a"), Err(FsError::NotMounted)));
        assert!(matches!(fs.open("a"), Err(FsError::NotMounted)));
        assert!(matches!(fs.close(Fd::from_raw(0)), Err(FsError::NotMounted)));
        assert!(matches!(fs.stat(Fd::from_raw(0)), Err(FsError::NotMounted)));
        assert!(matches!(fs.seek(Fd::from_raw(0), 0), Err(FsError::NotMounted)));
        assert!(matches!(fs.read(Fd::from_raw(0), 1), Err(FsError::NotMounted)));
        assert!(matches!(fs.write(Fd::from_raw(0), b"x"), Err(FsError::NotMounted)));
        assert!(matches!(fs.unmount(), Err(FsError::NotMounted)));
    }

    #[test]
    fn test_double_mount() {
        let mut fs = mounted(16);
        let mut other = MemDisk::new(16);
        format(&mut other).unwrap();
        assert!(matches!(fs.mount(other), Err(FsError::AlreadyMounted)));
    }

    #[test]
    fn test_info_counts() {
        let mut fs = mounted(16);
        let info = fs.info().unwrap();
        assert_eq!(info.total_blocks, 16);
        assert_eq!(info.data_blocks, 13);
        assert_eq!(info.free_data_blocks, 12);
        assert_eq!(info.free_directory_entries, 128);

        fs.create("a").unwrap();
        let fd = fs.open("a").unwrap();
        fs.write(fd, b"hello").unwrap();
        let info = fs.info().unwrap();
        assert_eq!(info.free_data_blocks, 11);
        assert_eq!(info.free_directory_entries, 127);
        assert!(info.to_string().contains("fat_free_ratio=11/13"));
    }

    #[test]
    fn test_stale_session() {
        let mut fs = mounted(16);
        fs.create("a").unwrap();
        let fd = fs.open("a").unwrap();

        // only reachable by tampering: delete refuses open files
        let volume = fs.volume.as_mut().unwrap();
        volume.directory.remove(&FileName::new("a").unwrap());

        assert!(matches!(fs.stat(fd), Err(FsError::StaleSession { .. })));
        assert!(matches!(fs.read(fd, 4), Err(FsError::StaleSession { .. })));
        assert!(matches!(fs.write(fd, b"x"), Err(FsError::StaleSession { .. })));
        fs.close(fd).unwrap();
    }

    #[test]
    fn test_failed_flush_keeps_volume_mounted() {
        let mut disk = MemDisk::new(16);
        format(&mut disk).unwrap();
        disk.fail_block(1);
        let mut fs = FileSystem::new();

        // the FAT block cannot be read either
        assert!(matches!(fs.mount(disk.clone()), Err(FsError::Io(_))));
        assert!(!fs.is_mounted());

        disk.heal_block(1);
        fs.mount(disk).unwrap();
        fs.volume.as_mut().unwrap().store.fail_block(1);
        assert!(matches!(fs.unmount(), Err(FsError::Io(_))));
        assert!(fs.is_mounted());

        fs.volume.as_mut().unwrap().store.heal_block(1);
        fs.unmount().unwrap();
    }
}
