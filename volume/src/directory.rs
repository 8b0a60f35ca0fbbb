use std::fmt;

use blockdev::Block;
use serde::{Deserialize, Serialize};

use crate::fat::RESERVED_BLOCK;
use crate::layout::{self, RawDirEntry, FAT_EOC, NAME_FIELD_LEN};
use crate::{FsError, Result, FILENAME_MAX_LEN, FILE_MAX_COUNT};

/// A validated file name: 1 to 15 bytes, no NUL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileName(String);

impl FileName {
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() || name.len() > FILENAME_MAX_LEN || name.contains('\0') {
            return Err(FsError::InvalidName(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn to_field(&self) -> [u8; NAME_FIELD_LEN] {
        let mut field = [0u8; NAME_FIELD_LEN];
        field[..self.0.len()].copy_from_slice(self.0.as_bytes());
        field
    }
}

impl TryFrom<String> for FileName {
    type Error = FsError;

    fn try_from(name: String) -> Result<Self> {
        Self::new(&name)
    }
}

impl From<FileName> for String {
    fn from(name: FileName) -> Self {
        name.0
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: FileName,
    pub size: u32,
    pub first_block: Option<u16>,
}

impl DirEntry {
    fn empty(name: FileName) -> Self {
        Self {
            name,
            size: 0,
            first_block: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    Free,
    Occupied(DirEntry),
}

impl Slot {
    fn entry(&self) -> Option<&DirEntry> {
        match self {
            Slot::Occupied(entry) => Some(entry),
            Slot::Free => None,
        }
    }
}

/// The root directory: a fixed number of slots, filled first-fit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    slots: Vec<Slot>,
}

impl Default for Directory {
    fn default() -> Self {
        Self {
            slots: vec![Slot::Free; FILE_MAX_COUNT],
        }
    }
}

impl Directory {
    pub fn decode(block: &Block, data_blocks: u16) -> Result<Self> {
        let slots = layout::decode_directory(block)?
            .into_iter()
            .map(|raw| Self::decode_slot(&raw, data_blocks))
            .collect::<Result<Vec<_>>>()?;

        let directory = Self { slots };
        for (index, entry) in directory.entries().enumerate() {
            if directory
                .entries()
                .skip(index + 1)
                .any(|other| other.name == entry.name)
            {
                return Err(FsError::InvalidVolume(format!(
                    "duplicate directory entry {}",
                    entry.name
                )));
            }
        }
        Ok(directory)
    }

    fn decode_slot(raw: &RawDirEntry, data_blocks: u16) -> Result<Slot> {
        if raw.is_free() {
            return Ok(Slot::Free);
        }

        let name = std::str::from_utf8(raw.name_bytes())
            .map_err(|_| FsError::InvalidVolume("directory entry name is not UTF-8".to_string()))
            .and_then(|name| {
                FileName::new(name).map_err(|_| {
                    FsError::InvalidVolume(format!("directory entry name {:?} is invalid", name))
                })
            })?;

        let first_block = match raw.first_block {
            FAT_EOC => None,
            RESERVED_BLOCK => {
                return Err(FsError::InvalidVolume(format!(
                    "{} starts at reserved block {}",
                    name, RESERVED_BLOCK
                )))
            }
            block if block < data_blocks => Some(block),
            block => {
                return Err(FsError::InvalidVolume(format!(
                    "{} starts at block {} beyond {} data blocks",
                    name, block, data_blocks
                )))
            }
        };

        Ok(Slot::Occupied(DirEntry {
            name,
            size: raw.size,
            first_block,
        }))
    }

    pub fn encode(&self) -> Result<Block> {
        let raw: Vec<RawDirEntry> = self
            .slots
            .iter()
            .map(|slot| match slot {
                Slot::Free => RawDirEntry::EMPTY,
                Slot::Occupied(entry) => RawDirEntry {
                    name: entry.name.to_field(),
                    size: entry.size,
                    first_block: entry.first_block.unwrap_or(FAT_EOC),
                    ..RawDirEntry::EMPTY
                },
            })
            .collect();
        layout::encode_directory(&raw)
    }

    pub fn position(&self, name: &FileName) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.entry().is_some_and(|entry| entry.name == *name))
    }

    pub fn find(&self, name: &FileName) -> Option<&DirEntry> {
        self.position(name).and_then(|index| self.get(index))
    }

    pub fn get(&self, index: usize) -> Option<&DirEntry> {
        self.slots.get(index).and_then(Slot::entry)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut DirEntry> {
        match self.slots.get_mut(index) {
            Some(Slot::Occupied(entry)) => Some(entry),
            _ => None,
        }
    }

    pub fn insert(&mut self, name: FileName) -> Result<usize> {
        if self.position(&name).is_some() {
            return Err(FsError::AlreadyExists(name.to_string()));
        }
        let index = self
            .slots
            .iter()
            .position(|slot| matches!(slot, Slot::Free))
            .ok_or(FsError::DirectoryFull(FILE_MAX_COUNT))?;
        self.slots[index] = Slot::Occupied(DirEntry::empty(name));
        Ok(index)
    }

    pub fn remove(&mut self, name: &FileName) -> Option<DirEntry> {
        let index = self.position(name)?;
        match std::mem::replace(&mut self.slots[index], Slot::Free) {
            Slot::Occupied(entry) => Some(entry),
            Slot::Free => None,
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &DirEntry> + '_ {
        self.slots.iter().filter_map(Slot::entry)
    }

    pub fn free_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Free))
            .count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> FileName {
        FileName::new(s).unwrap()
    }

    #[test]
    fn test_file_name_rules() {
        assert!(FileName::new("a.txt").is_ok());
        assert!(FileName::new("fifteen_chars_x").is_ok());
        assert!(matches!(FileName::new(""), Err(FsError::InvalidName(_))));
        assert!(matches!(FileName::new("sixteen_chars_xx"), Err(FsError::InvalidName(_))));
        assert!(matches!(FileName::new("nul\0byte"), Err(FsError::InvalidName(_))));
    }

    #[test]
    fn test_insert_first_fit_and_remove() {
        let mut dir = Directory::default();
        assert_eq!(dir.insert(name("a")).unwrap(), 0);
        assert_eq!(dir.insert(name("b")).unwrap(), 1);
        assert_eq!(dir.insert(name("c")).unwrap(), 2);

        assert!(dir.remove(&name("b")).is_some());
        assert_eq!(dir.insert(name("d")).unwrap(), 1);
        assert!(matches!(dir.insert(name("a")), Err(FsError::AlreadyExists(_))));

        let names: Vec<&str> = dir.entries().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "d", "c"]);
        assert_eq!(dir.free_count(), FILE_MAX_COUNT - 3);
        assert!(dir.remove(&name("zzz")).is_none());
    }

    #[test]
    fn test_directory_full() {
        let mut dir = Directory::default();
        for i in 0..FILE_MAX_COUNT {
            dir.insert(name(&format!("f{}", i))).unwrap();
        }
        assert_eq!(dir.free_count(), 0);
        assert!(matches!(dir.insert(name("extra")), Err(FsError::DirectoryFull(_))));
        // duplicates are reported before fullness
        assert!(matches!(dir.insert(name("f0")), Err(FsError::AlreadyExists(_))));
    }

    #[test]
    fn test_encode_decode() {
        let mut dir = Directory::default();
        dir.insert(name("x")).unwrap();
        let index = dir.insert(name("data.bin")).unwrap();
        let entry = dir.get_mut(index).unwrap();
        entry.size = 5000;
        entry.first_block = Some(7);

        let block = dir.encode().unwrap();
        let decoded = Directory::decode(&block, 16).unwrap();
        assert_eq!(decoded, dir);
        assert_eq!(decoded.find(&name("x")).unwrap().first_block, None);

        assert!(matches!(Directory::decode(&block, 5), Err(FsError::InvalidVolume(_))));
    }

    #[test]
    fn test_decode_rejects_reserved_first_block() {
        let mut dir = Directory::default();
        let index = dir.insert(name("x")).unwrap();
        dir.get_mut(index).unwrap().first_block = Some(RESERVED_BLOCK);

        let block = dir.encode().unwrap();
        assert!(matches!(Directory::decode(&block, 16), Err(FsError::InvalidVolume(_))));
    }
}
