use std::fmt;

use serde::{Deserialize, Serialize};

use crate::directory::FileName;
use crate::{FsError, Result, OPEN_MAX_COUNT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fd(usize);

impl Fd {
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub name: FileName,
    pub offset: u32,
}

#[derive(Debug, Clone)]
pub struct SessionTable {
    slots: Vec<Option<Session>>,
}

impl Default for SessionTable {
    fn default() -> Self {
        Self {
            slots: vec![None; OPEN_MAX_COUNT],
        }
    }
}

impl SessionTable {
    pub fn open(&mut self, name: FileName) -> Result<Fd> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(FsError::TooManySessions(OPEN_MAX_COUNT))?;
        self.slots[index] = Some(Session { name, offset: 0 });
        Ok(Fd(index))
    }

    pub fn close(&mut self, fd: Fd) -> Result<Session> {
        self.slots
            .get_mut(fd.0)
            .and_then(Option::take)
            .ok_or(FsError::InvalidHandle(fd.0))
    }

    pub fn get(&self, fd: Fd) -> Result<&Session> {
        self.slots
            .get(fd.0)
            .and_then(Option::as_ref)
            .ok_or(FsError::InvalidHandle(fd.0))
    }

    pub fn get_mut(&mut self, fd: Fd) -> Result<&mut Session> {
        self.slots
            .get_mut(fd.0)
            .and_then(Option::as_mut)
            .ok_or(FsError::InvalidHandle(fd.0))
    }

    pub fn is_open(&self, name: &FileName) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|session| session.name == *name)
    }

    pub fn live(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_close_reuses_slots() {
        let mut table = SessionTable::default();
        let a = table.open(FileName::new("a").unwrap()).unwrap();
        let b = table.open(FileName::new("a").unwrap()).unwrap();
        assert_eq!((a.as_raw(), b.as_raw()), (0, 1));
        assert_eq!(table.live(), 2);

        table.close(a).unwrap();
        assert!(matches!(table.close(a), Err(FsError::InvalidHandle(0))));
        assert!(table.is_open(&FileName::new("a").unwrap()));

        let c = table.open(FileName::new("c").unwrap()).unwrap();
        assert_eq!(c.as_raw(), 0);
        assert_eq!(table.get(c).unwrap().offset, 0);
    }

    #[test]
    fn test_table_limits() {
        let mut table = SessionTable::default();
        for _ in 0..OPEN_MAX_COUNT {
            table.open(FileName::new("f").unwrap()).unwrap();
        }
        assert!(matches!(
            table.open(FileName::new("f").unwrap()),
            Err(FsError::TooManySessions(_))
        ));
        assert!(matches!(
            table.get(Fd::from_raw(OPEN_MAX_COUNT)),
            Err(FsError::InvalidHandle(_))
        ));
    }
}
