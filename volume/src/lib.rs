mod config;
mod directory;
mod fat;
mod format;
mod layout;
mod report;
mod session;
mod transfer;
mod volume;

pub use config::{DeletePolicy, VolumeConfig};
pub use directory::FileName;
pub use fat::RESERVED_BLOCK;
pub use format::format;
pub use layout::{SuperBlock, FAT_EOC, SIGNATURE};
pub use report::{ChainReport, FileChain, FileInfo, VolumeInfo};
pub use session::Fd;
pub use volume::FileSystem;

use blockdev::{BlockError, BLOCK_SIZE};

pub const FILE_MAX_COUNT: usize = 128;

pub const OPEN_MAX_COUNT: usize = 32;

/// Longest file name in bytes, not counting the terminator.
pub const FILENAME_MAX_LEN: usize = 15;

pub const FAT_ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / 2;

pub type Result<T> = std::result::Result<T, FsError>;

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("No volume is mounted")]
    NotMounted,

    #[error("A volume is already mounted")]
    AlreadyMounted,

    #[error("Invalid volume: {0}")]
    InvalidVolume(String),

    #[error("IO error: {0}")]
    Io(#[from] BlockError),

    #[error("Invalid file name: {0:?}")]
    InvalidName(String),

    #[error("File already exists: {0}")]
    AlreadyExists(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Root directory is full ({0} entries)")]
    DirectoryFull(usize),

    #[error("Too many open files ({0} sessions)")]
    TooManySessions(usize),

    #[error("Invalid file descriptor: {0}")]
    InvalidHandle(usize),

    #[error("File is open: {0}")]
    FileOpen(String),

    #[error("{0} sessions still open")]
    SessionsStillOpen(usize),

    #[error("Session {fd} refers to {name}, which no longer exists")]
    StaleSession { fd: usize, name: String },
}

impl From<bincode::Error> for FsError {
    fn from(err: bincode::Error) -> Self {
        FsError::InvalidVolume(format!("malformed metadata: {}", err))
    }
}
