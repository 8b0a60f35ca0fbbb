use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlatfatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Block device error: {0}")]
    Block(#[from] blockdev::BlockError),

    #[error("File system error: {0}")]
    Fs(#[from] volume::FsError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for FlatfatError {
    fn from(err: serde_json::Error) -> Self {
        FlatfatError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FlatfatError>;
