pub mod config;
pub mod error;
pub mod shell;

pub use config::{Config, OutputFormat};
pub use error::{FlatfatError, Result};
pub use shell::{Command, Shell};

// Re-export key types from workspace crates
pub use blockdev;
pub use volume;
