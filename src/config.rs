use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use volume::{DeletePolicy, VolumeConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub image: PathBuf,
    pub output: OutputFormat,
    pub verbosity: u8,
    pub volume: VolumeConfig,
}

impl Config {
    pub fn new(image: PathBuf) -> Self {
        Self {
            image,
            output: OutputFormat::Text,
            verbosity: 0,
            volume: VolumeConfig::default(),
        }
    }

    pub fn with_output(mut self, output: OutputFormat) -> Self {
        self.output = output;
        self
    }

    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.volume.delete_policy = policy;
        self
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Each `-v` lowers the threshold by one level, starting from warnings.
    pub fn log_level(&self) -> tracing::Level {
        match self.verbosity {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}
