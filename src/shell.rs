//! Commands run against a file-backed volume image.
//!
//! Every command other than [`Command::Format`] mounts the image, runs, and
//! unmounts again so that metadata reaches the file before the process exits.

use std::io::Write;
use std::path::PathBuf;

use blockdev::{BlockStore, FileDisk};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use volume::{format, Fd, FileInfo, FileSystem, FsError, FAT_ENTRIES_PER_BLOCK};

use crate::config::{Config, OutputFormat};
use crate::error::{FlatfatError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Format { data_blocks: u16 },
    Info,
    Ls,
    Add { host: PathBuf, name: Option<String> },
    Cat { name: String },
    Rm { name: String },
    Stat { name: String },
    Verify,
}

pub struct Shell {
    config: Config,
}

impl Shell {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn run<W: Write>(&self, command: &Command, out: &mut W) -> Result<()> {
        match command {
            Command::Format { data_blocks } => self.format(*data_blocks, out),
            other => self.with_volume(|fs| self.execute(fs, other, out)),
        }
    }

    fn format<W: Write>(&self, data_blocks: u16, out: &mut W) -> Result<()> {
        if data_blocks == 0 {
            return Err(FlatfatError::InvalidConfig(
                "a volume needs at least one data block".to_string(),
            ));
        }
        let fat_blocks = (data_blocks as u32).div_ceil(FAT_ENTRIES_PER_BLOCK as u32);
        let total = data_blocks as u32 + fat_blocks + 2;

        let mut disk = FileDisk::create(&self.config.image, total)?;
        let superblock = format(&mut disk)?;
        disk.close()?;
        info!("Formatted {}", self.config.image.display());

        match self.config.output {
            OutputFormat::Text => writeln!(
                out,
                "Formatted {}: {} blocks, {} data blocks",
                self.config.image.display(),
                superblock.total_blocks,
                superblock.data_blocks
            )?,
            OutputFormat::Json => self.emit(
                out,
                &json!({
                    "image": self.config.image,
                    "total_blocks": superblock.total_blocks,
                    "fat_blocks": superblock.fat_blocks,
                    "data_blocks": superblock.data_blocks,
                }),
            )?,
        }
        Ok(())
    }

    /// Mount the image, run `f`, and unmount even when `f` fails.
    fn with_volume<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut FileSystem<FileDisk>) -> Result<()>,
    {
        let disk = FileDisk::open(&self.config.image)?;
        let mut fs = FileSystem::with_config(self.config.volume.clone());
        fs.mount(disk)?;

        let outcome = f(&mut fs);
        match fs.unmount() {
            Ok(disk) => {
                disk.close()?;
                outcome
            }
            Err(err) => {
                warn!("Unmount of {} failed: {}", self.config.image.display(), err);
                outcome.and(Err(err.into()))
            }
        }
    }

    fn execute<W: Write>(
        &self,
        fs: &mut FileSystem<FileDisk>,
        command: &Command,
        out: &mut W,
    ) -> Result<()> {
        match command {
            Command::Format { .. } => Err(FlatfatError::InvalidConfig(
                "format cannot run on a mounted volume".to_string(),
            )),
            Command::Info => {
                let info = fs.info()?;
                match self.config.output {
                    OutputFormat::Text => writeln!(out, "{}", info)?,
                    OutputFormat::Json => self.emit(out, &info)?,
                }
                Ok(())
            }
            Command::Ls => {
                let files: Vec<FileInfo> = fs.list()?.collect();
                match self.config.output {
                    OutputFormat::Text => {
                        writeln!(out, "FS Ls:")?;
                        for file in &files {
                            writeln!(out, "{}", file)?;
                        }
                    }
                    OutputFormat::Json => self.emit(out, &files)?,
                }
                Ok(())
            }
            Command::Add { host, name } => {
                let name = match name {
                    Some(name) => name.clone(),
                    None => host_file_name(host)?,
                };
                let data = std::fs::read(host)?;
                fs.create(&name)?;
                let written = with_file(fs, &name, |fs, fd| Ok(fs.write(fd, &data)?))?;
                if written < data.len() {
                    warn!("Volume full: added {} of {} bytes", written, data.len());
                }
                match self.config.output {
                    OutputFormat::Text => {
                        writeln!(out, "Wrote {} of {} bytes to {}", written, data.len(), name)?
                    }
                    OutputFormat::Json => self.emit(
                        out,
                        &json!({ "name": name, "requested": data.len(), "written": written }),
                    )?,
                }
                Ok(())
            }
            Command::Cat { name } => {
                let data = with_file(fs, name, |fs, fd| {
                    let size = fs.stat(fd)?;
                    Ok(fs.read(fd, size as usize)?)
                })?;
                out.write_all(&data)?;
                Ok(())
            }
            Command::Rm { name } => {
                fs.delete(name)?;
                match self.config.output {
                    OutputFormat::Text => writeln!(out, "Removed {}", name)?,
                    OutputFormat::Json => self.emit(out, &json!({ "removed": name }))?,
                }
                Ok(())
            }
            Command::Stat { name } => {
                let file = fs
                    .list()?
                    .find(|file| file.name == *name)
                    .ok_or_else(|| FsError::NotFound(name.clone()))?;
                match self.config.output {
                    OutputFormat::Text => writeln!(out, "{}", file)?,
                    OutputFormat::Json => self.emit(out, &file)?,
                }
                Ok(())
            }
            Command::Verify => {
                let report = fs.verify()?;
                if !report.is_clean() {
                    warn!("{} orphaned blocks", report.orphaned_blocks.len());
                }
                match self.config.output {
                    OutputFormat::Text => writeln!(out, "{}", report)?,
                    OutputFormat::Json => self.emit(out, &report)?,
                }
                Ok(())
            }
        }
    }

    fn emit<W: Write, T: Serialize>(&self, out: &mut W, value: &T) -> Result<()> {
        serde_json::to_writer_pretty(&mut *out, value)?;
        writeln!(out)?;
        Ok(())
    }
}

/// Open `name`, run `f` with the session, and close it whatever `f` returns.
fn with_file<T, F>(fs: &mut FileSystem<FileDisk>, name: &str, f: F) -> Result<T>
where
    F: FnOnce(&mut FileSystem<FileDisk>, Fd) -> Result<T>,
{
    let fd = fs.open(name)?;
    let outcome = f(fs, fd);
    fs.close(fd)?;
    outcome
}

fn host_file_name(host: &std::path::Path) -> Result<String> {
    host.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            FlatfatError::InvalidConfig(format!("no file name in {}", host.display()))
        })
}
