//! Size-bounded log file writer with numbered backups.
//!
//! # Responsibilities
//! - Append newline-delimited records to the active log file
//! - Roll the file over *before* a write that would exceed `max_file_size`
//! - Keep at most `max_files` backups (`path.1` is the newest)
//!
//! # Design Decisions
//! - Synchronous `std::fs` I/O under a mutex; every record is flushed
//! - The running size is seeded from the file on disk so restarts rotate correctly
//! - `compress` is accepted and stored only; rotated files are left as-is

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::LogRotationConfig;

/// Static settings for a [`RotatingFileWriter`].
#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// Active log file path.
    pub path: PathBuf,
    /// Size threshold in bytes.
    pub max_file_size: u64,
    /// Number of numbered backups to retain. 0 discards the old file on rotation.
    pub max_files: usize,
    /// Stored for configuration parity; rotation never compresses.
    pub compress: bool,
}

impl RotationConfig {
    pub fn from_settings(path: impl Into<PathBuf>, settings: &LogRotationConfig) -> Self {
        Self {
            path: path.into(),
            max_file_size: settings.max_file_size,
            max_files: settings.max_files,
            compress: settings.compress,
        }
    }
}

struct RotationState {
    file: Option<File>,
    current_size: u64,
    rotations: u64,
}

/// A log writer that rotates by size.
pub struct RotatingFileWriter {
    config: RotationConfig,
    state: Mutex<RotationState>,
}

impl RotatingFileWriter {
    /// Open (or create) the active file and read its current size.
    pub fn open(config: RotationConfig) -> io::Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = open_append(&config.path)?;
        let current_size = file.metadata()?.len();

        tracing::debug!(
            path = %config.path.display(),
            current_size,
            max_file_size = config.max_file_size,
            max_files = config.max_files,
            "Log file opened"
        );

        Ok(Self {
            config,
            state: Mutex::new(RotationState {
                file: Some(file),
                current_size,
                rotations: 0,
            }),
        })
    }

    /// Write one record followed by a newline.
    pub fn write_line(&self, line: &str) -> io::Result<()> {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.write(&data)
    }

    /// Write raw bytes, rotating first when they would not fit.
    pub fn write(&self, data: &[u8]) -> io::Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;

        if state.current_size + data.len() as u64 > self.config.max_file_size {
            self.rotate(&mut state)?;
        }

        if state.file.is_none() {
            state.file = Some(open_append(&self.config.path)?);
        }
        if let Some(file) = state.file.as_mut() {
            file.write_all(data)?;
            file.flush()?;
        }
        state.current_size += data.len() as u64;
        Ok(())
    }

    fn rotate(&self, state: &mut RotationState) -> io::Result<()> {
        // Close the handle before renaming.
        state.file = None;

        let path = &self.config.path;
        let max_files = self.config.max_files;

        if max_files == 0 {
            if path.exists() {
                fs::remove_file(path)?;
            }
        } else {
            let oldest = backup_path(path, max_files);
            if oldest.exists() {
                fs::remove_file(&oldest)?;
            }
            for n in (1..max_files).rev() {
                let from = backup_path(path, n);
                if from.exists() {
                    fs::rename(&from, backup_path(path, n + 1))?;
                }
            }
            if path.exists() {
                fs::rename(path, backup_path(path, 1))?;
            }
        }

        state.file = Some(open_append(path)?);
        state.current_size = 0;
        state.rotations += 1;

        tracing::debug!(path = %path.display(), rotations = state.rotations, "Log file rotated");
        Ok(())
    }

    /// Bytes written to the active file since it was opened or last rotated.
    pub fn current_size(&self) -> u64 {
        self.state.lock().map(|s| s.current_size).unwrap_or(0)
    }

    /// Number of rotations performed by this writer.
    pub fn rotation_count(&self) -> u64 {
        self.state.lock().map(|s| s.rotations).unwrap_or(0)
    }

    pub fn config(&self) -> &RotationConfig {
        &self.config
    }
}

/// `app.log` → `app.log.3`
pub fn backup_path(base: &Path, n: usize) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(format!(".{n}"));
    PathBuf::from(path)
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}
