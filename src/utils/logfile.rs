// src/utils/logfile.rs

//! Size-rotated log file for the CLI's `env_logger` output.
//!
//! Rotation happens once, when the file is opened: if the current file is
//! over the size limit it becomes `<name>.1`, older backups shift up by one
//! and anything past `max_backups` is removed.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

/// Rotate `path` if it is larger than `max_bytes`.
///
/// Returns `true` if a rotation took place.
pub fn rotate_if_needed(path: &Path, max_bytes: u64, max_backups: usize) -> io::Result<bool> {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if size <= max_bytes {
        return Ok(false);
    }

    if max_backups == 0 {
        fs::remove_file(path)?;
        return Ok(true);
    }

    let oldest = backup_path(path, max_backups);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for index in (1..max_backups).rev() {
        let from = backup_path(path, index);
        if from.exists() {
            fs::rename(&from, backup_path(path, index + 1))?;
        }
    }
    fs::rename(path, backup_path(path, 1))?;
    Ok(true)
}

/// Rotate if needed, then open `path` for appending, creating parent
/// directories as required.
pub fn open_log_file(path: &Path, max_bytes: u64, max_backups: usize) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    rotate_if_needed(path, max_bytes, max_backups)?;
    OpenOptions::new().create(true).append(true).open(path)
}
