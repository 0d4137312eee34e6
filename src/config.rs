// src/config.rs

//! Configuration loading utilities.
//!
//! This module provides convenience functions for locating the config file
//! and the rules file it points to.

use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::models::Config;

/// Config file looked up when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "pagewatch.toml";

/// Load configuration from a TOML file.
///
/// A missing file yields the defaults; a file that exists but does not
/// parse or validate is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        log::info!(
            "No config file at {}, using defaults",
            path.display()
        );
        return Ok(Config::default());
    }

    let config = Config::load(path)?;
    config
        .validate()
        .map_err(|e| AppError::config(format!("invalid config {}: {e}", path.display())))?;
    Ok(config)
}

/// Directory relative paths in the config resolve against.
pub fn config_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Load the config and resolve the rules file path.
pub fn load_all(path: &Path) -> Result<(Config, PathBuf)> {
    let config = load_config(path)?;
    let rules_path = config.rules_path(&config_dir(path));
    Ok((config, rules_path))
}
