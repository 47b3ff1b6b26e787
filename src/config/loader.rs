// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{JobQueueError, Result};

/// Read and deserialize a config file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| JobQueueError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;

    let config: RawConfigFile =
        toml::from_str(&contents).map_err(|source| JobQueueError::Toml {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(config)
}

/// Load a config file and validate it: durations parse and are positive,
/// every `[cron.<command>]` has exactly one trigger, cron expressions parse.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// `jobqueue.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("jobqueue.toml")
}
