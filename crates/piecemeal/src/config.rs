//! Configuration file.
//!
//! Values come from, in order of priority: CLI flags, the configuration
//! file, the defaults. The binary applies the CLI flags on top of what
//! [`Config::load`] returns.
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tokio::fs::{create_dir_all, read_to_string, write};
use tracing::warn;

use crate::error::Error;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// How many pieces are searched at the same time.
    pub workers: usize,

    /// How many combinations are hashed for a single piece before giving
    /// up on it.
    pub max_combinations: u64,

    /// After the candidates with the exact size of a file, also try every
    /// candidate big enough to hold the bytes, like a partial download
    /// that was preallocated.
    pub fallback_search: bool,

    /// Ignore empty files when scanning.
    pub skip_empty_files: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            max_combinations: 4096,
            fallback_search: true,
            skip_empty_files: true,
        }
    }
}

impl Config {
    /// Path of the configuration file, `~/.config/piecemeal/config.toml` on
    /// Linux. The folder is created if it doesn't exist.
    ///
    /// # Errors
    ///
    /// This fn can fail if the user has no home folder or if the program
    /// can't create the config folder.
    pub async fn config_file() -> Result<PathBuf, Error> {
        let dotfile =
            ProjectDirs::from("", "", "piecemeal").ok_or(Error::HomeInvalid)?;
        let config_dir = dotfile.config_dir();

        if !config_dir.exists() {
            create_dir_all(config_dir).await.map_err(|_| {
                Error::FolderOpenError(config_dir.display().to_string())
            })?;
        }

        Ok(config_dir.join("config.toml"))
    }

    /// Load the configuration file of the user. If the file doesn't exist,
    /// or is not valid toml, the defaults are written to it and returned.
    pub async fn load() -> Result<Self, Error> {
        let path = Self::config_file().await?;

        let config = match read_to_string(&path).await {
            Ok(s) => Self::from_toml(&s).ok(),
            Err(_) => None,
        };

        match config {
            Some(config) => Ok(config),
            None => {
                warn!("writing default configuration to {path:?}");
                let config = Self::default();
                write(&path, config.to_toml()?).await?;
                Ok(config)
            }
        }
    }

    /// Load the configuration from an explicit file. Unlike [`Config::load`]
    /// an invalid file is an error.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let s = read_to_string(path.as_ref()).await?;
        Self::from_toml(&s)
    }

    pub fn from_toml(s: &str) -> Result<Self, Error> {
        toml::from_str(s)
            .map_err(|e| Error::ConfigDeserializeError(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string(self)
            .map_err(|e| Error::ConfigSerializeError(e.to_string()))
    }

    /// Reject values the finder can't work with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.workers == 0 {
            return Err(Error::ConfigError("workers must be at least 1".into()));
        }
        if self.max_combinations == 0 {
            return Err(Error::ConfigError(
                "max_combinations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
