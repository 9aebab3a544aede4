//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! Everything else (database, permanent store, upload area) defaults to a
//! location under the root folder unless the TOML file says otherwise.

use crate::obfuscate::{Obfuscator, DEFAULT_MIN_LENGTH, DEFAULT_SALT_PREFIX};
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "SPECIMEN_ROOT_FOLDER";

/// Directory under the permanent store that holds in-flight uploads
pub const UPLOAD_DIR_NAME: &str = ".upload";

/// Optional settings read from `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub store_path: Option<PathBuf>,
    pub upload_path: Option<PathBuf>,
    pub id_salt: Option<String>,
    pub id_min_length: Option<usize>,
    pub log_level: Option<String>,
}

impl TomlConfig {
    /// Parse TOML text
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("Invalid config file: {}", e)))
    }

    /// Load the config file
    ///
    /// An explicit path must exist. Without one the platform locations are
    /// tried, and finding nothing yields the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                path.to_path_buf()
            }
            None => match default_config_file() {
                Some(path) => path,
                None => {
                    debug!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        info!("Loading config file: {}", path.display());
        let text = std::fs::read_to_string(&path)?;
        Self::parse(&text)
    }
}

/// First existing config file among the platform locations
fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("specimen").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/specimen/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Resolve the root folder
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml: &TomlConfig,
) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = &toml.root_folder {
        return path.clone();
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("specimen"))
        .unwrap_or_else(|| PathBuf::from("./specimen_data"))
}

/// Fully resolved settings of one tracker process
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    pub root_folder: PathBuf,
    pub database_path: PathBuf,
    /// Permanent home of archived files
    pub store_path: PathBuf,
    /// Where uploads wait until a sweeper archives them
    pub upload_path: PathBuf,
    pub id_salt: String,
    pub id_min_length: usize,
    pub log_level: String,
}

impl TrackerConfig {
    /// Defaults laid out under `root`
    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        let root_folder = root.into();
        let store_path = root_folder.join("store");
        Self {
            database_path: root_folder.join("specimen.db"),
            upload_path: store_path.join(UPLOAD_DIR_NAME),
            store_path,
            root_folder,
            id_salt: DEFAULT_SALT_PREFIX.to_string(),
            id_min_length: DEFAULT_MIN_LENGTH,
            log_level: "info".to_string(),
        }
    }

    /// Combine the command line, the environment and the TOML file
    pub fn resolve(cli_root: Option<&Path>, toml: TomlConfig) -> Self {
        let root = resolve_root_folder(cli_root, ROOT_FOLDER_ENV, &toml);
        let mut config = Self::from_root(root);

        // Relative paths in the file are relative to the root folder
        if let Some(path) = toml.database {
            config.database_path = config.root_folder.join(path);
        }
        if let Some(path) = toml.store_path {
            config.store_path = config.root_folder.join(path);
            config.upload_path = config.store_path.join(UPLOAD_DIR_NAME);
        }
        if let Some(path) = toml.upload_path {
            config.upload_path = config.root_folder.join(path);
        }
        if let Some(salt) = toml.id_salt {
            config.id_salt = salt;
        }
        if let Some(min_length) = toml.id_min_length {
            config.id_min_length = min_length;
        }
        if let Some(level) = toml.log_level {
            config.log_level = level;
        }
        config
    }

    /// Create the root, store and upload directories if missing
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.root_folder, &self.store_path, &self.upload_path] {
            std::fs::create_dir_all(dir).map_err(|e| {
                Error::Config(format!("Cannot create directory {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }

    /// External id codecs for this deployment
    pub fn obfuscator(&self) -> Obfuscator {
        Obfuscator::new(&self.id_salt, self.id_min_length)
    }
}
