//! Server configuration.
//!
//! A root may carry an optional `delta.cfg` JSON file selecting the backend
//! and tuning segment writes. Missing keys take their defaults.

use std::fmt::{self, Display};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PatchLogError, StoreResult};
use crate::storage::SegmentStoreOptions;

/// Name of the optional server configuration file at the root.
pub const SERVER_CONFIG_FILE: &str = "delta.cfg";

/// Storage backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogProvider {
    File,
}

impl LogProvider {
    pub fn parse(value: &str) -> StoreResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(LogProvider::File),
            other => Err(PatchLogError::InvalidConfiguration(format!(
                "unsupported log provider {:?}",
                other
            ))),
        }
    }
}

impl Display for LogProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogProvider::File => write!(f, "file"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Storage root. Never read from the file itself.
    #[serde(skip)]
    pub root: PathBuf,
    /// Backend selector, currently only `"file"`.
    pub log_type: String,
    /// Whether to fsync segment files and directories on append.
    pub sync_on_write: bool,
    /// Extra attempts for a failed segment write.
    pub write_retries: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/patches"),
            log_type: LogProvider::File.to_string(),
            sync_on_write: true,
            write_retries: 2,
        }
    }
}

impl ServerConfig {
    pub fn with_root<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Configuration for `root`, read from `root/delta.cfg` when present.
    pub fn load<P: AsRef<Path>>(root: P) -> StoreResult<Self> {
        let root = root.as_ref();
        let path = root.join(SERVER_CONFIG_FILE);
        let mut config = if path.is_file() {
            let text = fs::read_to_string(&path)?;
            let config: ServerConfig = serde_json::from_str(&text).map_err(|e| {
                PatchLogError::InvalidConfiguration(format!("{:?}: {}", path, e))
            })?;
            info!("Loaded server config from {:?}", path);
            config
        } else {
            debug!("No {} under {:?}, using defaults", SERVER_CONFIG_FILE, root);
            ServerConfig::default()
        };
        config.root = root.to_path_buf();
        Ok(config)
    }

    /// Write this configuration to `root/delta.cfg`.
    pub fn save(&self) -> StoreResult<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(self.root.join(SERVER_CONFIG_FILE), text)?;
        Ok(())
    }

    pub fn provider(&self) -> StoreResult<LogProvider> {
        LogProvider::parse(&self.log_type)
    }

    /// Check the root and backend selector.
    pub fn validate(&self) -> StoreResult<()> {
        if self.root.as_os_str().is_empty() {
            return Err(PatchLogError::InvalidConfiguration(
                "empty storage root".to_string(),
            ));
        }
        if !self.root.exists() {
            return Err(PatchLogError::InvalidConfiguration(format!(
                "storage root {:?} does not exist",
                self.root
            )));
        }
        if !self.root.is_dir() {
            return Err(PatchLogError::InvalidConfiguration(format!(
                "storage root {:?} is not a directory",
                self.root
            )));
        }
        self.provider()?;
        Ok(())
    }

    pub fn segment_options(&self) -> SegmentStoreOptions {
        SegmentStoreOptions {
            sync_on_write: self.sync_on_write,
            write_retries: self.write_retries,
        }
    }
}
