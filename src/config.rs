//! Scan configuration
//!
//! Every field has a default, so a JSON file only needs the keys it
//! overrides:
//!
//! ```json
//! { "sector_size": 4096, "max_depth": 32 }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ExtractError, ExtractResult};

/// Default history file name (matched case-insensitively)
pub const DEFAULT_TARGET_FILENAME: &str = "ConsoleHost_history.txt";

/// Path fragments that must all appear in a match's full path
pub const DEFAULT_PATH_FRAGMENTS: [&str; 6] = [
    "appdata",
    "roaming",
    "microsoft",
    "windows",
    "powershell",
    "psreadline",
];

/// Directory names that hold per-user profiles
pub const DEFAULT_PROFILE_ROOTS: [&str; 2] = ["users", "documents and settings"];

pub const DEFAULT_SECTOR_SIZE: u64 = 512;
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024; // 1MB read chunks

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Bytes per sector used for partition offsets
    pub sector_size: u64,
    /// Read size used when pulling file content
    pub chunk_size: usize,
    pub target_filename: String,
    pub path_fragments: Vec<String>,
    pub profile_roots: Vec<String>,
    /// Maximum directory depth below the filesystem root
    pub max_depth: usize,
    /// Decompressed EWF chunks kept in memory
    pub chunk_cache_entries: usize,
    /// Segment files held open at once
    pub max_open_segments: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            sector_size: DEFAULT_SECTOR_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            target_filename: DEFAULT_TARGET_FILENAME.to_string(),
            path_fragments: DEFAULT_PATH_FRAGMENTS.iter().map(|s| s.to_string()).collect(),
            profile_roots: DEFAULT_PROFILE_ROOTS.iter().map(|s| s.to_string()).collect(),
            max_depth: 64,
            chunk_cache_entries: 256,
            max_open_segments: 16,
        }
    }
}

impl ScanConfig {
    /// Reject values that would make the scan meaningless
    pub fn validate(&self) -> ExtractResult<()> {
        if self.sector_size < 512 || !self.sector_size.is_power_of_two() {
            return Err(ExtractError::Config(format!(
                "sector_size must be a power of two of at least 512, got {}",
                self.sector_size
            )));
        }
        if self.chunk_size == 0 {
            return Err(ExtractError::Config("chunk_size must be greater than zero".to_string()));
        }
        if self.target_filename.trim().is_empty() {
            return Err(ExtractError::Config("target_filename is empty".to_string()));
        }
        if self.max_open_segments == 0 {
            return Err(ExtractError::Config("max_open_segments must be greater than zero".to_string()));
        }
        Ok(())
    }
}

/// Load a configuration file (JSON), filling unspecified keys with defaults
pub fn load_config(path: &str) -> ExtractResult<ScanConfig> {
    info!("Loading scan configuration from: {}", path);

    let path = Path::new(path);
    if !path.exists() {
        return Err(ExtractError::Config(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let json = fs::read_to_string(path)
        .map_err(|e| ExtractError::Config(format!("Failed to read file: {}", e)))?;
    let config: ScanConfig = serde_json::from_str(&json)
        .map_err(|e| ExtractError::Config(format!("Failed to parse configuration: {}", e)))?;
    config.validate()?;

    debug!(?config, "Configuration loaded");
    Ok(config)
}
