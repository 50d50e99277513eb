//! History extraction entry points
//!
//! `extract_history` opens an image, scans every allocated partition (or the
//! whole image when there is no partition table), and returns a [`Report`].
//! Failures never escape as errors: they become `success: false` reports.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::{ScanConfig, DEFAULT_TARGET_FILENAME};
use crate::error::{ExtractError, ExtractResult};
use crate::extractor;
use crate::fs::{open_filesystem, FileSystem};
use crate::image::{self, ImageHandle};
use crate::records::{self, CommandRecord};
use crate::volume::{list_volumes, Volume, VolumeListing};
use crate::walker::{find_target, FileMatch, TargetSpec};

// =============================================================================
// Report types
// =============================================================================

/// One recovered and decoded history file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedArtifact {
    pub username: String,
    pub source_path: String,
    /// Declared size from the directory entry
    pub file_size: u64,
    /// Partition description, "N/A" for unpartitioned images
    pub partition: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_index: Option<usize>,
    /// Encoding that decoded the content, `None` when none did
    pub encoding: Option<String>,
    pub command_count: usize,
    /// Hex SHA-256 of the recovered bytes
    pub sha256: String,
    pub commands: Vec<CommandRecord>,
}

impl ExtractedArtifact {
    fn from_content(file: &FileMatch, content: &[u8], profile_roots: &[String]) -> Self {
        let (commands, codec) = records::decode(content);
        if codec.is_none() {
            debug!(path = %file.full_path, error = %ExtractError::Decode, "Keeping artifact without commands");
        }
        Self {
            username: username_from_path(&file.full_path, profile_roots),
            source_path: file.full_path.clone(),
            file_size: file.size,
            partition: file
                .partition_description
                .clone()
                .unwrap_or_else(|| "N/A".to_string()),
            partition_index: file.partition_index,
            encoding: codec.map(|c| c.name().to_string()),
            command_count: commands.len(),
            sha256: hex::encode(Sha256::digest(content)),
            commands,
        }
    }
}

/// Outcome of one extraction run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub success: bool,
    pub image_path: String,
    /// Every match, including files whose content could not be read
    pub files_found: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_extracted: Option<usize>,
    pub extracted_files: Vec<ExtractedArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Report {
    fn failure(image_path: String, error: ExtractError) -> Self {
        warn!(image = %image_path, error = %error, "Extraction failed");
        Self {
            success: false,
            image_path,
            files_found: 0,
            files_extracted: None,
            extracted_files: Vec::new(),
            error: Some(error.to_string()),
            message: None,
        }
    }

    fn from_scan(image_path: String, scan: Scan, target_filename: &str) -> Self {
        if scan.files_found == 0 {
            return Self {
                success: true,
                image_path,
                files_found: 0,
                files_extracted: None,
                extracted_files: Vec::new(),
                error: None,
                message: Some(format!("No {} files found", target_filename)),
            };
        }
        Self {
            success: true,
            image_path,
            files_found: scan.files_found,
            files_extracted: Some(scan.artifacts.len()),
            extracted_files: scan.artifacts,
            error: None,
            message: None,
        }
    }
}

// =============================================================================
// Capabilities
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupportedImages {
    pub segmented: Vec<&'static str>,
    pub raw: Vec<&'static str>,
}

/// Static description of what this tool handles
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub name: &'static str,
    pub version: &'static str,
    pub author: &'static str,
    pub description: &'static str,
    pub capabilities: Vec<&'static str>,
    pub supported_images: SupportedImages,
    pub supported_filesystems: Vec<&'static str>,
    pub target_file: &'static str,
    pub target_path: &'static str,
}

pub fn describe_capabilities() -> Capabilities {
    Capabilities {
        name: "ConsoleHost History Parser",
        version: env!("CARGO_PKG_VERSION"),
        author: env!("CARGO_PKG_AUTHORS"),
        description: "PowerShell ConsoleHost_history.txt Extraction Tool",
        capabilities: vec![
            "extract_history - Extract and parse PowerShell command history from disk images",
            "describe_capabilities - Report supported images, filesystems and target",
        ],
        supported_images: SupportedImages {
            segmented: vec!["E01", "S01"],
            raw: vec!["RAW", "DD", "IMG", "001"],
        },
        supported_filesystems: vec!["NTFS", "FAT12", "FAT16", "FAT32"],
        target_file: DEFAULT_TARGET_FILENAME,
        target_path: "Users/<username>/AppData/Roaming/Microsoft/Windows/PowerShell/PSReadLine/",
    }
}

// =============================================================================
// Extraction
// =============================================================================

/// Path segment following the first profile root, or "unknown"
pub fn username_from_path(path: &str, profile_roots: &[String]) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    parts
        .iter()
        .position(|part| {
            let lower = part.to_lowercase();
            profile_roots.iter().any(|root| root.to_lowercase() == lower)
        })
        .and_then(|i| parts.get(i + 1))
        .map(|user| user.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Extract history from an image with the default configuration
pub fn extract_history(image_path: impl AsRef<Path>) -> Report {
    extract_history_with_config(image_path, &ScanConfig::default())
}

pub fn extract_history_with_config(image_path: impl AsRef<Path>, config: &ScanConfig) -> Report {
    let path = image_path.as_ref();
    let shown_path = path.display().to_string();
    info!(image = %shown_path, "Starting history extraction");

    if let Err(e) = config.validate() {
        return Report::failure(shown_path, e);
    }

    let mut image = match image::open(path, config) {
        Ok(image) => image,
        Err(e) => return Report::failure(shown_path, e),
    };

    let outcome = scan_image(&mut image, config);
    image.close();

    match outcome {
        Ok(scan) => {
            info!(
                image = %shown_path,
                found = scan.files_found,
                extracted = scan.artifacts.len(),
                "History extraction finished"
            );
            Report::from_scan(shown_path, scan, &config.target_filename)
        }
        Err(e) => Report::failure(shown_path, e),
    }
}

#[derive(Debug, Default)]
struct Scan {
    files_found: usize,
    artifacts: Vec<ExtractedArtifact>,
}

fn scan_image(image: &mut ImageHandle, config: &ScanConfig) -> ExtractResult<Scan> {
    let target = TargetSpec::from_config(config);
    let mut scan = Scan::default();

    match list_volumes(image, config.sector_size) {
        VolumeListing::Partitioned(volumes) => {
            for volume in &volumes {
                let mut fs = match open_filesystem(image, volume.start, volume.length) {
                    Ok(fs) => fs,
                    Err(e) => {
                        warn!(
                            partition = volume.index,
                            description = %volume.description,
                            error = %e,
                            "Skipping partition"
                        );
                        continue;
                    }
                };
                debug!(partition = volume.index, kind = %fs.kind(), "Scanning partition");
                scan_filesystem(fs.as_mut(), Some(volume), &target, config, &mut scan);
            }
        }
        VolumeListing::NoPartitionTable => {
            let size = image.size();
            let mut fs = open_filesystem(image, 0, size)?;
            debug!(kind = %fs.kind(), "Scanning unpartitioned image");
            scan_filesystem(fs.as_mut(), None, &target, config, &mut scan);
        }
    }

    Ok(scan)
}

/// Walk, extract and decode while `fs` is still open
fn scan_filesystem(
    fs: &mut dyn FileSystem,
    volume: Option<&Volume>,
    target: &TargetSpec,
    config: &ScanConfig,
    scan: &mut Scan,
) {
    for mut file in find_target(fs, target) {
        if let Some(volume) = volume {
            file.partition_description = Some(volume.description.clone());
            file.partition_index = Some(volume.index);
        }
        scan.files_found += 1;

        match extractor::extract(fs, &file, config.chunk_size) {
            Some(content) if !content.is_empty() => scan
                .artifacts
                .push(ExtractedArtifact::from_content(&file, &content, &target.profile_roots)),
            Some(_) => debug!(path = %file.full_path, "No content recovered, not reported"),
            None => {}
        }
    }
}
