//! Error types for history extraction
//!
//! Only `NotFound`, `ImageOpen` and a single-filesystem `FilesystemOpen` end a
//! run. Everything else is local to one partition, directory, entry or file
//! and is logged and skipped by the caller.

use std::fmt;
use std::io;

/// Result type alias for extraction operations
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Errors that can occur while scanning an image
#[derive(Debug)]
pub enum ExtractError {
    /// Image path does not exist
    NotFound(String),
    /// Container could not be opened (bad segment set, corrupt header)
    ImageOpen(String),
    /// Read against the image failed
    Read(String),
    /// Read attempted on a handle that was already closed
    ImageClosed,
    /// Partition table could not be parsed
    VolumeEnumeration(String),
    /// Byte range is not a readable filesystem
    FilesystemOpen(String),
    /// Directory could not be opened
    DirectoryOpen(String),
    /// Single directory entry could not be read
    EntryRead(String),
    /// File content could not be read
    Extraction(String),
    /// No candidate encoding decoded the content
    Decode,
    /// Invalid or unreadable configuration
    Config(String),
    /// I/O error
    Io(io::Error),
    /// Serialization error
    Serialization(serde_json::Error),
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractError::NotFound(p) => write!(f, "Image file not found: {}", p),
            ExtractError::ImageOpen(e) => write!(f, "Failed to open image: {}", e),
            ExtractError::Read(e) => write!(f, "Read error: {}", e),
            ExtractError::ImageClosed => write!(f, "Image handle already closed"),
            ExtractError::VolumeEnumeration(e) => write!(f, "Volume enumeration failed: {}", e),
            ExtractError::FilesystemOpen(e) => write!(f, "Could not process filesystem: {}", e),
            ExtractError::DirectoryOpen(e) => write!(f, "Failed to open directory: {}", e),
            ExtractError::EntryRead(e) => write!(f, "Failed to read directory entry: {}", e),
            ExtractError::Extraction(e) => write!(f, "Failed to extract file: {}", e),
            ExtractError::Decode => write!(f, "No candidate encoding could decode the content"),
            ExtractError::Config(e) => write!(f, "Configuration error: {}", e),
            ExtractError::Io(e) => write!(f, "I/O error: {}", e),
            ExtractError::Serialization(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExtractError::Io(e) => Some(e),
            ExtractError::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ExtractError {
    fn from(err: io::Error) -> Self {
        ExtractError::Io(err)
    }
}

impl From<serde_json::Error> for ExtractError {
    fn from(err: serde_json::Error) -> Self {
        ExtractError::Serialization(err)
    }
}

impl From<ExtractError> for io::Error {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        }
    }
}
