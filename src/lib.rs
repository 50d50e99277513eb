//! Locate and parse PowerShell `ConsoleHost_history.txt` files inside
//! forensic disk images (E01 or raw), without mounting them.

pub mod codec;
pub mod common;
pub mod config;
pub mod error;
pub mod extractor;
pub mod fs;
pub mod history;
pub mod image;
pub mod logging;
pub mod records;
pub mod volume;
pub mod walker;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{load_config, ScanConfig};
pub use error::{ExtractError, ExtractResult};
pub use history::{
    describe_capabilities, extract_history, extract_history_with_config, Capabilities, ExtractedArtifact, Report,
};
pub use records::CommandRecord;
