//! EWF (Expert Witness Format) v1 source - E01/S01 segmented images
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ File header (13 bytes): "EVF\x09\x0d\x0a\xff\x00" + seg no.  │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Section chain (76-byte descriptors, segment-relative links)  │
//! │  volume/disk: chunk count, sectors per chunk, sector size    │
//! │  sectors:     chunk data (zlib or stored)                    │
//! │  table:       chunk offsets, high bit = compressed           │
//! │  table2:      mirror of table (ignored)                      │
//! │  next/done:   end of this segment / end of the set           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! EWF v2 (`EVF2`) files are recognized and rejected.

mod cache;
mod handle;
mod types;

pub use handle::EwfSource;
