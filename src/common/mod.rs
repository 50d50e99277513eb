// Common utilities shared by the image readers

pub mod binary;
pub mod io_pool;
pub mod segments;

pub use io_pool::FileIoPool;
pub use segments::{discover_ewf_segments, discover_numbered_segments, is_numbered_segment};
