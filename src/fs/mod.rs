//! Filesystem access over a byte range of an image
//!
//! `open_filesystem` inspects the boot sector and hands back a boxed
//! [`FileSystem`] that borrows the image, so a filesystem can never outlive
//! the container it reads from.

mod fat;
mod ntfs;

use std::fmt;
use std::io::BufReader;
use tracing::debug;

use crate::error::{ExtractError, ExtractResult};
use crate::image::ImageHandle;

pub use self::fat::{FatFileSystem, FatType};
pub use self::ntfs::NtfsFileSystem;

/// Bytes read from the start of a volume to identify it
pub const BOOT_SECTOR_SIZE: usize = 512;

/// Opaque reference to a node inside one filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef(pub u64);

/// Name of a directory entry as stored on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryName {
    Text(String),
    /// Legacy single/multi-byte name (FAT 8.3)
    Bytes(Vec<u8>),
    /// UTF-16 code units, possibly unpaired (VFAT long names)
    Utf16(Vec<u16>),
}

impl From<&str> for EntryName {
    fn from(name: &str) -> Self {
        EntryName::Text(name.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: EntryName,
    pub kind: EntryKind,
    /// Declared content size, meaningful for files
    pub size: u64,
    pub node: NodeRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsKind {
    Ntfs,
    Fat(FatType),
    #[cfg(test)]
    Memory,
}

impl fmt::Display for FsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsKind::Ntfs => write!(f, "NTFS"),
            FsKind::Fat(t) => write!(f, "{}", t),
            #[cfg(test)]
            FsKind::Memory => write!(f, "MEMORY"),
        }
    }
}

/// Read-only directory and file access
pub trait FileSystem {
    fn kind(&self) -> FsKind;

    fn root(&self) -> NodeRef;

    /// List a directory. The outer error means the directory itself could not
    /// be opened; inner errors are single unreadable entries.
    fn read_dir(&mut self, dir: NodeRef) -> ExtractResult<Vec<ExtractResult<DirEntry>>>;

    /// Read up to `len` bytes of file content at `offset`; empty at end of data
    fn read_at(&mut self, node: NodeRef, offset: u64, len: usize) -> ExtractResult<Vec<u8>>;
}

/// Which backend, if any, recognizes this boot sector
pub fn detect_filesystem(sector: &[u8]) -> Option<FsKind> {
    if sector.len() >= 11 && &sector[3..11] == b"NTFS    " {
        return Some(FsKind::Ntfs);
    }
    fat::Geometry::from_boot_sector(sector)
        .ok()
        .map(|geometry| FsKind::Fat(geometry.fat_type))
}

/// Open the filesystem occupying `length` bytes at `offset`
pub fn open_filesystem<'a>(
    image: &'a mut ImageHandle,
    offset: u64,
    length: u64,
) -> ExtractResult<Box<dyn FileSystem + 'a>> {
    let boot = image
        .read(offset, BOOT_SECTOR_SIZE)
        .map_err(|e| ExtractError::FilesystemOpen(format!("cannot read boot sector at {}: {}", offset, e)))?;
    if boot.len() < BOOT_SECTOR_SIZE {
        return Err(ExtractError::FilesystemOpen(format!(
            "boot sector at {} is truncated",
            offset
        )));
    }

    match detect_filesystem(&boot) {
        Some(FsKind::Ntfs) => {
            debug!(offset, length, "Opening NTFS");
            let reader = BufReader::new(image.reader(offset, length));
            Ok(Box::new(NtfsFileSystem::open(reader)?))
        }
        Some(FsKind::Fat(fat_type)) => {
            debug!(offset, length, %fat_type, "Opening FAT");
            Ok(Box::new(FatFileSystem::open(image.reader(offset, length))?))
        }
        _ => Err(ExtractError::FilesystemOpen("unrecognized filesystem".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ContainerKind;
    use crate::test_support::{FatImageBuilder, MemorySource};

    fn image_of(data: Vec<u8>) -> ImageHandle {
        ImageHandle::from_source("volume.img", ContainerKind::Raw, Box::new(MemorySource::new(data)))
    }

    #[test]
    fn test_detect_fat_volume() {
        let volume = FatImageBuilder::new().file("/readme.txt", b"hi").build();
        assert_eq!(detect_filesystem(&volume[..512]), Some(FsKind::Fat(FatType::Fat12)));
    }

    #[test]
    fn test_unrecognized_filesystem() {
        let mut image = image_of(vec![0u8; 4096]);
        let err = open_filesystem(&mut image, 0, 4096).err().unwrap();
        assert_eq!(err.to_string(), "Could not process filesystem: unrecognized filesystem");
    }

    #[test]
    fn test_truncated_volume() {
        let mut image = image_of(vec![0u8; 100]);
        assert!(matches!(
            open_filesystem(&mut image, 0, 100),
            Err(ExtractError::FilesystemOpen(_))
        ));
    }

    #[test]
    fn test_ntfs_oem_id_with_garbage_fails_cleanly() {
        let mut boot = vec![0u8; 4096];
        boot[3..11].copy_from_slice(b"NTFS    ");
        boot[510] = 0x55;
        boot[511] = 0xAA;
        let mut image = image_of(boot);
        assert!(matches!(
            open_filesystem(&mut image, 0, 4096),
            Err(ExtractError::FilesystemOpen(_))
        ));
    }

    #[test]
    fn test_open_fat_at_offset() {
        let volume = FatImageBuilder::new().file("/Docs/a.txt", b"abc").build();
        let mut data = vec![0u8; 1024];
        let len = volume.len() as u64;
        data.extend_from_slice(&volume);

        let mut image = image_of(data);
        let mut fs = open_filesystem(&mut image, 1024, len).unwrap();
        let root = fs.root();
        let entries: Vec<DirEntry> = fs.read_dir(root).unwrap().into_iter().map(|e| e.unwrap()).collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::Directory);
    }
}
