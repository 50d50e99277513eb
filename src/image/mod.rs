//! Image access - flat, read-only byte view over forensic containers
//!
//! Two container strategies sit behind the [`ImageSource`] trait:
//!
//! - **EWF** (`.E01`, `.S01`, `.Ex01`): segmented, chunked, optionally
//!   zlib-compressed Expert Witness Format
//! - **Raw** (`.dd`, `.img`, `.001`, ...): flat file or numbered split set
//!
//! The strategy is picked once from the extension when the image is opened.
//! Everything above this layer only sees [`ImageHandle`].

mod ewf;
mod raw;

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::config::ScanConfig;
use crate::error::{ExtractError, ExtractResult};

pub use ewf::EwfSource;
pub use raw::RawSource;

/// Random-access byte source backing an open image
pub trait ImageSource {
    /// Fill `buf` from `offset`; fewer bytes only at end of media
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> ExtractResult<usize>;

    /// Logical media size in bytes
    fn size(&self) -> u64;

    /// Release segment handles and cached data
    fn close(&mut self);
}

/// Container strategy chosen from the image extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Ewf,
    Raw,
}

impl ContainerKind {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "e01" | "ex01" | "s01" => ContainerKind::Ewf,
            _ => ContainerKind::Raw,
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::Ewf => write!(f, "EWF"),
            ContainerKind::Raw => write!(f, "RAW"),
        }
    }
}

/// Open an image with the strategy matching its extension
pub fn open(path: impl AsRef<Path>, config: &ScanConfig) -> ExtractResult<ImageHandle> {
    ImageHandle::open(path, config)
}

// =============================================================================
// Image Handle
// =============================================================================

/// Exclusive owner of an opened container
///
/// Closing is idempotent and also happens on drop.
pub struct ImageHandle {
    path: PathBuf,
    kind: ContainerKind,
    size: u64,
    source: Option<Box<dyn ImageSource>>,
}

impl ImageHandle {
    pub fn open(path: impl AsRef<Path>, config: &ScanConfig) -> ExtractResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ExtractError::NotFound(path.display().to_string()));
        }

        let kind = ContainerKind::from_path(path);
        debug!(?path, %kind, "Opening image");

        let source: Box<dyn ImageSource> = match kind {
            ContainerKind::Ewf => Box::new(EwfSource::open(path, config)?),
            ContainerKind::Raw => Box::new(RawSource::open(path, config)?),
        };

        Ok(Self::from_source(path, kind, source))
    }

    /// Wrap an already opened source
    pub fn from_source(path: impl Into<PathBuf>, kind: ContainerKind, source: Box<dyn ImageSource>) -> Self {
        let size = source.size();
        Self {
            path: path.into(),
            kind,
            size,
            source: Some(source),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_none()
    }

    /// Read up to `length` bytes at `offset` (short only at end of image)
    pub fn read(&mut self, offset: u64, length: usize) -> ExtractResult<Vec<u8>> {
        if self.source.is_none() {
            return Err(ExtractError::ImageClosed);
        }
        if offset >= self.size {
            return Ok(Vec::new());
        }
        let available = (self.size - offset).min(length as u64) as usize;
        let mut buf = vec![0u8; available];
        let n = self.read_into(offset, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Fill `buf` from `offset`, returning the byte count
    pub fn read_into(&mut self, offset: u64, buf: &mut [u8]) -> ExtractResult<usize> {
        let size = self.size;
        let source = self.source.as_mut().ok_or(ExtractError::ImageClosed)?;
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let len = (size - offset).min(buf.len() as u64) as usize;
        trace!(offset, len, "Image read");
        source.read_at(offset, &mut buf[..len])
    }

    /// `Read + Seek` view over `len` bytes starting at `start`
    pub fn reader(&mut self, start: u64, len: u64) -> VolumeReader<'_> {
        VolumeReader {
            image: self,
            start,
            len,
            position: 0,
        }
    }

    /// Release the container. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            debug!(path = ?self.path, "Closing image");
            source.close();
        }
    }
}

impl Drop for ImageHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageHandle")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// =============================================================================
// Volume Reader - std::io view over a byte range
// =============================================================================

/// Seekable reader over one byte range of an image
pub struct VolumeReader<'a> {
    image: &'a mut ImageHandle,
    start: u64,
    len: u64,
    position: u64,
}

impl VolumeReader<'_> {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Read for VolumeReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position >= self.len || buf.is_empty() {
            return Ok(0);
        }
        let want = (self.len - self.position).min(buf.len() as u64) as usize;
        let n = self.image.read_into(self.start + self.position, &mut buf[..want])?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for VolumeReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemorySource;
    use std::io::Write;
    use tempfile::TempDir;

    fn memory_image(data: Vec<u8>) -> ImageHandle {
        ImageHandle::from_source("memory.dd", ContainerKind::Raw, Box::new(MemorySource::new(data)))
    }

    #[test]
    fn test_strategy_by_extension() {
        assert_eq!(ContainerKind::from_path(Path::new("disk.E01")), ContainerKind::Ewf);
        assert_eq!(ContainerKind::from_path(Path::new("disk.ex01")), ContainerKind::Ewf);
        assert_eq!(ContainerKind::from_path(Path::new("disk.S01")), ContainerKind::Ewf);
        assert_eq!(ContainerKind::from_path(Path::new("disk.001")), ContainerKind::Raw);
        assert_eq!(ContainerKind::from_path(Path::new("disk.dd")), ContainerKind::Raw);
        assert_eq!(ContainerKind::from_path(Path::new("disk")), ContainerKind::Raw);
    }

    #[test]
    fn test_missing_path_is_not_found() {
        let err = open("/nonexistent/disk.E01", &ScanConfig::default()).unwrap_err();
        assert!(matches!(err, ExtractError::NotFound(_)));
    }

    #[test]
    fn test_read_clamps_at_end() {
        let mut image = memory_image((0u8..100).collect());
        assert_eq!(image.size(), 100);
        assert_eq!(image.read(90, 50).unwrap().len(), 10);
        assert!(image.read(100, 10).unwrap().is_empty());
        assert_eq!(image.read(5, 3).unwrap(), vec![5, 6, 7]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut image = memory_image(vec![1; 16]);
        image.close();
        image.close();
        assert!(image.is_closed());
        assert!(matches!(image.read(0, 4), Err(ExtractError::ImageClosed)));
    }

    #[test]
    fn test_volume_reader_seek_and_read() {
        let mut image = memory_image((0u8..64).collect());
        let mut reader = image.reader(16, 16);

        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [16, 17, 18, 19]);

        reader.seek(SeekFrom::End(-2)).unwrap();
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, vec![30, 31]);

        assert!(reader.seek(SeekFrom::Current(-100)).is_err());
    }

    #[test]
    fn test_open_raw_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("disk.img");
        std::fs::File::create(&path).unwrap().write_all(&[7u8; 1024]).unwrap();

        let mut image = open(&path, &ScanConfig::default()).unwrap();
        assert_eq!(image.kind(), ContainerKind::Raw);
        assert_eq!(image.size(), 1024);
        assert_eq!(image.read(1000, 100).unwrap(), vec![7u8; 24]);
    }
}
