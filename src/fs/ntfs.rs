use ntfs::indexes::NtfsFileNameIndex;
use ntfs::structured_values::NtfsFileNamespace;
use ntfs::{KnownNtfsFileRecordNumber, Ntfs, NtfsError, NtfsFile, NtfsIndexEntry, NtfsReadSeek};
use std::io::{Read, Seek, SeekFrom};
use tracing::{debug, trace};

use crate::error::{ExtractError, ExtractResult};

use super::{DirEntry, EntryKind, EntryName, FileSystem, FsKind, NodeRef};

/// NTFS volume read through the `ntfs` crate
pub struct NtfsFileSystem<R> {
    ntfs: Ntfs,
    fs: R,
}

impl<R: Read + Seek> NtfsFileSystem<R> {
    pub fn open(mut fs: R) -> ExtractResult<Self> {
        let ntfs = Ntfs::new(&mut fs).map_err(|e| ExtractError::FilesystemOpen(format!("NTFS: {}", e)))?;
        debug!(
            cluster_size = ntfs.cluster_size(),
            size = ntfs.size(),
            "NTFS volume opened"
        );
        Ok(Self { ntfs, fs })
    }
}

impl<R: Read + Seek> FileSystem for NtfsFileSystem<R> {
    fn kind(&self) -> FsKind {
        FsKind::Ntfs
    }

    fn root(&self) -> NodeRef {
        NodeRef(KnownNtfsFileRecordNumber::RootDirectory as u64)
    }

    fn read_dir(&mut self, dir: NodeRef) -> ExtractResult<Vec<ExtractResult<DirEntry>>> {
        let file = self
            .ntfs
            .file(&mut self.fs, dir.0)
            .map_err(|e| ExtractError::DirectoryOpen(format!("record {}: {}", dir.0, e)))?;
        let index = file
            .directory_index(&mut self.fs)
            .map_err(|e| ExtractError::DirectoryOpen(format!("record {}: {}", dir.0, e)))?;

        let mut entries = Vec::new();
        let mut iter = index.entries();
        while let Some(entry) = iter.next(&mut self.fs) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    // The iterator cannot resume past a corrupt index node
                    entries.push(Err(ExtractError::EntryRead(format!("record {}: {}", dir.0, e))));
                    break;
                }
            };
            if let Some(result) = dir_entry(&self.ntfs, &mut self.fs, &entry) {
                entries.push(result);
            }
        }

        trace!(record = dir.0, count = entries.len(), "NTFS directory listed");
        Ok(entries)
    }

    fn read_at(&mut self, node: NodeRef, offset: u64, len: usize) -> ExtractResult<Vec<u8>> {
        let file = self
            .ntfs
            .file(&mut self.fs, node.0)
            .map_err(|e| ExtractError::Extraction(format!("record {}: {}", node.0, e)))?;
        read_data(&file, &mut self.fs, offset, len)
            .map_err(|e| ExtractError::Extraction(format!("record {}: {}", node.0, e)))
    }
}

/// Convert one index entry. DOS-namespace duplicates and `.` yield `None`.
fn dir_entry<R: Read + Seek>(
    ntfs: &Ntfs,
    fs: &mut R,
    entry: &NtfsIndexEntry<'_, NtfsFileNameIndex>,
) -> Option<ExtractResult<DirEntry>> {
    let key = match entry.key()? {
        Ok(key) => key,
        Err(e) => return Some(Err(ExtractError::EntryRead(e.to_string()))),
    };

    // DOS names point at the same record as the Win32 name
    if key.namespace() == NtfsFileNamespace::Dos {
        return None;
    }

    let name = key.name().to_string_lossy();
    if name == "." {
        return None;
    }

    let record = entry.file_reference().file_record_number();
    let (kind, size) = if key.is_directory() {
        (EntryKind::Directory, 0)
    } else {
        match data_size(ntfs, fs, record) {
            Ok(size) => (EntryKind::File, size),
            Err(e) => {
                return Some(Err(ExtractError::EntryRead(format!("{} (record {}): {}", name, record, e))));
            }
        }
    };

    Some(Ok(DirEntry {
        name: EntryName::Text(name),
        kind,
        size,
        node: NodeRef(record),
    }))
}

/// Length of the unnamed $DATA stream
fn data_size<R: Read + Seek>(ntfs: &Ntfs, fs: &mut R, record: u64) -> Result<u64, NtfsError> {
    let file = ntfs.file(fs, record)?;
    match file.data(fs, "") {
        Some(item) => Ok(item?.to_attribute()?.value_length()),
        None => Ok(0),
    }
}

/// Read from the unnamed $DATA stream; handles resident and non-resident data
fn read_data<R: Read + Seek>(file: &NtfsFile<'_>, fs: &mut R, offset: u64, len: usize) -> Result<Vec<u8>, NtfsError> {
    let item = match file.data(fs, "") {
        Some(item) => item?,
        None => return Ok(Vec::new()),
    };
    let attribute = item.to_attribute()?;
    let total = attribute.value_length();
    if offset >= total || len == 0 {
        return Ok(Vec::new());
    }

    let mut value = attribute.value(fs)?;
    value.seek(fs, SeekFrom::Start(offset))?;

    let want = (total - offset).min(len as u64) as usize;
    let mut buf = vec![0u8; want];
    let mut filled = 0;
    while filled < want {
        let n = value.read(fs, &mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}
