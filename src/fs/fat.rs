//! FAT12/16/32 reader with VFAT long file names
//!
//! Nodes are kept in a table owned by the filesystem; `NodeRef` is an index
//! into it. The root is always node 0. Directories are deduplicated by first
//! cluster so a corrupt tree that loops back shows up as a repeated node.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use tracing::{debug, trace, warn};

use crate::common::binary::{le_u16, le_u32};
use crate::error::{ExtractError, ExtractResult};

use super::{DirEntry, EntryKind, EntryName, FileSystem, FsKind, NodeRef};

const DIR_ENTRY_SIZE: usize = 32;

const ATTR_READ_ONLY: u8 = 0x01;
const ATTR_HIDDEN: u8 = 0x02;
const ATTR_SYSTEM: u8 = 0x04;
const ATTR_VOLUME_ID: u8 = 0x08;
const ATTR_DIRECTORY: u8 = 0x10;
const ATTR_LFN: u8 = ATTR_READ_ONLY | ATTR_HIDDEN | ATTR_SYSTEM | ATTR_VOLUME_ID;

const ENTRY_END: u8 = 0x00;
const ENTRY_DELETED: u8 = 0xE5;
/// A real leading 0xE5 is stored as 0x05
const ENTRY_KANJI_E5: u8 = 0x05;

/// NT reserved byte flags for lowercase 8.3 names
const NT_LOWER_BASE: u8 = 0x08;
const NT_LOWER_EXT: u8 = 0x10;

const LFN_LAST: u8 = 0x40;
const LFN_SEQ_MASK: u8 = 0x1F;
const LFN_CHARS_PER_ENTRY: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

impl fmt::Display for FatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatType::Fat12 => write!(f, "FAT12"),
            FatType::Fat16 => write!(f, "FAT16"),
            FatType::Fat32 => write!(f, "FAT32"),
        }
    }
}

// =============================================================================
// Geometry
// =============================================================================

/// Byte offsets are relative to the start of the volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Geometry {
    pub fat_type: FatType,
    pub fat_offset: u64,
    pub root_dir_offset: u64,
    pub root_dir_bytes: u64,
    pub data_offset: u64,
    pub cluster_size: u64,
    pub cluster_count: u32,
    /// FAT32 only; 0 means the fixed FAT12/16 root region
    pub root_cluster: u32,
}

impl Geometry {
    pub fn from_boot_sector(boot: &[u8]) -> ExtractResult<Self> {
        let invalid = |msg: String| ExtractError::FilesystemOpen(format!("FAT: {}", msg));

        if boot.len() < 512 || boot[510] != 0x55 || boot[511] != 0xAA {
            return Err(invalid("missing boot signature".to_string()));
        }

        let bytes_per_sector = le_u16(boot, 11)? as u32;
        if ![512, 1024, 2048, 4096].contains(&bytes_per_sector) {
            return Err(invalid(format!("invalid bytes per sector {}", bytes_per_sector)));
        }

        let sectors_per_cluster = boot[13] as u32;
        if sectors_per_cluster == 0 || sectors_per_cluster > 128 || !sectors_per_cluster.is_power_of_two() {
            return Err(invalid(format!("invalid sectors per cluster {}", sectors_per_cluster)));
        }

        let reserved_sectors = le_u16(boot, 14)? as u32;
        if reserved_sectors == 0 {
            return Err(invalid("no reserved sectors".to_string()));
        }

        let num_fats = boot[16] as u32;
        if num_fats == 0 || num_fats > 2 {
            return Err(invalid(format!("invalid FAT count {}", num_fats)));
        }

        let root_entry_count = le_u16(boot, 17)? as u64;
        let total_sectors = match le_u16(boot, 19)? {
            0 => le_u32(boot, 32)? as u64,
            n => n as u64,
        };
        let sectors_per_fat = match le_u16(boot, 22)? {
            0 => le_u32(boot, 36)? as u64,
            n => n as u64,
        };
        if total_sectors == 0 || sectors_per_fat == 0 {
            return Err(invalid("zero total sectors or FAT size".to_string()));
        }

        // BPB fields are at most 32 bits wide, so these sums cannot leave u64
        let sector = bytes_per_sector as u64;
        let root_dir_sectors = (root_entry_count * DIR_ENTRY_SIZE as u64).div_ceil(sector);
        let fat_start = reserved_sectors as u64;
        let root_dir_start = fat_start + num_fats as u64 * sectors_per_fat;
        let data_start = root_dir_start + root_dir_sectors;
        if data_start >= total_sectors {
            return Err(invalid(format!(
                "data region starts at sector {} past the end of the volume ({} sectors)",
                data_start, total_sectors
            )));
        }

        let cluster_count = ((total_sectors - data_start) / sectors_per_cluster as u64) as u32;
        let fat_type = if cluster_count < 4085 {
            FatType::Fat12
        } else if cluster_count < 65525 {
            FatType::Fat16
        } else {
            FatType::Fat32
        };

        let root_cluster = if fat_type == FatType::Fat32 {
            let cluster = le_u32(boot, 44)?;
            if cluster < 2 {
                return Err(invalid(format!("invalid root cluster {}", cluster)));
            }
            cluster
        } else {
            if root_entry_count == 0 {
                return Err(invalid("FAT12/16 volume without root entries".to_string()));
            }
            0
        };

        Ok(Self {
            fat_type,
            fat_offset: fat_start * sector,
            root_dir_offset: root_dir_start * sector,
            root_dir_bytes: root_dir_sectors * sector,
            data_offset: data_start * sector,
            cluster_size: sectors_per_cluster as u64 * sector,
            cluster_count,
            root_cluster,
        })
    }

    fn cluster_offset(&self, cluster: u32) -> u64 {
        self.data_offset + (cluster as u64 - 2) * self.cluster_size
    }

    fn is_valid_cluster(&self, cluster: u32) -> bool {
        cluster >= 2 && (cluster as u64) < self.cluster_count as u64 + 2
    }
}

// =============================================================================
// Filesystem
// =============================================================================

#[derive(Debug, Clone)]
struct FatNode {
    first_cluster: u32,
    size: u64,
    is_dir: bool,
    /// Resolved lazily on first read
    chain: Option<Vec<u32>>,
}

pub struct FatFileSystem<R> {
    reader: R,
    geometry: Geometry,
    nodes: Vec<FatNode>,
    /// first cluster -> node, for directories
    dir_nodes: HashMap<u32, NodeRef>,
}

impl<R: Read + Seek> FatFileSystem<R> {
    pub fn open(mut reader: R) -> ExtractResult<Self> {
        let mut boot = [0u8; 512];
        reader
            .seek(SeekFrom::Start(0))
            .and_then(|_| reader.read_exact(&mut boot))
            .map_err(|e| ExtractError::FilesystemOpen(format!("FAT boot sector: {}", e)))?;
        let geometry = Geometry::from_boot_sector(&boot)?;

        debug!(
            fat_type = %geometry.fat_type,
            clusters = geometry.cluster_count,
            cluster_size = geometry.cluster_size,
            "FAT volume opened"
        );

        let root = FatNode {
            first_cluster: geometry.root_cluster,
            size: 0,
            is_dir: true,
            chain: None,
        };
        let mut dir_nodes = HashMap::new();
        dir_nodes.insert(geometry.root_cluster, NodeRef(0));

        Ok(Self {
            reader,
            geometry,
            nodes: vec![root],
            dir_nodes,
        })
    }

    pub fn fat_type(&self) -> FatType {
        self.geometry.fat_type
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        self.reader.seek(SeekFrom::Start(offset))?;
        self.reader.read_exact(buf)
    }

    /// Next cluster in a chain, `None` at end of chain
    fn next_cluster(&mut self, cluster: u32) -> ExtractResult<Option<u32>> {
        let fat_offset = self.geometry.fat_offset;
        let (entry_offset, width) = match self.geometry.fat_type {
            FatType::Fat12 => (cluster as u64 + cluster as u64 / 2, 2),
            FatType::Fat16 => (cluster as u64 * 2, 2),
            FatType::Fat32 => (cluster as u64 * 4, 4),
        };

        let mut raw = [0u8; 4];
        self.read_exact_at(fat_offset + entry_offset, &mut raw[..width])
            .map_err(|e| ExtractError::Read(format!("FAT entry for cluster {}: {}", cluster, e)))?;

        let (value, bad, end) = match self.geometry.fat_type {
            FatType::Fat12 => {
                let entry = u16::from_le_bytes([raw[0], raw[1]]);
                let value = if cluster & 1 != 0 { entry >> 4 } else { entry & 0x0FFF };
                (value as u32, 0x0FF7, 0x0FF8)
            }
            FatType::Fat16 => (u16::from_le_bytes([raw[0], raw[1]]) as u32, 0xFFF7, 0xFFF8),
            FatType::Fat32 => (u32::from_le_bytes(raw) & 0x0FFF_FFFF, 0x0FFF_FFF7, 0x0FFF_FFF8),
        };

        if value >= end {
            Ok(None)
        } else if value == bad {
            Err(ExtractError::Read(format!("cluster {} is marked bad", cluster)))
        } else if value == 0 || !self.geometry.is_valid_cluster(value) {
            // Free or out-of-range link inside a chain: treat as truncated
            trace!(cluster, value, "Broken cluster chain");
            Ok(None)
        } else {
            Ok(Some(value))
        }
    }

    /// Follow a chain from `start`, stopping on loops
    fn cluster_chain(&mut self, start: u32) -> ExtractResult<Vec<u32>> {
        if !self.geometry.is_valid_cluster(start) {
            return Err(ExtractError::Read(format!("invalid start cluster {}", start)));
        }

        let mut chain = vec![start];
        let mut seen = HashSet::from([start]);
        let mut current = start;
        while let Some(next) = self.next_cluster(current)? {
            if !seen.insert(next) {
                warn!(start, next, "Cluster chain loops, truncating");
                break;
            }
            chain.push(next);
            current = next;
        }
        Ok(chain)
    }

    fn node_chain(&mut self, node: NodeRef) -> ExtractResult<Vec<u32>> {
        let idx = node.0 as usize;
        if let Some(chain) = &self.nodes[idx].chain {
            return Ok(chain.clone());
        }
        let first = self.nodes[idx].first_cluster;
        let chain = if first == 0 { Vec::new() } else { self.cluster_chain(first)? };
        self.nodes[idx].chain = Some(chain.clone());
        Ok(chain)
    }

    fn node(&self, node: NodeRef) -> ExtractResult<&FatNode> {
        self.nodes
            .get(node.0 as usize)
            .ok_or_else(|| ExtractError::Read(format!("unknown FAT node {}", node.0)))
    }

    /// Raw bytes of a directory
    fn directory_bytes(&mut self, dir: NodeRef) -> ExtractResult<Vec<u8>> {
        let node = self.node(dir)?;
        if !node.is_dir {
            return Err(ExtractError::DirectoryOpen(format!("node {} is not a directory", dir.0)));
        }

        if node.first_cluster == 0 {
            let mut buf = vec![0u8; self.geometry.root_dir_bytes as usize];
            let offset = self.geometry.root_dir_offset;
            self.read_exact_at(offset, &mut buf)
                .map_err(|e| ExtractError::DirectoryOpen(format!("root directory: {}", e)))?;
            return Ok(buf);
        }

        let chain = self
            .node_chain(dir)
            .map_err(|e| ExtractError::DirectoryOpen(format!("node {}: {}", dir.0, e)))?;
        let cluster_size = self.geometry.cluster_size as usize;
        let mut buf = vec![0u8; chain.len() * cluster_size];
        for (i, &cluster) in chain.iter().enumerate() {
            let offset = self.geometry.cluster_offset(cluster);
            self.read_exact_at(offset, &mut buf[i * cluster_size..(i + 1) * cluster_size])
                .map_err(|e| ExtractError::DirectoryOpen(format!("cluster {}: {}", cluster, e)))?;
        }
        Ok(buf)
    }

    fn intern(&mut self, raw: &RawEntry) -> NodeRef {
        if raw.is_dir {
            if let Some(&existing) = self.dir_nodes.get(&raw.first_cluster) {
                return existing;
            }
        }
        let node = NodeRef(self.nodes.len() as u64);
        self.nodes.push(FatNode {
            first_cluster: raw.first_cluster,
            size: if raw.is_dir { 0 } else { raw.size as u64 },
            is_dir: raw.is_dir,
            chain: None,
        });
        if raw.is_dir {
            self.dir_nodes.insert(raw.first_cluster, node);
        }
        node
    }
}

impl<R: Read + Seek> FileSystem for FatFileSystem<R> {
    fn kind(&self) -> FsKind {
        FsKind::Fat(self.geometry.fat_type)
    }

    fn root(&self) -> NodeRef {
        NodeRef(0)
    }

    fn read_dir(&mut self, dir: NodeRef) -> ExtractResult<Vec<ExtractResult<DirEntry>>> {
        let bytes = self.directory_bytes(dir)?;
        let mut entries = Vec::new();

        for raw in parse_directory(&bytes) {
            if raw.is_dot() {
                continue;
            }
            if raw.first_cluster != 0 && !self.geometry.is_valid_cluster(raw.first_cluster) {
                entries.push(Err(ExtractError::EntryRead(format!(
                    "entry points at invalid cluster {}",
                    raw.first_cluster
                ))));
                continue;
            }
            // A subdirectory pointing back at cluster 0 would alias the root
            if raw.is_dir && raw.first_cluster == 0 {
                entries.push(Err(ExtractError::EntryRead("directory entry without a cluster".to_string())));
                continue;
            }

            let node = self.intern(&raw);
            entries.push(Ok(DirEntry {
                name: raw.name,
                kind: if raw.is_dir { EntryKind::Directory } else { EntryKind::File },
                size: if raw.is_dir { 0 } else { raw.size as u64 },
                node,
            }));
        }

        trace!(node = dir.0, count = entries.len(), "FAT directory listed");
        Ok(entries)
    }

    fn read_at(&mut self, node: NodeRef, offset: u64, len: usize) -> ExtractResult<Vec<u8>> {
        let info = self.node(node).map_err(|e| ExtractError::Extraction(e.to_string()))?;
        if info.is_dir {
            return Err(ExtractError::Extraction(format!("node {} is a directory", node.0)));
        }
        let size = info.size;
        if offset >= size || len == 0 {
            return Ok(Vec::new());
        }

        let chain = self
            .node_chain(node)
            .map_err(|e| ExtractError::Extraction(format!("node {}: {}", node.0, e)))?;
        let cluster_size = self.geometry.cluster_size;
        let want = (size - offset).min(len as u64) as usize;
        let mut out = Vec::with_capacity(want);

        let mut position = offset;
        while out.len() < want {
            let index = (position / cluster_size) as usize;
            let Some(&cluster) = chain.get(index) else {
                // Chain shorter than the declared size
                break;
            };
            let within = position % cluster_size;
            let n = ((cluster_size - within) as usize).min(want - out.len());
            let start = out.len();
            out.resize(start + n, 0);
            let disk_offset = self.geometry.cluster_offset(cluster) + within;
            self.read_exact_at(disk_offset, &mut out[start..])
                .map_err(|e| ExtractError::Extraction(format!("cluster {}: {}", cluster, e)))?;
            position += n as u64;
        }

        Ok(out)
    }
}

// =============================================================================
// Directory Entry Parsing
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct RawEntry {
    name: EntryName,
    short_name: [u8; 11],
    is_dir: bool,
    first_cluster: u32,
    size: u32,
}

impl RawEntry {
    fn is_dot(&self) -> bool {
        &self.short_name == b".          " || &self.short_name == b"..         "
    }
}

/// Long name fragments collected ahead of their short entry
#[derive(Default)]
struct LfnState {
    parts: Vec<Option<[u16; LFN_CHARS_PER_ENTRY]>>,
    checksum: u8,
}

impl LfnState {
    fn reset(&mut self) {
        self.parts.clear();
    }

    fn push(&mut self, slot: &[u8]) {
        let seq = slot[0];
        let index = (seq & LFN_SEQ_MASK) as usize;
        if index == 0 {
            self.reset();
            return;
        }
        if seq & LFN_LAST != 0 {
            self.parts = vec![None; index];
            self.checksum = slot[13];
        } else if self.parts.len() < index || self.checksum != slot[13] {
            // Orphaned fragment
            self.reset();
            return;
        }

        let mut units = [0u16; LFN_CHARS_PER_ENTRY];
        let offsets = (1..11).step_by(2).chain((14..26).step_by(2)).chain((28..32).step_by(2));
        for (unit, off) in units.iter_mut().zip(offsets) {
            *unit = u16::from_le_bytes([slot[off], slot[off + 1]]);
        }
        self.parts[index - 1] = Some(units);
    }

    /// Assembled long name if complete and matching the short entry
    fn take(&mut self, short_name: &[u8; 11]) -> Option<Vec<u16>> {
        if self.parts.is_empty() {
            return None;
        }
        let parts = std::mem::take(&mut self.parts);
        if self.checksum != lfn_checksum(short_name) {
            trace!("LFN checksum mismatch, using short name");
            return None;
        }

        let mut name = Vec::with_capacity(parts.len() * LFN_CHARS_PER_ENTRY);
        for part in parts {
            name.extend_from_slice(&part?);
        }
        if let Some(end) = name.iter().position(|&u| u == 0x0000) {
            name.truncate(end);
        }
        while name.last() == Some(&0xFFFF) {
            name.pop();
        }
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}

pub(crate) fn lfn_checksum(short_name: &[u8; 11]) -> u8 {
    short_name
        .iter()
        .fold(0u8, |sum, &b| ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(b))
}

/// "NAME    TXT" -> b"NAME.TXT", honouring the NT lowercase flags
fn short_name_bytes(raw: &[u8; 11], nt_flags: u8) -> Vec<u8> {
    let mut base: Vec<u8> = raw[..8].iter().copied().collect();
    if base.first() == Some(&ENTRY_KANJI_E5) {
        base[0] = ENTRY_DELETED;
    }
    while base.last() == Some(&b' ') {
        base.pop();
    }
    let mut ext: Vec<u8> = raw[8..].iter().copied().collect();
    while ext.last() == Some(&b' ') {
        ext.pop();
    }

    if nt_flags & NT_LOWER_BASE != 0 {
        base.make_ascii_lowercase();
    }
    if nt_flags & NT_LOWER_EXT != 0 {
        ext.make_ascii_lowercase();
    }

    if !ext.is_empty() {
        base.push(b'.');
        base.extend_from_slice(&ext);
    }
    base
}

fn parse_directory(bytes: &[u8]) -> Vec<RawEntry> {
    let mut entries = Vec::new();
    let mut lfn = LfnState::default();

    for slot in bytes.chunks_exact(DIR_ENTRY_SIZE) {
        match slot[0] {
            ENTRY_END => break,
            ENTRY_DELETED => {
                lfn.reset();
                continue;
            }
            _ => {}
        }

        let attr = slot[11];
        if attr & 0x3F == ATTR_LFN {
            lfn.push(slot);
            continue;
        }
        if attr & ATTR_VOLUME_ID != 0 {
            lfn.reset();
            continue;
        }

        let mut short_name = [0u8; 11];
        short_name.copy_from_slice(&slot[..11]);

        let name = match lfn.take(&short_name) {
            Some(units) => EntryName::Utf16(units),
            None => EntryName::Bytes(short_name_bytes(&short_name, slot[12])),
        };

        let hi = u16::from_le_bytes([slot[20], slot[21]]) as u32;
        let lo = u16::from_le_bytes([slot[26], slot[27]]) as u32;
        let size = u32::from_le_bytes([slot[28], slot[29], slot[30], slot[31]]);

        entries.push(RawEntry {
            name,
            short_name,
            is_dir: attr & ATTR_DIRECTORY != 0,
            first_cluster: (hi << 16) | lo,
            size,
        });
    }

    entries
}
