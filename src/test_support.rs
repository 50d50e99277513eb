//! Fixtures shared by unit tests: in-memory sources, a scriptable
//! filesystem and builders for FAT volumes, partition tables and EWF sets.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::codec::decode_name;
use crate::error::{ExtractError, ExtractResult};
use crate::fs::{DirEntry, EntryKind, EntryName, FileSystem, FsKind, NodeRef};
use crate::image::ImageSource;

// =============================================================================
// MemorySource
// =============================================================================

pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl ImageSource for MemorySource {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> ExtractResult<usize> {
        let len = self.data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn close(&mut self) {}
}

// =============================================================================
// MemoryFs
// =============================================================================

enum Child {
    Entry { name: EntryName, node: usize },
    Broken,
}

struct MemNode {
    path: String,
    is_dir: bool,
    content: Vec<u8>,
    declared_size: Option<u64>,
    children: Vec<Child>,
    fail_listing: bool,
    fail_reads_from: Option<u64>,
}

impl MemNode {
    fn new(path: String, is_dir: bool) -> Self {
        Self {
            path,
            is_dir,
            content: Vec::new(),
            declared_size: None,
            children: Vec::new(),
            fail_listing: false,
            fail_reads_from: None,
        }
    }
}

/// Filesystem built from paths, with knobs for injecting failures
pub struct MemoryFs {
    nodes: Vec<MemNode>,
    listed: Vec<String>,
    reads: Vec<(NodeRef, u64, usize)>,
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("/", path),
    }
}

impl MemoryFs {
    pub fn new() -> Self {
        Self {
            nodes: vec![MemNode::new("/".to_string(), true)],
            listed: Vec::new(),
            reads: Vec::new(),
        }
    }

    fn lookup(&self, dir: usize, name: &str) -> Option<usize> {
        self.nodes[dir].children.iter().find_map(|c| match c {
            Child::Entry { name: n, node } if decode_name(n) == name => Some(*node),
            _ => None,
        })
    }

    fn find(&self, path: &str) -> usize {
        components(path)
            .try_fold(0, |dir, name| self.lookup(dir, name))
            .unwrap_or_else(|| panic!("no such path {}", path))
    }

    fn add_child(&mut self, parent: usize, name: EntryName, is_dir: bool) -> usize {
        let path = child_path(&self.nodes[parent].path, &decode_name(&name));
        let node = self.nodes.len();
        self.nodes.push(MemNode::new(path, is_dir));
        self.nodes[parent].children.push(Child::Entry { name, node });
        node
    }

    fn ensure_dir(&mut self, path: &str) -> usize {
        let mut dir = 0;
        for name in components(path) {
            dir = match self.lookup(dir, name) {
                Some(existing) => existing,
                None => self.add_child(dir, EntryName::from(name), true),
            };
        }
        dir
    }

    pub fn file(mut self, path: &str, content: &[u8]) -> Self {
        let (parent, name) = split_parent(path);
        let dir = self.ensure_dir(parent);
        let node = self.add_child(dir, EntryName::from(name), false);
        self.nodes[node].content = content.to_vec();
        self
    }

    pub fn named_dir(mut self, parent: &str, name: EntryName) -> Self {
        let dir = self.ensure_dir(parent);
        self.add_child(dir, name, true);
        self
    }

    /// Extra directory entry under `parent` pointing at an existing node
    pub fn link(mut self, parent: &str, name: &str, target: &str) -> Self {
        let dir = self.ensure_dir(parent);
        let node = self.find(target);
        self.nodes[dir].children.push(Child::Entry {
            name: EntryName::from(name),
            node,
        });
        self
    }

    pub fn fail_directory(mut self, path: &str) -> Self {
        let node = self.find(path);
        self.nodes[node].fail_listing = true;
        self
    }

    pub fn broken_entry(mut self, path: &str) -> Self {
        let node = self.find(path);
        self.nodes[node].children.push(Child::Broken);
        self
    }

    pub fn declare_size(mut self, path: &str, size: u64) -> Self {
        let node = self.find(path);
        self.nodes[node].declared_size = Some(size);
        self
    }

    /// Reads at or past `offset` fail
    pub fn fail_reads_from(mut self, path: &str, offset: u64) -> Self {
        let node = self.find(path);
        self.nodes[node].fail_reads_from = Some(offset);
        self
    }

    pub fn node_of(&self, path: &str) -> NodeRef {
        NodeRef(self.find(path) as u64)
    }

    /// Paths handed to `read_dir`, in call order
    pub fn listed_paths(&self) -> &[String] {
        &self.listed
    }

    /// `(node, offset, len)` for every `read_at` call
    pub fn read_log(&self) -> &[(NodeRef, u64, usize)] {
        &self.reads
    }

    fn node(&self, node: NodeRef) -> ExtractResult<&MemNode> {
        self.nodes
            .get(node.0 as usize)
            .ok_or_else(|| ExtractError::Read(format!("unknown node {}", node.0)))
    }
}

impl FileSystem for MemoryFs {
    fn kind(&self) -> FsKind {
        FsKind::Memory
    }

    fn root(&self) -> NodeRef {
        NodeRef(0)
    }

    fn read_dir(&mut self, dir: NodeRef) -> ExtractResult<Vec<ExtractResult<DirEntry>>> {
        let node = self.node(dir)?;
        if !node.is_dir {
            return Err(ExtractError::DirectoryOpen(format!("{} is not a directory", node.path)));
        }
        let path = node.path.clone();
        if node.fail_listing {
            self.listed.push(path.clone());
            return Err(ExtractError::DirectoryOpen(format!("cannot open {}", path)));
        }

        let entries = node
            .children
            .iter()
            .map(|child| match child {
                Child::Entry { name, node } => {
                    let target = &self.nodes[*node];
                    Ok(DirEntry {
                        name: name.clone(),
                        kind: if target.is_dir { EntryKind::Directory } else { EntryKind::File },
                        size: target.declared_size.unwrap_or(target.content.len() as u64),
                        node: NodeRef(*node as u64),
                    })
                }
                Child::Broken => Err(ExtractError::EntryRead(format!("corrupt entry in {}", path))),
            })
            .collect();
        self.listed.push(path);
        Ok(entries)
    }

    fn read_at(&mut self, node: NodeRef, offset: u64, len: usize) -> ExtractResult<Vec<u8>> {
        self.reads.push((node, offset, len));
        let info = self.node(node)?;
        if let Some(limit) = info.fail_reads_from {
            if offset >= limit {
                return Err(ExtractError::Read(format!("injected failure at {}", offset)));
            }
        }
        let content = &info.content;
        let start = (offset as usize).min(content.len());
        let end = start.saturating_add(len).min(content.len());
        Ok(content[start..end].to_vec())
    }
}

// =============================================================================
// FAT12 volume builder
// =============================================================================

const FAT_SECTOR: usize = 512;
const FAT_TOTAL_SECTORS: usize = 2048;
const FAT_SECTORS_PER_FAT: usize = 6;
const FAT_ROOT_ENTRIES: usize = 512;
const FAT_ROOT_START: usize = 1 + FAT_SECTORS_PER_FAT;
const FAT_DATA_START: usize = FAT_ROOT_START + FAT_ROOT_ENTRIES * 32 / FAT_SECTOR;

enum FatItem {
    Dir { name: String, items: Vec<FatItem> },
    File { name: String, content: Vec<u8>, bad_lfn: bool },
    Deleted { name: String },
    Label(String),
}

/// FAT12 image: 512-byte sectors, one sector per cluster, one FAT.
/// Clusters are handed out with a one-cluster gap so chains are fragmented.
pub struct FatImageBuilder {
    root: Vec<FatItem>,
}

impl FatImageBuilder {
    pub fn new() -> Self {
        Self { root: Vec::new() }
    }

    fn dir_for<'a>(items: &'a mut Vec<FatItem>, parents: &[&str]) -> &'a mut Vec<FatItem> {
        let Some((first, rest)) = parents.split_first() else {
            return items;
        };
        let pos = items
            .iter()
            .position(|i| matches!(i, FatItem::Dir { name, .. } if name == first))
            .unwrap_or_else(|| {
                items.push(FatItem::Dir {
                    name: first.to_string(),
                    items: Vec::new(),
                });
                items.len() - 1
            });
        match &mut items[pos] {
            FatItem::Dir { items, .. } => Self::dir_for(items, rest),
            _ => unreachable!(),
        }
    }

    fn insert(&mut self, path: &str, make: impl FnOnce(String) -> FatItem) {
        let parts: Vec<&str> = components(path).collect();
        let (name, parents) = parts.split_last().expect("empty path");
        Self::dir_for(&mut self.root, parents).push(make(name.to_string()));
    }

    pub fn file(mut self, path: &str, content: &[u8]) -> Self {
        self.insert(path, |name| FatItem::File {
            name,
            content: content.to_vec(),
            bad_lfn: false,
        });
        self
    }

    /// File whose long-name entries carry a wrong checksum
    pub fn file_with_bad_lfn(mut self, path: &str, content: &[u8]) -> Self {
        self.insert(path, |name| FatItem::File {
            name,
            content: content.to_vec(),
            bad_lfn: true,
        });
        self
    }

    pub fn deleted_file(mut self, path: &str) -> Self {
        self.insert(path, |name| FatItem::Deleted { name });
        self
    }

    pub fn volume_label(mut self, label: &str) -> Self {
        self.root.push(FatItem::Label(label.to_string()));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut writer = FatWriter {
            image: vec![0u8; FAT_TOTAL_SECTORS * FAT_SECTOR],
            next_cluster: 2,
        };
        writer.write_boot_sector();
        writer.set_fat(0, 0xFF8);
        writer.set_fat(1, 0xFFF);

        let root = writer.directory_bytes(&self.root, 0, 0);
        assert!(root.len() <= FAT_ROOT_ENTRIES * 32, "root directory overflow");
        let start = FAT_ROOT_START * FAT_SECTOR;
        writer.image[start..start + root.len()].copy_from_slice(&root);
        writer.image
    }
}

struct FatWriter {
    image: Vec<u8>,
    next_cluster: u32,
}

impl FatWriter {
    fn write_boot_sector(&mut self) {
        let boot = &mut self.image[..FAT_SECTOR];
        boot[..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
        boot[3..11].copy_from_slice(b"MSDOS5.0");
        boot[11..13].copy_from_slice(&(FAT_SECTOR as u16).to_le_bytes());
        boot[13] = 1;
        boot[14..16].copy_from_slice(&1u16.to_le_bytes());
        boot[16] = 1;
        boot[17..19].copy_from_slice(&(FAT_ROOT_ENTRIES as u16).to_le_bytes());
        boot[19..21].copy_from_slice(&(FAT_TOTAL_SECTORS as u16).to_le_bytes());
        boot[21] = 0xF8;
        boot[22..24].copy_from_slice(&(FAT_SECTORS_PER_FAT as u16).to_le_bytes());
        boot[54..62].copy_from_slice(b"FAT12   ");
        boot[510] = 0x55;
        boot[511] = 0xAA;
    }

    fn set_fat(&mut self, cluster: u32, value: u16) {
        let fat = &mut self.image[FAT_SECTOR..FAT_SECTOR * (1 + FAT_SECTORS_PER_FAT)];
        let off = (cluster + cluster / 2) as usize;
        if cluster & 1 != 0 {
            fat[off] = (fat[off] & 0x0F) | ((value << 4) as u8 & 0xF0);
            fat[off + 1] = (value >> 4) as u8;
        } else {
            fat[off] = value as u8;
            fat[off + 1] = (fat[off + 1] & 0xF0) | ((value >> 8) as u8 & 0x0F);
        }
    }

    /// Allocate a chain of `count` clusters and write `data` into it
    fn store(&mut self, data: &[u8], count: usize) -> u32 {
        if count == 0 {
            return 0;
        }
        let chain: Vec<u32> = (0..count)
            .map(|_| {
                let c = self.next_cluster;
                self.next_cluster += 2;
                c
            })
            .collect();
        for (i, &cluster) in chain.iter().enumerate() {
            let next = chain.get(i + 1).map(|&n| n as u16).unwrap_or(0xFFF);
            self.set_fat(cluster, next);
            let piece = &data[(i * FAT_SECTOR).min(data.len())..((i + 1) * FAT_SECTOR).min(data.len())];
            let offset = (FAT_DATA_START + cluster as usize - 2) * FAT_SECTOR;
            self.image[offset..offset + piece.len()].copy_from_slice(piece);
        }
        chain[0]
    }

    /// Serialized entries of a directory at `self_cluster` (0 for the root)
    fn directory_bytes(&mut self, items: &[FatItem], self_cluster: u32, parent_cluster: u32) -> Vec<u8> {
        let mut out = Vec::new();
        if self_cluster != 0 {
            out.extend(short_entry(*b".          ", 0x10, self_cluster, 0));
            out.extend(short_entry(*b"..         ", 0x10, parent_cluster, 0));
        }

        let mut tail = 1;
        for item in items {
            match item {
                FatItem::Label(label) => {
                    let mut name = [b' '; 11];
                    name[..label.len().min(11)].copy_from_slice(&label.as_bytes()[..label.len().min(11)]);
                    out.extend(short_entry(name, 0x08, 0, 0));
                }
                FatItem::Deleted { name } => {
                    let mut short = generated_short_name(name, tail);
                    tail += 1;
                    short[0] = 0xE5;
                    out.extend(short_entry(short, 0x20, 0, 0));
                }
                FatItem::File { name, content, bad_lfn } => {
                    let clusters = content.len().div_ceil(FAT_SECTOR);
                    let first = self.store(content, clusters);
                    let (short, long) = entry_names(name, &mut tail);
                    if let Some(units) = long {
                        out.extend(lfn_entries(&units, &short, *bad_lfn));
                    }
                    out.extend(short_entry(short, 0x20, first, content.len() as u32));
                }
                FatItem::Dir { name, items } => {
                    // Dot entries, then at most three LFN slots plus one short slot per child
                    let slots = 2 + items.len() * 4;
                    let clusters = (slots * 32).div_ceil(FAT_SECTOR);
                    let first = self.store(&[], clusters);
                    let bytes = self.directory_bytes(items, first, self_cluster);
                    assert!(bytes.len() <= clusters * FAT_SECTOR, "directory overflow");
                    self.write_chain(first, &bytes);

                    let (short, long) = entry_names(name, &mut tail);
                    if let Some(units) = long {
                        out.extend(lfn_entries(&units, &short, false));
                    }
                    out.extend(short_entry(short, 0x10, first, 0));
                }
            }
        }
        out
    }

    fn write_chain(&mut self, first: u32, data: &[u8]) {
        let mut cluster = first;
        for piece in data.chunks(FAT_SECTOR) {
            let offset = (FAT_DATA_START + cluster as usize - 2) * FAT_SECTOR;
            self.image[offset..offset + piece.len()].copy_from_slice(piece);
            cluster += 2;
        }
    }
}

fn short_entry(name: [u8; 11], attr: u8, cluster: u32, size: u32) -> [u8; 32] {
    let mut e = [0u8; 32];
    e[..11].copy_from_slice(&name);
    e[11] = attr;
    e[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
    e[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
    e[28..32].copy_from_slice(&size.to_le_bytes());
    e
}

fn is_short_upper(name: &str) -> bool {
    let (base, ext) = name.rsplit_once('.').unwrap_or((name, ""));
    let valid = |s: &str| s.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_');
    (1..=8).contains(&base.len()) && ext.len() <= 3 && !ext.contains('.') && valid(base) && valid(ext)
}

fn padded_short(base: &str, ext: &str) -> [u8; 11] {
    let mut short = [b' '; 11];
    short[..base.len()].copy_from_slice(base.as_bytes());
    short[8..8 + ext.len()].copy_from_slice(ext.as_bytes());
    short
}

/// `NAME~N.EXT` from the first alphanumerics of the long name
fn generated_short_name(name: &str, tail: usize) -> [u8; 11] {
    let (base, ext) = name.rsplit_once('.').unwrap_or((name, ""));
    let clean = |s: &str, n: usize| -> String {
        s.chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .take(n)
            .collect()
    };
    let mut base = clean(base, 6);
    if base.is_empty() {
        base.push('X');
    }
    padded_short(&format!("{}~{}", base, tail), &clean(ext, 3))
}

fn entry_names(name: &str, tail: &mut usize) -> ([u8; 11], Option<Vec<u16>>) {
    if is_short_upper(name) {
        let (base, ext) = name.rsplit_once('.').unwrap_or((name, ""));
        return (padded_short(base, ext), None);
    }
    let short = generated_short_name(name, *tail);
    *tail += 1;
    (short, Some(name.encode_utf16().collect()))
}

fn short_checksum(short: &[u8; 11]) -> u8 {
    short
        .iter()
        .fold(0u8, |sum, &b| ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(b))
}

fn lfn_entries(units: &[u16], short: &[u8; 11], bad_checksum: bool) -> Vec<u8> {
    let mut padded = units.to_vec();
    if padded.len() % 13 != 0 {
        padded.push(0x0000);
        while padded.len() % 13 != 0 {
            padded.push(0xFFFF);
        }
    }
    let checksum = short_checksum(short).wrapping_add(bad_checksum as u8);
    let count = padded.len() / 13;

    let mut out = Vec::with_capacity(count * 32);
    for seq in (1..=count).rev() {
        let part = &padded[(seq - 1) * 13..seq * 13];
        let mut e = [0u8; 32];
        e[0] = seq as u8 | if seq == count { 0x40 } else { 0 };
        e[11] = 0x0F;
        e[13] = checksum;
        let offsets = (1..11).step_by(2).chain((14..26).step_by(2)).chain((28..32).step_by(2));
        for (&unit, off) in part.iter().zip(offsets) {
            e[off..off + 2].copy_from_slice(&unit.to_le_bytes());
        }
        out.extend_from_slice(&e);
    }
    out
}

// =============================================================================
// Partition tables
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct MbrPartition {
    pub partition_type: u8,
    pub start_lba: u32,
    pub sector_count: u32,
}

impl MbrPartition {
    pub fn new(partition_type: u8, start_lba: u32, sector_count: u32) -> Self {
        Self {
            partition_type,
            start_lba,
            sector_count,
        }
    }
}

/// Write one 16-byte table entry into a 512-byte MBR/EBR sector
pub fn write_mbr_entry(sector: &mut [u8], slot: usize, partition_type: u8, start_lba: u32, sector_count: u32) {
    let e = &mut sector[446 + slot * 16..446 + (slot + 1) * 16];
    e[0] = 0x00;
    e[4] = partition_type;
    e[8..12].copy_from_slice(&start_lba.to_le_bytes());
    e[12..16].copy_from_slice(&sector_count.to_le_bytes());
}

/// Zeroed disk of `total_sectors` 512-byte sectors with an MBR
pub fn mbr_disk(total_sectors: usize, partitions: &[MbrPartition]) -> Vec<u8> {
    let mut disk = vec![0u8; total_sectors * 512];
    for (slot, p) in partitions.iter().enumerate() {
        write_mbr_entry(&mut disk[..512], slot, p.partition_type, p.start_lba, p.sector_count);
    }
    disk[510] = 0x55;
    disk[511] = 0xAA;
    disk
}

#[derive(Debug, Clone)]
pub struct GptPartition {
    pub type_guid: [u8; 16],
    pub first_lba: u64,
    pub last_lba: u64,
    pub name: String,
}

impl GptPartition {
    pub fn new(type_guid: [u8; 16], first_lba: u64, last_lba: u64, name: &str) -> Self {
        Self {
            type_guid,
            first_lba,
            last_lba,
            name: name.to_string(),
        }
    }
}

/// Protective MBR, GPT header at LBA 1 and 128 entries of 128 bytes at LBA 2
pub fn gpt_disk(total_sectors: usize, partitions: &[GptPartition]) -> Vec<u8> {
    let mut disk = mbr_disk(
        total_sectors,
        &[MbrPartition::new(0xEE, 1, total_sectors as u32 - 1)],
    );

    let header = &mut disk[512..1024];
    header[..8].copy_from_slice(b"EFI PART");
    header[8..12].copy_from_slice(&0x0001_0000u32.to_le_bytes());
    header[12..16].copy_from_slice(&92u32.to_le_bytes());
    header[24..32].copy_from_slice(&1u64.to_le_bytes());
    header[72..80].copy_from_slice(&2u64.to_le_bytes());
    header[80..84].copy_from_slice(&128u32.to_le_bytes());
    header[84..88].copy_from_slice(&128u32.to_le_bytes());

    for (i, p) in partitions.iter().enumerate() {
        let start = 1024 + i * 128;
        let e = &mut disk[start..start + 128];
        e[..16].copy_from_slice(&p.type_guid);
        e[16] = i as u8 + 1;
        e[32..40].copy_from_slice(&p.first_lba.to_le_bytes());
        e[40..48].copy_from_slice(&p.last_lba.to_le_bytes());
        for (j, unit) in p.name.encode_utf16().take(36).enumerate() {
            e[56 + j * 2..58 + j * 2].copy_from_slice(&unit.to_le_bytes());
        }
    }
    disk
}

// =============================================================================
// EWF segment builder
// =============================================================================

pub struct EwfLayout {
    pub sectors_per_chunk: u32,
    pub chunks_per_segment: usize,
    /// Whether chunk `i` is stored zlib-compressed
    pub compress: fn(usize) -> bool,
}

const EWF_BYTES_PER_SECTOR: usize = 512;

fn ewf_descriptor(out: &mut Vec<u8>, kind: &str, next: u64, size: u64) {
    let mut d = [0u8; 76];
    d[..kind.len()].copy_from_slice(kind.as_bytes());
    d[16..24].copy_from_slice(&next.to_le_bytes());
    d[24..32].copy_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&d);
}

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// EWF v1 segment files holding `media`; the volume section is in the first
pub fn build_ewf_segments(media: &[u8], layout: &EwfLayout) -> Vec<Vec<u8>> {
    let chunk_size = layout.sectors_per_chunk as usize * EWF_BYTES_PER_SECTOR;
    let sector_count = media.len().div_ceil(EWF_BYTES_PER_SECTOR);
    let mut padded = media.to_vec();
    padded.resize(sector_count * EWF_BYTES_PER_SECTOR, 0);

    let chunks: Vec<&[u8]> = padded.chunks(chunk_size).collect();
    let groups: Vec<&[&[u8]]> = chunks.chunks(layout.chunks_per_segment.max(1)).collect();
    let mut segments = Vec::with_capacity(groups.len());
    let mut chunk_index = 0;

    for (seg, group) in groups.iter().enumerate() {
        let mut out = Vec::new();
        out.extend_from_slice(b"EVF\x09\x0d\x0a\xff\x00");
        out.push(0x01);
        out.extend_from_slice(&(seg as u16 + 1).to_le_bytes());
        out.extend_from_slice(&[0, 0]);

        if seg == 0 {
            let start = out.len() as u64;
            let size = 76 + 1052;
            ewf_descriptor(&mut out, "volume", start + size, size);
            let mut volume = [0u8; 1052];
            volume[0] = 0x01;
            volume[4..8].copy_from_slice(&(chunks.len() as u32).to_le_bytes());
            volume[8..12].copy_from_slice(&layout.sectors_per_chunk.to_le_bytes());
            volume[12..16].copy_from_slice(&(EWF_BYTES_PER_SECTOR as u32).to_le_bytes());
            volume[16..24].copy_from_slice(&(sector_count as u64).to_le_bytes());
            out.extend_from_slice(&volume);
        }

        // Chunk payloads
        let mut payload = Vec::new();
        let mut offsets = Vec::with_capacity(group.len());
        let sectors_start = out.len() as u64;
        for chunk in group.iter() {
            let at = sectors_start + 76 + payload.len() as u64;
            if (layout.compress)(chunk_index) {
                offsets.push(at as u32 | 0x8000_0000);
                payload.extend(zlib(chunk));
            } else {
                offsets.push(at as u32);
                payload.extend_from_slice(chunk);
                payload.extend_from_slice(&[0u8; 4]);
            }
            chunk_index += 1;
        }
        let size = 76 + payload.len() as u64;
        ewf_descriptor(&mut out, "sectors", sectors_start + size, size);
        out.extend(payload);

        let table_start = out.len() as u64;
        let size = 76 + 24 + offsets.len() as u64 * 4 + 4;
        ewf_descriptor(&mut out, "table", table_start + size, size);
        let mut header = [0u8; 24];
        header[..4].copy_from_slice(&(offsets.len() as u32).to_le_bytes());
        out.extend_from_slice(&header);
        for offset in &offsets {
            out.extend_from_slice(&offset.to_le_bytes());
        }
        out.extend_from_slice(&[0u8; 4]);

        let last = seg + 1 == groups.len();
        let end = out.len() as u64;
        ewf_descriptor(&mut out, if last { "done" } else { "next" }, end, 76);
        segments.push(out);
    }

    segments
}
