//! Partition discovery (MBR with extended chains, GPT)
//!
//! `read_partition_table` lists every slot the way forensic volume-system
//! readers do: table sectors and extended containers as metadata, the gaps
//! between partitions as unallocated, and the partitions themselves as
//! allocated. `list_volumes` keeps only the allocated ones and turns any
//! failure into [`VolumeListing::NoPartitionTable`].

mod gpt;
mod mbr;

use serde::Serialize;
use tracing::debug;

use crate::error::{ExtractError, ExtractResult};
use crate::image::ImageHandle;

const MAX_SECTOR_SIZE: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VolumeFlag {
    Allocated,
    Unallocated,
    Meta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TableScheme {
    Mbr,
    Gpt,
}

/// One slot of a partition table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Volume {
    /// Position in the full slot list
    pub index: usize,
    pub start_sector: u64,
    pub length_sectors: u64,
    /// Byte offset of the slot in the image
    pub start: u64,
    /// Length in bytes
    pub length: u64,
    pub description: String,
    pub flag: VolumeFlag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTable {
    pub scheme: TableScheme,
    pub sector_size: u64,
    pub slots: Vec<Volume>,
}

impl PartitionTable {
    pub fn allocated(&self) -> impl Iterator<Item = &Volume> {
        self.slots.iter().filter(|v| v.flag == VolumeFlag::Allocated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeListing {
    Partitioned(Vec<Volume>),
    NoPartitionTable,
}

/// A slot before indexing and gap filling
#[derive(Debug, Clone)]
pub(crate) struct RawSlot {
    pub start_sector: u64,
    pub length_sectors: u64,
    pub description: String,
    pub flag: VolumeFlag,
}

impl RawSlot {
    pub fn new(start_sector: u64, length_sectors: u64, description: impl Into<String>, flag: VolumeFlag) -> Self {
        Self {
            start_sector,
            length_sectors,
            description: description.into(),
            flag,
        }
    }

    fn end_sector(&self) -> ExtractResult<u64> {
        self.start_sector.checked_add(self.length_sectors).ok_or_else(|| {
            ExtractError::VolumeEnumeration(format!(
                "slot at sector {} with {} sectors overflows",
                self.start_sector, self.length_sectors
            ))
        })
    }
}

/// Allocated partitions, or `NoPartitionTable` on any failure
pub fn list_volumes(image: &mut ImageHandle, sector_size: u64) -> VolumeListing {
    match read_partition_table(image, sector_size) {
        Ok(table) => {
            let volumes: Vec<Volume> = table.allocated().cloned().collect();
            debug!(
                scheme = ?table.scheme,
                slots = table.slots.len(),
                allocated = volumes.len(),
                "Partition table read"
            );
            VolumeListing::Partitioned(volumes)
        }
        Err(e) => {
            debug!(error = %e, "No usable partition table, treating image as a single filesystem");
            VolumeListing::NoPartitionTable
        }
    }
}

/// Every slot of the MBR or GPT at the start of the image
pub fn read_partition_table(image: &mut ImageHandle, sector_size: u64) -> ExtractResult<PartitionTable> {
    if !(512..=MAX_SECTOR_SIZE).contains(&sector_size) || !sector_size.is_power_of_two() {
        return Err(ExtractError::VolumeEnumeration(format!("unsupported sector size {}", sector_size)));
    }

    let sector0 = read_sector(image, 0, sector_size)?;
    let entries = mbr::parse_mbr_sector(&sector0)?;

    let (scheme, raw_slots) = if entries.iter().any(|e| e.partition_type == mbr::PROTECTIVE_GPT) {
        (TableScheme::Gpt, gpt::read_gpt(image, sector_size)?)
    } else {
        (TableScheme::Mbr, mbr::read_mbr(image, sector_size, &entries)?)
    };

    let total_sectors = image.size() / sector_size;
    let slots = finalize_slots(raw_slots, total_sectors, sector_size)?;
    Ok(PartitionTable {
        scheme,
        sector_size,
        slots,
    })
}

pub(crate) fn read_sector(image: &mut ImageHandle, sector: u64, sector_size: u64) -> ExtractResult<Vec<u8>> {
    let offset = sector
        .checked_mul(sector_size)
        .ok_or_else(|| ExtractError::VolumeEnumeration(format!("sector {} is out of range", sector)))?;
    let data = image
        .read(offset, sector_size as usize)
        .map_err(|e| ExtractError::VolumeEnumeration(format!("sector {}: {}", sector, e)))?;
    if data.len() < sector_size as usize {
        return Err(ExtractError::VolumeEnumeration(format!("sector {} is past the end of the image", sector)));
    }
    Ok(data)
}

/// Sort, insert unallocated gaps and number the slots
fn finalize_slots(mut raw: Vec<RawSlot>, total_sectors: u64, sector_size: u64) -> ExtractResult<Vec<Volume>> {
    // Metadata sorts before a partition starting on the same sector
    raw.sort_by_key(|s| (s.start_sector, s.flag != VolumeFlag::Meta));

    let mut ordered = Vec::with_capacity(raw.len() * 2 + 1);
    let mut covered = 0u64;
    for slot in raw {
        if slot.start_sector > covered {
            ordered.push(RawSlot::new(
                covered,
                slot.start_sector - covered,
                "Unallocated",
                VolumeFlag::Unallocated,
            ));
        }
        covered = covered.max(slot.end_sector()?);
        ordered.push(slot);
    }
    if total_sectors > covered {
        ordered.push(RawSlot::new(covered, total_sectors - covered, "Unallocated", VolumeFlag::Unallocated));
    }

    let to_bytes = |sectors: u64| {
        sectors.checked_mul(sector_size).ok_or_else(|| {
            ExtractError::VolumeEnumeration(format!("{} sectors overflow a byte offset", sectors))
        })
    };

    ordered
        .into_iter()
        .enumerate()
        .map(|(index, s)| {
            Ok(Volume {
                index,
                start_sector: s.start_sector,
                length_sectors: s.length_sectors,
                start: to_bytes(s.start_sector)?,
                length: to_bytes(s.length_sectors)?,
                description: s.description,
                flag: s.flag,
            })
        })
        .collect()
}
