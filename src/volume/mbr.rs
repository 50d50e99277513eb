// DOS/MBR partition table with extended (EBR) chains

use std::collections::HashSet;
use tracing::{debug, trace, warn};

use crate::common::binary::le_u32;
use crate::error::{ExtractError, ExtractResult};
use crate::fs::detect_filesystem;
use crate::image::ImageHandle;

use super::{read_sector, RawSlot, VolumeFlag};

const ENTRY_TABLE_OFFSET: usize = 446;
const ENTRY_SIZE: usize = 16;
pub(crate) const PROTECTIVE_GPT: u8 = 0xEE;

/// Longest EBR chain followed before assuming a loop
const MAX_LOGICAL_PARTITIONS: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MbrEntry {
    pub boot_flag: u8,
    pub partition_type: u8,
    pub start_lba: u32,
    pub sector_count: u32,
}

impl MbrEntry {
    fn parse(raw: &[u8]) -> ExtractResult<Self> {
        Ok(Self {
            boot_flag: raw[0],
            partition_type: raw[4],
            start_lba: le_u32(raw, 8)?,
            sector_count: le_u32(raw, 12)?,
        })
    }

    fn is_empty(&self) -> bool {
        self.partition_type == 0 || self.sector_count == 0
    }

    fn is_extended(&self) -> bool {
        matches!(self.partition_type, 0x05 | 0x0F | 0x85)
    }
}

fn has_boot_signature(sector: &[u8]) -> bool {
    sector.len() >= 512 && sector[510] == 0x55 && sector[511] == 0xAA
}

fn table_entries(sector: &[u8]) -> ExtractResult<Vec<MbrEntry>> {
    (0..4)
        .map(|i| {
            let start = ENTRY_TABLE_OFFSET + i * ENTRY_SIZE;
            MbrEntry::parse(&sector[start..start + ENTRY_SIZE])
        })
        .collect()
}

/// Validate sector 0 and return its non-empty entries
pub(crate) fn parse_mbr_sector(sector: &[u8]) -> ExtractResult<Vec<MbrEntry>> {
    if !has_boot_signature(sector) {
        return Err(ExtractError::VolumeEnumeration("no 0x55AA signature in sector 0".to_string()));
    }
    if let Some(kind) = detect_filesystem(sector) {
        return Err(ExtractError::VolumeEnumeration(format!(
            "sector 0 is a {} boot sector",
            kind
        )));
    }

    let entries = table_entries(sector)?;
    if entries.iter().any(|e| e.boot_flag != 0x00 && e.boot_flag != 0x80) {
        return Err(ExtractError::VolumeEnumeration("invalid boot indicator in MBR".to_string()));
    }

    let used: Vec<MbrEntry> = entries.into_iter().filter(|e| !e.is_empty()).collect();
    if used.is_empty() {
        return Err(ExtractError::VolumeEnumeration("MBR has no partitions".to_string()));
    }
    Ok(used)
}

/// Slot list for a DOS partition table, following extended chains
pub(crate) fn read_mbr(image: &mut ImageHandle, sector_size: u64, entries: &[MbrEntry]) -> ExtractResult<Vec<RawSlot>> {
    let mut slots = vec![RawSlot::new(0, 1, "Primary Table (#0)", VolumeFlag::Meta)];
    let mut table_number = 1;

    for entry in entries {
        let description = partition_description(entry.partition_type);
        if entry.is_extended() {
            slots.push(RawSlot::new(
                entry.start_lba as u64,
                entry.sector_count as u64,
                description,
                VolumeFlag::Meta,
            ));
            read_extended_chain(image, sector_size, entry.start_lba as u64, &mut slots, &mut table_number);
        } else {
            trace!(lba = entry.start_lba, sectors = entry.sector_count, %description, "Primary partition");
            slots.push(RawSlot::new(
                entry.start_lba as u64,
                entry.sector_count as u64,
                description,
                VolumeFlag::Allocated,
            ));
        }
    }

    Ok(slots)
}

/// Walk the EBR linked list; a broken link ends the chain, keeping what was found
fn read_extended_chain(
    image: &mut ImageHandle,
    sector_size: u64,
    extended_base: u64,
    slots: &mut Vec<RawSlot>,
    table_number: &mut usize,
) {
    let mut seen = HashSet::new();
    let mut current = extended_base;

    for _ in 0..MAX_LOGICAL_PARTITIONS {
        if !seen.insert(current) {
            warn!(sector = current, "Extended partition chain loops");
            return;
        }

        let sector = match read_sector(image, current, sector_size) {
            Ok(sector) if has_boot_signature(&sector) => sector,
            Ok(_) => {
                debug!(sector = current, "EBR without signature, ending chain");
                return;
            }
            Err(e) => {
                debug!(sector = current, error = %e, "EBR unreadable, ending chain");
                return;
            }
        };
        let Ok(entries) = table_entries(&sector) else {
            return;
        };

        slots.push(RawSlot::new(
            current,
            1,
            format!("Extended Table (#{})", *table_number),
            VolumeFlag::Meta,
        ));
        *table_number += 1;

        let logical = entries[0];
        if !logical.is_empty() {
            slots.push(RawSlot::new(
                current + logical.start_lba as u64,
                logical.sector_count as u64,
                partition_description(logical.partition_type),
                VolumeFlag::Allocated,
            ));
        }

        let link = entries[1];
        if link.is_empty() || !link.is_extended() {
            return;
        }
        current = extended_base + link.start_lba as u64;
    }

    warn!("Extended partition chain too long, stopping");
}

/// Partition type label in `Name (0xNN)` form
pub(crate) fn partition_description(partition_type: u8) -> String {
    let name = match partition_type {
        0x01 => "DOS FAT12",
        0x04 | 0x06 => "DOS FAT16",
        0x05 => "DOS Extended",
        0x07 => "NTFS / exFAT",
        0x0B | 0x0C => "Win95 FAT32",
        0x0E => "DOS FAT16 LBA",
        0x0F => "Win95 Extended",
        0x11 => "OS/2 Hidden FAT12",
        0x12 => "Hibernation",
        0x14 | 0x16 => "OS/2 Hidden FAT16",
        0x17 => "OS/2 Hidden HPFS/NTFS",
        0x1B | 0x1C => "Hidden Win95 FAT32",
        0x1E => "Hidden Win95 FAT16 LBA",
        0x27 => "Windows Recovery",
        0x42 => "Win LVM / Secure FS",
        0x82 => "Linux Swap / Solaris x86",
        0x83 => "Linux",
        0x85 => "Linux Extended",
        0x8E => "Linux Logical Volume Manager",
        0xA5 => "FreeBSD",
        0xA6 => "OpenBSD",
        0xA8 => "Mac OS X",
        0xAF => "Mac OS X HFS",
        0xEE => "GPT Safety Partition",
        0xEF => "EFI File System",
        0xFD => "Linux RAID",
        _ => "Unknown Type",
    };
    format!("{} (0x{:02x})", name, partition_type)
}
