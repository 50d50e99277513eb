// GUID partition table behind a protective MBR

use tracing::{trace, warn};

use crate::common::binary::{array_at, le_u32, le_u64};
use crate::error::{ExtractError, ExtractResult};
use crate::image::ImageHandle;

use super::{read_sector, RawSlot, VolumeFlag};

const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";
const MIN_ENTRY_SIZE: u32 = 128;
const MAX_ENTRIES: u32 = 1024;
const NAME_OFFSET: usize = 56;
const NAME_BYTES: usize = 72;

/// Slot list for a GPT disk
pub(crate) fn read_gpt(image: &mut ImageHandle, sector_size: u64) -> ExtractResult<Vec<RawSlot>> {
    let header = read_sector(image, 1, sector_size)?;
    if &header[..8] != GPT_SIGNATURE {
        return Err(ExtractError::VolumeEnumeration("protective MBR without GPT header".to_string()));
    }

    let entry_lba = le_u64(&header, 72)?;
    let entry_count = le_u32(&header, 80)?;
    let entry_size = le_u32(&header, 84)?;
    if entry_size < MIN_ENTRY_SIZE || entry_count == 0 || entry_count > MAX_ENTRIES {
        return Err(ExtractError::VolumeEnumeration(format!(
            "implausible GPT entry array: {} entries of {} bytes",
            entry_count, entry_size
        )));
    }

    let total_sectors = image.size() / sector_size;
    if entry_lba < 2 || entry_lba >= total_sectors {
        return Err(ExtractError::VolumeEnumeration(format!(
            "GPT entry array at LBA {} is outside the image",
            entry_lba
        )));
    }

    let array_bytes = entry_count as u64 * entry_size as u64;
    let array = image
        .read(entry_lba * sector_size, array_bytes as usize)
        .map_err(|e| ExtractError::VolumeEnumeration(format!("GPT entries: {}", e)))?;
    if (array.len() as u64) < array_bytes {
        return Err(ExtractError::VolumeEnumeration("GPT entry array truncated".to_string()));
    }

    let mut slots = vec![
        RawSlot::new(0, 1, "Safety Table", VolumeFlag::Meta),
        RawSlot::new(1, 1, "GPT Header", VolumeFlag::Meta),
        RawSlot::new(entry_lba, array_bytes.div_ceil(sector_size), "Partition Table", VolumeFlag::Meta),
    ];

    for raw in array.chunks_exact(entry_size as usize) {
        let type_guid: [u8; 16] = array_at(raw, 0)?;
        if type_guid == [0u8; 16] {
            continue;
        }
        let first_lba = le_u64(raw, 32)?;
        let last_lba = le_u64(raw, 40)?;
        if last_lba < first_lba {
            trace!(first_lba, last_lba, "Skipping inverted GPT entry");
            continue;
        }
        if first_lba >= total_sectors {
            warn!(first_lba, total_sectors, "Skipping GPT entry that starts past the end of the image");
            continue;
        }
        let length = (last_lba - first_lba).checked_add(1).ok_or_else(|| {
            ExtractError::VolumeEnumeration(format!("GPT entry {}..{} overflows", first_lba, last_lba))
        })?;

        let description = entry_name(&raw[NAME_OFFSET..NAME_OFFSET + NAME_BYTES])
            .or_else(|| known_type_name(&type_guid).map(str::to_string))
            .unwrap_or_else(|| "GPT Partition".to_string());

        trace!(first_lba, last_lba, %description, "GPT partition");
        slots.push(RawSlot::new(first_lba, length, description, VolumeFlag::Allocated));
    }

    Ok(slots)
}

/// UTF-16LE partition name, NUL terminated
fn entry_name(raw: &[u8]) -> Option<String> {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .take_while(|&u| u != 0)
        .collect();
    let name = String::from_utf16_lossy(&units);
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Mixed-endian GUID text form
pub(crate) fn guid_string(guid: &[u8; 16]) -> String {
    format!(
        "{:08X}-{:04X}-{:04X}-{}-{}",
        u32::from_le_bytes([guid[0], guid[1], guid[2], guid[3]]),
        u16::from_le_bytes([guid[4], guid[5]]),
        u16::from_le_bytes([guid[6], guid[7]]),
        hex::encode_upper(&guid[8..10]),
        hex::encode_upper(&guid[10..16]),
    )
}

fn known_type_name(guid: &[u8; 16]) -> Option<&'static str> {
    let name = match guid_string(guid).as_str() {
        "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7" => "Basic data partition",
        "C12A7328-F81F-11D2-BA4B-00A0C93EC93B" => "EFI System Partition",
        "E3C9E316-0B5C-4DB8-817D-F92DF00215AE" => "Microsoft reserved partition",
        "DE94BBA4-06D1-4D40-A16A-BFD50179D6AC" => "Windows Recovery Environment",
        "5808C8AA-7E8F-42E0-85D2-E1E90434CFB3" => "LDM metadata partition",
        "AF9B60A0-1431-4F62-BC68-3311714A69AD" => "LDM data partition",
        "0FC63DAF-8483-4772-8E79-3D69D8477DE4" => "Linux filesystem",
        "0657FD6D-A4AB-43C4-84E5-0933C84B4F4F" => "Linux swap",
        "48465300-0000-11AA-AA11-00306543ECAC" => "Apple HFS+",
        _ => return None,
    };
    Some(name)
}
