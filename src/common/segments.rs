// Shared segment discovery utilities for forensic container readers
//
// Handles multi-segment forensic images:
// - Numbered raw segments: .001, .002, .003, etc.
// - EWF segments: .E01 ... .E99, .EAA ... .EZZ (likewise .S01 and .Ex01 sets)

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::error::{ExtractError, ExtractResult};

/// Highest segment number reachable with two-character suffixes (99 + 26*26)
const MAX_EWF_SEGMENTS: u32 = 99 + 26 * 26;

// =============================================================================
// Numbered Segment Discovery (.001, .002, etc.)
// =============================================================================

/// Check if filename is a numbered segment (.001, .002, etc.)
pub fn is_numbered_segment(filename: &str) -> bool {
    let lower = filename.to_lowercase();
    if let Some(ext_start) = lower.rfind('.') {
        let ext = &lower[ext_start + 1..];
        return ext.len() == 3 && ext.chars().all(|c| c.is_ascii_digit());
    }
    false
}

/// Discover numbered segments (.001, .002, etc.) starting from any segment
///
/// Non-numbered paths are returned as a single-element set.
pub fn discover_numbered_segments(path: &Path) -> ExtractResult<Vec<PathBuf>> {
    debug!(?path, "Discovering numbered segments");
    let parent = path.parent().unwrap_or(Path::new("."));
    let filename = path
        .file_name()
        .ok_or_else(|| ExtractError::ImageOpen(format!("Invalid filename: {}", path.display())))?
        .to_string_lossy()
        .to_string();

    if !is_numbered_segment(&filename) {
        debug!(?path, "Single file (non-segmented)");
        return Ok(vec![path.to_path_buf()]);
    }

    let base = &filename[..filename.len() - 4]; // Remove .XXX
    trace!(base, "Detected numbered segment format");

    let direct = discover_numbered_segments_direct(parent, base);
    if !direct.is_empty() {
        debug!(segment_count = direct.len(), "Found segments via direct path");
        return Ok(direct);
    }

    trace!("Falling back to directory scan for case-insensitive matching");
    discover_numbered_segments_scan(parent, base)
}

/// Try to find segments by constructing paths directly
fn discover_numbered_segments_direct(dir: &Path, base: &str) -> Vec<PathBuf> {
    let mut segments = Vec::new();

    for num in 1..=999 {
        let segment_name = format!("{}.{:03}", base, num);
        let segment_path = dir.join(&segment_name);
        if segment_path.exists() {
            segments.push(segment_path);
        } else {
            // The set is contiguous from .001; the first gap ends it
            break;
        }
    }

    segments
}

/// Scan directory to find segments with case-insensitive base matching
fn discover_numbered_segments_scan(dir: &Path, base: &str) -> ExtractResult<Vec<PathBuf>> {
    let base_lower = base.to_lowercase();
    let mut found: Vec<(u32, PathBuf)> = Vec::new();

    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let filename = entry.file_name().to_string_lossy().to_lowercase();
            if let Some(dot_pos) = filename.rfind('.') {
                let (file_base, ext) = (&filename[..dot_pos], &filename[dot_pos + 1..]);
                if file_base == base_lower && is_numbered_segment(&filename) {
                    if let Ok(num) = ext.parse::<u32>() {
                        found.push((num, entry.path()));
                    }
                }
            }
        }
    }

    if found.is_empty() {
        return Err(ExtractError::ImageOpen(format!("No segments found for {}", base)));
    }

    found.sort_by_key(|(num, _)| *num);
    Ok(found.into_iter().map(|(_, p)| p).collect())
}

// =============================================================================
// EWF Segment Discovery (.E01, .E02, ..., .EAA, etc.)
// =============================================================================

/// Extension for segment `number` given the first segment's extension
///
/// `"E01"` -> `E02`, ... `E99`, `EAA`, `EAB`, ... and the same scheme for
/// `"S01"` and `"Ex01"`. Letter case follows the first segment.
pub fn ewf_segment_extension(first_ext: &str, number: u32) -> Option<String> {
    if first_ext.len() < 3 || !(1..=MAX_EWF_SEGMENTS).contains(&number) {
        return None;
    }
    let prefix = &first_ext[..first_ext.len() - 2];
    let lowercase = first_ext.chars().next().is_some_and(|c| c.is_ascii_lowercase());

    if number <= 99 {
        return Some(format!("{}{:02}", prefix, number));
    }

    let k = number - 100;
    let base = if lowercase { b'a' } else { b'A' };
    let first = (base + (k / 26) as u8) as char;
    let second = (base + (k % 26) as u8) as char;
    Some(format!("{}{}{}", prefix, first, second))
}

/// Discover all EWF segments that follow `first` in naming order
pub fn discover_ewf_segments(first: &Path) -> ExtractResult<Vec<PathBuf>> {
    debug!(?first, "Discovering EWF segments");
    let parent = first.parent().unwrap_or(Path::new("."));
    let stem = first
        .file_stem()
        .ok_or_else(|| ExtractError::ImageOpen(format!("No filename: {}", first.display())))?
        .to_string_lossy()
        .to_string();
    let first_ext = first
        .extension()
        .ok_or_else(|| ExtractError::ImageOpen(format!("No extension: {}", first.display())))?
        .to_string_lossy()
        .to_string();

    let mut paths = vec![first.to_path_buf()];

    for number in 2..=MAX_EWF_SEGMENTS {
        let Some(ext) = ewf_segment_extension(&first_ext, number) else {
            break;
        };
        let candidate = parent.join(format!("{}.{}", stem, ext));
        if candidate.exists() {
            trace!(segment = number, ?candidate, "Found EWF segment");
            paths.push(candidate);
            continue;
        }

        // Mixed-case sets (E01 with e02) show up after copying between filesystems
        let swapped = if ext.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
            ext.to_lowercase()
        } else {
            ext.to_uppercase()
        };
        let candidate = parent.join(format!("{}.{}", stem, swapped));
        if candidate.exists() {
            trace!(segment = number, ?candidate, "Found EWF segment (case swapped)");
            paths.push(candidate);
        } else {
            break;
        }
    }

    debug!(segment_count = paths.len(), "EWF segments discovered");
    Ok(paths)
}
