//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures from
//! byte buffers that have already been fetched. It never performs I/O;
//! [`ArchiveIndex`](super::ArchiveIndex) decides which ranges to fetch and
//! hands the bytes over.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) in the archive's tail
//! 2. If ZIP64, follow the locator to the ZIP64 EOCD record
//! 3. Parse the Central Directory to get metadata for all files
//! 4. For extraction, read each file's Local File Header to find its data
//!
//! Every length read from the archive is checked against the buffer before
//! it is used to slice, so malformed input yields [`Error::Format`] rather
//! than a panic.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::{Error, Result};

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
pub const MAX_COMMENT_SIZE: u64 = 65535;

/// Size of the trailing window fetched to locate the EOCD.
///
/// Covers the EOCD record, a maximal comment, and the ZIP64 locator that
/// sits directly in front of the EOCD.
pub const EOCD_SEARCH_WINDOW: u64 =
    EndOfCentralDirectory::SIZE as u64 + MAX_COMMENT_SIZE + Zip64EOCDLocator::SIZE as u64;

/// Find and parse the End of Central Directory record in `window`.
///
/// Searches backwards for the EOCD signature. A candidate whose comment
/// length reaches exactly to the end of the window is preferred; if there
/// is none (trailing bytes after the comment), the last signature whose
/// fixed record fits is used.
///
/// # Arguments
///
/// * `window` - The trailing bytes of the archive
///
/// # Returns
///
/// A tuple of (EOCD record, position of the record inside `window`).
///
/// # Errors
///
/// Returns [`Error::Format`] if no EOCD can be found, indicating the
/// resource is not a ZIP archive.
pub fn find_eocd(window: &[u8]) -> Result<(EndOfCentralDirectory, usize)> {
    if window.len() < EndOfCentralDirectory::SIZE {
        return Err(Error::format("EOCD not found"));
    }

    let mut fallback = None;
    for i in (0..=window.len() - EndOfCentralDirectory::SIZE).rev() {
        if &window[i..i + 4] != EndOfCentralDirectory::SIGNATURE {
            continue;
        }
        let comment_len = u16::from_le_bytes([window[i + 20], window[i + 21]]) as usize;
        if i + EndOfCentralDirectory::SIZE + comment_len == window.len() {
            return Ok((EndOfCentralDirectory::from_bytes(&window[i..])?, i));
        }
        fallback.get_or_insert(i);
    }

    match fallback {
        Some(i) => Ok((EndOfCentralDirectory::from_bytes(&window[i..])?, i)),
        None => Err(Error::format("EOCD not found")),
    }
}

/// Read the ZIP64 EOCD locator that precedes the EOCD at `eocd_pos`.
///
/// # Errors
///
/// Returns [`Error::Format`] if the locator is not where the format puts
/// it, and [`Error::Unsupported`] if it describes a multi-disk archive.
pub fn find_zip64_locator(window: &[u8], eocd_pos: usize) -> Result<Zip64EOCDLocator> {
    let start = eocd_pos
        .checked_sub(Zip64EOCDLocator::SIZE)
        .ok_or_else(|| Error::format("ZIP64 locator not found"))?;
    let locator = Zip64EOCDLocator::from_bytes(&window[start..eocd_pos])?;
    if locator.total_disks > 1 || locator.disk_with_eocd64 != 0 {
        return Err(Error::Unsupported(format!(
            "spanned archive ({} disks)",
            locator.total_disks
        )));
    }
    Ok(locator)
}

/// Parse the whole Central Directory.
///
/// Records are read back to back until `data` is consumed. A record that
/// does not start with the CDFH signature, or whose variable-length parts
/// run past the end of `data`, fails the whole parse.
///
/// # Arguments
///
/// * `data` - Exactly the Central Directory bytes
/// * `expected_entries` - Entry count claimed by the EOCD, used as a
///   capacity hint and a consistency check
/// * `total_size` - Archive size; every local header offset must be below it
///
/// # Returns
///
/// The entries in Central Directory order.
pub fn parse_central_directory(
    data: &[u8],
    expected_entries: u64,
    total_size: u64,
) -> Result<Vec<Entry>> {
    // The claimed count is untrusted; never reserve more than could fit.
    let max_possible = (data.len() / CentralDirectoryHeader::SIZE) as u64;
    let mut entries = Vec::with_capacity(expected_entries.min(max_possible) as usize);

    let mut pos = 0;
    while pos < data.len() {
        let (entry, consumed) = parse_cdfh(&data[pos..])?;
        if entry.local_header_offset >= total_size {
            return Err(Error::Format(format!(
                "local header offset {} of {:?} is outside the archive",
                entry.local_header_offset, entry.name
            )));
        }
        entries.push(entry);
        pos += consumed;
    }

    if entries.len() as u64 != expected_entries {
        log::warn!(
            "EOCD reports {} entries but the Central Directory holds {}",
            expected_entries,
            entries.len()
        );
    }

    Ok(entries)
}

/// Parse one Central Directory File Header at the start of `data`.
///
/// 32-bit size and offset fields holding the sentinel `0xFFFFFFFF` are
/// replaced with their 64-bit values from the ZIP64 extra field.
///
/// # Returns
///
/// The parsed [`Entry`] and the number of bytes the record occupies.
pub fn parse_cdfh(data: &[u8]) -> Result<(Entry, usize)> {
    let header = CentralDirectoryHeader::from_bytes(data)?;
    let record_len = header.record_len();
    if record_len > data.len() {
        return Err(Error::format(
            "Central Directory record runs past the end of the directory",
        ));
    }

    let name_end = CentralDirectoryHeader::SIZE + header.file_name_length as usize;
    let extra_end = name_end + header.extra_field_length as usize;

    // Use lossy conversion to handle non-UTF8 filenames gracefully
    let name = String::from_utf8_lossy(&data[CentralDirectoryHeader::SIZE..name_end]).into_owned();
    let extra = &data[name_end..extra_end];

    let (uncompressed_size, compressed_size, local_header_offset) =
        resolve_zip64_fields(&header, extra)?;

    let is_directory = name.ends_with('/');
    Ok((
        Entry {
            name,
            compression_method: CompressionMethod::from_u16(header.compression_method),
            compressed_size,
            uncompressed_size,
            local_header_offset,
            crc32: header.crc32,
            flags: header.flags,
            last_mod_time: header.last_mod_time,
            last_mod_date: header.last_mod_date,
            is_directory,
        },
        record_len,
    ))
}

/// Resolve sentinel-valued fields from the ZIP64 extended information.
///
/// The ZIP64 block stores, in this order, the uncompressed size, the
/// compressed size and the local header offset, each only if the matching
/// 32-bit field is `0xFFFFFFFF`.
///
/// # Returns
///
/// `(uncompressed_size, compressed_size, local_header_offset)`
fn resolve_zip64_fields(header: &CentralDirectoryHeader, extra: &[u8]) -> Result<(u64, u64, u64)> {
    let uncompressed_sentinel = header.uncompressed_size == ZIP64_SENTINEL_U32;
    let compressed_sentinel = header.compressed_size == ZIP64_SENTINEL_U32;
    let offset_sentinel = header.lfh_offset == ZIP64_SENTINEL_U32;

    let mut uncompressed_size = header.uncompressed_size as u64;
    let mut compressed_size = header.compressed_size as u64;
    let mut local_header_offset = header.lfh_offset as u64;

    if !(uncompressed_sentinel || compressed_sentinel || offset_sentinel) {
        return Ok((uncompressed_size, compressed_size, local_header_offset));
    }

    let block = find_extra_block(extra, ZIP64_EXTRA_ID)
        .ok_or_else(|| Error::format("ZIP64 extra field missing for sentinel-valued entry"))?;
    let mut cursor = Cursor::new(block);
    let short = |_: std::io::Error| Error::format("ZIP64 extra field too short");

    if uncompressed_sentinel {
        uncompressed_size = cursor.read_u64::<LittleEndian>().map_err(short)?;
    }
    if compressed_sentinel {
        compressed_size = cursor.read_u64::<LittleEndian>().map_err(short)?;
    }
    if offset_sentinel {
        local_header_offset = cursor.read_u64::<LittleEndian>().map_err(short)?;
    }

    Ok((uncompressed_size, compressed_size, local_header_offset))
}

/// Find the data of the extra sub-block with the given header ID.
///
/// Each sub-block is `[id: u16][size: u16][data; size]`. Scanning stops at
/// a block that claims more bytes than remain.
fn find_extra_block(extra: &[u8], id: u16) -> Option<&[u8]> {
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let header_id = u16::from_le_bytes([extra[pos], extra[pos + 1]]);
        let size = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
        let start = pos + 4;
        let end = start + size;
        if end > extra.len() {
            return None;
        }
        if header_id == id {
            return Some(&extra[start..end]);
        }
        pos = end;
    }
    None
}

/// Get the data offset for an entry from its Local File Header.
///
/// The Local File Header's name and extra field may differ in length from
/// the Central Directory copy, so the offset has to come from here.
///
/// # Arguments
///
/// * `header` - Bytes fetched starting at the local header
/// * `lfh_offset` - Absolute offset of the local header in the archive
///
/// # Returns
///
/// The absolute byte offset where the compressed data begins.
pub fn local_data_offset(header: &[u8], lfh_offset: u64) -> Result<u64> {
    if header.len() < LFH_SIZE {
        return Err(Error::format("truncated Local File Header"));
    }
    if &header[0..4] != LFH_SIGNATURE {
        return Err(Error::format("invalid Local File Header"));
    }

    let file_name_length = u16::from_le_bytes([header[26], header[27]]) as u64;
    let extra_field_length = u16::from_le_bytes([header[28], header[29]]) as u64;

    // Data starts after: LFH (30 bytes) + filename + extra field
    Ok(lfh_offset + LFH_SIZE as u64 + file_name_length + extra_field_length)
}
