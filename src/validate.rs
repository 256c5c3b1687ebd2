//! Store image validator.
//!
//! A pure function over a byte slice: decides whether the bytes are a
//! well-formed store image and returns the effective content length. The
//! slice may be longer than the image it holds: a writer that crashed
//! after writing but before truncating leaves a stale tail behind, and the
//! validator ignores it.

use crate::crc::{crc_update, CRC_INIT};
use crate::format::{
    FileHeader, KvpHeader, FILE_HEADER_KEY, FILE_HEADER_SIZE, FILE_SIGNATURE, FILE_VERSION,
};
use crate::walker;

/// Validates `data` as a store image.
///
/// Returns the effective content length on success, which is always within
/// `[14, data.len()]` and may be strictly smaller than `data.len()`.
/// Returns `None` when the bytes do not form a valid image.
pub fn validate_image(data: &[u8]) -> Option<usize> {
    let header = FileHeader::parse(data)?;

    if header.header.key != FILE_HEADER_KEY || (header.header.size as usize) < FILE_HEADER_SIZE {
        return None;
    }
    if header.signature != FILE_SIGNATURE || header.version != FILE_VERSION {
        return None;
    }

    let file_size = header.file_size as usize;
    if file_size < header.header.size as usize || data.len() < file_size {
        return None;
    }

    if crc_update(CRC_INIT, &data[FILE_HEADER_SIZE..file_size]) != header.crc {
        return None;
    }

    // The size fields of the records after the header must land exactly on
    // the declared end, and the header key must not appear again.
    let image = &data[..file_size];
    let mut pos = header.header.size as usize;
    while pos != file_size {
        if !walker::can_dereference(image, pos) {
            return None;
        }
        let record = KvpHeader::parse(image, pos)?;
        if record.key == FILE_HEADER_KEY {
            return None;
        }
        pos += record.size as usize;
    }

    Some(file_size)
}
