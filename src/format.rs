//! On-disk format of a store image.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ File header (14 bytes, a record with the reserved key)     │
//! │   Key: u16 = 0xFFFB | Size: u16 = 14                       │
//! │   Signature: u8 = 0xC6 | Version: u8 = 0                   │
//! │   FileSize: u32 | Crc: u32                                 │
//! ├────────────────────────────────────────────────────────────┤
//! │ User record                                                │
//! │   Key: u16 | Size: u16 | Value: (Size - 4) bytes           │
//! │   ... repeated, tightly packed ...                         │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian with no padding. The layout is read and
//! written through explicit byte accessors, never through struct transmutes,
//! so host endianness and struct layout rules never leak into the format.
//! `FileSize` counts every byte of the image including the header; `Crc`
//! covers the bytes after the `Crc` field, i.e. `[14 .. FileSize)`.

/// The key type.
pub type Key = u16;

// =============================================================================
// Format Constants
// =============================================================================

/// Bytes of a record header: key (2) + size (2).
pub const KVP_HEADER_SIZE: usize = 4;

/// Bytes of the file header record.
pub const FILE_HEADER_SIZE: usize = 14;

/// Smallest key available to users.
pub const MIN_KEY: Key = 0x0000;

/// Largest key available to users.
pub const MAX_KEY: Key = 0xFFFA;

/// First key reserved for the store itself.
pub const MIN_RESERVED_KEY: Key = 0xFFFB;

/// Last key reserved for the store itself.
pub const MAX_RESERVED_KEY: Key = 0xFFFF;

/// Sentinel denoting "no key".
pub const INVALID_KEY: Key = 0xFFFF;

/// Key carried by the file header record, always at offset 0.
pub const FILE_HEADER_KEY: Key = 0xFFFB;

/// File signature byte.
pub const FILE_SIGNATURE: u8 = 0xC6;

/// Current format version.
pub const FILE_VERSION: u8 = 0;

/// Largest value a single record can carry: the record size field is 16-bit
/// and includes the 4-byte header.
pub const MAX_VALUE_SIZE: usize = u16::MAX as usize - KVP_HEADER_SIZE;

// Field offsets within the file header.
const SIGNATURE_OFFSET: usize = 4;
const VERSION_OFFSET: usize = 5;
const FILE_SIZE_OFFSET: usize = 6;
const CRC_OFFSET: usize = 10;

// =============================================================================
// Record Header
// =============================================================================

/// The serialized header of one key-value record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KvpHeader {
    /// Key of this record.
    pub key: Key,
    /// Total record size in bytes, including this header.
    pub size: u16,
}

impl KvpHeader {
    /// Parses the record header at `pos`, if four bytes are available there.
    pub(crate) fn parse(buf: &[u8], pos: usize) -> Option<KvpHeader> {
        let bytes = buf.get(pos..pos + KVP_HEADER_SIZE)?;
        Some(KvpHeader {
            key: u16::from_le_bytes([bytes[0], bytes[1]]),
            size: u16::from_le_bytes([bytes[2], bytes[3]]),
        })
    }

    /// Writes the record header at `pos`.
    pub(crate) fn write(self, buf: &mut [u8], pos: usize) {
        buf[pos..pos + 2].copy_from_slice(&self.key.to_le_bytes());
        buf[pos + 2..pos + KVP_HEADER_SIZE].copy_from_slice(&self.size.to_le_bytes());
    }
}

// =============================================================================
// File Header
// =============================================================================

/// The serialized header of the store file: a record header extended with
/// the format magic, version, total length and checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Record header; `key` is [`FILE_HEADER_KEY`].
    pub header: KvpHeader,
    /// File signature, [`FILE_SIGNATURE`].
    pub signature: u8,
    /// Format version, [`FILE_VERSION`].
    pub version: u8,
    /// Total image size in bytes, including this header.
    pub file_size: u32,
    /// CRC of the image bytes after this field.
    pub crc: u32,
}

impl FileHeader {
    /// Parses the file header at the start of `buf`, if fourteen bytes are
    /// available. No field is checked; validation is the caller's business.
    pub(crate) fn parse(buf: &[u8]) -> Option<FileHeader> {
        if buf.len() < FILE_HEADER_SIZE {
            return None;
        }
        Some(FileHeader {
            header: KvpHeader::parse(buf, 0)?,
            signature: buf[SIGNATURE_OFFSET],
            version: buf[VERSION_OFFSET],
            file_size: u32::from_le_bytes(buf[FILE_SIZE_OFFSET..CRC_OFFSET].try_into().unwrap()),
            crc: u32::from_le_bytes(buf[CRC_OFFSET..FILE_HEADER_SIZE].try_into().unwrap()),
        })
    }

    /// Writes the header of a fresh, never-committed image: `file_size` and
    /// `crc` stay zero until the first commit fills them in.
    pub(crate) fn write_initial(buf: &mut [u8]) {
        KvpHeader {
            key: FILE_HEADER_KEY,
            size: FILE_HEADER_SIZE as u16,
        }
        .write(buf, 0);
        buf[SIGNATURE_OFFSET] = FILE_SIGNATURE;
        buf[VERSION_OFFSET] = FILE_VERSION;
        buf[FILE_SIZE_OFFSET..FILE_HEADER_SIZE].fill(0);
    }

    /// Patches `file_size` and `crc` into an existing header at commit time.
    pub(crate) fn patch_committed(buf: &mut [u8], file_size: u32, crc: u32) {
        buf[FILE_SIZE_OFFSET..CRC_OFFSET].copy_from_slice(&file_size.to_le_bytes());
        buf[CRC_OFFSET..FILE_HEADER_SIZE].copy_from_slice(&crc.to_le_bytes());
    }
}
