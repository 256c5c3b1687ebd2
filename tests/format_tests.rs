//! On-disk format tests
//!
//! These tests verify:
//! - Exact bytes of a freshly committed store file
//! - Record layout of committed user records
//! - The public checksum helper
//! - The public image validator against real committed files

use std::fs;
use std::path::PathBuf;

use keelkv::{crc_update, validate_image, Store, StoreOptions};
use tempfile::TempDir;

const CRC_INIT: u32 = 0xFFFF_FFFF;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_store() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store.bin");
    (temp_dir, path)
}

fn writable_options() -> StoreOptions {
    StoreOptions::new().write(true).create(true).max_size(8192)
}

// =============================================================================
// Committed Bytes
// =============================================================================

#[test]
fn test_fresh_commit_writes_exact_header_bytes() {
    let (_temp, path) = setup_temp_store();

    let mut store = Store::new();
    store.open(&path, &writable_options()).unwrap();
    store.commit().unwrap();

    let bytes = fs::read(&path).unwrap();
    assert_eq!(
        bytes,
        [
            0xFB, 0xFF, // header record key
            0x0E, 0x00, // header record size
            0xC6, // signature
            0x00, // version
            0x0E, 0x00, 0x00, 0x00, // file size
            0xFF, 0xFF, 0xFF, 0xFF, // CRC of the empty record region
        ]
    );
}

#[test]
fn test_committed_record_layout() {
    let (_temp, path) = setup_temp_store();
    let value = [0x94, 0xA9, 0xBE, 0xB0, 0x57, 0xE7, 0x71, 0xEE, 0x1E];

    let mut store = Store::new();
    store.open(&path, &writable_options()).unwrap();
    let pos = store.insert(store.end(), 189, value.len()).unwrap();
    store.write_value(pos, 0, &value).unwrap();
    store.commit().unwrap();

    let bytes = fs::read(&path).unwrap();
    assert_eq!(bytes.len(), 14 + 4 + 9);
    // Record header: key 189, size 13.
    assert_eq!(&bytes[14..18], &[0xBD, 0x00, 0x0D, 0x00]);
    assert_eq!(&bytes[18..27], &value);
    // Declared file size covers the whole image.
    assert_eq!(&bytes[6..10], &27u32.to_le_bytes());
    // Stored CRC covers everything after the header.
    assert_eq!(&bytes[10..14], &crc_update(CRC_INIT, &bytes[14..]).to_le_bytes());
}

// =============================================================================
// Checksum Helper
// =============================================================================

#[test]
fn test_crc_known_vectors() {
    assert_eq!(crc_update(CRC_INIT, b""), 0xFFFF_FFFF);
    // Raw (un-finalized) register for the standard check input.
    assert_eq!(crc_update(CRC_INIT, b"123456789"), 0x340B_C6D9);
}

#[test]
fn test_crc_streams() {
    let data = b"the quick brown fox jumps over the lazy dog";
    let whole = crc_update(CRC_INIT, data);
    let mut running = CRC_INIT;
    for chunk in data.chunks(5) {
        running = crc_update(running, chunk);
    }
    assert_eq!(running, whole);
}

// =============================================================================
// Validator
// =============================================================================

#[test]
fn test_validator_accepts_committed_files() {
    let (_temp, path) = setup_temp_store();

    let mut store = Store::new();
    store.open(&path, &writable_options()).unwrap();
    store.put_unique(7, Some(b"abc"), 3).unwrap();
    store.put_unique(8, Some(b"d"), 1).unwrap();
    store.commit().unwrap();
    store.close();

    let bytes = fs::read(&path).unwrap();
    assert_eq!(validate_image(&bytes), Some(bytes.len()));
}

#[test]
fn test_validator_reports_content_length_under_a_stale_tail() {
    let (_temp, path) = setup_temp_store();

    let mut store = Store::new();
    store.open(&path, &writable_options()).unwrap();
    store.put_unique(7, Some(b"abc"), 3).unwrap();
    store.commit().unwrap();
    store.close();

    let mut bytes = fs::read(&path).unwrap();
    let content = bytes.len();
    bytes.extend_from_slice(&[0u8; 4]);
    assert_eq!(validate_image(&bytes), Some(content));
}

#[test]
fn test_validator_rejects_corruption() {
    let (_temp, path) = setup_temp_store();

    let mut store = Store::new();
    store.open(&path, &writable_options()).unwrap();
    store.put_unique(7, Some(b"abc"), 3).unwrap();
    store.commit().unwrap();
    store.close();

    let bytes = fs::read(&path).unwrap();

    // Any flipped value byte breaks the checksum.
    let mut corrupt = bytes.clone();
    corrupt[20] ^= 0x01;
    assert_eq!(validate_image(&corrupt), None);

    // A wrong signature is rejected before the checksum.
    let mut corrupt = bytes.clone();
    corrupt[4] = 0;
    assert_eq!(validate_image(&corrupt), None);

    // Too short to hold a header.
    assert_eq!(validate_image(&bytes[..10]), None);
}
