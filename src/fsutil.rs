//! Filesystem helpers: usable-size adjustment and advisory locking.
//!
//! Thin wrappers over `statvfs` and `flock`; everything else in the crate
//! treats the filesystem through `std::fs`.

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// Bytes the filesystem consumes per storage block for pointers and other
/// metadata.
pub const OVERHEAD_PER_STORAGE_BLOCK: usize = 16;

/// Usable image cap: `requested` minus the per-block metadata overhead of
/// the filesystem holding `path`. Returns 0 when `requested` cannot cover
/// the overhead or when the filesystem cannot be inspected.
pub fn adjusted_max_size(path: &Path, requested: usize) -> usize {
    if requested <= OVERHEAD_PER_STORAGE_BLOCK {
        return 0;
    }

    // The file itself may not exist yet; its directory does.
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    match block_size(dir) {
        Ok(block_size) => adjusted_for_block_size(requested, block_size),
        Err(_) => 0,
    }
}

/// The pure part of the adjustment: one `OVERHEAD_PER_STORAGE_BLOCK` charge
/// per (partially) occupied block.
pub(crate) fn adjusted_for_block_size(requested: usize, block_size: u64) -> usize {
    if requested <= OVERHEAD_PER_STORAGE_BLOCK || block_size == 0 {
        return 0;
    }
    let blocks = (requested - 1) / block_size as usize + 1;
    match blocks.checked_mul(OVERHEAD_PER_STORAGE_BLOCK) {
        Some(overhead) => requested.saturating_sub(overhead),
        None => 0,
    }
}

/// Block size of the filesystem holding `dir`, via `statvfs`.
fn block_size(dir: &Path) -> io::Result<u64> {
    let c_dir = CString::new(dir.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))?;

    let mut stat: libc::statvfs = unsafe { mem::zeroed() };
    if unsafe { libc::statvfs(c_dir.as_ptr(), &mut stat) } != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(stat.f_bsize as u64)
}

/// Takes a non-blocking advisory lock on `file`: exclusive for writers,
/// shared for readers. Fails immediately when an incompatible lock is held
/// elsewhere. The lock lasts until the descriptor closes.
pub(crate) fn flock_nonblocking(file: &File, exclusive: bool) -> io::Result<()> {
    let operation = (if exclusive { libc::LOCK_EX } else { libc::LOCK_SH }) | libc::LOCK_NB;
    if unsafe { libc::flock(file.as_raw_fd(), operation) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjustment_charges_every_occupied_block() {
        // One block: 8192 bytes in a 8192-byte block.
        assert_eq!(adjusted_for_block_size(8192, 8192), 8192 - 16);
        // Two blocks: 8192 bytes in 4096-byte blocks.
        assert_eq!(adjusted_for_block_size(8192, 4096), 8192 - 32);
        // A partial block still costs a full charge.
        assert_eq!(adjusted_for_block_size(4097, 4096), 4097 - 32);
    }

    #[test]
    fn adjustment_refuses_tiny_or_impossible_requests() {
        assert_eq!(adjusted_for_block_size(16, 4096), 0);
        assert_eq!(adjusted_for_block_size(0, 4096), 0);
        assert_eq!(adjusted_for_block_size(1024, 0), 0);
        // Overhead swallowing the whole request bottoms out at zero.
        assert_eq!(adjusted_for_block_size(17, 1), 0);
    }

    #[test]
    fn adjusted_max_size_uses_the_containing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.bin");
        let adjusted = adjusted_max_size(&path, 8192);
        assert!(adjusted > 0);
        assert!(adjusted < 8192);
        assert_eq!(adjusted_max_size(&path, 16), 0);
    }
}
