//! The store: file lifecycle and the public record API.
//!
//! ## Responsibilities
//! - Open a store file with a non-blocking advisory lock, load and validate
//!   the image, and recover from interrupted commits
//! - Expose the in-memory record sequence for edits
//! - Commit the image back to storage, in place or via swap-and-rename
//!
//! A `Store` is a reusable handle: it starts closed, `open` binds it to a
//! file, `close` releases everything and makes it reusable. One process may
//! hold the writer lock on a file while any number of other processes hold
//! reader locks; the handle itself is single-threaded.
//!
//! ## Positions
//!
//! Records are addressed by [`Pos`], a byte offset into the in-memory image.
//! The image shifts on every mutation, so any `Pos` (and any borrowed
//! [`Record`]) obtained before an `insert`, `erase`, `put_unique`,
//! `alloc_unique` or `erase_in_range` is stale afterwards and must be
//! re-obtained.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::config::{ReplicaMode, StoreOptions};
use crate::crc::{crc_update, CRC_INIT};
use crate::error::{KeelError, Result};
use crate::format::{FileHeader, Key, KvpHeader, FILE_HEADER_KEY, FILE_HEADER_SIZE};
use crate::fsutil;
use crate::seq::KvpSeq;
use crate::validate::validate_image;

/// Position of a record within the store image.
///
/// Obtained from [`Store::begin`], [`Store::end`], [`Store::next`],
/// [`Store::try_get`] and the mutating operations. Invalidated by any
/// mutation of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos(pub(crate) usize);

impl Pos {
    /// Byte offset of this position within the image.
    pub fn offset(self) -> usize {
        self.0
    }
}

/// A borrowed view of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    /// The record's key.
    pub key: Key,
    /// The record's value bytes.
    pub value: &'a [u8],
}

/// Iterator over the records of an open store, in storage order.
pub struct RecordIter<'a> {
    store: &'a Store,
    pos: Pos,
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Record<'a>;

    fn next(&mut self) -> Option<Record<'a>> {
        let record = self.store.record(self.pos)?;
        self.pos = self.store.next(self.pos);
        Some(record)
    }
}

/// Resources of an open store.
struct OpenStore {
    file: File,
    seq: KvpSeq,
    primary_path: PathBuf,
    /// `Some` in swap mode.
    swap_path: Option<PathBuf>,
}

/// A durable, file-backed store of key-value records.
pub struct Store {
    state: Option<OpenStore>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// A closed handle; bind it to a file with [`Store::open`].
    pub fn new() -> Store {
        Store { state: None }
    }

    /// Whether the handle currently owns an open file.
    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    fn open_state(&self) -> &OpenStore {
        match &self.state {
            Some(state) => state,
            None => panic!("store is not open"),
        }
    }

    fn open_state_mut(&mut self) -> &mut OpenStore {
        match &mut self.state {
            Some(state) => state,
            None => panic!("store is not open"),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Opens the store file at `path`.
    ///
    /// Loads the whole image into memory after validating it. Takes a
    /// non-blocking advisory lock: shared for read-only opens, exclusive
    /// otherwise; an incompatible lock held elsewhere fails the open
    /// immediately. A failed open leaves the handle closed and owns nothing.
    ///
    /// A writable, in-place open of a file whose valid content is shorter
    /// than the file truncates the file to the content: the previous writer
    /// committed but crashed before truncating.
    pub fn open<P: AsRef<Path>>(&mut self, path: P, options: &StoreOptions) -> Result<()> {
        if self.state.is_some() {
            return Err(KeelError::AlreadyOpen);
        }

        let path = path.as_ref();
        let max_size = fsutil::adjusted_max_size(path, options.max_size);
        if max_size == 0 {
            return Err(KeelError::NoSpace);
        }

        self.state = Some(open_impl(path, max_size, options)?);
        Ok(())
    }

    /// Flushes the in-memory image to persistent storage.
    ///
    /// Refreshes the header's length and checksum first. In place, the file
    /// is overwritten, truncated and fsynced, and the store stays open. In
    /// swap mode the image goes to the `.tmp` sibling which is then renamed
    /// over the primary, and the store closes: the rename invalidated the
    /// lock held on the original inode.
    ///
    /// A failed commit leaves the in-memory state unchanged; in swap mode a
    /// stale `.tmp` may remain and is removed by the next open.
    pub fn commit(&mut self) -> Result<()> {
        let close_after = {
            let state = match &mut self.state {
                Some(state) => state,
                None => return Err(KeelError::InvalidArgument("store is not open")),
            };

            let end = state.seq.end_offset();
            if end < FILE_HEADER_SIZE || end > state.seq.capacity() {
                return Err(KeelError::InvalidArgument("image invariants violated"));
            }

            let crc = crc_update(CRC_INIT, &state.seq.image()[FILE_HEADER_SIZE..]);
            let first = KvpHeader::parse(state.seq.image(), 0);
            if first.map_or(false, |h| h.key == FILE_HEADER_KEY) {
                FileHeader::patch_committed(state.seq.image_mut(), end as u32, crc);
            }

            match &state.swap_path {
                Some(swap_path) => {
                    let mut swap_file = OpenOptions::new()
                        .read(true)
                        .write(true)
                        .create(true)
                        .truncate(true)
                        .mode(0o600)
                        .custom_flags(libc::O_CLOEXEC)
                        .open(swap_path)?;
                    write_image(&mut swap_file, state.seq.image())?;
                    drop(swap_file);
                    fs::rename(swap_path, &state.primary_path)?;
                    tracing::debug!(
                        "committed {} bytes to {} via swap",
                        end,
                        state.primary_path.display()
                    );
                    true
                }
                None => {
                    write_image(&mut state.file, state.seq.image())?;
                    tracing::debug!(
                        "committed {} bytes to {} in place",
                        end,
                        state.primary_path.display()
                    );
                    false
                }
            }
        };

        if close_after {
            self.close();
        }
        Ok(())
    }

    /// Closes the store: releases the file lock with the descriptor, frees
    /// the buffer and paths, and resets the handle for reuse. A no-op on a
    /// closed handle.
    pub fn close(&mut self) {
        if let Some(state) = self.state.take() {
            tracing::debug!("closed store at {}", state.primary_path.display());
        }
    }

    // =========================================================================
    // Record Sequence
    // =========================================================================
    //
    // Every method below requires the store to be open and panics otherwise;
    // lifecycle misuse is a programming error, not a runtime condition.

    /// Position of the first user record (the file header is skipped).
    /// Equals [`Store::end`] when the store holds no user records.
    pub fn begin(&self) -> Pos {
        Pos(self.open_state().seq.begin())
    }

    /// The past-the-end sentinel position.
    pub fn end(&self) -> Pos {
        Pos(self.open_state().seq.end_offset())
    }

    /// Position of the record after `pos`, or [`Store::end`].
    pub fn next(&self, pos: Pos) -> Pos {
        Pos(self.open_state().seq.next(pos.0))
    }

    /// The record at `pos`, or `None` for the end sentinel.
    pub fn record(&self, pos: Pos) -> Option<Record<'_>> {
        let seq = &self.open_state().seq;
        let header = seq.header_at(pos.0)?;
        Some(Record {
            key: header.key,
            value: seq.value_at(pos.0)?,
        })
    }

    /// Iterates the user records in storage order.
    pub fn iter(&self) -> RecordIter<'_> {
        RecordIter {
            store: self,
            pos: self.begin(),
        }
    }

    /// Pre-reserves buffer capacity. Never required, but batching growth
    /// ahead of several inserts avoids repeated reallocation.
    pub fn reserve(&mut self, capacity: usize) -> Result<()> {
        self.open_state_mut().seq.reserve(capacity)
    }

    /// Inserts a record with `value_size` value bytes at `pos`, shifting
    /// later records right. The value bytes are unspecified until written
    /// with [`Store::write_value`].
    ///
    /// Fails with `TooBig` when `value_size + 4` overflows the 16-bit record
    /// size or the image would outgrow its cap, and with `OutOfMemory` when
    /// the buffer cannot grow. Keys in the reserved range `0xFFFB..=0xFFFF`
    /// are the store's own; producing them here corrupts the image.
    pub fn insert(&mut self, pos: Pos, key: Key, value_size: usize) -> Result<Pos> {
        self.open_state_mut().seq.insert(pos.0, key, value_size).map(Pos)
    }

    /// Erases the record at `pos` and returns the position where the next
    /// record now lives.
    ///
    /// Panics when `pos` does not refer to a record.
    pub fn erase(&mut self, pos: Pos) -> Pos {
        Pos(self.open_state_mut().seq.erase(pos.0))
    }

    /// Position of the first record bearing `key`.
    pub fn try_get(&self, key: Key) -> Option<Pos> {
        self.open_state().seq.try_get(key).map(Pos)
    }

    /// Writes `data` into the record's value region starting at `offset`,
    /// then zeroes the region's remainder. A partial write thus clears tail
    /// bytes held previously; callers that need them must re-write them.
    ///
    /// Fails with `TooBig` when `offset + data.len()` exceeds the value
    /// region. Panics when `pos` does not refer to a record.
    pub fn write_value(&mut self, pos: Pos, offset: usize, data: &[u8]) -> Result<()> {
        self.open_state_mut().seq.write_value(pos.0, offset, data)
    }

    /// Puts a record under `key` and ensures the key is unique, erasing any
    /// other record bearing it. A record whose size already matches
    /// `value_size` is reused in place. When `data` is given, its first
    /// `value_size` bytes are written as the value (`data` must hold at
    /// least that many bytes).
    pub fn put_unique(&mut self, key: Key, data: Option<&[u8]>, value_size: usize) -> Result<Pos> {
        self.open_state_mut().seq.put_unique(key, data, value_size).map(Pos)
    }

    /// Appends a record under the smallest unused key in
    /// `[first_key, last_key)` on the progression stepping by
    /// `key_increment` from `first_key`.
    ///
    /// Fails with `NotFound` when every candidate is taken, the candidate
    /// escapes the range, or the 16-bit step overflows. Uniqueness is
    /// checked against the current contents only.
    pub fn alloc_unique(
        &mut self,
        first_key: Key,
        last_key: Key,
        value_size: usize,
        key_increment: Key,
    ) -> Result<Pos> {
        self.open_state_mut()
            .seq
            .alloc_unique(first_key, last_key, value_size, key_increment)
            .map(Pos)
    }

    /// Erases every record whose key lies on the progression stepping by
    /// `key_increment` from `first_key`, within `[first_key, last_key)`.
    ///
    /// Fails with `InvalidArgument` on an inverted range or a zero
    /// increment.
    pub fn erase_in_range(
        &mut self,
        first_key: Key,
        last_key: Key,
        key_increment: Key,
    ) -> Result<()> {
        self.open_state_mut()
            .seq
            .erase_in_range(first_key, last_key, key_increment)
    }

    /// Position of the next record after `pos` (from the beginning when
    /// `pos` is `None`) whose key lies on the progression stepping by
    /// `key_increment` from `first_key` within `[first_key, last_key)`, or
    /// [`Store::end`].
    pub fn next_in_range(
        &self,
        pos: Option<Pos>,
        first_key: Key,
        last_key: Key,
        key_increment: Key,
    ) -> Pos {
        Pos(self.open_state().seq.next_in_range(
            pos.map(|pos| pos.0),
            first_key,
            last_key,
            key_increment,
        ))
    }
}

/// The `.tmp` sibling used by swap-mode commits.
fn swap_sibling(path: &Path) -> PathBuf {
    let mut sibling = path.as_os_str().to_os_string();
    sibling.push(".tmp");
    PathBuf::from(sibling)
}

/// Open steps after the size adjustment; any failure drops the partial
/// state, leaving the file untouched beyond the flags the caller asked for.
fn open_impl(path: &Path, max_size: usize, options: &StoreOptions) -> Result<OpenStore> {
    let swap_path = match options.replica {
        ReplicaMode::Swap => {
            let swap = swap_sibling(path);
            // A leftover swap file is a commit that never renamed. Remove it
            // before touching the primary, for readers too: the lock taken
            // below sequences us against any writer still working on it.
            if fs::remove_file(&swap).is_ok() {
                tracing::debug!("removed leftover swap file {}", swap.display());
            }
            Some(swap)
        }
        ReplicaMode::InPlace => None,
    };

    let writable = options.write;
    let mut file = OpenOptions::new()
        .read(true)
        .write(writable)
        .create(writable && options.create)
        .truncate(writable && options.truncate)
        .mode(0o600)
        .custom_flags(libc::O_CLOEXEC)
        .open(path)
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => KeelError::NotFound,
            _ => KeelError::Io(err),
        })?;

    fsutil::flock_nonblocking(&file, writable)?;

    let file_len = file.metadata()?.len() as usize;
    let is_new = file_len == 0;
    if is_new && !(options.create || options.truncate) {
        return Err(KeelError::NotFound);
    }
    if !is_new && file_len < FILE_HEADER_SIZE {
        return Err(KeelError::OutOfRange);
    }

    let mut seq = KvpSeq::new(max_size);

    if is_new {
        // Fresh store: header only, in memory. Nothing reaches the disk
        // until the first commit.
        seq.reserve(FILE_HEADER_SIZE)?;
        FileHeader::write_initial(seq.raw_mut());
        seq.set_end(FILE_HEADER_SIZE);
        tracing::debug!("created new store image for {}", path.display());
    } else {
        seq.reserve(file_len)?;
        file.read_exact(&mut seq.raw_mut()[..file_len])?;

        let content_len = validate_image(&seq.raw()[..file_len])
            .ok_or(KeelError::InvalidArgument("image failed format validation"))?;

        let must_truncate =
            writable && content_len < file_len && options.replica != ReplicaMode::Swap;
        if must_truncate {
            // The content is valid but shorter than the file: the previous
            // writer committed and crashed before truncating. Finish its job.
            file.set_len(content_len as u64)?;
            file.sync_all()?;
            tracing::debug!(
                "recovered {}: truncated {} -> {} bytes",
                path.display(),
                file_len,
                content_len
            );
        }

        seq.set_end(content_len);
    }

    Ok(OpenStore {
        file,
        seq,
        primary_path: path.to_path_buf(),
        swap_path,
    })
}

/// Writes the whole image at offset 0, truncates to its length and fsyncs.
fn write_image(file: &mut File, image: &[u8]) -> Result<()> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(image)?;
    file.set_len(image.len() as u64)?;
    file.sync_all()?;
    Ok(())
}
