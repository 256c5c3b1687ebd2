//! In-memory KVP sequence engine.
//!
//! The whole store image lives in one growable byte buffer bounded by the
//! filesystem-adjusted maximum size. Records are tightly packed and
//! variable-sized, so every operation works on byte offsets: insertion opens
//! a gap by shifting the tail right, erasure closes one by shifting left.
//! Offsets held across any mutation are stale and must be re-obtained.

use crate::error::{KeelError, Result};
use crate::format::{Key, KvpHeader, KVP_HEADER_SIZE};
use crate::walker;

/// True when `key` falls on the arithmetic progression
/// `first_key, first_key + inc, …` within `[first_key, last_key)`.
fn key_in_range(key: Key, first_key: Key, last_key: Key, key_increment: Key) -> bool {
    first_key <= key
        && key < last_key
        && key_increment != 0
        && (key - first_key) % key_increment == 0
}

/// Packed record sequence over a growable, capacity-capped byte buffer.
pub(crate) struct KvpSeq {
    buf: Vec<u8>,
    end: usize,
    max_size: usize,
}

impl KvpSeq {
    pub(crate) fn new(max_size: usize) -> Self {
        KvpSeq {
            buf: Vec::new(),
            end: 0,
            max_size,
        }
    }

    /// Logical end offset of the image.
    pub(crate) fn end_offset(&self) -> usize {
        self.end
    }

    pub(crate) fn set_end(&mut self, end: usize) {
        debug_assert!(end <= self.buf.len());
        self.end = end;
    }

    /// Allocated capacity in bytes.
    pub(crate) fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// The live image: all bytes up to the logical end.
    pub(crate) fn image(&self) -> &[u8] {
        &self.buf[..self.end]
    }

    pub(crate) fn image_mut(&mut self) -> &mut [u8] {
        let end = self.end;
        &mut self.buf[..end]
    }

    /// The whole allocation, live or not. Used when loading an image whose
    /// length exceeds the current logical end.
    pub(crate) fn raw(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn raw_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Grows the allocation to at least `capacity` bytes, preserving the
    /// contents and the logical end. Never shrinks.
    pub(crate) fn reserve(&mut self, capacity: usize) -> Result<()> {
        if capacity > self.max_size {
            return Err(KeelError::TooBig);
        }
        if capacity > self.buf.len() {
            self.buf
                .try_reserve_exact(capacity - self.buf.len())
                .map_err(|_| KeelError::OutOfMemory)?;
            self.buf.resize(capacity, 0);
        }
        Ok(())
    }

    // =========================================================================
    // Record Cursor
    // =========================================================================

    /// Offset of the first record after the file header, or `end`.
    pub(crate) fn begin(&self) -> usize {
        walker::next(self.image(), 0)
    }

    /// Offset of the record following `pos`, clamped to `end`.
    pub(crate) fn next(&self, pos: usize) -> usize {
        walker::next(self.image(), pos)
    }

    /// Header of the record at `pos`, when one can be dereferenced there.
    pub(crate) fn header_at(&self, pos: usize) -> Option<KvpHeader> {
        let image = self.image();
        if walker::can_dereference(image, pos) {
            KvpHeader::parse(image, pos)
        } else {
            None
        }
    }

    /// Value bytes of the record at `pos`.
    pub(crate) fn value_at(&self, pos: usize) -> Option<&[u8]> {
        let header = self.header_at(pos)?;
        Some(&self.image()[pos + KVP_HEADER_SIZE..pos + header.size as usize])
    }

    /// First record at or after `from` bearing `key`; `end` when absent.
    fn find(&self, key: Key, from: usize) -> usize {
        let mut pos = from;
        while pos != self.end {
            if self.header_at(pos).map_or(false, |h| h.key == key) {
                return pos;
            }
            pos = self.next(pos);
        }
        pos
    }

    pub(crate) fn try_get(&self, key: Key) -> Option<usize> {
        let pos = self.find(key, self.begin());
        (pos != self.end).then_some(pos)
    }

    pub(crate) fn next_in_range(
        &self,
        pos: Option<usize>,
        first_key: Key,
        last_key: Key,
        key_increment: Key,
    ) -> usize {
        let mut pos = match pos {
            Some(pos) => self.next(pos),
            None => self.begin(),
        };
        while pos != self.end {
            let matches = self
                .header_at(pos)
                .map_or(false, |h| key_in_range(h.key, first_key, last_key, key_increment));
            if matches {
                break;
            }
            pos = self.next(pos);
        }
        pos
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Inserts a record of `value_size` value bytes at `pos`, shifting the
    /// tail right. The value bytes are left as they happen to be; callers
    /// fill them via [`KvpSeq::write_value`].
    pub(crate) fn insert(&mut self, pos: usize, key: Key, value_size: usize) -> Result<usize> {
        let kvp_size = value_size
            .checked_add(KVP_HEADER_SIZE)
            .and_then(|total| u16::try_from(total).ok())
            .ok_or(KeelError::TooBig)? as usize;

        assert!(pos <= self.end, "insert position is past the end");

        self.reserve(self.end + kvp_size)?;
        self.buf.copy_within(pos..self.end, pos + kvp_size);
        KvpHeader {
            key,
            size: kvp_size as u16,
        }
        .write(&mut self.buf, pos);
        self.end += kvp_size;

        Ok(pos)
    }

    /// Erases the record at `pos`, shifting the tail left. Returns the
    /// offset where the following record now lives.
    ///
    /// Panics when `pos` does not refer to a record.
    pub(crate) fn erase(&mut self, pos: usize) -> usize {
        let size = match self.header_at(pos) {
            Some(header) => header.size as usize,
            None => panic!("erase position does not refer to a record"),
        };
        self.buf.copy_within(pos + size..self.end, pos);
        self.end -= size;
        pos
    }

    /// Writes `data` into the value region at `offset` and zeroes the rest
    /// of the region after it. A partial write therefore clears any tail
    /// bytes a previous value left behind.
    ///
    /// Panics when `pos` does not refer to a record.
    pub(crate) fn write_value(&mut self, pos: usize, offset: usize, data: &[u8]) -> Result<()> {
        let header = match self.header_at(pos) {
            Some(header) => header,
            None => panic!("write position does not refer to a record"),
        };
        let value_size = header.size as usize - KVP_HEADER_SIZE;
        let last = offset.checked_add(data.len()).ok_or(KeelError::TooBig)?;
        if last > value_size {
            return Err(KeelError::TooBig);
        }

        let start = pos + KVP_HEADER_SIZE;
        let value = &mut self.buf[start..start + value_size];
        value[offset..last].copy_from_slice(data);
        value[last..].fill(0);
        Ok(())
    }

    /// Puts a record under `key`, erasing every other record with the same
    /// key. A record whose total size already matches is reused in place;
    /// otherwise a new record is appended at the end. When `data` is given,
    /// its first `value_size` bytes become the value.
    pub(crate) fn put_unique(
        &mut self,
        key: Key,
        data: Option<&[u8]>,
        value_size: usize,
    ) -> Result<usize> {
        let kvp_size = value_size
            .checked_add(KVP_HEADER_SIZE)
            .and_then(|total| u16::try_from(total).ok())
            .ok_or(KeelError::TooBig)? as usize;

        // Erasure shifts the buffer, so the end offset is re-read after
        // every mutation instead of being cached across the scan.
        let mut reused = None;
        let mut pos = self.begin();
        loop {
            pos = self.find(key, pos);
            if pos == self.end {
                break;
            }
            if self.header_at(pos).map(|h| h.size as usize) != Some(kvp_size) {
                pos = self.erase(pos);
                continue;
            }

            // Same size: reuse in place and drop any later duplicates.
            reused = Some(pos);
            let mut dup = self.next(pos);
            loop {
                dup = self.find(key, dup);
                if dup == self.end {
                    break;
                }
                dup = self.erase(dup);
            }
            break;
        }

        let pos = match reused {
            Some(pos) => pos,
            None => self.insert(self.end, key, value_size)?,
        };

        if let Some(data) = data {
            self.write_value(pos, 0, &data[..value_size])?;
        }
        Ok(pos)
    }

    /// Appends a record under the smallest key in `[first_key, last_key)`
    /// on the progression `first_key, first_key + inc, …` that is not
    /// present yet.
    pub(crate) fn alloc_unique(
        &mut self,
        first_key: Key,
        last_key: Key,
        value_size: usize,
        key_increment: Key,
    ) -> Result<usize> {
        if key_increment == 0 {
            return Err(KeelError::InvalidArgument("key increment must be nonzero"));
        }

        let mut candidate = first_key;
        while candidate < last_key {
            if self.find(candidate, self.begin()) == self.end {
                return self.insert(self.end, candidate, value_size);
            }
            candidate = match candidate.checked_add(key_increment) {
                Some(stepped) => stepped,
                None => return Err(KeelError::NotFound),
            };
        }

        Err(KeelError::NotFound)
    }

    /// Erases every record whose key lies on the progression
    /// `first_key, first_key + inc, …` within `[first_key, last_key)`.
    pub(crate) fn erase_in_range(
        &mut self,
        first_key: Key,
        last_key: Key,
        key_increment: Key,
    ) -> Result<()> {
        if first_key > last_key {
            return Err(KeelError::InvalidArgument("inverted key range"));
        }
        if key_increment < 1 {
            return Err(KeelError::InvalidArgument("key increment must be nonzero"));
        }

        let mut pos = self.begin();
        while pos != self.end {
            let matches = self
                .header_at(pos)
                .map_or(false, |h| key_in_range(h.key, first_key, last_key, key_increment));
            pos = if matches {
                self.erase(pos)
            } else {
                self.next(pos)
            };
        }
        Ok(())
    }
}
