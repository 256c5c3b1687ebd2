//! Open-time configuration for a store.
//!
//! `StoreOptions` plays the role `std::fs::OpenOptions` plays for plain
//! files: it collects the access mode, the size cap and the commit strategy
//! before `Store::open` puts them to work.

/// Default requested maximum image size when the caller does not set one.
pub const DEFAULT_MAX_SIZE: usize = 64 * 1024;

/// How commits reach persistent storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicaMode {
    /// Overwrite the store file in place and truncate it to the new length.
    #[default]
    InPlace,

    /// Write a `.tmp` sibling, then atomically rename it over the primary.
    /// Committing in this mode also closes the store: the rename invalidates
    /// the advisory lock held on the original inode.
    Swap,
}

/// Options controlling how a store file is opened.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Open for writing. Read-only stores take a shared lock and cannot
    /// commit.
    pub write: bool,

    /// Create the file when it is absent (writable opens only).
    pub create: bool,

    /// Truncate an existing file on open, discarding its content.
    pub truncate: bool,

    /// Requested byte cap on the image, before the filesystem-overhead
    /// adjustment.
    pub max_size: usize,

    /// Commit strategy.
    pub replica: ReplicaMode,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            write: false,
            create: false,
            truncate: false,
            max_size: DEFAULT_MAX_SIZE,
            replica: ReplicaMode::InPlace,
        }
    }
}

impl StoreOptions {
    /// Read-only options with the default size cap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the store for writing.
    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    /// Create the file when it does not exist.
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Discard any existing content on open.
    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    /// Requested maximum image size in bytes.
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Commit strategy.
    pub fn replica(mut self, replica: ReplicaMode) -> Self {
        self.replica = replica;
        self
    }
}
