//! # KeelKV
//!
//! A small, durable, file-backed key-value store for embedded and
//! system-configuration use:
//! - Single-file image, loaded fully into memory and edited in place
//! - Crash-safe commits, in place or via atomic swap-and-rename
//! - CRC-32 validated, little-endian, tightly packed on-disk format
//! - Single-writer/multi-reader across processes via advisory file locks
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │   open → load → validate → edit → commit → truncate/rename  │
//! └─────────────┬──────────────────────────────┬────────────────┘
//!               │                              │
//!               ▼                              ▼
//!        ┌─────────────┐               ┌──────────────┐
//!        │   KvpSeq    │               │    fsutil    │
//!        │  (packed    │               │   (flock,    │
//!        │   records)  │               │   statvfs)   │
//!        └──────┬──────┘               └──────────────┘
//!               │
//!       ┌───────┴────────┐
//!       ▼                ▼
//! ┌───────────┐   ┌─────────────┐
//! │  walker   │   │  validator  │
//! │ (cursor)  │   │   + CRC     │
//! └───────────┘   └─────────────┘
//! ```
//!
//! The store is a linear sequence of records, not a map: lookups scan.
//! The domain holds at most a few hundred small records.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod crc;
pub mod format;
pub mod fsutil;
pub mod store;
pub mod validate;
pub mod walker;

mod seq;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{ReplicaMode, StoreOptions};
pub use crc::crc_update;
pub use error::{KeelError, Result};
pub use format::Key;
pub use fsutil::adjusted_max_size;
pub use store::{Pos, Record, RecordIter, Store};
pub use validate::validate_image;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of KeelKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
