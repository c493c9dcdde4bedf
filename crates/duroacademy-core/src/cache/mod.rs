//! Local caching module for reference data.
//!
//! This module provides `CacheDb`, a read-through key/value cache that keeps
//! screens from refetching the same catalog or count on every navigation.
//! Each entry carries its write time and an optional TTL; pick a TTL from
//! [`TtlPreset`] per data category.
//!
//! The cache is strictly advisory. Storage failures are logged and degrade to
//! a miss, so a broken cache directory only ever costs an extra network fetch.
//!
//! Two storage tables back it:
//! - values: `CacheEntry` records keyed by string
//! - metadata: tiny string preferences such as the remembered login email

pub mod backend;
pub mod clock;
pub mod db;
pub mod entry;
pub mod keys;
pub mod ttl;

pub use backend::{CacheBackend, CacheError, FileBackend, MemoryBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use db::CacheDb;
pub use entry::{CacheEntry, MetaEntry};
pub use ttl::TtlPreset;
