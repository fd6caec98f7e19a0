//! chainwatch-storage: persistent checkpoint stores for ChainWatch.
//!
//! Backends:
//! - [`kv`]: flat `key=value` text file, shared by every network
//! - [`sqlite`]: SQLite via `sqlx` (feature `sqlite`)
//!
//! The in-memory store lives in `chainwatch_core::checkpoint`.

pub mod kv;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use kv::KvFileStore;
