//! # Replica Storage
//!
//! Durable journal backends for Replica.
//!
//! A journal backend is an **opaque byte log**: callers append frames,
//! read everything back on startup, and occasionally replace the whole
//! log with a compacted image. Backends never interpret the bytes.
//!
//! ## Available Backends
//!
//! - [`MemoryJournal`] - For tests and ephemeral replicas
//! - [`FileJournal`] - For persistent replicas using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use replica_storage::{JournalBackend, MemoryJournal};
//!
//! let mut journal = MemoryJournal::new();
//! journal.append(b"frame-1").unwrap();
//! journal.append(b"frame-2").unwrap();
//! assert_eq!(journal.read_all().unwrap(), b"frame-1frame-2");
//!
//! journal.rewrite(b"compacted").unwrap();
//! assert_eq!(journal.size().unwrap(), 9);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::JournalBackend;
pub use error::{StorageError, StorageResult};
pub use file::{write_atomic, FileJournal};
pub use memory::MemoryJournal;
