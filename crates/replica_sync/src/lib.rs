//! # Replica Sync
//!
//! Bidirectional synchronization between a local replica and a remote
//! authoritative store.
//!
//! This crate provides:
//! - [`SyncEngine`]: runs pull-then-push sync cycles
//! - [`RemoteStore`]: the remote boundary, with [`MemoryRemoteStore`] and
//!   [`HttpRemoteStore`] implementations
//! - [`ConflictResolver`]: pluggable conflict policies ([`RemoteWins`],
//!   [`LastWriterWins`])
//! - [`SyncCursor`]: per-collection last-sync timestamps
//!
//! ## Sync cycle
//!
//! 1. Read the cursor and capture the cycle start time
//! 2. Pull every remote record modified since the cursor, page by page
//! 3. Apply pulled records: clean copies are overwritten, dirty copies go
//!    through the conflict resolver
//! 4. Push dirty records; client-keyed records are re-keyed to the server id
//! 5. Advance the cursor to the cycle start time
//!
//! The cursor only advances when both phases finish without a fatal error.
//!
//! ## Example
//!
//! ```rust,ignore
//! let engine = SyncEngine::new(
//!     SyncConfig::new("notes"),
//!     MemoryLocalStore::new(),
//!     MemoryRemoteStore::new(),
//!     MemorySyncCursor::new(),
//! );
//!
//! let id = engine.save_locally(note)?;
//! let outcome = engine.sync(None)?;
//! assert!(outcome.is_clean());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod conflict;
mod cursor;
mod engine;
mod error;
mod http;
mod memory_remote;
mod outcome;
mod remote;
#[cfg(test)]
mod test_support;

pub use config::{RetryConfig, SyncConfig};
pub use conflict::{ConflictResolver, LastWriterWins, RemoteWins};
pub use cursor::{FileSyncCursor, MemorySyncCursor, SyncCursor};
pub use engine::{SyncEngine, SyncState, SyncStats};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpMethod, HttpRemoteStore, HttpRequest, HttpResponse};
#[cfg(feature = "ureq")]
pub use http::UreqClient;
pub use memory_remote::{MemoryRemoteStore, RecordFilter, RemoteOp};
pub use outcome::{RecordFailure, RecordResult, SyncOutcome};
pub use remote::{
    DeleteOutcome, FetchRequest, RemoteError, RemoteErrorKind, RemoteResult, RemoteStore,
};

// Re-export the local half so callers need one import.
pub use replica_core::{
    new_client_id, is_client_id, Change, Clock, LocalStore, ManualClock, MemoryLocalStore,
    Predicate, Record, SyncRecord, SystemClock, Timestamp, Watch,
};
