//! # Replica Core
//!
//! The local half of a Replica: the record model, the local store and
//! its live-update subscriptions.
//!
//! This crate provides:
//! - [`Record`] and [`SyncRecord`], the unit of synchronization
//! - Client-generated identifiers ([`new_client_id`], [`is_client_id`])
//! - The [`LocalStore`] interface with an in-memory and a journaled
//!   implementation
//! - [`Watch`] subscriptions that follow every committed mutation
//! - [`ReplicaDir`], the on-disk layout of a persistent replica
//!
//! ## Key Invariants
//!
//! - A stored record never has an empty id
//! - Exactly one record exists per id (upsert semantics)
//! - A tombstone is always dirty; it is purged, never stored clean
//! - Every mutation is atomic: it is either fully committed and
//!   observed by watchers, or it leaves the store unchanged

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod dir;
mod error;
mod id;
mod record;
mod store;
mod types;
mod watch;

pub use dir::ReplicaDir;
pub use error::{CoreError, CoreResult};
pub use id::{is_client_id, new_client_id, CLIENT_ID_PREFIX};
pub use record::{Record, SyncRecord};
pub use store::{Change, JournalLocalStore, JournalOptions, LocalStore, MemoryLocalStore};
pub use types::{Clock, ManualClock, SystemClock, Timestamp};
pub use watch::{Predicate, Watch};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
