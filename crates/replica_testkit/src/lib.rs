//! # Replica Testkit
//!
//! Test utilities for Replica.
//!
//! This crate provides:
//! - A `Note` record fixture and temporary replica directories
//! - Pre-wired sync harnesses sharing a manual clock with an in-memory remote
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use replica_testkit::prelude::*;
//!
//! #[test]
//! fn pushes_new_notes() {
//!     let h = SyncHarness::memory(SyncConfig::new("notes"));
//!     h.engine.save_locally(note("hello")).unwrap();
//!     h.engine.sync(None).unwrap();
//!     assert_eq!(h.remote.len(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod harness;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::harness::*;
    pub use replica_sync::{
        LocalStore, MemoryLocalStore, SyncConfig, SyncEngine, SyncRecord, Timestamp,
    };
}

pub use fixtures::*;
pub use generators::*;
pub use harness::*;
