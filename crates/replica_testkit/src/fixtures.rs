//! Test fixtures and replica directory helpers.

use replica_core::{CoreResult, Record, ReplicaDir, Timestamp};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A simple record used throughout the test suites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Server or client id.
    pub id: Option<String>,
    /// Title.
    pub title: String,
    /// Body text.
    pub body: String,
    /// Server modification time.
    pub updated_at: Option<Timestamp>,
}

impl Record for Note {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: Option<String>) {
        self.id = id;
    }

    fn updated_at(&self) -> Option<Timestamp> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: Timestamp) {
        self.updated_at = Some(at);
    }
}

/// Creates a note that has never been saved.
pub fn note(title: &str) -> Note {
    Note {
        id: None,
        title: title.to_string(),
        body: String::new(),
        updated_at: None,
    }
}

/// Creates a note with a body.
pub fn note_with_body(title: &str, body: &str) -> Note {
    Note {
        body: body.to_string(),
        ..note(title)
    }
}

/// A replica directory inside a temporary directory.
///
/// The directory is removed when this value is dropped. The replica itself
/// can be opened, dropped and reopened any number of times in between.
pub struct TempReplica {
    _temp_dir: TempDir,
    path: PathBuf,
}

impl TempReplica {
    /// Creates a fresh temporary location; nothing is opened yet.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("replica");
        Self {
            _temp_dir: temp_dir,
            path,
        }
    }

    /// Returns the replica path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens (creating on first use) the replica directory.
    pub fn open(&self) -> CoreResult<ReplicaDir> {
        ReplicaDir::open(&self.path, true)
    }
}

impl Default for TempReplica {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a test against a freshly created replica directory.
pub fn with_temp_replica<F, T>(f: F) -> T
where
    F: FnOnce(&TempReplica) -> T,
{
    let replica = TempReplica::new();
    f(&replica)
}
