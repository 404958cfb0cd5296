//! The synchronized record model.

use crate::id::is_client_id;
use crate::types::Timestamp;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A value that can be replicated between the local and the remote store.
///
/// The engine treats records as opaque apart from their identifier and,
/// when the remote store exposes one, their last-modified time.
///
/// # Example
///
/// ```rust
/// use replica_core::{Record, Timestamp};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Task {
///     id: Option<String>,
///     title: String,
///     updated_at: Option<Timestamp>,
/// }
///
/// impl Record for Task {
///     fn id(&self) -> Option<&str> {
///         self.id.as_deref()
///     }
///
///     fn set_id(&mut self, id: Option<String>) {
///         self.id = id;
///     }
///
///     fn updated_at(&self) -> Option<Timestamp> {
///         self.updated_at
///     }
///
///     fn set_updated_at(&mut self, at: Timestamp) {
///         self.updated_at = Some(at);
///     }
/// }
/// ```
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Returns the record identifier, `None` before the first remote save.
    fn id(&self) -> Option<&str>;

    /// Replaces the record identifier.
    fn set_id(&mut self, id: Option<String>);

    /// Returns the remote last-modified time, if the record carries one.
    fn updated_at(&self) -> Option<Timestamp> {
        None
    }

    /// Stamps the remote last-modified time.
    ///
    /// Called by remote stores when they persist a record.
    fn set_updated_at(&mut self, _at: Timestamp) {}
}

/// A record together with its synchronization metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord<R> {
    /// Local primary key: a server identifier or a client placeholder.
    pub id: String,
    /// The record itself.
    pub payload: R,
    /// True if modified locally since the last successful push.
    pub dirty: bool,
    /// True if pending remote deletion.
    pub deleted: bool,
    /// Time of the last local mutation.
    pub local_updated_at: Timestamp,
}

impl<R: Record> SyncRecord<R> {
    /// Creates a record that matches the remote copy.
    pub fn clean(id: impl Into<String>, payload: R, at: Timestamp) -> Self {
        Self {
            id: id.into(),
            payload,
            dirty: false,
            deleted: false,
            local_updated_at: at,
        }
    }

    /// Creates a record with unpushed local changes.
    pub fn dirty(id: impl Into<String>, payload: R, at: Timestamp) -> Self {
        Self {
            id: id.into(),
            payload,
            dirty: true,
            deleted: false,
            local_updated_at: at,
        }
    }

    /// Builds a clean record from a remote copy.
    ///
    /// Returns `None` if the remote record has no identifier.
    pub fn from_remote(remote: R, at: Timestamp) -> Option<Self> {
        let id = remote.id()?.to_string();
        if id.is_empty() {
            return None;
        }
        Some(Self::clean(id, remote, at))
    }

    /// Turns this record into a tombstone awaiting remote deletion.
    #[must_use]
    pub fn tombstone(mut self, at: Timestamp) -> Self {
        self.dirty = true;
        self.deleted = true;
        self.local_updated_at = at;
        self
    }

    /// Returns true if the record is keyed by a client-generated identifier.
    pub fn is_client_generated(&self) -> bool {
        is_client_id(&self.id)
    }
}
