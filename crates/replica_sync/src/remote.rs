//! The remote store boundary.

use replica_core::{Record, Timestamp};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Result type for remote store calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Failure class of a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorKind {
    /// The remote copy changed since the local copy was read.
    Conflict,
    /// Network failure or server-side error; worth retrying later.
    Transient,
    /// The request was rejected; retrying it unchanged will not help.
    Permanent,
    /// The call did not finish before its deadline.
    Timeout,
    /// The addressed record does not exist remotely.
    NotFound,
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Conflict => "conflict",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Timeout => "timeout",
            Self::NotFound => "not found",
        };
        f.write_str(name)
    }
}

/// A classified remote failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} remote error: {message}")]
pub struct RemoteError {
    /// Failure class.
    pub kind: RemoteErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl RemoteError {
    /// Creates an error of the given kind.
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Conflict, message)
    }

    /// Creates a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Transient, message)
    }

    /// Creates a permanent error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Permanent, message)
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Timeout, message)
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::NotFound, message)
    }

    /// Returns true if the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            RemoteErrorKind::Transient | RemoteErrorKind::Timeout
        )
    }
}

/// One page of an incremental fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest<F> {
    /// Only records modified strictly after this time.
    pub since: Timestamp,
    /// Caller filter, intersected with the time condition.
    pub filter: Option<F>,
    /// Number of matching records to skip.
    pub offset: usize,
    /// Maximum number of records to return.
    pub limit: usize,
}

/// Result of a remote delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The record existed and was deleted.
    Deleted,
    /// There was nothing to delete.
    NotFound,
}

/// An authoritative remote collection.
///
/// Every call takes an optional deadline; implementations report
/// [`RemoteErrorKind::Timeout`] once it has passed.
pub trait RemoteStore<R: Record>: Send + Sync {
    /// Caller-supplied filter type for incremental fetches.
    type Filter: Clone + Send + Sync + fmt::Debug;

    /// Returns one page of records modified after `request.since`, ordered
    /// by modification time then id.
    fn fetch_since(
        &self,
        request: &FetchRequest<Self::Filter>,
        deadline: Option<Instant>,
    ) -> RemoteResult<Vec<R>>;

    /// Fetches a single record.
    fn fetch_one(&self, id: &str, deadline: Option<Instant>) -> RemoteResult<Option<R>>;

    /// Stores a new record. The returned copy carries the server id.
    fn create(&self, record: R, deadline: Option<Instant>) -> RemoteResult<R>;

    /// Replaces an existing record.
    fn update(&self, record: R, deadline: Option<Instant>) -> RemoteResult<R>;

    /// Deletes a record.
    fn delete(&self, id: &str, deadline: Option<Instant>) -> RemoteResult<DeleteOutcome>;
}

impl<R: Record, T: RemoteStore<R> + ?Sized> RemoteStore<R> for Arc<T> {
    type Filter = T::Filter;

    fn fetch_since(
        &self,
        request: &FetchRequest<Self::Filter>,
        deadline: Option<Instant>,
    ) -> RemoteResult<Vec<R>> {
        (**self).fetch_since(request, deadline)
    }

    fn fetch_one(&self, id: &str, deadline: Option<Instant>) -> RemoteResult<Option<R>> {
        (**self).fetch_one(id, deadline)
    }

    fn create(&self, record: R, deadline: Option<Instant>) -> RemoteResult<R> {
        (**self).create(record, deadline)
    }

    fn update(&self, record: R, deadline: Option<Instant>) -> RemoteResult<R> {
        (**self).update(record, deadline)
    }

    fn delete(&self, id: &str, deadline: Option<Instant>) -> RemoteResult<DeleteOutcome> {
        (**self).delete(id, deadline)
    }
}

/// Fails with a timeout if `deadline` has passed.
pub(crate) fn check_deadline(deadline: Option<Instant>, operation: &str) -> RemoteResult<()> {
    match deadline {
        Some(at) if Instant::now() >= at => Err(RemoteError::timeout(format!(
            "{operation} exceeded its deadline"
        ))),
        _ => Ok(()),
    }
}
