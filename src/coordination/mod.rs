//! Coordination store boundary.
//!
//! The distributed guardian needs a small set of primitives from a
//! hierarchical coordination service: nodes with data (persistent or tied
//! to the client session), cluster-wide read/write locks, non-blocking
//! exclusive leases, and notifications about the session's connectivity.
//! [`CoordinationStore`] is that boundary.
//!
//! # Backends
//!
//! - [`MemoryCoordinator`]: clients of an in-process [`MemoryServer`]
//!   reached through a `host:port` connection string. Models sessions,
//!   ephemeral data and connectivity events.
//! - [`FileCoordinator`]: a shared directory. Leases and locks are
//!   exclusive-create files, so separate processes on one machine (or on a
//!   shared mount) exclude each other.
//!
//! # Paths
//!
//! Paths are `/`-separated absolute strings such as
//! `/jobguard/jobs/foo/job-action/description`.

mod connect;
mod file;
mod memory;

pub use connect::ConnectString;
pub use file::{FileCoordinator, HoldKind, LeaseInfo, LeaseMetadata};
pub use memory::{MemoryCoordinator, MemoryServer};

use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Errors raised by a coordination store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No endpoint could be reached within the startup grace period.
    #[error("unable to connect to {endpoints} within {waited:?}")]
    Connection { endpoints: String, waited: Duration },

    /// The session is suspended or expired.
    #[error("connection to the coordination service was lost")]
    ConnectionLoss,

    /// The store was closed.
    #[error("coordination store is closed")]
    Closed,

    /// A lock could not be taken in time.
    #[error("timed out after {waited:?} waiting for lock '{path}'")]
    LockTimeout { path: String, waited: Duration },

    /// The path is not a valid absolute store path.
    #[error("invalid path '{0}'")]
    InvalidPath(String),

    /// No lease exists at the given path.
    #[error("no lease held on '{0}'")]
    NoLease(String),

    /// Stored metadata could not be parsed or written.
    #[error("invalid metadata in '{path}': {reason}")]
    Metadata { path: PathBuf, reason: String },

    /// The connection string is malformed.
    #[error("invalid connection string '{0}'")]
    InvalidConnectString(String),

    /// Filesystem failure in the file backend.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Lifetime of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMode {
    /// Survives the session that created it.
    Persistent,
    /// Removed when the creating session ends.
    Ephemeral,
}

/// Connectivity changes reported by a store's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The link is interrupted; session data is still held server-side.
    Suspended,
    /// The session expired; its ephemeral nodes, leases and locks are gone.
    Lost,
    /// The link is back, possibly with a new session.
    Reconnected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Suspended => write!(f, "SUSPENDED"),
            ConnectionState::Lost => write!(f, "LOST"),
            ConnectionState::Reconnected => write!(f, "RECONNECTED"),
        }
    }
}

/// An exclusive permit of capacity one on a path.
///
/// Leases are plain values rather than guards: they outlive the call that
/// acquired them and may be released from another thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    path: String,
    token: String,
}

impl Lease {
    pub(crate) fn new(path: &str, token: String) -> Self {
        Self {
            path: path.to_string(),
            token,
        }
    }

    /// The leased path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Backend-specific proof of ownership.
    pub fn token(&self) -> &str {
        &self.token
    }
}

type Unlock = Box<dyn FnOnce() -> StoreResult<()> + Send>;

/// RAII guard for a read or write lock.
///
/// When dropped, the lock is released. If releasing fails, a warning is
/// logged but no panic occurs.
pub struct StoreLock {
    path: String,
    unlock: Option<Unlock>,
}

impl StoreLock {
    pub(crate) fn new(path: &str, unlock: Unlock) -> Self {
        Self {
            path: path.to_string(),
            unlock: Some(unlock),
        }
    }

    /// The locked path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Release the lock, reporting failures to the caller.
    pub fn release(mut self) -> StoreResult<()> {
        match self.unlock.take() {
            Some(unlock) => unlock(),
            None => Ok(()),
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Some(unlock) = self.unlock.take()
            && let Err(e) = unlock()
        {
            warn!(path = %self.path, error = %e, "failed to release lock");
        }
    }
}

impl std::fmt::Debug for StoreLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreLock")
            .field("path", &self.path)
            .field("held", &self.unlock.is_some())
            .finish()
    }
}

/// Primitives consumed from a hierarchical coordination service.
pub trait CoordinationStore: Send + Sync {
    /// Create `path` and any missing parents as persistent nodes.
    fn ensure_path(&self, path: &str) -> StoreResult<()>;

    /// Create `path` with `data`, creating persistent parents as needed.
    /// Returns `false` if the node already existed.
    fn create(&self, path: &str, data: &[u8], mode: NodeMode) -> StoreResult<bool>;

    /// Replace the data of `path`, creating it with `mode` if absent.
    fn write(&self, path: &str, data: &[u8], mode: NodeMode) -> StoreResult<()>;

    /// The data of `path`, or `None` if the node does not exist.
    fn read(&self, path: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Remove `path` and everything below it. Absent nodes are not an error.
    fn remove(&self, path: &str) -> StoreResult<()>;

    /// Names of the direct children of `path`; empty if it does not exist.
    fn children(&self, path: &str) -> StoreResult<Vec<String>>;

    /// Take the shared side of the read/write lock at `path`, blocking.
    fn read_lock(&self, path: &str) -> StoreResult<StoreLock>;

    /// Take the exclusive side of the read/write lock at `path`, blocking.
    fn write_lock(&self, path: &str) -> StoreResult<StoreLock>;

    /// Try once to take the lease at `path`; `None` if someone holds it.
    fn try_acquire_lease(&self, path: &str) -> StoreResult<Option<Lease>>;

    /// Give back a lease. Releasing a lease the store already dropped is
    /// not an error.
    fn release_lease(&self, lease: &Lease) -> StoreResult<()>;

    /// Channel of connectivity changes for this client. Only the most
    /// recent subscriber receives events.
    fn subscribe(&self) -> Receiver<ConnectionState>;

    /// End the session: its ephemeral nodes, leases and locks vanish and
    /// the event channel is closed.
    fn close(&self);
}

/// Join path segments below `base`.
pub fn join_path(base: &str, segments: &[&str]) -> String {
    let mut path = base.trim_end_matches('/').to_string();
    for segment in segments {
        path.push('/');
        path.push_str(segment);
    }
    path
}

/// Split an absolute path into its segments, rejecting empty, `.` and `..`
/// segments.
pub(crate) fn path_segments(path: &str) -> StoreResult<Vec<&str>> {
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
    if rest.is_empty() {
        return Ok(Vec::new());
    }
    let segments: Vec<&str> = rest.split('/').collect();
    if segments
        .iter()
        .any(|s| s.is_empty() || *s == "." || *s == "..")
    {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

/// Parent of an absolute path, `None` for the root.
pub(crate) fn parent_path(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) if path.len() > 1 => Some("/"),
        Some(0) | None => None,
        Some(i) => Some(&path[..i]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_path_appends_segments() {
        assert_eq!(
            join_path("/jobguard", &["jobs", "foo", "job-action"]),
            "/jobguard/jobs/foo/job-action"
        );
        assert_eq!(join_path("/jobguard/", &["nodes"]), "/jobguard/nodes");
    }

    #[test]
    fn path_segments_rejects_relative_and_dot_segments() {
        assert_eq!(path_segments("/a/b").unwrap(), vec!["a", "b"]);
        assert!(path_segments("/").unwrap().is_empty());
        assert!(path_segments("a/b").is_err());
        assert!(path_segments("/a//b").is_err());
        assert!(path_segments("/a/../b").is_err());
    }

    #[test]
    fn parent_path_walks_up() {
        assert_eq!(parent_path("/a/b"), Some("/a"));
        assert_eq!(parent_path("/a"), Some("/"));
        assert_eq!(parent_path("/"), None);
    }

    #[test]
    fn dropping_store_lock_runs_unlock_once() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let lock = StoreLock::new(
            "/a",
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        lock.release().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
