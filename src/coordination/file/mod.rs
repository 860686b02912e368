//! Directory-backed coordination store.
//!
//! Layout below the store root:
//!
//! ```text
//! tree/<segment>/.../<segment>/.data   node data
//! tree/<segment>/.../<segment>/.owner  store owning an ephemeral node
//! leases/<escaped path>.lease          exclusive lease, JSON metadata
//! locks/<escaped path>.lock            description lock, JSON metadata
//! ```
//!
//! Leases and locks are created with `create_new`, so any number of
//! processes sharing the directory exclude each other. The filesystem has
//! no sessions: a store removes the ephemeral nodes and leases it created
//! when closed, and files left behind by a crashed process are reported as
//! stale by [`FileCoordinator::list_holds`] and removed by an operator
//! through [`FileCoordinator::clear_lease`].

mod metadata;


pub use metadata::LeaseMetadata;

use super::{
    ConnectionState, CoordinationStore, Lease, NodeMode, StoreError, StoreLock, StoreResult,
    path_segments,
};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const TREE_DIR: &str = "tree";
const LEASES_DIR: &str = "leases";
const LOCKS_DIR: &str = "locks";
const DATA_FILE: &str = ".data";
const OWNER_FILE: &str = ".owner";

/// Interval between attempts to take a held lock.
const LOCK_POLL: Duration = Duration::from_millis(25);

static TOKEN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Kind of exclusive file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldKind {
    /// An action lease on a job.
    Lease,
    /// A description lock, held only for the duration of a store update.
    Lock,
}

impl HoldKind {
    /// Get the display name for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldKind::Lease => "lease",
            HoldKind::Lock => "lock",
        }
    }

    fn dir(&self) -> &'static str {
        match self {
            HoldKind::Lease => LEASES_DIR,
            HoldKind::Lock => LOCKS_DIR,
        }
    }
}

/// Information about a lease or lock file.
#[derive(Debug, Clone)]
pub struct LeaseInfo {
    /// The file path.
    pub path: PathBuf,

    /// The guarded store path.
    pub name: String,

    /// Lease or lock.
    pub kind: HoldKind,

    /// The holder's metadata.
    pub metadata: LeaseMetadata,

    /// Whether the file is older than the stale threshold.
    pub is_stale: bool,
}

impl std::fmt::Display for LeaseInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] (owner: {}, pid: {}, age: {}{})",
            self.name,
            self.kind.as_str(),
            self.metadata.owner,
            self.metadata
                .pid
                .map_or_else(|| "-".to_string(), |p| p.to_string()),
            self.metadata.age_string(),
            if self.is_stale { ", STALE" } else { "" }
        )
    }
}

#[derive(Default)]
struct Session {
    closed: bool,
    ephemeral: BTreeSet<String>,
    leases: HashMap<String, String>,
    events: Option<Sender<ConnectionState>>,
}

/// A coordination store in a shared directory.
pub struct FileCoordinator {
    root: PathBuf,
    lock_timeout: Duration,
    /// Written to the ephemeral nodes this store owns.
    owner: String,
    session: Mutex<Session>,
}

impl FileCoordinator {
    /// Open (creating if needed) the store at `root`.
    ///
    /// Locks held by someone else are waited for at most `lock_timeout`.
    pub fn open<P: Into<PathBuf>>(root: P, lock_timeout: Duration) -> StoreResult<Self> {
        let root = root.into();
        for dir in [TREE_DIR, LEASES_DIR, LOCKS_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(|source| StoreError::Io { path, source })?;
        }
        debug!(root = %root.display(), "opened file coordination store");

        Ok(Self {
            root,
            lock_timeout,
            owner: new_token(),
            session: Mutex::new(Session::default()),
        })
    }

    /// The store directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List every lease and lock file in the store.
    pub fn list_holds(&self, stale_minutes: u32) -> StoreResult<Vec<LeaseInfo>> {
        let mut holds = Vec::new();

        for kind in [HoldKind::Lease, HoldKind::Lock] {
            let dir = self.root.join(kind.dir());
            if !dir.exists() {
                continue;
            }

            let entries = fs::read_dir(&dir).map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;

            for entry in entries {
                let entry = entry.map_err(|source| StoreError::Io {
                    path: dir.clone(),
                    source,
                })?;
                let path = entry.path();

                // Skip anything that is not a hold file
                if path.extension().and_then(|e| e.to_str()) != Some(kind.as_str()) {
                    continue;
                }

                let metadata = match LeaseMetadata::from_file(&path) {
                    Ok(meta) => meta,
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "skipping unreadable hold file");
                        continue;
                    }
                };

                let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
                let is_stale = metadata.is_stale(stale_minutes);
                holds.push(LeaseInfo {
                    name: unescape(stem),
                    path,
                    kind,
                    metadata,
                    is_stale,
                });
            }
        }

        // Sort by name for consistent output
        holds.sort_by(|a, b| a.name.cmp(&b.name).then(a.kind.as_str().cmp(b.kind.as_str())));

        Ok(holds)
    }

    /// Remove the lease on `path` regardless of its holder.
    ///
    /// The caller is responsible for verifying that clearing the lease is
    /// appropriate (e.g., checking `--force`).
    pub fn clear_lease(&self, path: &str, stale_minutes: u32) -> StoreResult<LeaseInfo> {
        path_segments(path)?;
        let file = self.hold_file(HoldKind::Lease, path);
        if !file.exists() {
            return Err(StoreError::NoLease(path.to_string()));
        }

        let metadata = LeaseMetadata::from_file(&file)?;
        let is_stale = metadata.is_stale(stale_minutes);
        let info = LeaseInfo {
            path: file.clone(),
            name: path.to_string(),
            kind: HoldKind::Lease,
            metadata,
            is_stale,
        };

        fs::remove_file(&file).map_err(|source| StoreError::Io { path: file, source })?;
        warn!(lease = path, owner = %info.metadata.owner, "cleared lease");

        Ok(info)
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.session().closed {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn node_dir(&self, path: &str) -> StoreResult<PathBuf> {
        let mut dir = self.root.join(TREE_DIR);
        for segment in path_segments(path)? {
            if segment == DATA_FILE || segment == OWNER_FILE {
                return Err(StoreError::InvalidPath(path.to_string()));
            }
            dir.push(segment);
        }
        Ok(dir)
    }

    fn hold_file(&self, kind: HoldKind, path: &str) -> PathBuf {
        self.root
            .join(kind.dir())
            .join(format!("{}.{}", escape(path), kind.as_str()))
    }

    fn write_data(&self, dir: &Path, data: &[u8]) -> StoreResult<()> {
        fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        atomic_write(&dir.join(DATA_FILE), data)
    }

    /// Record whether this store owns the node at `dir`.
    fn mark_owner(&self, path: &str, dir: &Path, mode: NodeMode) -> StoreResult<()> {
        let file = dir.join(OWNER_FILE);
        match mode {
            NodeMode::Ephemeral => {
                fs::write(&file, &self.owner)
                    .map_err(|source| StoreError::Io { path: file, source })?;
                self.session().ephemeral.insert(path.to_string());
            }
            NodeMode::Persistent => {
                match fs::remove_file(&file) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(source) => return Err(StoreError::Io { path: file, source }),
                }
                self.session().ephemeral.remove(path);
            }
        }
        Ok(())
    }

    fn owns(&self, dir: &Path) -> bool {
        fs::read_to_string(dir.join(OWNER_FILE)).is_ok_and(|owner| owner == self.owner)
    }

    fn take_lock(&self, path: &str) -> StoreResult<StoreLock> {
        path_segments(path)?;
        let file = self.hold_file(HoldKind::Lock, path);
        let metadata = LeaseMetadata::new(path, &new_token());
        let started = Instant::now();

        loop {
            self.check_open()?;
            if create_exclusive(&file, &metadata)? {
                break;
            }
            if started.elapsed() >= self.lock_timeout {
                return Err(StoreError::LockTimeout {
                    path: path.to_string(),
                    waited: self.lock_timeout,
                });
            }
            std::thread::sleep(LOCK_POLL);
        }

        Ok(StoreLock::new(
            path,
            Box::new(move || {
                fs::remove_file(&file).map_err(|source| StoreError::Io { path: file, source })
            }),
        ))
    }
}

impl CoordinationStore for FileCoordinator {
    fn ensure_path(&self, path: &str) -> StoreResult<()> {
        self.check_open()?;
        let dir = self.node_dir(path)?;
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io { path: dir, source })
    }

    fn create(&self, path: &str, data: &[u8], mode: NodeMode) -> StoreResult<bool> {
        self.check_open()?;
        let dir = self.node_dir(path)?;
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(source) => return Err(StoreError::Io { path: dir, source }),
        }

        self.write_data(&dir, data)?;
        self.mark_owner(path, &dir, mode)?;
        Ok(true)
    }

    fn write(&self, path: &str, data: &[u8], mode: NodeMode) -> StoreResult<()> {
        self.check_open()?;
        let dir = self.node_dir(path)?;
        self.write_data(&dir, data)?;
        // the writer's mode wins over the previous owner's
        self.mark_owner(path, &dir, mode)?;
        Ok(())
    }

    fn read(&self, path: &str) -> StoreResult<Option<Vec<u8>>> {
        self.check_open()?;
        let dir = self.node_dir(path)?;
        if !dir.is_dir() {
            return Ok(None);
        }

        let file = dir.join(DATA_FILE);
        match fs::read(&file) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Some(Vec::new())),
            Err(source) => Err(StoreError::Io { path: file, source }),
        }
    }

    fn remove(&self, path: &str) -> StoreResult<()> {
        self.check_open()?;
        let dir = self.node_dir(path)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => return Err(StoreError::Io { path: dir, source }),
        }

        let prefix = format!("{}/", path);
        self.session()
            .ephemeral
            .retain(|p| p != path && !p.starts_with(&prefix));
        Ok(())
    }

    fn children(&self, path: &str) -> StoreResult<Vec<String>> {
        self.check_open()?;
        let dir = self.node_dir(path)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::Io { path: dir, source }),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
            if entry.path().is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn read_lock(&self, path: &str) -> StoreResult<StoreLock> {
        self.take_lock(path)
    }

    fn write_lock(&self, path: &str) -> StoreResult<StoreLock> {
        self.take_lock(path)
    }

    fn try_acquire_lease(&self, path: &str) -> StoreResult<Option<Lease>> {
        self.check_open()?;
        path_segments(path)?;
        let token = new_token();
        let file = self.hold_file(HoldKind::Lease, path);

        if !create_exclusive(&file, &LeaseMetadata::new(path, &token))? {
            return Ok(None);
        }
        self.session()
            .leases
            .insert(path.to_string(), token.clone());
        Ok(Some(Lease::new(path, token)))
    }

    fn release_lease(&self, lease: &Lease) -> StoreResult<()> {
        let file = self.hold_file(HoldKind::Lease, lease.path());
        self.session().leases.remove(lease.path());

        let metadata = match LeaseMetadata::from_file(&file) {
            Ok(meta) => meta,
            Err(StoreError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if metadata.token != lease.token() {
            debug!(lease = lease.path(), "lease already taken over, not releasing");
            return Ok(());
        }

        match fs::remove_file(&file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path: file, source }),
        }
    }

    fn subscribe(&self) -> Receiver<ConnectionState> {
        let (tx, rx) = mpsc::channel();
        let mut session = self.session();
        if !session.closed {
            session.events = Some(tx);
        }
        rx
    }

    fn close(&self) {
        let (ephemeral, leases) = {
            let mut session = self.session();
            if session.closed {
                return;
            }
            session.closed = true;
            session.events = None;
            (
                std::mem::take(&mut session.ephemeral),
                std::mem::take(&mut session.leases),
            )
        };

        for (path, token) in leases {
            if let Err(e) = self.release_lease(&Lease::new(&path, token)) {
                warn!(lease = %path, error = %e, "failed to release lease on close");
            }
        }

        for path in ephemeral.iter().rev() {
            let Ok(dir) = self.node_dir(path) else {
                continue;
            };
            if !self.owns(&dir) {
                debug!(node = %path, "ephemeral node taken over, keeping it");
                continue;
            }
            if let Err(e) = fs::remove_dir_all(&dir)
                && e.kind() != ErrorKind::NotFound
            {
                warn!(node = %path, error = %e, "failed to remove ephemeral node on close");
            }
        }
        debug!(root = %self.root.display(), "closed file coordination store");
    }
}

impl Drop for FileCoordinator {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for FileCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCoordinator")
            .field("root", &self.root)
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}

/// Create `file` exclusively and fill it with `metadata`.
///
/// Returns `false` if the file already exists.
fn create_exclusive(file: &Path, metadata: &LeaseMetadata) -> StoreResult<bool> {
    let io_err = |source| StoreError::Io {
        path: file.to_path_buf(),
        source,
    };

    let mut handle = match OpenOptions::new().write(true).create_new(true).open(file) {
        Ok(handle) => handle,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(io_err(e)),
    };

    // Clean up the file on write or sync failure
    if let Err(e) = handle
        .write_all(metadata.to_json().as_bytes())
        .and_then(|()| handle.sync_all())
    {
        let _ = fs::remove_file(file);
        return Err(io_err(e));
    }

    Ok(true)
}

/// Write to a temporary sibling, sync, then rename over `path`.
fn atomic_write(path: &Path, data: &[u8]) -> StoreResult<()> {
    let temp = path.with_file_name(format!("{}.{}.tmp", DATA_FILE, std::process::id()));
    let io_err = |p: &Path, source| StoreError::Io {
        path: p.to_path_buf(),
        source,
    };

    let mut file = File::create(&temp).map_err(|e| io_err(temp.as_path(), e))?;
    if let Err(e) = file.write_all(data).and_then(|()| file.sync_all()) {
        let _ = fs::remove_file(&temp);
        return Err(io_err(temp.as_path(), e));
    }

    fs::rename(&temp, path).map_err(|e| {
        let _ = fs::remove_file(&temp);
        io_err(path, e)
    })
}

fn new_token() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!(
        "{}-{}-{}",
        std::process::id(),
        nanos,
        TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Encode a store path as a single file name.
fn escape(path: &str) -> String {
    path.replace('%', "%25").replace('/', "%2F")
}

fn unescape(name: &str) -> String {
    name.replace("%2F", "/").replace("%25", "%")
}
