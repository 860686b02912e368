//! Cluster-wide action guardian.
//!
//! Exclusion across processes uses two primitives of the coordination store
//! per job and action domain:
//!
//! - the *description lock*, a read/write lock guarding the persisted
//!   [`HostnameAction`] descriptor. Status queries take the read side;
//!   acquire and release take the write side for a short critical section.
//! - the *action lease*, an exclusive permit of capacity one, taken with a
//!   single non-blocking attempt and held for as long as the action (or the
//!   resting state that follows it) lasts.
//!
//! The lease is only ever taken or given back while the description lock is
//! held, so every process sees a descriptor consistent with the lease:
//!
//! ```text
//!                 A-------------------A              A: lease
//!                /                     \             D: description lock
//!             D----D                 D----D
//!  __________/       \______________/      \______   process 1
//!
//!                       try lease here fails
//!                          |
//!                    D----D
//!  _________________/      \_____________________    process 2
//! ```
//!
//! # Connectivity
//!
//! Store sessions can break. The guardian watches its store's event channel
//! on a dedicated thread:
//!
//! - `SUSPENDED`: nothing. The service still holds the session's leases.
//!   Releases that cannot reach the service keep their lease as pending.
//! - `LOST`: the service dropped every lease of the session; held leases
//!   move to the invalidated set and pending releases are forgotten.
//! - `RECONNECTED`: presence is re-registered, pending releases complete,
//!   stale descriptors are rewritten and every invalidated action is taken
//!   again. Reacquisition failures are logged and the action dropped.
//!
//! Every operation on a job takes its description lock before the lease
//! book mutex. The mutex is never held while waiting for a lock, so a
//! contended job never stalls the others.

mod descriptor;
mod paths;


pub use descriptor::HostnameAction;
pub use paths::Namespace;

use crate::action::ActionState;
use crate::coordination::{
    ConnectString, ConnectionState, CoordinationStore, Lease, MemoryCoordinator, NodeMode,
    StoreError, StoreLock, StoreResult,
};
use crate::error::{GuardError, Result};
use crate::guardian::{ActionGuardian, NextGuardian, busy_error, check_job_id};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Distinguishes guardians of one process in presence node names.
static GUARDIAN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Callback notified of connectivity changes after the guardian reacted.
pub type ConnectionListener = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Where a distributed guardian lives and who it claims to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardianSettings {
    /// Namespace under which jobs and nodes are stored.
    pub namespace: String,

    /// Name recorded in descriptors and presence nodes.
    pub hostname: String,
}

impl GuardianSettings {
    /// Settings for `namespace`, identified by this machine's host name.
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            hostname: local_hostname(),
        }
    }

    /// Override the recorded host name.
    pub fn with_hostname(mut self, hostname: &str) -> Self {
        self.hostname = hostname.to_string();
        self
    }
}

/// This machine's host name, or `localhost` if it cannot be resolved.
pub fn local_hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().to_string(),
        Err(e) => {
            error!(error = %e, "cannot resolve hostname");
            "localhost".to_string()
        }
    }
}

struct HeldLease<T> {
    lease: Lease,
    action: T,
    /// The descriptor could not be updated to `action`.
    stale: bool,
}

impl<T> HeldLease<T> {
    fn new(lease: Lease, action: T) -> Self {
        Self {
            lease,
            action,
            stale: false,
        }
    }
}

/// Leases this process believes it holds, those presumed lost and those
/// it failed to give back.
struct LeaseBook<T> {
    held: HashMap<String, HeldLease<T>>,
    invalidated: HashMap<String, T>,
    releasing: HashMap<String, Lease>,
}

struct Inner<T: ActionState> {
    store: Arc<dyn CoordinationStore>,
    hostname: String,
    /// Name of this guardian's node below its host's presence node.
    presence_id: String,
    paths: Namespace,
    next: NextGuardian<T>,
    book: Mutex<LeaseBook<T>>,
    listeners: Mutex<Vec<ConnectionListener>>,
    registered: AtomicBool,
    closed: AtomicBool,
}

/// Guards actions on jobs across every process sharing a coordination store.
///
/// Dropping the guardian closes it: its presence node, descriptors and
/// leases disappear with its store session.
pub struct DistributedActionGuardian<T: ActionState> {
    inner: Arc<Inner<T>>,
}

impl<T: ActionState> DistributedActionGuardian<T> {
    /// Start guarding on `store`.
    ///
    /// Creates the namespace, registers this host's presence node and starts
    /// watching the store's connectivity. Fails with
    /// [`GuardError::Connection`] if the store cannot be used.
    pub fn connect(
        store: Arc<dyn CoordinationStore>,
        settings: GuardianSettings,
        next: NextGuardian<T>,
    ) -> Result<Self> {
        let paths = Namespace::new(&settings.namespace);
        for path in [paths.jobs(), paths.nodes()] {
            store
                .ensure_path(&path)
                .map_err(|e| GuardError::Connection(e.to_string()))?;
        }

        let events = store.subscribe();
        let inner = Arc::new(Inner {
            store,
            hostname: settings.hostname,
            presence_id: format!(
                "{}-{}",
                std::process::id(),
                GUARDIAN_COUNTER.fetch_add(1, Ordering::Relaxed)
            ),
            paths,
            next,
            book: Mutex::new(LeaseBook {
                held: HashMap::new(),
                invalidated: HashMap::new(),
                releasing: HashMap::new(),
            }),
            listeners: Mutex::new(Vec::new()),
            registered: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        inner.register_self();

        let watched = Arc::downgrade(&inner);
        std::thread::Builder::new()
            .name(format!("{}-events", T::DOMAIN))
            .spawn(move || watch_connection(watched, events))
            .map_err(|e| GuardError::Connection(format!("cannot watch connection: {e}")))?;

        info!(
            hostname = %inner.hostname,
            domain = T::DOMAIN,
            "distributed action guardian connected"
        );
        Ok(Self { inner })
    }

    /// Connect to the in-process coordination service at `connect_string`.
    ///
    /// Gives up with [`GuardError::Connection`] once `timeout` passes
    /// without reaching any endpoint.
    pub fn connect_to(
        connect_string: &str,
        timeout: Duration,
        settings: GuardianSettings,
        next: NextGuardian<T>,
    ) -> Result<Self> {
        let endpoints = ConnectString::parse(connect_string)
            .map_err(|e| GuardError::UserError(e.to_string()))?;
        let store = MemoryCoordinator::connect(&endpoints, timeout)
            .map_err(|e| GuardError::Connection(e.to_string()))?;
        Self::connect(Arc::new(store), settings, next)
    }

    /// Name recorded in this guardian's descriptors.
    pub fn hostname(&self) -> &str {
        &self.inner.hostname
    }

    /// Store paths of this guardian.
    pub fn namespace(&self) -> &Namespace {
        &self.inner.paths
    }

    /// The descriptor of `job_id`, read under the description lock.
    pub fn current_holder(&self, job_id: &str) -> HostnameAction<T> {
        self.inner.current_holder(job_id)
    }

    /// Hosts with a live guardian in this namespace.
    pub fn engine_api_hosts(&self) -> Result<Vec<String>> {
        let mut hosts = Vec::new();
        for host in self.inner.store.children(&self.inner.paths.nodes())? {
            if !self.inner.store.children(&self.inner.paths.node(&host))?.is_empty() {
                hosts.push(host);
            }
        }
        Ok(hosts)
    }

    /// Every job whose descriptor in this domain names a host.
    pub fn host_by_job(&self) -> Result<BTreeMap<String, String>> {
        let mut hosts = BTreeMap::new();
        for job_id in self.inner.store.children(&self.inner.paths.jobs())? {
            let holder = self.inner.current_holder(&job_id);
            if holder.is_held() {
                hosts.insert(job_id, holder.hostname);
            }
        }
        Ok(hosts)
    }

    /// Actions whose lease this process holds.
    pub fn held_actions(&self) -> HashMap<String, T> {
        self.inner
            .book()
            .held
            .iter()
            .map(|(job, held)| (job.clone(), held.action))
            .collect()
    }

    /// Actions whose lease was lost and awaits reacquisition.
    pub fn invalidated_actions(&self) -> HashMap<String, T> {
        self.inner.book().invalidated.clone()
    }

    /// Jobs whose lease could not be given back yet.
    pub fn pending_releases(&self) -> Vec<String> {
        let mut jobs: Vec<String> = self.inner.book().releasing.keys().cloned().collect();
        jobs.sort();
        jobs
    }

    /// Call `listener` on every connectivity change, after the guardian has
    /// reacted to it.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push(Arc::new(listener));
    }

    /// Deregister this host and end the store session. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl<T: ActionState> ActionGuardian<T> for DistributedActionGuardian<T> {
    fn current_action(&self, job_id: &str) -> T {
        self.inner.current_holder(job_id).action
    }

    fn acquire_action(&self, job_id: &str, action: T) -> Result<T> {
        self.inner.acquire(job_id, action)
    }

    fn release_action(&self, job_id: &str, next_state: T) {
        self.inner.release(job_id, next_state);
    }
}

impl<T: ActionState> Drop for DistributedActionGuardian<T> {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl<T: ActionState> std::fmt::Debug for DistributedActionGuardian<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedActionGuardian")
            .field("hostname", &self.inner.hostname)
            .field("namespace", &self.inner.paths)
            .field("domain", &T::DOMAIN)
            .finish()
    }
}

fn watch_connection<T: ActionState>(inner: Weak<Inner<T>>, events: Receiver<ConnectionState>) {
    for state in events {
        match inner.upgrade() {
            Some(inner) => inner.on_connection_state(state),
            None => break,
        }
    }
    debug!(domain = T::DOMAIN, "connection watcher stopped");
}

impl<T: ActionState> Inner<T> {
    fn book(&self) -> MutexGuard<'_, LeaseBook<T>> {
        // Each critical section leaves the book consistent.
        self.book
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn description_lock(&self, job_id: &str) -> StoreResult<StoreLock> {
        self.store
            .write_lock(&self.paths.description_lock(job_id, T::DOMAIN))
    }

    fn current_holder(&self, job_id: &str) -> HostnameAction<T> {
        if check_job_id(job_id).is_err() {
            return HostnameAction::none();
        }
        let lock = match self
            .store
            .read_lock(&self.paths.description_lock(job_id, T::DOMAIN))
        {
            Ok(lock) => lock,
            Err(e) => {
                error!(job_id, error = %e, "failed to acquire description read lock");
                return HostnameAction::none();
            }
        };

        let holder = self.read_descriptor(job_id);
        drop(lock);
        holder
    }

    /// The descriptor of a job whose description lock is held.
    fn read_descriptor(&self, job_id: &str) -> HostnameAction<T> {
        match self.store.read(&self.paths.description(job_id, T::DOMAIN)) {
            Ok(Some(data)) if !data.is_empty() => {
                HostnameAction::parse(&String::from_utf8_lossy(&data))
            }
            Ok(_) => HostnameAction::none(),
            Err(e) => {
                error!(job_id, error = %e, "error reading descriptor");
                HostnameAction::none()
            }
        }
    }

    /// Record `action` as this host's. Returns whether the store took it.
    fn write_descriptor(&self, job_id: &str, action: T) -> bool {
        let data = HostnameAction::new(&self.hostname, action).encode();
        match self.store.write(
            &self.paths.description(job_id, T::DOMAIN),
            data.as_bytes(),
            NodeMode::Ephemeral,
        ) {
            Ok(()) => true,
            Err(e) => {
                error!(job_id, error = %e, "error writing descriptor");
                false
            }
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed.into());
        }
        Ok(())
    }

    fn acquire(&self, job_id: &str, action: T) -> Result<T> {
        check_job_id(job_id)?;
        self.check_open()?;
        let _lock = self.description_lock(job_id).inspect_err(|e| {
            error!(job_id, error = %e, "failed to acquire description lock");
        })?;
        let mut book = self.book();
        self.finish_release(&mut book, job_id);

        // this process already holds the lease: a valid transition reuses it
        if let Some(held) = book.held.get_mut(job_id) {
            let current = HostnameAction::new(&self.hostname, held.action);
            let next_state = self.set_action(job_id, &current, action)?;
            held.action = action;
            held.stale = false;
            return Ok(next_state);
        }

        let current = self.read_descriptor(job_id);
        let Some(lease) = self
            .store
            .try_acquire_lease(&self.paths.lease(job_id, T::DOMAIN))?
        else {
            let err = busy_error(job_id, action, current.action, Some(current.hostname.as_str()));
            warn!(job_id, "{}", err.message);
            return Err(err.into());
        };

        match self.set_action(job_id, &current, action) {
            Ok(next_state) => {
                book.held
                    .insert(job_id.to_string(), HeldLease::new(lease, action));
                debug!(job_id, action = %action, "acquired lease");
                Ok(next_state)
            }
            Err(e) => {
                if let Err(release) = self.store.release_lease(&lease) {
                    error!(job_id, error = %release, "error releasing lease");
                }
                Err(e)
            }
        }
    }

    /// Validate `action` against the descriptor, acquire it from the next
    /// guardian and record it.
    fn set_action(&self, job_id: &str, current: &HostnameAction<T>, action: T) -> Result<T> {
        if !current.action.is_valid_transition(action) {
            let err = busy_error(job_id, action, current.action, Some(current.hostname.as_str()));
            warn!(job_id, "{}", err.message);
            return Err(err.into());
        }

        if let Some(next) = &self.next {
            next.acquire_action(job_id, action)?;
        }

        self.write_descriptor(job_id, action);
        Ok(action.next_state(current.action))
    }

    fn release(&self, job_id: &str, next_state: T) {
        if check_job_id(job_id).is_err() {
            warn!(job_id, "job is not locked by this guardian");
            return;
        }
        let lock = self
            .description_lock(job_id)
            .inspect_err(|e| error!(job_id, error = %e, "failed to acquire description lock"))
            .ok();

        if let Some(next) = &self.next {
            next.release_action(job_id, next_state);
        }

        let mut book = self.book();
        if next_state.hold_distributed_lock() {
            if let Some(held) = book.held.get_mut(job_id) {
                held.action = next_state;
                held.stale = !(lock.is_some() && self.write_descriptor(job_id, next_state));
            } else if let Some(pending) = book.invalidated.get_mut(job_id) {
                *pending = next_state;
            } else {
                warn!(job_id, "job is not locked by this guardian");
            }
        } else if let Some(held) = book.held.remove(job_id) {
            if lock.is_some() && self.give_back(job_id, &held.lease) {
                debug!(job_id, "released lease");
            } else {
                warn!(job_id, "lease release deferred until the store is reachable");
                book.releasing.insert(job_id.to_string(), held.lease);
            }
        } else if book.invalidated.remove(job_id).is_some() {
            debug!(job_id, "dropped pending reacquisition");
        } else {
            warn!(job_id, "job is not locked by this guardian");
        }
    }

    /// Delete the descriptor and job node, then give the lease back. The
    /// description lock must be held. Returns whether every step succeeded.
    fn give_back(&self, job_id: &str, lease: &Lease) -> bool {
        let result = self
            .store
            .remove(&self.paths.lease(job_id, T::DOMAIN))
            .and_then(|()| self.store.children(&self.paths.job(job_id)))
            .and_then(|rest| {
                // other domains may still use the job node
                if rest.is_empty() {
                    self.store.remove(&self.paths.job(job_id))
                } else {
                    Ok(())
                }
            })
            .and_then(|()| self.store.release_lease(lease));
        match result {
            Ok(()) => true,
            Err(e) => {
                error!(job_id, error = %e, "error releasing lease");
                false
            }
        }
    }

    /// Retry a deferred release of `job_id`. The description lock must be
    /// held.
    fn finish_release(&self, book: &mut LeaseBook<T>, job_id: &str) {
        if let Some(lease) = book.releasing.remove(job_id) {
            if self.give_back(job_id, &lease) {
                info!(job_id, "released deferred lease");
            } else {
                book.releasing.insert(job_id.to_string(), lease);
            }
        }
    }

    /// Take the lease of `job_id` again. The description lock must be held.
    fn reacquire(&self, job_id: &str, action: T) -> Result<Lease> {
        let lease = self
            .store
            .try_acquire_lease(&self.paths.lease(job_id, T::DOMAIN))?;

        match lease {
            Some(lease) => {
                self.write_descriptor(job_id, action);
                Ok(lease)
            }
            None => {
                let current = self.read_descriptor(job_id);
                Err(busy_error(job_id, action, current.action, Some(current.hostname.as_str())).into())
            }
        }
    }

    fn on_connection_state(&self, state: ConnectionState) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        match state {
            ConnectionState::Suspended => {
                debug!(domain = T::DOMAIN, "connection suspended, keeping leases");
            }
            ConnectionState::Lost => {
                let mut book = self.book();
                let held = std::mem::take(&mut book.held);
                if !held.is_empty() {
                    warn!(
                        domain = T::DOMAIN,
                        count = held.len(),
                        "connection lost, leases invalidated"
                    );
                }
                for (job_id, held) in held {
                    book.invalidated.insert(job_id, held.action);
                }
                // the service dropped them with the session
                book.releasing.clear();
            }
            ConnectionState::Reconnected => {
                self.register_self();
                self.finish_releases();
                self.refresh_descriptors();
                self.reacquire_invalidated();
            }
        }

        let listeners: Vec<ConnectionListener> = self
            .listeners
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone();
        for listener in listeners {
            listener(state);
        }
    }

    fn finish_releases(&self) {
        let jobs: Vec<String> = self.book().releasing.keys().cloned().collect();
        for job_id in jobs {
            match self.description_lock(&job_id) {
                Ok(_lock) => self.finish_release(&mut self.book(), &job_id),
                Err(e) => warn!(job_id = %job_id, error = %e, "deferred release still pending"),
            }
        }
    }

    fn refresh_descriptors(&self) {
        let jobs: Vec<String> = self
            .book()
            .held
            .iter()
            .filter(|(_, held)| held.stale)
            .map(|(job_id, _)| job_id.clone())
            .collect();
        for job_id in jobs {
            let Ok(_lock) = self.description_lock(&job_id) else {
                continue;
            };
            let mut book = self.book();
            if let Some(held) = book.held.get_mut(&job_id)
                && held.stale
            {
                held.stale = !self.write_descriptor(&job_id, held.action);
            }
        }
    }

    fn reacquire_invalidated(&self) {
        let jobs: Vec<String> = self.book().invalidated.keys().cloned().collect();
        for job_id in jobs {
            let lock = self.description_lock(&job_id);
            let mut book = self.book();
            let Some(action) = book.invalidated.remove(&job_id) else {
                continue;
            };
            if book.held.contains_key(&job_id) {
                continue;
            }

            let result = lock
                .map_err(GuardError::from)
                .and_then(|_lock| self.reacquire(&job_id, action));
            match result {
                Ok(lease) => {
                    info!(job_id = %job_id, action = %action, "reacquired lease");
                    book.held.insert(job_id, HeldLease::new(lease, action));
                }
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "failed to reacquire lease");
                }
            }
        }
    }

    fn register_self(&self) {
        let path = self.paths.presence(&self.hostname, &self.presence_id);
        match self.store.create(&path, &[], NodeMode::Ephemeral) {
            Ok(_) => self.registered.store(true, Ordering::SeqCst),
            Err(e) => {
                warn!(hostname = %self.hostname, error = %e, "error registering node");
            }
        }
    }

    fn deregister_self(&self) {
        if !self.registered.swap(false, Ordering::SeqCst) {
            return;
        }
        let path = self.paths.presence(&self.hostname, &self.presence_id);
        if let Err(e) = self.store.remove(&path) {
            warn!(hostname = %self.hostname, error = %e, "error de-registering node");
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.deregister_self();
        self.store.close();

        let mut book = self.book();
        book.held.clear();
        book.invalidated.clear();
        book.releasing.clear();
        info!(hostname = %self.hostname, domain = T::DOMAIN, "distributed action guardian closed");
    }
}
