//! In-process coordination service.
//!
//! A [`MemoryServer`] is registered under a `host:port` endpoint in a
//! process-wide registry; [`MemoryCoordinator`] clients find it through a
//! [`ConnectString`]. Every client owns a session: ephemeral nodes, leases
//! and lock holds belong to the session and disappear when it expires.
//! The server can be suspended, resumed and restarted, and single sessions
//! expired, which drives the connectivity events clients observe.

use super::{
    ConnectString, ConnectionState, CoordinationStore, Lease, NodeMode, StoreError, StoreLock,
    StoreResult, parent_path, path_segments,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, LazyLock, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Servers reachable by endpoint.
static SERVERS: LazyLock<Mutex<HashMap<String, Weak<MemoryServer>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Interval between connection attempts.
const CONNECT_POLL: Duration = Duration::from_millis(50);

struct Node {
    data: Vec<u8>,
    /// Session owning an ephemeral node.
    owner: Option<u64>,
}

struct LeaseHold {
    session: u64,
    token: String,
}

#[derive(Default)]
struct LockHold {
    writer: Option<u64>,
    readers: HashMap<u64, usize>,
}

impl LockHold {
    fn is_free(&self) -> bool {
        self.writer.is_none() && self.readers.is_empty()
    }
}

#[derive(Clone, Copy)]
enum LockKind {
    Read,
    Write,
}

struct Client {
    session: Option<u64>,
    events: Option<Sender<ConnectionState>>,
}

impl Client {
    fn notify(&self, state: ConnectionState) {
        if let Some(events) = &self.events {
            // A dropped receiver only means nobody is listening.
            let _ = events.send(state);
        }
    }
}

struct ServerState {
    running: bool,
    next_id: u64,
    nodes: BTreeMap<String, Node>,
    leases: HashMap<String, LeaseHold>,
    locks: HashMap<String, LockHold>,
    clients: HashMap<u64, Client>,
}

impl ServerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// The live session of `client`.
    fn session(&self, client: u64) -> StoreResult<u64> {
        let entry = self.clients.get(&client).ok_or(StoreError::Closed)?;
        if !self.running {
            return Err(StoreError::ConnectionLoss);
        }
        entry.session.ok_or(StoreError::ConnectionLoss)
    }

    /// Drop everything owned by `session`.
    fn expire(&mut self, session: u64) {
        self.nodes.retain(|_, node| node.owner != Some(session));
        self.leases.retain(|_, hold| hold.session != session);
        for hold in self.locks.values_mut() {
            if hold.writer == Some(session) {
                hold.writer = None;
            }
            hold.readers.remove(&session);
        }
        self.locks.retain(|_, hold| !hold.is_free());
    }

    fn ensure_parents(&mut self, path: &str) {
        let mut current = parent_path(path);
        let mut missing = Vec::new();
        while let Some(p) = current {
            if p == "/" || self.nodes.contains_key(p) {
                break;
            }
            missing.push(p.to_string());
            current = parent_path(p);
        }
        for p in missing {
            self.nodes.insert(
                p,
                Node {
                    data: Vec::new(),
                    owner: None,
                },
            );
        }
    }

    fn insert(&mut self, path: &str, data: &[u8], mode: NodeMode, session: u64) {
        self.ensure_parents(path);
        let owner = match mode {
            NodeMode::Persistent => None,
            NodeMode::Ephemeral => Some(session),
        };
        self.nodes.insert(
            path.to_string(),
            Node {
                data: data.to_vec(),
                owner,
            },
        );
    }
}

/// An in-process coordination server.
pub struct MemoryServer {
    endpoint: String,
    state: Mutex<ServerState>,
    changed: Condvar,
}

impl MemoryServer {
    /// Start a server and register it under `endpoint` (`host:port`).
    ///
    /// A previous server registered under the same endpoint becomes
    /// unreachable for new clients.
    pub fn start(endpoint: &str) -> StoreResult<Arc<Self>> {
        let parsed = ConnectString::parse(endpoint)?;
        if parsed.endpoints().len() != 1 {
            return Err(StoreError::InvalidConnectString(endpoint.to_string()));
        }

        let server = Arc::new(Self {
            endpoint: endpoint.to_string(),
            state: Mutex::new(ServerState {
                running: true,
                next_id: 0,
                nodes: BTreeMap::new(),
                leases: HashMap::new(),
                locks: HashMap::new(),
                clients: HashMap::new(),
            }),
            changed: Condvar::new(),
        });

        let mut servers = SERVERS.lock().unwrap_or_else(|poison| poison.into_inner());
        servers.retain(|_, weak| weak.strong_count() > 0);
        servers.insert(endpoint.to_string(), Arc::downgrade(&server));
        info!(endpoint, "memory coordination server started");
        Ok(server)
    }

    /// The endpoint this server is registered under.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether the server accepts requests.
    pub fn is_running(&self) -> bool {
        self.state().running
    }

    /// Interrupt every client link. Sessions survive until expired.
    pub fn suspend(&self) {
        let mut state = self.state();
        if !state.running {
            return;
        }
        state.running = false;
        for client in state.clients.values() {
            if client.session.is_some() {
                client.notify(ConnectionState::Suspended);
            }
        }
        drop(state);
        self.changed.notify_all();
        debug!(endpoint = %self.endpoint, "memory server suspended");
    }

    /// Accept requests again. Clients whose session expired get a new one.
    pub fn resume(&self) {
        let mut state = self.state();
        if state.running {
            return;
        }
        state.running = true;
        let ids: Vec<u64> = state.clients.keys().copied().collect();
        for id in ids {
            let session = state.next_id();
            if let Some(client) = state.clients.get_mut(&id) {
                client.session.get_or_insert(session);
                client.notify(ConnectionState::Reconnected);
            }
        }
        drop(state);
        self.changed.notify_all();
        debug!(endpoint = %self.endpoint, "memory server resumed");
    }

    /// Expire every session: ephemeral nodes, leases and lock holds vanish.
    pub fn expire_sessions(&self) {
        let mut state = self.state();
        let ids: Vec<u64> = state.clients.keys().copied().collect();
        for id in ids {
            expire_client(&mut state, id);
        }
        drop(state);
        self.changed.notify_all();
    }

    /// Suspend, expire every session, then resume.
    ///
    /// Clients observe SUSPENDED, LOST and RECONNECTED in that order.
    pub fn restart(&self) {
        self.suspend();
        self.expire_sessions();
        self.resume();
    }

    /// Whether a node exists, regardless of sessions or suspension.
    pub fn contains(&self, path: &str) -> bool {
        self.state().nodes.contains_key(path)
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        // Each critical section leaves the state consistent.
        self.state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn register(&self) -> Option<u64> {
        let mut state = self.state();
        if !state.running {
            return None;
        }
        let id = state.next_id();
        let session = state.next_id();
        state.clients.insert(
            id,
            Client {
                session: Some(session),
                events: None,
            },
        );
        Some(id)
    }

    fn lock(&self, path: &str, client: u64, kind: LockKind) -> StoreResult<u64> {
        path_segments(path)?;
        let mut state = self.state();
        loop {
            let session = state.session(client)?;
            let hold = state.locks.entry(path.to_string()).or_default();
            let granted = match kind {
                LockKind::Read => hold.writer.is_none(),
                LockKind::Write => hold.is_free(),
            };
            if granted {
                match kind {
                    LockKind::Read => *hold.readers.entry(session).or_insert(0) += 1,
                    LockKind::Write => hold.writer = Some(session),
                }
                return Ok(session);
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(|poison| poison.into_inner());
        }
    }

    fn unlock(&self, path: &str, session: u64, kind: LockKind) {
        let mut state = self.state();
        if let Some(hold) = state.locks.get_mut(path) {
            match kind {
                LockKind::Read => {
                    if let Some(count) = hold.readers.get_mut(&session) {
                        *count -= 1;
                        if *count == 0 {
                            hold.readers.remove(&session);
                        }
                    }
                }
                LockKind::Write => {
                    if hold.writer == Some(session) {
                        hold.writer = None;
                    }
                }
            }
            if hold.is_free() {
                state.locks.remove(path);
            }
        }
        drop(state);
        self.changed.notify_all();
    }
}

impl std::fmt::Debug for MemoryServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryServer")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

fn expire_client(state: &mut ServerState, id: u64) {
    let Some(session) = state.clients.get_mut(&id).and_then(|c| c.session.take()) else {
        return;
    };
    state.expire(session);
    if let Some(client) = state.clients.get(&id) {
        client.notify(ConnectionState::Lost);
    }
}

/// A client session on a [`MemoryServer`].
pub struct MemoryCoordinator {
    server: Arc<MemoryServer>,
    client: u64,
}

impl MemoryCoordinator {
    /// Connect to the first running server among `connect_string`'s
    /// endpoints, retrying until `timeout` runs out.
    pub fn connect(connect_string: &ConnectString, timeout: Duration) -> StoreResult<Self> {
        let started = Instant::now();
        loop {
            for endpoint in connect_string.endpoints() {
                let server = SERVERS
                    .lock()
                    .unwrap_or_else(|poison| poison.into_inner())
                    .get(endpoint)
                    .and_then(Weak::upgrade);
                if let Some(server) = server
                    && let Some(client) = server.register()
                {
                    debug!(endpoint = %endpoint, client, "connected to memory server");
                    return Ok(Self { server, client });
                }
            }

            if started.elapsed() >= timeout {
                return Err(StoreError::Connection {
                    endpoints: connect_string.to_string(),
                    waited: timeout,
                });
            }
            std::thread::sleep(CONNECT_POLL);
        }
    }

    /// Whether this client currently has a live session.
    pub fn is_connected(&self) -> bool {
        self.server.state().session(self.client).is_ok()
    }

    /// Expire this client's session alone; the client observes LOST.
    pub fn expire_session(&self) {
        let mut state = self.server.state();
        expire_client(&mut state, self.client);
        drop(state);
        self.server.changed.notify_all();
    }

    /// Open a new session after expiry; the client observes RECONNECTED.
    pub fn reconnect(&self) -> StoreResult<()> {
        let mut state = self.server.state();
        if !state.running {
            return Err(StoreError::ConnectionLoss);
        }
        let session = state.next_id();
        let client = state
            .clients
            .get_mut(&self.client)
            .ok_or(StoreError::Closed)?;
        if client.session.is_none() {
            client.session = Some(session);
            client.notify(ConnectionState::Reconnected);
        }
        Ok(())
    }

    fn session(&self) -> StoreResult<(MutexGuard<'_, ServerState>, u64)> {
        let state = self.server.state();
        let session = state.session(self.client)?;
        Ok((state, session))
    }

    fn take_lock(&self, path: &str, kind: LockKind) -> StoreResult<StoreLock> {
        let session = self.server.lock(path, self.client, kind)?;
        let server = Arc::clone(&self.server);
        let owned = path.to_string();
        Ok(StoreLock::new(
            path,
            Box::new(move || {
                server.unlock(&owned, session, kind);
                Ok(())
            }),
        ))
    }
}

impl CoordinationStore for MemoryCoordinator {
    fn ensure_path(&self, path: &str) -> StoreResult<()> {
        path_segments(path)?;
        let (mut state, session) = self.session()?;
        if path != "/" && !state.nodes.contains_key(path) {
            state.insert(path, &[], NodeMode::Persistent, session);
        }
        Ok(())
    }

    fn create(&self, path: &str, data: &[u8], mode: NodeMode) -> StoreResult<bool> {
        path_segments(path)?;
        let (mut state, session) = self.session()?;
        if state.nodes.contains_key(path) {
            return Ok(false);
        }
        state.insert(path, data, mode, session);
        Ok(true)
    }

    fn write(&self, path: &str, data: &[u8], mode: NodeMode) -> StoreResult<()> {
        path_segments(path)?;
        let (mut state, session) = self.session()?;
        // the writer's mode wins over the previous owner's
        state.insert(path, data, mode, session);
        Ok(())
    }

    fn read(&self, path: &str) -> StoreResult<Option<Vec<u8>>> {
        path_segments(path)?;
        let (state, _) = self.session()?;
        Ok(state.nodes.get(path).map(|node| node.data.clone()))
    }

    fn remove(&self, path: &str) -> StoreResult<()> {
        path_segments(path)?;
        let (mut state, _) = self.session()?;
        let prefix = format!("{}/", path.trim_end_matches('/'));
        state
            .nodes
            .retain(|key, _| key != path && !key.starts_with(&prefix));
        Ok(())
    }

    fn children(&self, path: &str) -> StoreResult<Vec<String>> {
        path_segments(path)?;
        let (state, _) = self.session()?;
        let prefix = format!("{}/", path.trim_end_matches('/'));
        Ok(state
            .nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| &key[prefix.len()..])
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }

    fn read_lock(&self, path: &str) -> StoreResult<StoreLock> {
        self.take_lock(path, LockKind::Read)
    }

    fn write_lock(&self, path: &str) -> StoreResult<StoreLock> {
        self.take_lock(path, LockKind::Write)
    }

    fn try_acquire_lease(&self, path: &str) -> StoreResult<Option<Lease>> {
        path_segments(path)?;
        let (mut state, session) = self.session()?;
        if state.leases.contains_key(path) {
            return Ok(None);
        }
        let token = format!("lease-{}", state.next_id());
        state.leases.insert(
            path.to_string(),
            LeaseHold {
                session,
                token: token.clone(),
            },
        );
        Ok(Some(Lease::new(path, token)))
    }

    fn release_lease(&self, lease: &Lease) -> StoreResult<()> {
        let (mut state, _) = self.session()?;
        if state
            .leases
            .get(lease.path())
            .is_some_and(|hold| hold.token == lease.token())
        {
            state.leases.remove(lease.path());
        }
        Ok(())
    }

    fn subscribe(&self) -> Receiver<ConnectionState> {
        let (tx, rx) = mpsc::channel();
        if let Some(client) = self.server.state().clients.get_mut(&self.client) {
            client.events = Some(tx);
        }
        rx
    }

    fn close(&self) {
        let mut state = self.server.state();
        if let Some(client) = state.clients.remove(&self.client) {
            if let Some(session) = client.session {
                state.expire(session);
            }
            debug!(client = self.client, "memory client closed");
        }
        drop(state);
        self.server.changed.notify_all();
    }
}

impl Drop for MemoryCoordinator {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for MemoryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCoordinator")
            .field("endpoint", &self.server.endpoint)
            .field("client", &self.client)
            .finish()
    }
}
