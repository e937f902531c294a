//! Coordination store client: session lifecycle and node operations.

pub mod memory;
pub mod store;

pub use memory::MemoryStore;
pub use store::{
    ANY_VERSION, CreateMode, NodeEvent, NodeEventKind, SessionId, StoreBackend, StoreError,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, unbounded};

pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Keeper tick; drives session liveness well above 1 Hz.
const KEEPER_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Init,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

struct SessionSlot {
    id: Option<SessionId>,
    phase: SessionPhase,
}

/// An ephemeral node this client created, replayed after session
/// re-establishment. `requested` is the path as passed to `create`
/// (sequential creates get a fresh suffix on replay).
struct EphemeralRecord {
    requested: String,
    actual: String,
    data: Vec<u8>,
    mode: CreateMode,
}

struct Shared {
    backend: Arc<dyn StoreBackend>,
    timeout: Duration,
    session: Mutex<SessionSlot>,
    ephemerals: Mutex<Vec<EphemeralRecord>>,
    events_tx: Sender<NodeEvent>,
}

/// Session-bound client over a [`StoreBackend`].
///
/// One per process that needs the store. A background keeper thread pings
/// the session and, on expiry, re-opens it and restores every ephemeral
/// node this client created. Watch notifications arrive on the channel
/// returned by [`CoordClient::events`].
pub struct CoordClient {
    shared: Arc<Shared>,
    events_rx: Receiver<NodeEvent>,
    keeper: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl CoordClient {
    pub fn new(backend: Arc<dyn StoreBackend>, timeout: Duration) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            shared: Arc::new(Shared {
                backend,
                timeout,
                session: Mutex::new(SessionSlot {
                    id: None,
                    phase: SessionPhase::Init,
                }),
                ephemerals: Mutex::new(Vec::new()),
                events_tx,
            }),
            events_rx,
            keeper: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Opens the session, blocking until it is live, and starts the keeper.
    pub fn start(&mut self) -> Result<(), StoreError> {
        {
            let mut slot = self.shared.session.lock().expect("session lock poisoned");
            if slot.phase == SessionPhase::Closed {
                return Err(StoreError::SessionFailure("client is closed".to_string()));
            }
            slot.phase = SessionPhase::Connecting;
        }

        let id = match self.shared.backend.open_session(self.shared.timeout) {
            Ok(id) => id,
            Err(err) => {
                let mut slot = self.shared.session.lock().expect("session lock poisoned");
                slot.phase = SessionPhase::Init;
                return Err(err);
            }
        };
        {
            let mut slot = self.shared.session.lock().expect("session lock poisoned");
            slot.id = Some(id);
            slot.phase = SessionPhase::Connected;
        }
        tracing::info!(%id, "coordination session established");

        let shared = Arc::clone(&self.shared);
        let shutdown = Arc::clone(&self.shutdown);
        let keeper = thread::Builder::new()
            .name("tether-coord-keeper".to_string())
            .spawn(move || run_keeper(shared, shutdown))
            .map_err(|e| StoreError::SessionFailure(format!("keeper spawn failed: {e}")))?;
        self.keeper = Some(keeper);
        Ok(())
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.session.lock().expect("session lock poisoned").phase
    }

    /// Receiver for watch notifications registered through this client.
    pub fn events(&self) -> Receiver<NodeEvent> {
        self.events_rx.clone()
    }

    pub fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> Result<String, StoreError> {
        let session = self.session()?;
        let actual = self
            .run_op(|| self.shared.backend.create(session, path, data, mode))?;
        if mode.is_ephemeral() {
            let mut ephemerals = self.shared.ephemerals.lock().expect("ephemeral lock poisoned");
            ephemerals.push(EphemeralRecord {
                requested: path.to_string(),
                actual: actual.clone(),
                data: data.to_vec(),
                mode,
            });
        }
        Ok(actual)
    }

    pub fn get_data(&self, path: &str, watch: bool) -> Result<Vec<u8>, StoreError> {
        let session = self.session()?;
        let watcher = watch.then(|| self.shared.events_tx.clone());
        self.run_op(|| self.shared.backend.get_data(session, path, watcher.clone()))
    }

    pub fn set_data(&self, path: &str, data: &[u8], version: i32) -> Result<(), StoreError> {
        let session = self.session()?;
        self.run_op(|| self.shared.backend.set_data(session, path, data, version))
    }

    pub fn delete(&self, path: &str, version: i32) -> Result<(), StoreError> {
        let session = self.session()?;
        self.run_op(|| self.shared.backend.delete(session, path, version))?;
        let mut ephemerals = self.shared.ephemerals.lock().expect("ephemeral lock poisoned");
        ephemerals.retain(|record| record.actual != path);
        Ok(())
    }

    pub fn exists(&self, path: &str, watch: bool) -> Result<bool, StoreError> {
        let session = self.session()?;
        let watcher = watch.then(|| self.shared.events_tx.clone());
        self.run_op(|| self.shared.backend.exists(session, path, watcher.clone()))
    }

    pub fn get_children(&self, path: &str) -> Result<Vec<String>, StoreError> {
        let session = self.session()?;
        self.run_op(|| self.shared.backend.get_children(session, path))
    }

    /// Ends the session; the store drops this client's ephemeral nodes.
    pub fn close(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(keeper) = self.keeper.take() {
            let _ = keeper.join();
        }
        let mut slot = self.shared.session.lock().expect("session lock poisoned");
        if let Some(id) = slot.id.take() {
            self.shared.backend.close_session(id);
        }
        slot.phase = SessionPhase::Closed;
    }

    fn session(&self) -> Result<SessionId, StoreError> {
        let slot = self.shared.session.lock().expect("session lock poisoned");
        match (slot.phase, slot.id) {
            (SessionPhase::Connected, Some(id)) => Ok(id),
            (SessionPhase::Reconnecting, _) => Err(StoreError::SessionExpired),
            _ => Err(StoreError::SessionFailure(
                "session not started".to_string(),
            )),
        }
    }

    /// Runs a backend call; an expiry flips the slot to Reconnecting so the
    /// keeper picks it up.
    fn run_op<T>(&self, op: impl Fn() -> Result<T, StoreError>) -> Result<T, StoreError> {
        match op() {
            Err(StoreError::SessionExpired) => {
                let mut slot = self.shared.session.lock().expect("session lock poisoned");
                if slot.phase == SessionPhase::Connected {
                    slot.phase = SessionPhase::Reconnecting;
                }
                Err(StoreError::SessionExpired)
            }
            other => other,
        }
    }
}

fn run_keeper(shared: Arc<Shared>, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        thread::sleep(KEEPER_INTERVAL);
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        let (phase, id) = {
            let slot = shared.session.lock().expect("session lock poisoned");
            (slot.phase, slot.id)
        };

        match (phase, id) {
            (SessionPhase::Connected, Some(id)) => match shared.backend.ping(id) {
                Ok(()) => {}
                Err(StoreError::SessionExpired) => {
                    tracing::warn!(%id, "coordination session expired");
                    let mut slot = shared.session.lock().expect("session lock poisoned");
                    slot.phase = SessionPhase::Reconnecting;
                    slot.id = None;
                }
                Err(err) => {
                    tracing::warn!("coordination session ping failed: {err}");
                }
            },
            (SessionPhase::Reconnecting, _) => reestablish(&shared),
            _ => {}
        }
    }
}

fn reestablish(shared: &Shared) {
    let id = match shared.backend.open_session(shared.timeout) {
        Ok(id) => id,
        Err(err) => {
            tracing::warn!("coordination session reopen failed: {err}");
            return;
        }
    };

    let records: Vec<(String, Vec<u8>, CreateMode)> = {
        let ephemerals = shared.ephemerals.lock().expect("ephemeral lock poisoned");
        ephemerals
            .iter()
            .map(|r| (r.requested.clone(), r.data.clone(), r.mode))
            .collect()
    };

    let mut restored = Vec::with_capacity(records.len());
    for (requested, data, mode) in records {
        match shared.backend.create(id, &requested, &data, mode) {
            Ok(actual) => restored.push(EphemeralRecord {
                requested,
                actual,
                data,
                mode,
            }),
            Err(StoreError::NodeExists(path)) => {
                // Another creation beat the replay; keep the record as-is.
                restored.push(EphemeralRecord {
                    requested,
                    actual: path,
                    data,
                    mode,
                });
            }
            Err(err) => {
                tracing::warn!(path = %requested, "ephemeral restore failed: {err}");
            }
        }
    }

    {
        let mut ephemerals = shared.ephemerals.lock().expect("ephemeral lock poisoned");
        *ephemerals = restored;
    }
    let mut slot = shared.session.lock().expect("session lock poisoned");
    slot.id = Some(id);
    slot.phase = SessionPhase::Connected;
    tracing::info!(%id, "coordination session re-established, ephemerals restored");
}

impl Drop for CoordClient {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(keeper) = self.keeper.take() {
            let _ = keeper.join();
        }
        let mut slot = self.shared.session.lock().expect("session lock poisoned");
        if let Some(id) = slot.id.take() {
            self.shared.backend.close_session(id);
        }
        slot.phase = SessionPhase::Closed;
    }
}
