//! In-memory store backend.
//!
//! Process-local tree with real session expiry, used by tests and
//! single-process deployments. Sessions hold a lease refreshed by `ping`;
//! a lease that lapses past its timeout expires lazily on the next state
//! access, dropping the session's ephemeral nodes and firing their watches.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;

use super::store::{
    ANY_VERSION, CreateMode, NodeEvent, NodeEventKind, SessionId, StoreBackend, StoreError,
};

const SEQUENCE_WIDTH: usize = 10;

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    next_session: u64,
    root_sequence: u64,
    sessions: BTreeMap<u64, Lease>,
    nodes: BTreeMap<String, Node>,
    watches: BTreeMap<String, Vec<Sender<NodeEvent>>>,
}

struct Lease {
    deadline: Instant,
    timeout: Duration,
}

struct Node {
    data: Vec<u8>,
    mode: CreateMode,
    owner: Option<SessionId>,
    version: i32,
    next_sequence: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces a session past its deadline, as if its process had vanished.
    pub fn expire_session(&self, session: SessionId) {
        let mut state = self.lock_swept();
        if let Some(lease) = state.sessions.get_mut(&session.0) {
            lease.deadline = Instant::now() - Duration::from_millis(1);
        }
        expire_due(&mut state);
    }

    fn lock_swept(&self) -> MutexGuard<'_, State> {
        let mut state = self.state.lock().expect("memory store lock poisoned");
        expire_due(&mut state);
        state
    }
}

fn expire_due(state: &mut State) {
    let now = Instant::now();
    let due: Vec<u64> = state
        .sessions
        .iter()
        .filter(|(_, lease)| lease.deadline <= now)
        .map(|(id, _)| *id)
        .collect();
    for id in due {
        state.sessions.remove(&id);
        drop_session_ephemerals(state, SessionId(id));
    }
}

fn drop_session_ephemerals(state: &mut State, session: SessionId) {
    let owned: Vec<String> = state
        .nodes
        .iter()
        .filter(|(_, node)| node.mode.is_ephemeral() && node.owner == Some(session))
        .map(|(path, _)| path.clone())
        .collect();
    for path in owned {
        state.nodes.remove(&path);
        fire_watches(state, &path, NodeEventKind::Deleted);
    }
}

fn fire_watches(state: &mut State, path: &str, kind: NodeEventKind) {
    if let Some(senders) = state.watches.remove(path) {
        for sender in senders {
            let _ = sender.send(NodeEvent {
                path: path.to_string(),
                kind,
            });
        }
    }
}

fn check_session(state: &State, session: SessionId) -> Result<(), StoreError> {
    if state.sessions.contains_key(&session.0) {
        Ok(())
    } else {
        Err(StoreError::SessionExpired)
    }
}

fn validate_path(path: &str) -> Result<(), StoreError> {
    let invalid = |reason: &str| StoreError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };
    if !path.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }
    if path.len() > 1 && path.ends_with('/') {
        return Err(invalid("must not end with '/'"));
    }
    if path == "/" {
        return Err(invalid("root is not addressable"));
    }
    if path[1..].split('/').any(str::is_empty) {
        return Err(invalid("empty path segment"));
    }
    Ok(())
}

fn parent_of(path: &str) -> Option<&str> {
    let idx = path.rfind('/')?;
    if idx == 0 { None } else { Some(&path[..idx]) }
}

fn has_children(state: &State, path: &str) -> bool {
    let prefix = format!("{path}/");
    state
        .nodes
        .range(prefix.clone()..)
        .next()
        .is_some_and(|(candidate, _)| candidate.starts_with(&prefix))
}

impl StoreBackend for MemoryStore {
    fn open_session(&self, timeout: Duration) -> Result<SessionId, StoreError> {
        if timeout.is_zero() {
            return Err(StoreError::SessionFailure(
                "session timeout cannot be zero".to_string(),
            ));
        }
        let mut state = self.lock_swept();
        let id = state.next_session;
        state.next_session += 1;
        state.sessions.insert(
            id,
            Lease {
                deadline: Instant::now() + timeout,
                timeout,
            },
        );
        Ok(SessionId(id))
    }

    fn ping(&self, session: SessionId) -> Result<(), StoreError> {
        let mut state = self.lock_swept();
        let lease = state
            .sessions
            .get_mut(&session.0)
            .ok_or(StoreError::SessionExpired)?;
        lease.deadline = Instant::now() + lease.timeout;
        Ok(())
    }

    fn close_session(&self, session: SessionId) {
        let mut state = self.lock_swept();
        state.sessions.remove(&session.0);
        drop_session_ephemerals(&mut state, session);
    }

    fn create(
        &self,
        session: SessionId,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> Result<String, StoreError> {
        validate_path(path)?;
        let mut state = self.lock_swept();
        check_session(&state, session)?;

        if let Some(parent) = parent_of(path) {
            if !state.nodes.contains_key(parent) {
                return Err(StoreError::NoParent(path.to_string()));
            }
            if state.nodes[parent].mode.is_ephemeral() {
                return Err(StoreError::InvalidPath {
                    path: path.to_string(),
                    reason: "ephemeral nodes cannot have children".to_string(),
                });
            }
        }

        let actual = if mode.is_sequential() {
            let sequence = match parent_of(path) {
                Some(parent) => {
                    let parent_node = state.nodes.get_mut(parent).expect("parent checked above");
                    let n = parent_node.next_sequence;
                    parent_node.next_sequence += 1;
                    n
                }
                None => {
                    let n = state.root_sequence;
                    state.root_sequence += 1;
                    n
                }
            };
            format!("{path}{sequence:0width$}", width = SEQUENCE_WIDTH)
        } else {
            path.to_string()
        };

        if let Some(existing) = state.nodes.get(&actual) {
            // Ensure-exists semantics for plain persistent creates only.
            if mode == CreateMode::Persistent && existing.mode == CreateMode::Persistent {
                return Ok(actual);
            }
            return Err(StoreError::NodeExists(actual));
        }

        state.nodes.insert(
            actual.clone(),
            Node {
                data: data.to_vec(),
                mode,
                owner: mode.is_ephemeral().then_some(session),
                version: 0,
                next_sequence: 0,
            },
        );
        fire_watches(&mut state, &actual, NodeEventKind::Created);
        Ok(actual)
    }

    fn get_data(
        &self,
        session: SessionId,
        path: &str,
        watch: Option<Sender<NodeEvent>>,
    ) -> Result<Vec<u8>, StoreError> {
        validate_path(path)?;
        let mut state = self.lock_swept();
        check_session(&state, session)?;
        let data = state
            .nodes
            .get(path)
            .ok_or_else(|| StoreError::NoNode(path.to_string()))?
            .data
            .clone();
        if let Some(sender) = watch {
            state.watches.entry(path.to_string()).or_default().push(sender);
        }
        Ok(data)
    }

    fn set_data(
        &self,
        session: SessionId,
        path: &str,
        data: &[u8],
        version: i32,
    ) -> Result<(), StoreError> {
        validate_path(path)?;
        let mut state = self.lock_swept();
        check_session(&state, session)?;
        let node = state
            .nodes
            .get_mut(path)
            .ok_or_else(|| StoreError::NoNode(path.to_string()))?;
        if version != ANY_VERSION && version != node.version {
            return Err(StoreError::BadVersion {
                path: path.to_string(),
                expected: version,
                actual: node.version,
            });
        }
        node.data = data.to_vec();
        node.version += 1;
        fire_watches(&mut state, path, NodeEventKind::DataChanged);
        Ok(())
    }

    fn delete(&self, session: SessionId, path: &str, version: i32) -> Result<(), StoreError> {
        validate_path(path)?;
        let mut state = self.lock_swept();
        check_session(&state, session)?;
        let node = state
            .nodes
            .get(path)
            .ok_or_else(|| StoreError::NoNode(path.to_string()))?;
        if version != ANY_VERSION && version != node.version {
            return Err(StoreError::BadVersion {
                path: path.to_string(),
                expected: version,
                actual: node.version,
            });
        }
        if has_children(&state, path) {
            return Err(StoreError::NotEmpty(path.to_string()));
        }
        state.nodes.remove(path);
        fire_watches(&mut state, path, NodeEventKind::Deleted);
        Ok(())
    }

    fn exists(
        &self,
        session: SessionId,
        path: &str,
        watch: Option<Sender<NodeEvent>>,
    ) -> Result<bool, StoreError> {
        validate_path(path)?;
        let mut state = self.lock_swept();
        check_session(&state, session)?;
        let present = state.nodes.contains_key(path);
        if let Some(sender) = watch {
            state.watches.entry(path.to_string()).or_default().push(sender);
        }
        Ok(present)
    }

    fn get_children(&self, session: SessionId, path: &str) -> Result<Vec<String>, StoreError> {
        validate_path(path)?;
        let mut state = self.lock_swept();
        check_session(&state, session)?;
        if !state.nodes.contains_key(path) {
            return Err(StoreError::NoNode(path.to_string()));
        }
        let prefix = format!("{path}/");
        let children = state
            .nodes
            .range(prefix.clone()..)
            .take_while(|(candidate, _)| candidate.starts_with(&prefix))
            .filter(|(candidate, _)| !candidate[prefix.len()..].contains('/'))
            .map(|(candidate, _)| candidate[prefix.len()..].to_string())
            .collect();
        Ok(children)
    }
}
