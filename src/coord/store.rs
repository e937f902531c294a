//! Store backend seam.
//!
//! Captures exactly what the runtime requires from a tree-structured
//! coordination store; the store's own wire protocol lives behind this
//! trait.

use std::time::Duration;

use crossbeam::channel::Sender;
use thiserror::Error;

use crate::error::Transience;

/// Version argument that bypasses the optimistic-concurrency check.
pub const ANY_VERSION: i32 = -1;

/// Handle to one session with the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    Ephemeral,
    PersistentSequential,
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    pub fn is_sequential(self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeEventKind {
    Created,
    DataChanged,
    Deleted,
}

/// One-shot watch notification, delivered over a crossbeam channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeEvent {
    pub path: String,
    pub kind: NodeEventKind,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no node at {0}")]
    NoNode(String),
    #[error("node already exists at {0}")]
    NodeExists(String),
    #[error("version mismatch at {path}: expected {expected}, node is at {actual}")]
    BadVersion {
        path: String,
        expected: i32,
        actual: i32,
    },
    #[error("node at {0} has children")]
    NotEmpty(String),
    #[error("invalid path {path}: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("parent of {0} does not exist")]
    NoParent(String),
    #[error("session expired")]
    SessionExpired,
    #[error("session failure: {0}")]
    SessionFailure(String),
}

impl StoreError {
    pub fn transience(&self) -> Transience {
        match self {
            StoreError::SessionExpired | StoreError::SessionFailure(_) => Transience::Retryable,
            StoreError::BadVersion { .. } => Transience::Unknown,
            _ => Transience::Permanent,
        }
    }
}

/// Session-scoped operations the runtime needs from the store.
///
/// Paths are slash-separated, rooted at `/`. Sequential creates append a
/// ten-digit counter to the final path segment and return the actual path.
pub trait StoreBackend: Send + Sync {
    fn open_session(&self, timeout: Duration) -> Result<SessionId, StoreError>;

    /// Liveness probe; refreshes the session lease.
    fn ping(&self, session: SessionId) -> Result<(), StoreError>;

    /// Ends the session; the store drops every ephemeral node it owns.
    fn close_session(&self, session: SessionId);

    fn create(
        &self,
        session: SessionId,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> Result<String, StoreError>;

    fn get_data(
        &self,
        session: SessionId,
        path: &str,
        watch: Option<Sender<NodeEvent>>,
    ) -> Result<Vec<u8>, StoreError>;

    fn set_data(
        &self,
        session: SessionId,
        path: &str,
        data: &[u8],
        version: i32,
    ) -> Result<(), StoreError>;

    fn delete(&self, session: SessionId, path: &str, version: i32) -> Result<(), StoreError>;

    fn exists(
        &self,
        session: SessionId,
        path: &str,
        watch: Option<Sender<NodeEvent>>,
    ) -> Result<bool, StoreError>;

    /// Direct child names (final segments), sorted lexicographically.
    fn get_children(&self, session: SessionId, path: &str) -> Result<Vec<String>, StoreError>;
}
