use thiserror::Error;

use crate::caller::CallError;
use crate::config::ConfigError;
use crate::coord::StoreError;
use crate::message::MessageError;
use crate::provider::{RegistryError, ServeError};
use crate::wire::WireError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// Crate-level convenience error.
///
/// A thin wrapper over the per-subsystem errors; each subsystem keeps its
/// own canonical error type.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Serve(#[from] ServeError),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::Wire(e) => e.transience(),
            Error::Message(_) => Transience::Permanent,
            Error::Registry(_) => Transience::Permanent,
            Error::Serve(e) => e.transience(),
            Error::Call(e) => e.transience(),
            Error::Store(e) => e.transience(),
            Error::Config(_) => Transience::Permanent,
        }
    }
}
