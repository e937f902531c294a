#![forbid(unsafe_code)]

pub mod caller;
pub mod config;
pub mod controller;
pub mod coord;
pub mod descriptor;
pub mod error;
pub mod message;
pub mod provider;
pub mod telemetry;
pub mod wire;

#[cfg(test)]
mod test_harness;

pub use error::{Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the runtime surface at crate root for convenience
pub use caller::{CallError, CallerChannel};
pub use config::Settings;
pub use controller::Controller;
pub use coord::{
    CoordClient, CreateMode, MemoryStore, NodeEvent, NodeEventKind, SessionPhase, StoreBackend,
    StoreError,
};
pub use descriptor::{Completion, MethodDescriptor, Service, ServiceDescriptor};
pub use message::{Message, MessageError};
pub use provider::{ProviderHandle, ProviderServer, RegistryError, ServeError};
pub use wire::{Endian, RequestFrame, WireError};
