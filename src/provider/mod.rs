//! Provider-side runtime: registry, acceptor, dispatch.

pub mod registry;
pub mod server;

pub use registry::{LookupError, RegistryError, ServiceRegistry};
pub use server::{ProviderHandle, ProviderServer, ServeError};
