//! polybugger-broker — the process-wide broker layer.
//!
//! Owns the session registry (capacity, idle sweeping), the write-through
//! persistence of session descriptors, and the uniform operation surface
//! both external fronts (tool-call RPC, HTTP) delegate to.

pub mod api;
pub mod error;
pub mod persist;
pub mod registry;

pub use api::{
    Broker, BrokerConfig, ContainerAttachRequest, ContainerLaunchRequest, CreateSessionRequest,
    LanguageInfo, RecoverableSession,
};
pub use error::BrokerError;
pub use persist::{PersistedSession, SessionStore, SCHEMA_VERSION};
pub use registry::{Registry, RegistryConfig};
