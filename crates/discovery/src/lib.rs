//! Service discovery domain for grpc-discovery.
//!
//! This crate contains the identifiers, value types, errors, retry policy and
//! port traits shared by the whole workspace. Infrastructure crates implement
//! the traits defined here; they never add discovery rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; `consul` and `grpc` define *how* to supply it,
//! and `session` orchestrates them.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`ServiceName`, `RegistryAddress`, etc.) |
//! | [`types`] | `Node`, `ServiceRecord`, `ClientHandle`, `Timestamp` |
//! | [`errors`] | Registry, transport and session error types |
//! | [`backoff`] | Retry schedule for registry lookups |
//! | [`config`] | `DiscoveryConfig` and `RefreshMode` |
//! | [`ports`] | Traits implemented by the adapters and the session |

pub mod backoff;
pub mod config;
pub mod errors;
pub mod identifiers;
pub mod ports;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use backoff::{BackoffPolicy, DEFAULT_RETRY_INTERVAL};
pub use config::{DiscoveryConfig, RefreshMode, MIN_REFRESH_INTERVAL};
pub use errors::{DiscoveryError, RegistryError, TransportSetupError};
pub use identifiers::{InstanceId, RegistryAddress, ServiceName, SessionId};
pub use ports::{ClientAcquirer, ServiceRegistry, Transport, TransportFactory};
pub use types::{ClientHandle, Node, ServiceRecord, Timestamp, PORT_METADATA_KEY};
