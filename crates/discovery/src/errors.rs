//! Error types for registry lookups, transport setup, and client acquisition.
//!
//! [`RegistryError`] and [`TransportSetupError`] are produced by the adapters
//! behind the port traits. [`DiscoveryError`] is what callers of the
//! acquire operation see; it separates fatal conditions (transport setup) from
//! transient ones (registry unreachable, no instances) that the refresh task
//! retries on its own.

use std::time::Duration;

use thiserror::Error;

use crate::ServiceName;

// ---------------------------------------------------------------------------
// Collaborator errors
// ---------------------------------------------------------------------------

/// Failure of a single registry lookup.
///
/// Every variant is transient from the session's point of view: the refresh
/// task retries according to its [`crate::BackoffPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The registry address cannot be turned into a request URL.
    #[error("Invalid registry address '{address}': {message}")]
    InvalidAddress {
        /// The offending address as configured.
        address: String,
        /// Why the address was rejected.
        message: String,
    },

    /// The registry could not be reached (connection refused, DNS, timeout).
    #[error("Registry at '{address}' is unreachable: {message}")]
    Unreachable {
        /// Address that was contacted.
        address: String,
        /// Underlying transport error.
        message: String,
    },

    /// The registry answered with a non-success status.
    #[error("Registry returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The registry response could not be decoded.
    #[error("Registry response could not be decoded: {message}")]
    Decode {
        /// Decoder error message.
        message: String,
    },

    /// The registry client itself could not be constructed (TLS backend,
    /// invalid client options). Not tied to any address.
    #[error("Registry client setup failed: {message}")]
    ClientSetup {
        /// Underlying builder error.
        message: String,
    },
}

/// Failure to build the transport object.
///
/// Produced once per session at most; it is never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportSetupError {
    /// The transport configuration is malformed.
    #[error("Invalid transport configuration: {message}")]
    InvalidConfiguration {
        /// Description of the configuration problem.
        message: String,
    },

    /// The transport configuration asks for something this build cannot do.
    #[error("Unsupported transport option: {message}")]
    Unsupported {
        /// Description of the unsupported option.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Session-level errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the acquire operation and the client handle accessors.
///
/// `Clone` so the single recorded setup failure can be handed to every caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// Transport construction failed. Recorded once and returned to every
    /// caller for the lifetime of the session.
    #[error("Transport setup failed: {0}")]
    FatalSetup(#[source] TransportSetupError),

    /// A registry lookup failed.
    #[error("Registry lookup failed: {0}")]
    Registry(#[from] RegistryError),

    /// The registry answered, but lists no instance of the service.
    #[error("No instances registered for service '{service}'")]
    NoInstances {
        /// Service that was looked up.
        service: ServiceName,
    },

    /// The handle was read before any successful discovery.
    #[error("Service '{service}' has not been discovered yet")]
    NotYetDiscovered {
        /// Service the session is configured for.
        service: ServiceName,
    },

    /// The backoff policy ran out of attempts before the first successful
    /// discovery.
    #[error("Discovery gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Number of lookups performed.
        attempts: u32,
        /// Message of the last lookup failure.
        last_error: String,
    },

    /// The caller's wait exceeded the configured acquire timeout.
    #[error("Timed out after {waited:?} waiting for service discovery")]
    TimedOut {
        /// How long the caller waited.
        waited: Duration,
    },

    /// The background refresh task stopped abnormally before the first
    /// successful discovery.
    #[error("Discovery refresh task failed: {message}")]
    RefreshTaskFailed {
        /// Panic or join error reported by the runtime.
        message: String,
    },

    /// The session was shut down while the caller was waiting.
    #[error("Discovery session was shut down")]
    Cancelled,

    /// The discovery configuration is invalid.
    ///
    /// Produced at construction time; a session never starts with an invalid
    /// config.
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Description of the configuration problem.
        message: String,
    },
}

impl DiscoveryError {
    /// Returns `true` for failures the refresh task retries on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Registry(_) | Self::NoInstances { .. })
    }
}

impl From<TransportSetupError> for DiscoveryError {
    fn from(err: TransportSetupError) -> Self {
        Self::FatalSetup(err)
    }
}
