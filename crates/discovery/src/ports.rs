//! Port traits implemented by the infrastructure crates.
//!
//! | Trait | Implemented by |
//! |-------|----------------|
//! | [`ServiceRegistry`] | `consul::ConsulRegistry` |
//! | [`TransportFactory`] / [`Transport`] | `grpc::GrpcTransportFactory` / `grpc::BalancedTransport` |
//! | [`ClientAcquirer`] | `session::DiscoverySession` |

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    ClientHandle, DiscoveryError, RegistryAddress, RegistryError, ServiceName, ServiceRecord,
    TransportSetupError,
};

/// Address-based service lookup.
///
/// Called repeatedly by the refresh task, so implementations must be cheap to
/// poll.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Returns every record registered under `service`. An empty list is a
    /// valid answer; the session treats it as a transient failure.
    async fn lookup(
        &self,
        address: &RegistryAddress,
        service: &ServiceName,
    ) -> Result<Vec<ServiceRecord>, RegistryError>;
}

/// A live RPC transport whose peer set follows discovery results.
///
/// Clones share the same underlying connections.
pub trait Transport: Clone + Send + Sync + 'static {
    /// Replace the transport's peer set with the instances in `records`.
    ///
    /// Called by the refresh task after every successful discovery. Calls in
    /// flight keep running against the peers they were dispatched to.
    fn update_endpoints(&self, records: &[ServiceRecord]);
}

/// Builds the transport. Called exactly once per session.
///
/// Setup is pure configuration: it never queries the registry for instances,
/// so it can only fail on malformed configuration.
#[async_trait]
pub trait TransportFactory: Send + Sync + 'static {
    /// The transport type produced.
    type Transport: Transport;

    /// Build a transport that will resolve peers through the registry at
    /// `registry`.
    async fn create(
        &self,
        registry: &RegistryAddress,
    ) -> Result<Self::Transport, TransportSetupError>;
}

/// Produces a ready-to-use client handle.
#[async_trait]
pub trait ClientAcquirer<T>: Send + Sync {
    /// Waits until a handle with at least one discovered record exists and
    /// returns it.
    async fn acquire(&self) -> Result<Arc<ClientHandle<T>>, DiscoveryError>;
}
