//! Discovery session for grpc-discovery.
//!
//! This crate provides [`DiscoverySession`], the connection acquirer: it
//! builds the transport once, runs the background [`DiscoveryRefresher`]
//! against the service registry, and hands every caller the same
//! [`discovery::ClientHandle`].
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** The session sequences calls between the port
//! traits defined in [`discovery`] (registry, transport factory). It contains
//! no registry or transport details of its own.
//!
//! ## Concurrency
//!
//! | Concern | Primitive |
//! |---------|-----------|
//! | One-shot transport setup | `tokio::sync::OnceCell` |
//! | Shared handle + readiness | `tokio::sync::watch` |
//! | Shutdown | `tokio_util::sync::CancellationToken` |

pub mod acquirer;
pub mod refresh;
pub mod state;

pub use acquirer::DiscoverySession;
pub use refresh::DiscoveryRefresher;
pub use state::SessionState;
