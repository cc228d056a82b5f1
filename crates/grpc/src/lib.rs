//! gRPC transport adapter.
//!
//! Implements the [`discovery::TransportFactory`] and [`discovery::Transport`]
//! ports with a tonic load-balanced [`Channel`](tonic::transport::Channel).
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Endpoint URIs, timeouts, keepalive and the balancer's
//! change queue live here. The `session` crate sees only the port traits.
//!
//! ## Endpoint updates
//!
//! The channel is created once per session and never replaced. Each discovery
//! result is diffed against the balancer's current peer set: new nodes are
//! inserted, vanished nodes removed. Calls already in flight keep running on
//! the same channel.

pub mod config;
pub mod transport;

pub use config::{GrpcClientConfig, DEFAULT_BALANCE_CAPACITY};
pub use transport::{build_endpoint, BalancedTransport, GrpcTransportFactory};
