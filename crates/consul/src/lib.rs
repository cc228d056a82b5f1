//! Consul registry adapter.
//!
//! Implements the [`discovery::ServiceRegistry`] port against Consul's health
//! HTTP API (`GET /v1/health/service/:service`) using `reqwest`.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain domain rules.
//! URL building, ACL tokens and Consul's JSON shapes are handled here; the
//! [`discovery`] and `session` crates only ever see [`discovery::ServiceRecord`].
//!
//! ## Port metadata
//!
//! Consul reports a service port as a separate field. The adapter copies it into
//! the node's `"port"` metadata entry unless the service already registered one,
//! so downstream code reads ports the same way regardless of registry.

mod wire;

pub mod client;

pub use client::{ConsulConfig, ConsulRegistry, TOKEN_HEADER};
