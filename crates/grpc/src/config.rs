//! Transport-level settings for the balanced gRPC channel.

use std::time::Duration;

/// Largest number of endpoint changes queued for the balancer.
pub const DEFAULT_BALANCE_CAPACITY: usize = 1024;

/// Configuration for [`GrpcTransportFactory`](crate::GrpcTransportFactory).
///
/// Controls the endpoint URI shape plus timeouts and the balancer queue.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct GrpcClientConfig {
    /// URI scheme used for discovered endpoints. Only `http` is supported.
    pub scheme: String,

    /// Port used for nodes whose metadata carries no `"port"` entry.
    /// `None` skips such nodes.
    pub default_port: Option<u16>,

    /// Timeout for establishing a connection to one endpoint.
    pub connect_timeout: Duration,

    /// Timeout applied to every RPC.
    pub rpc_timeout: Duration,

    /// Capacity of the balancer's change queue.
    pub balance_capacity: usize,
}

impl Default for GrpcClientConfig {
    fn default() -> Self {
        Self {
            scheme: "http".to_owned(),
            default_port: None,
            connect_timeout: Duration::from_secs(10),
            rpc_timeout: Duration::from_secs(30),
            balance_capacity: DEFAULT_BALANCE_CAPACITY,
        }
    }
}

impl GrpcClientConfig {
    /// Set the endpoint scheme.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Set the fallback port.
    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = Some(port);
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the RPC timeout.
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Set the balancer queue capacity.
    pub fn with_balance_capacity(mut self, capacity: usize) -> Self {
        self.balance_capacity = capacity;
        self
    }
}
