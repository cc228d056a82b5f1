//! Load-balanced tonic channel fed by registry discovery.

use std::collections::BTreeSet;
use std::net::{Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use discovery::{
    Node, RegistryAddress, ServiceRecord, Transport, TransportFactory, TransportSetupError,
};
use tokio::sync::mpsc::{error::TrySendError, Sender};
use tower::discover::Change;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

use crate::config::GrpcClientConfig;

/// Build a tonic `Endpoint` with timeouts and keepalive settings.
///
/// - Connect timeout
/// - Per-RPC timeout
/// - TCP keepalive (30 seconds)
/// - HTTP/2 keepalive interval (30 seconds)
/// - Keepalive timeout (10 seconds)
///
/// # Errors
///
/// Returns an error if the URI is invalid.
pub fn build_endpoint(
    uri: String,
    cfg: &GrpcClientConfig,
) -> Result<Endpoint, tonic::transport::Error> {
    let endpoint = Endpoint::from_shared(uri)?
        .connect_timeout(cfg.connect_timeout)
        .timeout(cfg.rpc_timeout)
        .tcp_keepalive(Some(Duration::from_secs(30)))
        .http2_keep_alive_interval(Duration::from_secs(30))
        .keep_alive_timeout(Duration::from_secs(10))
        .keep_alive_while_idle(true);

    Ok(endpoint)
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// [`TransportFactory`] producing a [`BalancedTransport`].
#[derive(Debug, Clone, Default)]
pub struct GrpcTransportFactory {
    config: GrpcClientConfig,
}

impl GrpcTransportFactory {
    pub fn new(config: GrpcClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GrpcClientConfig {
        &self.config
    }

    fn validate(&self) -> Result<(), TransportSetupError> {
        match self.config.scheme.as_str() {
            "http" => {}
            "https" => {
                return Err(TransportSetupError::Unsupported {
                    message: "TLS endpoints are not supported; use scheme 'http'".into(),
                })
            }
            other => {
                return Err(TransportSetupError::InvalidConfiguration {
                    message: format!("unknown endpoint scheme '{other}'"),
                })
            }
        }
        if self.config.balance_capacity == 0 {
            return Err(TransportSetupError::InvalidConfiguration {
                message: "balance_capacity must be greater than zero".into(),
            });
        }
        if self.config.default_port == Some(0) {
            return Err(TransportSetupError::InvalidConfiguration {
                message: "default_port must not be zero".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TransportFactory for GrpcTransportFactory {
    type Transport = BalancedTransport;

    /// Build the balanced channel. No connection is attempted until
    /// endpoints are added and an RPC is issued.
    async fn create(
        &self,
        registry: &RegistryAddress,
    ) -> Result<BalancedTransport, TransportSetupError> {
        self.validate()?;

        let (channel, changes) = Channel::balance_channel::<String>(self.config.balance_capacity);
        info!(
            registry = %registry,
            capacity = self.config.balance_capacity,
            "Created load-balanced gRPC channel"
        );

        Ok(BalancedTransport {
            channel,
            changes,
            config: Arc::new(self.config.clone()),
            active: Arc::new(Mutex::new(BTreeSet::new())),
        })
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// A tonic [`Channel`] whose peer set follows discovery.
///
/// Cloning is cheap; all clones share the channel and the endpoint set.
#[derive(Debug, Clone)]
pub struct BalancedTransport {
    channel: Channel,
    changes: Sender<Change<String, Endpoint>>,
    config: Arc<GrpcClientConfig>,
    active: Arc<Mutex<BTreeSet<String>>>,
}

impl BalancedTransport {
    /// The channel to hand to generated tonic clients.
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    /// Endpoint URIs currently in the balancer, sorted.
    pub fn active_endpoints(&self) -> Vec<String> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// URI for `node`, or `None` if it has no usable port.
    ///
    /// Bare IPv6 addresses are bracketed. An address that already carries a
    /// port (`host:9091`, `10.0.0.5:9091`, `[fd00::5]:9091`) is used as is.
    fn endpoint_uri(&self, node: &Node) -> Option<String> {
        let scheme = &self.config.scheme;
        let address = node.address.trim();

        if let Ok(socket) = address.parse::<SocketAddr>() {
            return Some(format!("{scheme}://{socket}"));
        }

        let unbracketed = address
            .strip_prefix('[')
            .and_then(|a| a.strip_suffix(']'))
            .unwrap_or(address);
        if let Ok(ip) = unbracketed.parse::<Ipv6Addr>() {
            let port = node.port().or(self.config.default_port)?;
            return Some(format!("{scheme}://[{ip}]:{port}"));
        }

        if let Some((host, port)) = address.rsplit_once(':') {
            if !host.is_empty() && !host.contains(':') && port.parse::<u16>().is_ok() {
                return Some(format!("{scheme}://{address}"));
            }
        }

        let port = node.port().or(self.config.default_port)?;
        Some(format!("{scheme}://{address}:{port}"))
    }

    fn desired_endpoints(&self, records: &[ServiceRecord]) -> BTreeSet<String> {
        let mut desired = BTreeSet::new();
        for record in records {
            for node in &record.nodes {
                match self.endpoint_uri(node) {
                    Some(uri) => {
                        desired.insert(uri);
                    }
                    None => warn!(
                        service = %record.name,
                        node = %node.id,
                        address = %node.address,
                        "Skipping node without a port"
                    ),
                }
            }
        }
        desired
    }

    /// Queue one change. Returns `false` if the balancer cannot take it.
    fn send(&self, change: Change<String, Endpoint>) -> bool {
        match self.changes.try_send(change) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Balancer change queue is full; endpoint update deferred");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Balancer is closed; endpoint update dropped");
                false
            }
        }
    }
}

impl Transport for BalancedTransport {
    fn update_endpoints(&self, records: &[ServiceRecord]) {
        let desired = self.desired_endpoints(records);
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);

        let removed: Vec<String> = active.difference(&desired).cloned().collect();
        let added: Vec<String> = desired.difference(&active).cloned().collect();

        for uri in removed {
            if !self.send(Change::Remove(uri.clone())) {
                return;
            }
            debug!(endpoint = %uri, "Removed endpoint");
            active.remove(&uri);
        }

        for uri in added {
            let endpoint = match build_endpoint(uri.clone(), &self.config) {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    warn!(endpoint = %uri, error = %e, "Skipping invalid endpoint");
                    continue;
                }
            };
            if !self.send(Change::Insert(uri.clone(), endpoint)) {
                return;
            }
            debug!(endpoint = %uri, "Added endpoint");
            active.insert(uri);
        }

        info!(endpoints = active.len(), "Balancer endpoints updated");
    }
}
