//! HTTP client for the Consul health API.

use std::time::Duration;

use async_trait::async_trait;
use discovery::{RegistryAddress, RegistryError, ServiceName, ServiceRecord, ServiceRegistry};
use reqwest::{Client as HttpClient, Url};
use tracing::{debug, instrument};

use crate::wire::{self, HealthEntry};

/// Header carrying the Consul ACL token.
pub const TOKEN_HEADER: &str = "X-Consul-Token";

/// Longest error body kept in [`RegistryError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Settings for [`ConsulRegistry`] that do not change between lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct ConsulConfig {
    /// ACL token sent with every request.
    pub token: Option<String>,

    /// Datacenter to query. `None` uses the agent's datacenter.
    pub datacenter: Option<String>,

    /// Only return instances whose health checks are passing.
    pub passing_only: bool,

    /// Timeout for one lookup request.
    pub request_timeout: Duration,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            token: None,
            datacenter: None,
            passing_only: true,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl ConsulConfig {
    /// Set the ACL token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the datacenter.
    pub fn with_datacenter(mut self, datacenter: impl Into<String>) -> Self {
        self.datacenter = Some(datacenter.into());
        self
    }

    /// Include instances with failing health checks.
    pub fn including_unhealthy(mut self) -> Self {
        self.passing_only = false;
        self
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// [`ServiceRegistry`] backed by a Consul agent or server.
#[derive(Debug, Clone)]
pub struct ConsulRegistry {
    http: HttpClient,
    config: ConsulConfig,
}

impl ConsulRegistry {
    /// Create a registry client.
    ///
    /// # Errors
    ///
    /// [`RegistryError::ClientSetup`] if the HTTP client cannot be built
    /// (e.g. the TLS backend fails to initialise).
    pub fn new(config: ConsulConfig) -> Result<Self, RegistryError> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RegistryError::ClientSetup {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { http, config })
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ConsulConfig {
        &self.config
    }

    /// Build the health endpoint URL for `service` at `address`.
    ///
    /// Addresses without a scheme (`consul:8500`) are treated as plain HTTP.
    ///
    /// # Errors
    ///
    /// [`RegistryError::InvalidAddress`] if the address does not parse or
    /// uses a scheme other than `http`/`https`.
    pub fn service_url(
        &self,
        address: &RegistryAddress,
        service: &ServiceName,
    ) -> Result<Url, RegistryError> {
        let raw = address.as_str().trim();
        let invalid = |message: String| RegistryError::InvalidAddress {
            address: raw.to_owned(),
            message,
        };

        let with_scheme = if raw.contains("://") {
            raw.to_owned()
        } else {
            format!("http://{raw}")
        };
        let mut url = Url::parse(&with_scheme).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
        }

        url.path_segments_mut()
            .map_err(|()| invalid("address cannot be a base URL".to_owned()))?
            .pop_if_empty()
            .extend(["v1", "health", "service", service.as_str()]);

        {
            let mut query = url.query_pairs_mut();
            if self.config.passing_only {
                query.append_pair("passing", "true");
            }
            if let Some(dc) = &self.config.datacenter {
                query.append_pair("dc", dc);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }

        Ok(url)
    }
}

#[async_trait]
impl ServiceRegistry for ConsulRegistry {
    #[instrument(name = "consul_lookup", skip_all, fields(address = %address, service = %service))]
    async fn lookup(
        &self,
        address: &RegistryAddress,
        service: &ServiceName,
    ) -> Result<Vec<ServiceRecord>, RegistryError> {
        let url = self.service_url(address, service)?;
        debug!(%url, "Querying Consul health endpoint");

        let mut request = self.http.get(url);
        if let Some(token) = &self.config.token {
            request = request.header(TOKEN_HEADER, token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RegistryError::Unreachable {
                address: address.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RegistryError::Unreachable {
                address: address.to_string(),
                message: format!("failed to read response body: {e}"),
            })?;

        if !status.is_success() {
            let mut body = body;
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|&i| body.is_char_boundary(i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(RegistryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let entries: Vec<HealthEntry> =
            serde_json::from_str(&body).map_err(|e| RegistryError::Decode {
                message: e.to_string(),
            })?;
        let records = wire::into_records(entries);

        debug!(
            records = records.len(),
            instances = records.iter().map(|r| r.nodes.len()).sum::<usize>(),
            "Consul lookup completed"
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(raw: &str) -> RegistryAddress {
        RegistryAddress::new(raw).unwrap()
    }

    fn orders() -> ServiceName {
        ServiceName::new("orders").unwrap()
    }

    #[test]
    fn scheme_less_address_defaults_to_http() {
        let registry = ConsulRegistry::new(ConsulConfig::default()).unwrap();
        let url = registry.service_url(&address("consul:8500"), &orders()).unwrap();
        assert_eq!(url.as_str(), "http://consul:8500/v1/health/service/orders?passing=true");
    }

    #[test]
    fn datacenter_and_health_filter_are_query_parameters() {
        let registry =
            ConsulRegistry::new(ConsulConfig::default().with_datacenter("eu-west")).unwrap();
        let url = registry
            .service_url(&address("https://consul.internal/"), &orders())
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://consul.internal/v1/health/service/orders?passing=true&dc=eu-west"
        );
    }

    #[test]
    fn unhealthy_instances_drop_the_query() {
        let registry =
            ConsulRegistry::new(ConsulConfig::default().including_unhealthy()).unwrap();
        let url = registry.service_url(&address("127.0.0.1:8500"), &orders()).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8500/v1/health/service/orders");
    }

    #[test]
    fn unsupported_scheme_is_invalid() {
        let registry = ConsulRegistry::new(ConsulConfig::default()).unwrap();
        let err = registry
            .service_url(&address("ftp://consul:8500"), &orders())
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidAddress { .. }), "got {err:?}");
    }

    #[test]
    fn garbage_address_is_invalid() {
        let registry = ConsulRegistry::new(ConsulConfig::default()).unwrap();
        let err = registry
            .service_url(&address("consul:notaport"), &orders())
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidAddress { .. }), "got {err:?}");
    }
}
