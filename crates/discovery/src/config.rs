//! Configuration consumed by a discovery session.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BackoffPolicy, DiscoveryError, RegistryAddress, ServiceName};

/// Shortest delay the refresh task waits between continuous refreshes.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// What the refresh task does after its first successful discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum RefreshMode {
    /// Stop after the first successful discovery.
    #[default]
    Once,

    /// Keep refreshing at a fixed interval. A failed or empty refresh keeps
    /// the previously discovered records.
    Continuous {
        /// Delay between successful refreshes.
        interval: Duration,
    },
}

impl RefreshMode {
    /// Delay before the next refresh after a success, `None` for
    /// [`RefreshMode::Once`]. Intervals below [`MIN_REFRESH_INTERVAL`] are
    /// raised to it.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::Once => None,
            Self::Continuous { interval } => Some((*interval).max(MIN_REFRESH_INTERVAL)),
        }
    }
}

/// Everything a session needs to know about its target service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Address of the service registry.
    pub registry_address: RegistryAddress,

    /// Service to discover.
    pub service_name: ServiceName,

    /// Retry schedule for failed or empty lookups.
    #[serde(default)]
    pub backoff: BackoffPolicy,

    /// Behaviour after the first successful discovery.
    #[serde(default)]
    pub refresh: RefreshMode,

    /// Upper bound on how long `acquire` waits for a discovered handle.
    /// `None` waits until discovery succeeds or the session shuts down.
    #[serde(default)]
    pub acquire_timeout: Option<Duration>,
}

impl DiscoveryConfig {
    /// Creates a configuration with the default backoff, [`RefreshMode::Once`]
    /// and no acquire timeout.
    ///
    /// # Errors
    ///
    /// [`DiscoveryError::ConfigurationError`] if either value is empty.
    pub fn new(
        registry_address: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Result<Self, DiscoveryError> {
        let registry_address = RegistryAddress::new(registry_address).ok_or_else(|| {
            DiscoveryError::ConfigurationError {
                message: "registry address must not be empty".into(),
            }
        })?;
        let service_name =
            ServiceName::new(service_name).ok_or_else(|| DiscoveryError::ConfigurationError {
                message: "service name must not be empty".into(),
            })?;

        Ok(Self {
            registry_address,
            service_name,
            backoff: BackoffPolicy::default(),
            refresh: RefreshMode::default(),
            acquire_timeout: None,
        })
    }

    /// Set the retry schedule.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the refresh mode.
    #[must_use]
    pub fn with_refresh(mut self, refresh: RefreshMode) -> Self {
        self.refresh = refresh;
        self
    }

    /// Reject settings the session would otherwise have to correct.
    ///
    /// # Errors
    ///
    /// [`DiscoveryError::ConfigurationError`] for a continuous refresh interval
    /// below [`MIN_REFRESH_INTERVAL`] or a zero acquire timeout.
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if let RefreshMode::Continuous { interval } = self.refresh {
            if interval < MIN_REFRESH_INTERVAL {
                return Err(DiscoveryError::ConfigurationError {
                    message: format!(
                        "refresh interval {interval:?} is below the minimum of {MIN_REFRESH_INTERVAL:?}"
                    ),
                });
            }
        }
        if self.acquire_timeout == Some(Duration::ZERO) {
            return Err(DiscoveryError::ConfigurationError {
                message: "acquire timeout must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Bound how long `acquire` may wait.
    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }
}
