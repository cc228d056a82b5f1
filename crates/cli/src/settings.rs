//! Layered runtime configuration for the `grpc-discovery` binary.
//!
//! Sources, later ones winning:
//!
//! 1. built-in defaults ([`Settings::default`]);
//! 2. the TOML file (`grpc-discovery.toml` unless `--config` says otherwise);
//! 3. `GRPC_DISCOVERY_*` environment variables, `__` separating sections
//!    (`GRPC_DISCOVERY_REGISTRY__ADDRESS=consul:8500`).
//!
//! Command-line flags are applied on top by `main`.

use std::path::Path;
use std::time::Duration;

use consul::ConsulConfig;
use discovery::{BackoffPolicy, DiscoveryConfig, DiscoveryError, RefreshMode};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use grpc::{GrpcClientConfig, DEFAULT_BALANCE_CAPACITY};
use serde::{Deserialize, Serialize};

/// Default configuration file name, resolved relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "grpc-discovery.toml";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "GRPC_DISCOVERY_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub registry: RegistrySettings,
    pub discovery: DiscoverySettings,
    pub grpc: GrpcSettings,
    pub observability: ObservabilitySettings,
}

/// `[registry]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrySettings {
    /// Consul address, with or without scheme.
    pub address: String,

    /// ACL token.
    pub token: Option<String>,

    pub datacenter: Option<String>,

    /// Only discover instances with passing health checks.
    pub passing_only: bool,

    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            address: "consul:8500".to_owned(),
            token: None,
            datacenter: None,
            passing_only: true,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Refresh behaviour selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshKind {
    Once,
    #[default]
    Continuous,
}

/// `[discovery]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoverySettings {
    /// Service to discover. Required; there is no sensible default.
    pub service_name: String,

    pub refresh: RefreshKind,

    /// Delay between refreshes when `refresh = "continuous"`.
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,

    /// Upper bound on waiting for the first discovery. Unset waits forever.
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Option<Duration>,

    pub backoff: BackoffSettings,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            refresh: RefreshKind::default(),
            refresh_interval: Duration::from_secs(30),
            acquire_timeout: None,
            backoff: BackoffSettings::default(),
        }
    }
}

/// `[discovery.backoff]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffSettings {
    #[serde(with = "humantime_serde")]
    pub initial: Duration,

    #[serde(with = "humantime_serde")]
    pub max: Duration,

    pub multiplier: f64,

    pub jitter: f64,

    /// Unset retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial: discovery::DEFAULT_RETRY_INTERVAL,
            max: discovery::DEFAULT_RETRY_INTERVAL,
            multiplier: 1.0,
            jitter: 0.0,
            max_attempts: None,
        }
    }
}

impl BackoffSettings {
    pub fn policy(&self) -> BackoffPolicy {
        let policy = BackoffPolicy::exponential(self.initial, self.max)
            .with_multiplier(self.multiplier)
            .with_jitter(self.jitter);
        match self.max_attempts {
            Some(attempts) => policy.with_max_attempts(attempts),
            None => policy,
        }
    }
}

/// `[grpc]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GrpcSettings {
    pub scheme: String,

    /// Port for instances that do not advertise one.
    pub default_port: Option<u16>,

    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub rpc_timeout: Duration,

    pub balance_capacity: usize,
}

impl Default for GrpcSettings {
    fn default() -> Self {
        let defaults = GrpcClientConfig::default();
        Self {
            scheme: defaults.scheme,
            default_port: defaults.default_port,
            connect_timeout: defaults.connect_timeout,
            rpc_timeout: defaults.rpc_timeout,
            balance_capacity: DEFAULT_BALANCE_CAPACITY,
        }
    }
}

/// `[observability]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObservabilitySettings {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub log_level: String,

    /// Emit JSON lines instead of compact text.
    pub json: bool,

    /// OTLP gRPC collector endpoint. Unset disables trace export.
    pub otlp_endpoint: Option<String>,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            json: false,
            otlp_endpoint: None,
        }
    }
}

impl Settings {
    /// The layered provider chain for the file at `path`. A missing file
    /// contributes nothing.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and merge all sources.
    pub fn load(path: &Path) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    /// Session configuration.
    ///
    /// # Errors
    ///
    /// [`DiscoveryError::ConfigurationError`] if the registry address or the
    /// service name is empty, or the refresh interval is too short.
    pub fn discovery_config(&self) -> Result<DiscoveryConfig, DiscoveryError> {
        let refresh = match self.discovery.refresh {
            RefreshKind::Once => RefreshMode::Once,
            RefreshKind::Continuous => RefreshMode::Continuous {
                interval: self.discovery.refresh_interval,
            },
        };

        let config = DiscoveryConfig::new(&self.registry.address, &self.discovery.service_name)?
            .with_backoff(self.discovery.backoff.policy())
            .with_refresh(refresh);

        let config = match self.discovery.acquire_timeout {
            Some(timeout) => config.with_acquire_timeout(timeout),
            None => config,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn consul_config(&self) -> ConsulConfig {
        let mut config =
            ConsulConfig::default().with_request_timeout(self.registry.request_timeout);
        if let Some(token) = &self.registry.token {
            config = config.with_token(token);
        }
        if let Some(dc) = &self.registry.datacenter {
            config = config.with_datacenter(dc);
        }
        if !self.registry.passing_only {
            config = config.including_unhealthy();
        }
        config
    }

    pub fn grpc_config(&self) -> GrpcClientConfig {
        let config = GrpcClientConfig::default()
            .with_scheme(&self.grpc.scheme)
            .with_connect_timeout(self.grpc.connect_timeout)
            .with_rpc_timeout(self.grpc.rpc_timeout)
            .with_balance_capacity(self.grpc.balance_capacity);
        match self.grpc.default_port {
            Some(port) => config.with_default_port(port),
            None => config,
        }
    }
}
