//! Shared value types for service discovery.
//!
//! [`ServiceRecord`] and [`Node`] are produced by the registry adapter and are
//! immutable once returned. [`ClientHandle`] is the composite value shared by
//! every caller of the acquire operation: it is never mutated in place, only
//! replaced by a new value built with [`ClientHandle::with_records`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DiscoveryError, InstanceId, ServiceName};

/// Metadata key under which a node advertises its port.
pub const PORT_METADATA_KEY: &str = "port";

// ---------------------------------------------------------------------------
// Registry records
// ---------------------------------------------------------------------------

/// One registered instance of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Instance identifier assigned by the registry.
    pub id: InstanceId,

    /// Host name or IP address of the instance.
    pub address: String,

    /// Free-form metadata. May contain a [`PORT_METADATA_KEY`] entry.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Node {
    /// Creates a node without metadata.
    pub fn new(id: InstanceId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Adds one metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns the advertised port, or `None` when the metadata has no
    /// `"port"` entry or the entry is not a valid port number.
    pub fn port(&self) -> Option<u16> {
        self.metadata
            .get(PORT_METADATA_KEY)
            .and_then(|p| p.trim().parse().ok())
    }
}

/// All instances the registry knows for one service name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Registered service name.
    pub name: ServiceName,

    /// Instances in registry order.
    pub nodes: Vec<Node>,
}

impl ServiceRecord {
    /// Creates a record.
    pub fn new(name: ServiceName, nodes: Vec<Node>) -> Self {
        Self { name, nodes }
    }
}

// ---------------------------------------------------------------------------
// Client handle
// ---------------------------------------------------------------------------

/// The transport plus the most recently discovered records.
///
/// Exactly one handle is current per session at a time. A refresh builds a
/// new handle from the current one, keeping its transport.
#[derive(Debug, Clone)]
pub struct ClientHandle<T> {
    transport: T,
    service: ServiceName,
    records: Vec<ServiceRecord>,
    discovered_at: Option<Timestamp>,
}

impl<T> ClientHandle<T> {
    /// Creates a handle for a freshly built transport. No records yet.
    pub fn new(transport: T, service: ServiceName) -> Self {
        Self {
            transport,
            service,
            records: Vec::new(),
            discovered_at: None,
        }
    }

    /// Keeps the transport and replaces the records.
    #[must_use]
    pub fn with_records(self, records: Vec<ServiceRecord>, at: Timestamp) -> Self {
        Self {
            records,
            discovered_at: Some(at),
            ..self
        }
    }

    /// The live transport object for issuing calls.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The service this handle was built for.
    pub fn service(&self) -> &ServiceName {
        &self.service
    }

    /// Records of the last successful discovery (empty before the first one).
    pub fn records(&self) -> &[ServiceRecord] {
        &self.records
    }

    /// When the current records were discovered.
    pub fn discovered_at(&self) -> Option<Timestamp> {
        self.discovered_at
    }

    /// Returns `true` once at least one record has been discovered.
    pub fn is_discovered(&self) -> bool {
        !self.records.is_empty()
    }

    /// The first discovered record.
    ///
    /// # Errors
    ///
    /// [`DiscoveryError::NotYetDiscovered`] before any successful discovery.
    pub fn primary_record(&self) -> Result<&ServiceRecord, DiscoveryError> {
        self.records
            .first()
            .ok_or_else(|| DiscoveryError::NotYetDiscovered {
                service: self.service.clone(),
            })
    }

    /// Name of the first discovered record.
    ///
    /// # Errors
    ///
    /// [`DiscoveryError::NotYetDiscovered`] before any successful discovery.
    pub fn primary_service_name(&self) -> Result<&ServiceName, DiscoveryError> {
        self.primary_record().map(|r| &r.name)
    }

    /// Total number of discovered instances across all records.
    pub fn instance_count(&self) -> usize {
        self.records.iter().map(|r| r.nodes.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
