//! Fake collaborators shared by the session integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use discovery::{
    BackoffPolicy, DiscoveryConfig, InstanceId, Node, RegistryAddress, RegistryError,
    ServiceName, ServiceRecord, ServiceRegistry, Transport, TransportFactory, TransportSetupError,
};

pub type LookupResult = Result<Vec<ServiceRecord>, RegistryError>;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Transport that remembers every endpoint update it receives.
#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    pub id: usize,
    updates: Arc<Mutex<Vec<Vec<ServiceRecord>>>>,
}

impl FakeTransport {
    pub fn updates(&self) -> Vec<Vec<ServiceRecord>> {
        self.updates.lock().unwrap().clone()
    }
}

impl Transport for FakeTransport {
    fn update_endpoints(&self, records: &[ServiceRecord]) {
        self.updates.lock().unwrap().push(records.to_vec());
    }
}

/// Factory that counts how often it is asked to build a transport.
pub struct CountingFactory {
    calls: Arc<AtomicUsize>,
    fail: bool,
}

impl CountingFactory {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                calls: Arc::clone(&calls),
                fail: false,
            },
            calls,
        )
    }

    pub fn failing() -> (Self, Arc<AtomicUsize>) {
        let (mut factory, calls) = Self::new();
        factory.fail = true;
        (factory, calls)
    }
}

#[async_trait]
impl TransportFactory for CountingFactory {
    type Transport = FakeTransport;

    async fn create(
        &self,
        _registry: &RegistryAddress,
    ) -> Result<FakeTransport, TransportSetupError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        // Widen the window in which concurrent callers could race.
        tokio::time::sleep(Duration::from_millis(50)).await;

        if self.fail {
            return Err(TransportSetupError::InvalidConfiguration {
                message: "malformed transport config".into(),
            });
        }
        Ok(FakeTransport {
            id: call,
            ..FakeTransport::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Registry that plays back a script of answers, then repeats a fallback.
pub struct ScriptedRegistry {
    script: Mutex<VecDeque<LookupResult>>,
    fallback: LookupResult,
    calls: AtomicUsize,
}

impl ScriptedRegistry {
    pub fn new(script: Vec<LookupResult>, fallback: LookupResult) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn always_failing() -> Arc<Self> {
        Self::new(vec![], Err(unreachable()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceRegistry for ScriptedRegistry {
    async fn lookup(
        &self,
        _address: &RegistryAddress,
        _service: &ServiceName,
    ) -> Result<Vec<ServiceRecord>, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Registry whose lookup panics, standing in for a refresh loop that dies.
pub struct PanickingRegistry;

#[async_trait]
impl ServiceRegistry for PanickingRegistry {
    async fn lookup(
        &self,
        _address: &RegistryAddress,
        _service: &ServiceName,
    ) -> Result<Vec<ServiceRecord>, RegistryError> {
        panic!("registry client bug");
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn unreachable() -> RegistryError {
    RegistryError::Unreachable {
        address: "consul:8500".into(),
        message: "connection refused".into(),
    }
}

pub fn record(service: &str, id: &str, address: &str, port: &str) -> ServiceRecord {
    ServiceRecord::new(
        ServiceName::new(service).unwrap(),
        vec![Node::new(InstanceId::new(id).unwrap(), address).with_metadata("port", port)],
    )
}

pub fn orders_record() -> ServiceRecord {
    record("orders", "n1", "10.0.0.5", "9090")
}

/// `consul:8500` / `orders` with the fixed 5 second retry.
pub fn orders_config() -> DiscoveryConfig {
    DiscoveryConfig::new("consul:8500", "orders")
        .unwrap()
        .with_backoff(BackoffPolicy::fixed(Duration::from_secs(5)))
}
