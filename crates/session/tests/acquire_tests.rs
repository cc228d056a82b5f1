//! Integration tests for client acquisition: one-shot setup, waiting, and the
//! failure paths that replace an unbounded wait.

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use discovery::{BackoffPolicy, ClientAcquirer, DiscoveryConfig, DiscoveryError, ServiceRegistry};
use session::DiscoverySession;
use support::{
    orders_config, orders_record, CountingFactory, FakeTransport, PanickingRegistry,
    ScriptedRegistry,
};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn concurrent_callers_share_a_single_setup() {
    let registry = ScriptedRegistry::new(vec![], Ok(vec![orders_record()]));
    let (factory, setups) = CountingFactory::new();
    let session = Arc::new(DiscoverySession::new(orders_config(), registry.clone(), factory));

    let callers: Vec<_> = (0..8)
        .map(|_| {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.acquire().await })
        })
        .collect();

    for caller in callers {
        let handle = caller.await.unwrap().expect("acquire succeeds");
        assert_eq!(handle.transport().id, 1);
        assert_eq!(handle.records(), &[orders_record()]);
    }

    assert_eq!(setups.load(Ordering::SeqCst), 1);
    assert_eq!(registry.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn failing_registry_is_retried_at_the_configured_interval() {
    const RETRIES: usize = 4;

    let registry = ScriptedRegistry::always_failing();
    let (factory, _) = CountingFactory::new();
    let session = Arc::new(DiscoverySession::new(orders_config(), registry.clone(), factory));

    let waiter = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.acquire().await }
    });

    tokio::time::sleep(Duration::from_secs(5 * RETRIES as u64) + Duration::from_millis(500)).await;

    assert!(
        registry.calls() >= RETRIES,
        "expected at least {RETRIES} lookups, got {}",
        registry.calls()
    );
    assert!(!waiter.is_finished(), "acquire must keep waiting");

    let current = session.current().expect("transport handle is published");
    assert!(!current.is_discovered());
    assert!(current.records().is_empty());

    session.shutdown().await;
    assert!(matches!(waiter.await.unwrap(), Err(DiscoveryError::Cancelled)));
}

#[tokio::test(start_paused = true)]
async fn success_after_failures_publishes_records_and_stops() {
    let registry = ScriptedRegistry::new(
        vec![Err(support::unreachable()), Ok(vec![])],
        Ok(vec![orders_record()]),
    );
    let (factory, _) = CountingFactory::new();
    let session = DiscoverySession::new(orders_config(), registry.clone(), factory);

    let started = Instant::now();
    let handle = session.acquire().await.expect("acquire succeeds");

    assert_eq!(handle.records(), &[orders_record()]);
    assert_eq!(registry.calls(), 3);
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(started.elapsed() < Duration::from_secs(15));

    // The refresh loop is single-shot by default.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(registry.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn orders_scenario_resolves_after_two_empty_answers() {
    let registry = ScriptedRegistry::new(vec![Ok(vec![]), Ok(vec![])], Ok(vec![orders_record()]));
    let (factory, _) = CountingFactory::new();
    let session = DiscoverySession::new(orders_config(), registry, factory);

    let started = Instant::now();
    let handle = session.acquire().await.expect("acquire succeeds");
    let elapsed = started.elapsed();

    assert_eq!(handle.primary_service_name().unwrap().as_str(), "orders");
    let node = &handle.primary_record().unwrap().nodes[0];
    assert_eq!(node.id.as_str(), "n1");
    assert_eq!(node.address, "10.0.0.5");
    assert_eq!(node.port(), Some(9090));
    assert!(
        elapsed >= Duration::from_secs(10) && elapsed <= Duration::from_secs(15),
        "resolved after {elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn setup_failure_reaches_every_caller() {
    let registry = ScriptedRegistry::new(vec![], Ok(vec![orders_record()]));
    let (factory, setups) = CountingFactory::failing();
    let session = Arc::new(DiscoverySession::new(orders_config(), registry.clone(), factory));

    let callers: Vec<_> = (0..4)
        .map(|_| {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.acquire().await })
        })
        .collect();

    for caller in callers {
        let result = caller.await.unwrap();
        assert!(matches!(result, Err(DiscoveryError::FatalSetup(_))), "got {result:?}");
    }

    // Later callers get the same recorded error instead of waiting.
    assert!(matches!(session.acquire().await, Err(DiscoveryError::FatalSetup(_))));
    assert!(session.subscribe().borrow().failure().is_some());
    assert!(!session.is_ready());

    assert_eq!(setups.load(Ordering::SeqCst), 1);
    assert_eq!(registry.calls(), 0, "no discovery without a transport");
}

#[tokio::test(start_paused = true)]
async fn primary_service_name_before_discovery_is_not_yet_discovered() {
    let registry = ScriptedRegistry::always_failing();
    let (factory, _) = CountingFactory::new();
    let session = DiscoverySession::new(orders_config(), registry, factory);

    session.ensure_initialized().await.unwrap();
    assert!(session.is_ready());

    let handle = session.current().unwrap();
    assert!(matches!(
        handle.primary_service_name(),
        Err(DiscoveryError::NotYetDiscovered { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn acquire_timeout_bounds_the_wait() {
    let registry = ScriptedRegistry::always_failing();
    let (factory, _) = CountingFactory::new();
    let config = orders_config().with_acquire_timeout(Duration::from_secs(2));
    let session = DiscoverySession::new(config, registry, factory);

    let result = session.acquire().await;
    assert!(
        matches!(result, Err(DiscoveryError::TimedOut { waited }) if waited == Duration::from_secs(2)),
        "got {result:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_are_reported() {
    let registry = ScriptedRegistry::always_failing();
    let (factory, _) = CountingFactory::new();
    let config = orders_config()
        .with_backoff(BackoffPolicy::fixed(Duration::from_secs(1)).with_max_attempts(3));
    let session = DiscoverySession::new(config, registry.clone(), factory);

    let result = session.acquire().await;
    assert!(
        matches!(result, Err(DiscoveryError::RetriesExhausted { attempts: 3, .. })),
        "got {result:?}"
    );
    assert_eq!(registry.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn acquire_after_shutdown_is_cancelled() {
    let registry = ScriptedRegistry::new(vec![], Ok(vec![orders_record()]));
    let (factory, _) = CountingFactory::new();
    let session = DiscoverySession::new(orders_config(), registry, factory);

    session.shutdown().await;
    assert!(matches!(session.acquire().await, Err(DiscoveryError::Cancelled)));
}

#[tokio::test(start_paused = true)]
async fn session_is_usable_through_the_acquirer_trait() {
    let registry: Arc<dyn ServiceRegistry> = ScriptedRegistry::new(vec![], Ok(vec![orders_record()]));
    let (factory, _) = CountingFactory::new();
    let acquirer: Arc<dyn ClientAcquirer<FakeTransport>> =
        Arc::new(DiscoverySession::new(orders_config(), registry, factory));

    let handle = acquirer.acquire().await.unwrap();
    assert_eq!(handle.primary_service_name().unwrap().as_str(), "orders");
}

#[tokio::test(start_paused = true)]
async fn refresh_task_failure_releases_waiters() {
    let (factory, _) = CountingFactory::new();
    let session = DiscoverySession::new(orders_config(), Arc::new(PanickingRegistry), factory);

    let result = tokio::time::timeout(Duration::from_secs(3600), session.acquire())
        .await
        .expect("acquire must not hang");
    assert!(
        matches!(result, Err(DiscoveryError::RefreshTaskFailed { .. })),
        "got {result:?}"
    );

    // Later callers see the same recorded failure.
    assert!(matches!(
        session.acquire().await,
        Err(DiscoveryError::RefreshTaskFailed { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn out_of_range_jitter_from_configuration_does_not_stall_discovery() {
    let config: DiscoveryConfig = serde_json::from_str(
        r#"{
            "registry_address": "consul:8500",
            "service_name": "orders",
            "backoff": {
                "initial": { "secs": 5, "nanos": 0 },
                "max": { "secs": 5, "nanos": 0 },
                "multiplier": 1.0,
                "jitter": 2.0,
                "max_attempts": 3
            }
        }"#,
    )
    .unwrap();
    assert_eq!(config.backoff.jitter, 1.0);

    let registry = ScriptedRegistry::always_failing();
    let (factory, _) = CountingFactory::new();
    let session = DiscoverySession::new(config, registry.clone(), factory);

    let result = tokio::time::timeout(Duration::from_secs(3600), session.acquire())
        .await
        .expect("acquire must not hang");
    assert!(
        matches!(result, Err(DiscoveryError::RetriesExhausted { attempts: 3, .. })),
        "got {result:?}"
    );
    assert_eq!(registry.calls(), 3);
}
