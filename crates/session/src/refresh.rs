//! Background discovery refresh task.
//!
//! Queries the registry for live instances of the configured service, pushes
//! them into the transport, and publishes a new client handle. Failed or
//! empty lookups are retried according to the session's
//! [`BackoffPolicy`](discovery::BackoffPolicy).

use std::sync::Arc;
use std::time::Duration;

use discovery::{
    BackoffPolicy, ClientHandle, DiscoveryConfig, DiscoveryError, RefreshMode, RegistryAddress,
    ServiceName, ServiceRecord, ServiceRegistry, SessionId, Timestamp, Transport,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::state::StatePublisher;

fn duration_to_u64_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Background task for discovering instances of one service.
pub struct DiscoveryRefresher<T> {
    session_id: SessionId,
    registry: Arc<dyn ServiceRegistry>,
    address: RegistryAddress,
    service: ServiceName,
    backoff: BackoffPolicy,
    mode: RefreshMode,
    transport: T,
    state: StatePublisher<T>,
}

impl<T: Transport> DiscoveryRefresher<T> {
    pub(crate) fn new(
        session_id: SessionId,
        config: &DiscoveryConfig,
        registry: Arc<dyn ServiceRegistry>,
        transport: T,
        state: StatePublisher<T>,
    ) -> Self {
        Self {
            session_id,
            registry,
            address: config.registry_address.clone(),
            service: config.service_name.clone(),
            backoff: config.backoff.clone(),
            mode: config.refresh,
            transport,
            state,
        }
    }

    /// Spawn the background refresh task.
    ///
    /// The task runs until discovery succeeds (in [`RefreshMode::Once`]), the
    /// backoff policy gives up, or `cancel` fires. The returned handle belongs
    /// to a supervisor: if the refresh loop panics before the first
    /// discovery, it publishes [`DiscoveryError::RefreshTaskFailed`] so that
    /// waiting callers are released.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        info!(
            session_id = %self.session_id,
            registry = %self.address,
            service = %self.service,
            mode = ?self.mode,
            "Spawning discovery refresh task"
        );

        let span = tracing::info_span!(
            "discovery_refresh",
            session_id = %self.session_id,
            service = %self.service,
        );
        let supervisor = Arc::clone(&self);
        let worker = tokio::spawn(async move { self.run(cancel).await }.instrument(span));

        tokio::spawn(async move {
            if let Err(err) = worker.await {
                if !err.is_cancelled() {
                    supervisor.report_abnormal_exit(&err.to_string());
                }
            }
        })
    }

    fn report_abnormal_exit(&self, message: &str) {
        if self.state.borrow().is_discovered() {
            error!(
                session_id = %self.session_id,
                error = message,
                "Discovery refresh task failed, keeping existing records"
            );
            return;
        }
        error!(
            session_id = %self.session_id,
            error = message,
            "Discovery refresh task failed before discovery"
        );
        self.publish_failure(DiscoveryError::RefreshTaskFailed {
            message: message.to_owned(),
        });
    }

    async fn run(&self, cancel: CancellationToken) {
        // Consecutive failed lookups since the last success.
        let mut failures: u32 = 0;

        loop {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("Discovery refresh cancelled");
                    return;
                }
                outcome = self.refresh_once() => outcome,
            };

            let delay = match outcome {
                Ok(count) => {
                    failures = 0;
                    match self.mode.interval() {
                        None => {
                            info!(instances = count, "Service found, discovery complete");
                            return;
                        }
                        Some(interval) => interval,
                    }
                }
                Err(err) => {
                    failures = failures.saturating_add(1);
                    let discovered = self.state.borrow().is_discovered();

                    if !self.backoff.allows_retry(failures) {
                        if discovered {
                            error!(
                                error = %err,
                                attempts = failures,
                                "Discovery refresh giving up, keeping existing records"
                            );
                        } else {
                            error!(error = %err, attempts = failures, "Discovery giving up");
                            self.publish_failure(DiscoveryError::RetriesExhausted {
                                attempts: failures,
                                last_error: err.to_string(),
                            });
                        }
                        return;
                    }

                    let delay = self.backoff.delay_for(failures);
                    if discovered {
                        warn!(
                            error = %err,
                            attempt = failures,
                            retry_in_ms = duration_to_u64_ms(delay),
                            "Discovery refresh failed, keeping existing records"
                        );
                    } else {
                        warn!(
                            error = %err,
                            attempt = failures,
                            retry_in_ms = duration_to_u64_ms(delay),
                            "Error getting registered services, retrying"
                        );
                    }
                    delay
                }
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("Discovery refresh cancelled");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Perform a single lookup and publish the result.
    ///
    /// Returns the number of discovered instances. Safe to call while the
    /// refresh loop runs: both publish a complete handle built around the
    /// same transport.
    ///
    /// # Errors
    ///
    /// [`DiscoveryError::Registry`] if the lookup fails,
    /// [`DiscoveryError::NoInstances`] if it lists no instance. The published
    /// handle is left untouched in both cases.
    pub async fn refresh_once(&self) -> Result<usize, DiscoveryError> {
        debug!(registry = %self.address, service = %self.service, "Getting registered services");

        let records = self.registry.lookup(&self.address, &self.service).await?;
        let count: usize = records.iter().map(|r| r.nodes.len()).sum();
        if count == 0 {
            return Err(DiscoveryError::NoInstances {
                service: self.service.clone(),
            });
        }

        log_records(&records);
        self.publish(records);
        Ok(count)
    }

    fn publish(&self, records: Vec<ServiceRecord>) {
        self.transport.update_endpoints(&records);

        let handle = ClientHandle::new(self.transport.clone(), self.service.clone())
            .with_records(records, Timestamp::now());
        let handle = Arc::new(handle);

        self.state.send_modify(|state| {
            state.handle = Some(handle);
            state.failure = None;
        });
    }

    fn publish_failure(&self, failure: DiscoveryError) {
        self.state.send_modify(|state| state.failure = Some(failure));
    }
}

fn log_records(records: &[ServiceRecord]) {
    for record in records {
        info!(service = %record.name, instances = record.nodes.len(), "Service found");
        for node in &record.nodes {
            match node.port() {
                Some(port) => debug!(
                    instance = %node.id,
                    address = %node.address,
                    port,
                    "Registered instance"
                ),
                None => debug!(
                    instance = %node.id,
                    address = %node.address,
                    "Registered instance, port not available in metadata"
                ),
            }
        }
    }
}
