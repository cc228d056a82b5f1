//! The discovery session: one shared client handle per target service.
//!
//! A session is created by the composition root and shared by reference
//! (usually behind an `Arc`). The first call to [`DiscoverySession::acquire`]
//! builds the transport exactly once and spawns the background refresh task;
//! every caller then awaits a published handle with at least one discovered
//! instance.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use discovery::{
    ClientAcquirer, ClientHandle, DiscoveryConfig, DiscoveryError, ServiceRegistry, SessionId,
    TransportFactory,
};
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::refresh::DiscoveryRefresher;
use crate::state::{SessionState, StatePublisher};

/// Shared state plus the machinery that keeps it current.
pub struct DiscoverySession<F: TransportFactory> {
    id: SessionId,
    config: DiscoveryConfig,
    registry: Arc<dyn ServiceRegistry>,
    factory: F,
    setup: OnceCell<Result<(), DiscoveryError>>,
    state: StatePublisher<F::Transport>,
    cancel: CancellationToken,
    refresher: OnceCell<Arc<DiscoveryRefresher<F::Transport>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<F: TransportFactory> DiscoverySession<F> {
    /// Create a session. Nothing happens until the first `acquire`.
    pub fn new(config: DiscoveryConfig, registry: Arc<dyn ServiceRegistry>, factory: F) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            id: SessionId::new_random(),
            config,
            registry,
            factory,
            setup: OnceCell::new(),
            state: Arc::new(state),
            cancel: CancellationToken::new(),
            refresher: OnceCell::new(),
            task: Mutex::new(None),
        }
    }

    /// Identifier attached to every span of this session.
    pub fn session_id(&self) -> SessionId {
        self.id
    }

    /// The configuration this session was built with.
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// The published handle, with or without discovered records.
    pub fn current(&self) -> Option<Arc<ClientHandle<F::Transport>>> {
        self.state.borrow().handle().cloned()
    }

    /// Whether the transport has been set up and published.
    pub fn is_ready(&self) -> bool {
        self.state.borrow().is_ready()
    }

    /// Receiver that observes every publication of this session.
    pub fn subscribe(&self) -> watch::Receiver<SessionState<F::Transport>> {
        self.state.subscribe()
    }

    /// Produce a ready-to-use client handle.
    ///
    /// Sets the transport up on the first call, then waits until the refresh
    /// task has published at least one discovered instance.
    ///
    /// # Errors
    ///
    /// - [`DiscoveryError::FatalSetup`] if the transport could not be built,
    ///   for this and every later call.
    /// - [`DiscoveryError::RetriesExhausted`] if the backoff policy gave up.
    /// - [`DiscoveryError::TimedOut`] if `acquire_timeout` elapsed.
    /// - [`DiscoveryError::Cancelled`] if the session was shut down.
    #[instrument(
        name = "discovery_acquire",
        skip(self),
        fields(session_id = %self.id, service = %self.config.service_name)
    )]
    pub async fn acquire(&self) -> Result<Arc<ClientHandle<F::Transport>>, DiscoveryError> {
        self.ensure_initialized().await?;
        self.wait_for_discovery().await
    }

    /// Run transport setup if no caller has done so yet.
    ///
    /// Concurrent callers all await the single initializer and observe its
    /// outcome.
    ///
    /// # Errors
    ///
    /// The recorded [`DiscoveryError::FatalSetup`], if setup failed.
    pub async fn ensure_initialized(&self) -> Result<(), DiscoveryError> {
        self.setup.get_or_init(|| self.initialize()).await.clone()
    }

    async fn initialize(&self) -> Result<(), DiscoveryError> {
        info!(
            registry = %self.config.registry_address,
            service = %self.config.service_name,
            "Setting up transport"
        );

        let transport = match self.factory.create(&self.config.registry_address).await {
            Ok(transport) => transport,
            Err(err) => {
                let err = DiscoveryError::FatalSetup(err);
                error!(error = %err, "Error setting up transport");
                let recorded = err.clone();
                self.state.send_modify(|state| state.failure = Some(recorded));
                return Err(err);
            }
        };

        let handle = Arc::new(ClientHandle::new(
            transport.clone(),
            self.config.service_name.clone(),
        ));
        self.state.send_modify(|state| state.handle = Some(handle));

        let refresher = Arc::new(DiscoveryRefresher::new(
            self.id,
            &self.config,
            Arc::clone(&self.registry),
            transport,
            Arc::clone(&self.state),
        ));
        // Only the single initializer reaches this point, so the cell is empty.
        let _ = self.refresher.set(Arc::clone(&refresher));
        let task = refresher.spawn(self.cancel.clone());
        if let Ok(mut slot) = self.task.lock() {
            *slot = Some(task);
        }

        Ok(())
    }

    async fn wait_for_discovery(
        &self,
    ) -> Result<Arc<ClientHandle<F::Transport>>, DiscoveryError> {
        let mut rx = self.state.subscribe();
        let settled = async move {
            let state = rx
                .wait_for(|state| state.is_settled())
                .await
                .map_err(|_| DiscoveryError::Cancelled)?;
            state.settle()
        };

        let bounded = async {
            match self.config.acquire_timeout {
                Some(limit) => tokio::time::timeout(limit, settled)
                    .await
                    .map_err(|_| DiscoveryError::TimedOut { waited: limit })?,
                None => settled.await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(DiscoveryError::Cancelled),
            result = bounded => result,
        }
    }

    /// Query the registry right now, outside the refresh schedule.
    ///
    /// Publishes the result like a scheduled refresh and returns the number
    /// of discovered instances. Does not trigger setup.
    ///
    /// # Errors
    ///
    /// - [`DiscoveryError::NotYetDiscovered`] before the transport is set up.
    /// - The recorded [`DiscoveryError::FatalSetup`] if setup failed.
    /// - [`DiscoveryError::Cancelled`] after shutdown.
    /// - [`DiscoveryError::Registry`] / [`DiscoveryError::NoInstances`] if
    ///   the lookup fails; the published handle is left untouched.
    #[instrument(
        name = "discovery_refresh_now",
        skip(self),
        fields(session_id = %self.id, service = %self.config.service_name)
    )]
    pub async fn refresh_now(&self) -> Result<usize, DiscoveryError> {
        if self.cancel.is_cancelled() {
            return Err(DiscoveryError::Cancelled);
        }
        if let Some(Err(err)) = self.setup.get() {
            return Err(err.clone());
        }
        let refresher = self
            .refresher
            .get()
            .ok_or_else(|| DiscoveryError::NotYetDiscovered {
                service: self.config.service_name.clone(),
            })?;
        refresher.refresh_once().await
    }

    /// Stop the refresh task and release every waiting caller with
    /// [`DiscoveryError::Cancelled`].
    pub async fn shutdown(&self) {
        info!(session_id = %self.id, "Shutting down discovery session");
        self.cancel.cancel();

        let task = self.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    warn!(error = %err, "Discovery refresh task ended abnormally");
                }
            }
        }
    }
}

impl<F: TransportFactory> Drop for DiscoverySession<F> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<F: TransportFactory> std::fmt::Debug for DiscoverySession<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoverySession")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<F: TransportFactory> ClientAcquirer<F::Transport> for DiscoverySession<F> {
    async fn acquire(&self) -> Result<Arc<ClientHandle<F::Transport>>, DiscoveryError> {
        DiscoverySession::acquire(self).await
    }
}
