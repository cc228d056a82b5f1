//! The value every observer of a session sees.

use std::sync::Arc;

use discovery::{ClientHandle, DiscoveryError};
use tokio::sync::watch;

/// Current handle plus an optional terminal failure.
///
/// Published through a `watch` channel: readers borrow it under the channel's
/// read lock, the initializer and the refresh task replace it under the write
/// lock.
#[derive(Clone)]
pub struct SessionState<T> {
    pub(crate) handle: Option<Arc<ClientHandle<T>>>,
    pub(crate) failure: Option<DiscoveryError>,
}

impl<T> Default for SessionState<T> {
    fn default() -> Self {
        Self {
            handle: None,
            failure: None,
        }
    }
}

impl<T> SessionState<T> {
    /// The published handle, if the transport has been set up.
    pub fn handle(&self) -> Option<&Arc<ClientHandle<T>>> {
        self.handle.as_ref()
    }

    /// The terminal failure, if one was recorded.
    pub fn failure(&self) -> Option<&DiscoveryError> {
        self.failure.as_ref()
    }

    /// A transport handle has been published.
    pub fn is_ready(&self) -> bool {
        self.handle.is_some()
    }

    /// The published handle carries at least one discovered record.
    pub fn is_discovered(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.is_discovered())
    }

    /// Nothing more to wait for: either discovered or failed for good.
    pub(crate) fn is_settled(&self) -> bool {
        self.is_discovered() || self.failure.is_some()
    }

    /// The discovered handle, or the recorded failure.
    ///
    /// Only meaningful once [`Self::is_settled`] holds.
    pub(crate) fn settle(&self) -> Result<Arc<ClientHandle<T>>, DiscoveryError> {
        match (&self.handle, &self.failure) {
            (Some(handle), _) if handle.is_discovered() => Ok(Arc::clone(handle)),
            (_, Some(failure)) => Err(failure.clone()),
            _ => Err(DiscoveryError::Cancelled),
        }
    }
}

impl<T> std::fmt::Debug for SessionState<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("ready", &self.is_ready())
            .field("discovered", &self.is_discovered())
            .field("failure", &self.failure)
            .finish()
    }
}

pub(crate) type StatePublisher<T> = Arc<watch::Sender<SessionState<T>>>;

#[cfg(test)]
mod tests {
    use discovery::{InstanceId, Node, ServiceName, ServiceRecord, Timestamp};

    use super::*;

    fn orders() -> ServiceName {
        ServiceName::new("orders").unwrap()
    }

    #[test]
    fn empty_state_is_not_settled() {
        let state = SessionState::<()>::default();
        assert!(!state.is_ready());
        assert!(!state.is_settled());
    }

    #[test]
    fn handle_without_records_is_ready_but_not_settled() {
        let state = SessionState {
            handle: Some(Arc::new(ClientHandle::new((), orders()))),
            failure: None,
        };
        assert!(state.is_ready());
        assert!(!state.is_discovered());
        assert!(!state.is_settled());
    }

    #[test]
    fn discovered_handle_wins_over_failure() {
        let record = ServiceRecord::new(
            orders(),
            vec![Node::new(InstanceId::new("n1").unwrap(), "10.0.0.5")],
        );
        let handle = ClientHandle::new((), orders()).with_records(vec![record], Timestamp::now());
        let state = SessionState {
            handle: Some(Arc::new(handle)),
            failure: Some(DiscoveryError::Cancelled),
        };
        assert!(state.is_settled());
        assert!(state.settle().is_ok());
    }

    #[test]
    fn failure_settles_the_state() {
        let state = SessionState::<()> {
            handle: None,
            failure: Some(DiscoveryError::RetriesExhausted {
                attempts: 3,
                last_error: "boom".into(),
            }),
        };
        assert!(state.is_settled());
        assert!(matches!(
            state.settle(),
            Err(DiscoveryError::RetriesExhausted { attempts: 3, .. })
        ));
    }
}
