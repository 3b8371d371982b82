//! Change notification bus
//!
//! Credential and region providers publish [`ChangeEvent`]s; caches and the
//! connection manager subscribe as [`ChangeListener`]s. Delivery is
//! synchronous and in subscription order, so events for one id arrive in
//! the order they were published.

use std::sync::{Arc, PoisonError, RwLock, Weak};

/// A change to the set of credentials, SSO sessions or regions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    CredentialAdded(String),
    CredentialModified(String),
    CredentialRemoved(String),
    SsoSessionAdded(String),
    SsoSessionModified(String),
    SsoSessionRemoved(String),
    RegionsChanged,
}

impl ChangeEvent {
    /// The credential id this event is about, if any
    pub fn credential_id(&self) -> Option<&str> {
        match self {
            ChangeEvent::CredentialAdded(id)
            | ChangeEvent::CredentialModified(id)
            | ChangeEvent::CredentialRemoved(id) => Some(id),
            _ => None,
        }
    }
}

/// Receives change events.
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, event: &ChangeEvent);
}

/// Observer list owned by the credential and region providers.
///
/// Listeners are held weakly: a dropped cache silently unsubscribes.
#[derive(Default)]
pub struct ChangeBus {
    listeners: RwLock<Vec<Weak<dyn ChangeListener>>>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a listener for all future events
    pub fn subscribe<L: ChangeListener + 'static>(&self, listener: &Arc<L>) {
        let listener: Arc<dyn ChangeListener> = listener.clone();
        let weak = Arc::downgrade(&listener);
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(weak);
    }

    /// Deliver an event to every live listener
    pub fn publish(&self, event: ChangeEvent) {
        log::debug!("Publishing {:?}", event);

        // Snapshot under the lock, dispatch without it (listeners may re-enter)
        let live: Vec<Arc<dyn ChangeListener>> = {
            let mut listeners = self
                .listeners
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(|l| l.upgrade()).collect()
        };

        for listener in live {
            listener.on_change(&event);
        }
    }

    /// Number of live listeners
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|l| l.strong_count() > 0)
            .count()
    }
}

impl std::fmt::Debug for ChangeBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
