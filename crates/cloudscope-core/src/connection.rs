//! Connection state machine
//!
//! The [`ConnectionManager`] owns the selected credential and region and
//! validates the pair asynchronously through an identity-check resource.
//! Every transition is broadcast exactly once, and a validation result only
//! applies if no newer trigger arrived while it was in flight.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use crate::credentials::{CredentialManager, Remediation};
use crate::error::{Error, ErrorKind, Result};
use crate::events::{ChangeEvent, ChangeListener};
use crate::identity::{CallerIdentity, ConnectionSettings, CredentialIdentifier, Region};
use crate::regions::RegionProvider;
use crate::resource::Resource;
use crate::resource_cache::ResourceCache;

/// Credential selected when nothing was persisted
pub const DEFAULT_CREDENTIAL_ID: &str = "profile:default";

const NOTIFICATION_CAPACITY: usize = 64;

/// Validity of the active credential/region pair.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Initializing,
    ValidatingConnection,
    ValidConnection {
        settings: ConnectionSettings,
        identity: CallerIdentity,
    },
    InvalidConnection {
        cause: Error,
    },
    RequiresUserAction {
        remediation: Remediation,
    },
}

impl ConnectionState {
    /// Whether no further change happens until a new trigger
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::ValidConnection { .. }
                | ConnectionState::InvalidConnection { .. }
                | ConnectionState::RequiresUserAction { .. }
        )
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ConnectionState::ValidConnection { .. })
    }

    /// One-line status for display
    pub fn display_message(&self) -> String {
        match self {
            ConnectionState::Initializing => "Connecting...".to_string(),
            ConnectionState::ValidatingConnection => "Validating connection...".to_string(),
            ConnectionState::ValidConnection { settings, identity } => format!(
                "Connected to {} in {} (account {})",
                settings.credential.display_name, settings.region.id, identity.account_id
            ),
            ConnectionState::InvalidConnection { cause } => {
                let summary = cause.to_string();
                let first = summary.lines().next().unwrap_or_default().to_string();
                match &cause.cause {
                    Some(detail) => format!("Unable to connect: {} ({})", first, detail),
                    None => format!("Unable to connect: {}", first),
                }
            }
            ConnectionState::RequiresUserAction { remediation } => {
                format!("{}: {}", remediation.title, remediation.message)
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ConnectionState::Initializing => "Initializing",
            ConnectionState::ValidatingConnection => "ValidatingConnection",
            ConnectionState::ValidConnection { .. } => "ValidConnection",
            ConnectionState::InvalidConnection { .. } => "InvalidConnection",
            ConnectionState::RequiresUserAction { .. } => "RequiresUserAction",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_message())
    }
}

/// Selection handed to and reported back from settings storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSelection {
    #[serde(default)]
    pub active_credential: Option<String>,
    #[serde(default)]
    pub active_region: Option<String>,
    #[serde(default)]
    pub recently_used_credentials: Vec<String>,
    #[serde(default)]
    pub recently_used_regions: Vec<String>,
}

/// Connection manager tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Length of the most-recently-used lists
    pub recent_limit: usize,
    /// Upper bound for one validation
    pub validation_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            recent_limit: 5,
            validation_timeout: Duration::from_secs(30),
        }
    }
}

struct Selection {
    credential: Option<CredentialIdentifier>,
    region: Option<Region>,
    state: ConnectionState,
    /// Bumped by every trigger; stale validations compare against it
    generation: u64,
    recent_credentials: VecDeque<String>,
    recent_regions: VecDeque<String>,
}

struct Inner {
    credentials: Arc<CredentialManager>,
    regions: Arc<RegionProvider>,
    resources: Arc<ResourceCache>,
    identity: Resource<CallerIdentity>,
    runtime: Handle,
    options: ConnectionOptions,
    selection: Mutex<Selection>,
    notifier: broadcast::Sender<ConnectionState>,
}

/// Single writer of the connection state.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager validating through `identity`
    pub fn new(
        credentials: Arc<CredentialManager>,
        regions: Arc<RegionProvider>,
        resources: Arc<ResourceCache>,
        identity: Resource<CallerIdentity>,
        runtime: Handle,
        options: ConnectionOptions,
    ) -> Self {
        let (notifier, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                credentials,
                regions,
                resources,
                identity,
                runtime,
                options,
                selection: Mutex::new(Selection {
                    credential: None,
                    region: None,
                    state: ConnectionState::Initializing,
                    generation: 0,
                    recent_credentials: VecDeque::new(),
                    recent_regions: VecDeque::new(),
                }),
                notifier,
            }),
        }
    }

    /// Receive every state transition from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionState> {
        self.inner.notifier.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state.clone()
    }

    pub fn selected_credential(&self) -> Option<CredentialIdentifier> {
        self.inner.lock().credential.clone()
    }

    pub fn selected_region(&self) -> Option<Region> {
        self.inner.lock().region.clone()
    }

    /// The selected pair, if both halves are selected
    pub fn connection_settings(&self) -> Option<ConnectionSettings> {
        let selection = self.inner.lock();
        match (&selection.credential, &selection.region) {
            (Some(c), Some(r)) => Some(ConnectionSettings::new(c.clone(), r.clone())),
            _ => None,
        }
    }

    pub fn is_valid_connection_settings(&self) -> bool {
        self.inner.lock().state.is_valid()
    }

    /// Credential ids, newest first
    pub fn recently_used_credentials(&self) -> Vec<String> {
        self.inner.lock().recent_credentials.iter().cloned().collect()
    }

    /// Region ids, newest first
    pub fn recently_used_regions(&self) -> Vec<String> {
        self.inner.lock().recent_regions.iter().cloned().collect()
    }

    /// Select a credential (or none) and revalidate
    pub fn change_credential_provider(&self, credential: Option<CredentialIdentifier>) {
        let mut selection = self.inner.lock();
        if let Some(c) = &credential {
            push_recent(&mut selection.recent_credentials, &c.id, self.inner.options.recent_limit);
        }
        selection.credential = credential;
        Inner::revalidate(&self.inner, selection, false);
    }

    /// Select a region (or none) and revalidate
    pub fn change_region(&self, region: Option<Region>) {
        let mut selection = self.inner.lock();
        if let Some(r) = &region {
            push_recent(&mut selection.recent_regions, &r.id, self.inner.options.recent_limit);
        }
        selection.region = region;
        Inner::revalidate(&self.inner, selection, false);
    }

    /// Select both halves at once, validating a single time
    pub fn change_connection_settings(&self, settings: ConnectionSettings) {
        let limit = self.inner.options.recent_limit;
        let mut selection = self.inner.lock();
        push_recent(&mut selection.recent_credentials, &settings.credential.id, limit);
        push_recent(&mut selection.recent_regions, &settings.region.id, limit);
        selection.credential = Some(settings.credential);
        selection.region = Some(settings.region);
        Inner::revalidate(&self.inner, selection, false);
    }

    /// Revalidate the current selection, bypassing the cached identity
    pub fn refresh_connection_state(&self) {
        let selection = self.inner.lock();
        Inner::revalidate(&self.inner, selection, true);
    }

    /// Restore a persisted selection and validate it.
    ///
    /// Unknown ids fall back to `profile:default`, then to the credential's
    /// default region or the provider's default region.
    pub fn load_state(&self, persisted: &PersistedSelection) {
        let inner = &self.inner;
        let credential = persisted
            .active_credential
            .as_deref()
            .and_then(|id| inner.credentials.get(id).ok())
            .or_else(|| inner.credentials.get(DEFAULT_CREDENTIAL_ID).ok())
            .map(|p| p.identifier().clone());
        let region = persisted
            .active_region
            .as_deref()
            .and_then(|id| inner.regions.region(id).ok())
            .or_else(|| {
                credential
                    .as_ref()
                    .and_then(|c| c.default_region_id.as_deref())
                    .and_then(|id| inner.regions.region(id).ok())
            })
            .or_else(|| inner.regions.default_region());

        log::debug!(
            "Loaded selection: credential={:?} region={:?}",
            credential.as_ref().map(|c| &c.id),
            region.as_ref().map(|r| &r.id)
        );

        let limit = inner.options.recent_limit;
        let mut selection = inner.lock();
        selection.recent_credentials = truncated(&persisted.recently_used_credentials, limit);
        selection.recent_regions = truncated(&persisted.recently_used_regions, limit);
        selection.credential = credential;
        selection.region = region;
        Inner::revalidate(inner, selection, false);
    }

    /// The current selection and MRU lists
    pub fn save_state(&self) -> PersistedSelection {
        let selection = self.inner.lock();
        PersistedSelection {
            active_credential: selection.credential.as_ref().map(|c| c.id.clone()),
            active_region: selection.region.as_ref().map(|r| r.id.clone()),
            recently_used_credentials: selection.recent_credentials.iter().cloned().collect(),
            recently_used_regions: selection.recent_regions.iter().cloned().collect(),
        }
    }

    /// Wait for a terminal state, failing after `timeout`
    pub async fn wait_until_stable(&self, timeout: Duration) -> Result<ConnectionState> {
        // Subscribe before reading so no transition is missed
        let mut notifications = self.subscribe();
        let wait = async {
            loop {
                let state = self.state();
                if state.is_terminal() {
                    return Ok(state);
                }
                match notifications.recv().await {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(Error::disposed("connection manager"))
                    }
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::timeout("waiting for a stable connection state", timeout))?
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Selection> {
        self.selection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `state` and notify; the caller holds the selection lock
    fn transition(&self, selection: &mut Selection, state: ConnectionState) {
        log::debug!("Connection state {} -> {}", selection.state.name(), state.name());
        selection.state = state.clone();
        // No receivers is fine
        let _ = self.notifier.send(state);
    }

    /// Start a new validation cycle for the current selection
    fn revalidate(this: &Arc<Self>, mut selection: MutexGuard<'_, Selection>, force: bool) {
        selection.generation += 1;
        let generation = selection.generation;

        let settings = match (&selection.credential, &selection.region) {
            (Some(c), Some(r)) => ConnectionSettings::new(c.clone(), r.clone()),
            (None, _) => {
                this.transition(
                    &mut selection,
                    ConnectionState::InvalidConnection {
                        cause: Error::incomplete_selection("credential"),
                    },
                );
                return;
            }
            (_, None) => {
                this.transition(
                    &mut selection,
                    ConnectionState::InvalidConnection {
                        cause: Error::incomplete_selection("region"),
                    },
                );
                return;
            }
        };
        this.transition(&mut selection, ConnectionState::ValidatingConnection);
        drop(selection);

        let inner = this.clone();
        this.runtime.spawn(async move {
            let state = inner.validate(&settings, force).await;
            inner.apply(generation, state);
        });
    }

    async fn validate(&self, settings: &ConnectionSettings, force: bool) -> ConnectionState {
        let timeout = self.options.validation_timeout;
        let check = self.resources.get_with(&self.identity, settings, false, force);
        let error = match tokio::time::timeout(timeout, check).await {
            Ok(Ok(identity)) => {
                return ConnectionState::ValidConnection {
                    settings: settings.clone(),
                    identity,
                }
            }
            Ok(Err(e)) => e,
            Err(_) => Error::timeout(format!("validating {}", settings.credential.id), timeout),
        };

        log::debug!("Validation of {} failed: {}", settings.credential.id, error);
        let remediation = match error.kind {
            ErrorKind::Timeout { .. } => None,
            _ => self
                .credentials
                .get(&settings.credential.id)
                .ok()
                .and_then(|provider| provider.remediation(&error)),
        };
        match remediation {
            Some(remediation) => ConnectionState::RequiresUserAction { remediation },
            None => ConnectionState::InvalidConnection { cause: error },
        }
    }

    /// Apply a validation result unless a newer trigger superseded it
    fn apply(&self, generation: u64, state: ConnectionState) {
        let mut selection = self.lock();
        if selection.generation != generation {
            log::trace!(
                "Dropping superseded validation result {} (current {})",
                generation,
                selection.generation
            );
            return;
        }
        self.transition(&mut selection, state);
    }
}

impl ChangeListener for ConnectionManager {
    fn on_change(&self, event: &ChangeEvent) {
        let inner = &self.inner;
        let mut selection = inner.lock();
        match event {
            ChangeEvent::CredentialModified(id)
                if selection.credential.as_ref().is_some_and(|c| &c.id == id) =>
            {
                if let Ok(provider) = inner.credentials.get(id) {
                    selection.credential = Some(provider.identifier().clone());
                }
                Inner::revalidate(inner, selection, true);
            }
            ChangeEvent::CredentialRemoved(id)
                if selection.credential.as_ref().is_some_and(|c| &c.id == id) =>
            {
                log::debug!("Selected credential {} was removed", id);
                selection.credential = None;
                Inner::revalidate(inner, selection, false);
            }
            ChangeEvent::SsoSessionAdded(session)
            | ChangeEvent::SsoSessionModified(session)
            | ChangeEvent::SsoSessionRemoved(session)
                if selection
                    .credential
                    .as_ref()
                    .and_then(|c| c.sso_session.as_ref())
                    .is_some_and(|s| s == session) =>
            {
                Inner::revalidate(inner, selection, true);
            }
            ChangeEvent::RegionsChanged => {
                let Some(current) = selection.region.clone() else {
                    return;
                };
                match inner.regions.region(&current.id) {
                    Ok(region) if region == current => {}
                    Ok(region) => {
                        selection.region = Some(region);
                        Inner::revalidate(inner, selection, false);
                    }
                    Err(_) => {
                        let fallback = inner.regions.default_region();
                        log::debug!(
                            "Selected region {} disappeared, falling back to {:?}",
                            current.id,
                            fallback.as_ref().map(|r| &r.id)
                        );
                        selection.region = fallback;
                        Inner::revalidate(inner, selection, false);
                    }
                }
            }
            _ => {}
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let selection = self.inner.lock();
        f.debug_struct("ConnectionManager")
            .field("credential", &selection.credential.as_ref().map(|c| &c.id))
            .field("region", &selection.region.as_ref().map(|r| &r.id))
            .field("state", &selection.state.name())
            .finish()
    }
}

fn push_recent(list: &mut VecDeque<String>, id: &str, limit: usize) {
    list.retain(|existing| existing != id);
    list.push_front(id.to_string());
    list.truncate(limit);
}

fn truncated(ids: &[String], limit: usize) -> VecDeque<String> {
    let mut list = VecDeque::new();
    for id in ids {
        if !list.contains(id) && list.len() < limit {
            list.push_back(id.clone());
        }
    }
    list
}
