//! Credential providers
//!
//! A [`CredentialProvider`] resolves secret material for one
//! [`CredentialIdentifier`]. The [`CredentialManager`] owns the set of known
//! providers and publishes a [`ChangeEvent`] for every mutation.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::events::{ChangeBus, ChangeEvent};
use crate::identity::{CredentialIdentifier, Credentials};

/// Resolves credentials for one identifier.
#[async_trait]
pub trait CredentialProvider: Send + Sync + fmt::Debug {
    /// The identifier this provider resolves
    fn identifier(&self) -> &CredentialIdentifier;

    /// Resolve the current credentials
    async fn resolve_credentials(&self) -> Result<Credentials>;

    /// Turn a validation failure into an action the user can take.
    ///
    /// Returning `Some` makes the connection state `RequiresUserAction`
    /// instead of `InvalidConnection`.
    fn remediation(&self, _error: &Error) -> Option<Remediation> {
        None
    }
}

/// What the user has to do to recover a failed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remediation {
    pub title: String,
    pub message: String,
    pub action: RemediationAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemediationAction {
    /// Sign in again through the SSO session
    Reauthenticate { sso_session: Option<String> },
    /// Refresh expired static or process credentials
    RefreshCredentials,
    /// Fix the credential's configuration
    EditConfiguration,
}

impl Remediation {
    pub fn reauthenticate(sso_session: Option<String>) -> Self {
        let message = match &sso_session {
            Some(session) => format!("Sign in again to the SSO session '{}'", session),
            None => "Sign in again to refresh the connection".to_string(),
        };
        Self {
            title: "Re-authentication required".into(),
            message,
            action: RemediationAction::Reauthenticate { sso_session },
        }
    }

    pub fn refresh_credentials(credential_id: &str) -> Self {
        Self {
            title: "Credentials expired".into(),
            message: format!("Refresh the credentials of {}", credential_id),
            action: RemediationAction::RefreshCredentials,
        }
    }

    pub fn edit_configuration(credential_id: &str) -> Self {
        Self {
            title: "Credential misconfigured".into(),
            message: format!("Fix the configuration of {}", credential_id),
            action: RemediationAction::EditConfiguration,
        }
    }
}

/// Owns the set of known credential providers.
pub struct CredentialManager {
    providers: RwLock<IndexMap<String, Arc<dyn CredentialProvider>>>,
    bus: Arc<ChangeBus>,
}

impl CredentialManager {
    pub fn new(bus: Arc<ChangeBus>) -> Self {
        Self {
            providers: RwLock::new(IndexMap::new()),
            bus,
        }
    }

    /// The bus this manager publishes on
    pub fn bus(&self) -> &Arc<ChangeBus> {
        &self.bus
    }

    /// Add a provider, publishing `CredentialAdded`.
    ///
    /// Adding an id that is already known replaces it and publishes
    /// `CredentialModified` instead.
    pub fn add(&self, provider: Arc<dyn CredentialProvider>) {
        let id = provider.identifier().id.clone();
        let previous = self.write().insert(id.clone(), provider);
        if previous.is_some() {
            log::debug!("Credential {} replaced", id);
            self.bus.publish(ChangeEvent::CredentialModified(id));
        } else {
            log::debug!("Credential {} added", id);
            self.bus.publish(ChangeEvent::CredentialAdded(id));
        }
    }

    /// Replace an existing provider, publishing `CredentialModified`
    pub fn modify(&self, provider: Arc<dyn CredentialProvider>) -> Result<()> {
        let id = provider.identifier().id.clone();
        {
            let mut providers = self.write();
            let slot = providers
                .get_mut(&id)
                .ok_or_else(|| Error::credential_not_found(&id))?;
            *slot = provider;
        }
        log::debug!("Credential {} modified", id);
        self.bus.publish(ChangeEvent::CredentialModified(id));
        Ok(())
    }

    /// Remove a provider, publishing `CredentialRemoved`
    pub fn remove(&self, id: &str) -> Option<Arc<dyn CredentialProvider>> {
        let removed = self.write().shift_remove(id);
        if removed.is_some() {
            log::debug!("Credential {} removed", id);
            self.bus
                .publish(ChangeEvent::CredentialRemoved(id.to_string()));
        }
        removed
    }

    /// Forward an SSO session change from the session store
    pub fn sso_session_changed(&self, event: ChangeEvent) {
        debug_assert!(matches!(
            event,
            ChangeEvent::SsoSessionAdded(_)
                | ChangeEvent::SsoSessionModified(_)
                | ChangeEvent::SsoSessionRemoved(_)
        ));
        self.bus.publish(event);
    }

    /// Look up a provider by id
    pub fn get(&self, id: &str) -> Result<Arc<dyn CredentialProvider>> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::credential_not_found(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    /// Identifiers of every known provider, in discovery order
    pub fn identifiers(&self) -> Vec<CredentialIdentifier> {
        self.read()
            .values()
            .map(|p| p.identifier().clone())
            .collect()
    }

    fn read(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, IndexMap<String, Arc<dyn CredentialProvider>>> {
        self.providers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, IndexMap<String, Arc<dyn CredentialProvider>>> {
        self.providers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialManager")
            .field("providers", &self.read().keys().collect::<Vec<_>>())
            .finish()
    }
}
