//! Test doubles
//!
//! Static credentials, a recording change listener, a counting transport and
//! mock clients. Compiled for this crate's own tests and, behind the
//! `testing` feature, for downstream crates.

use std::any::{Any, TypeId};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::client_cache::{ClientContext, ClientLookup, ClientRegistry, ManagedClient, Transport};
use crate::credentials::{CredentialProvider, Remediation};
use crate::error::{Error, Result};
use crate::events::{ChangeEvent, ChangeListener};
use crate::identity::{CallerIdentity, CredentialIdentifier, Credentials, Region};
use crate::regions::{PartitionMetadata, RegionEntry, RegionMetadata};
use crate::resource::Resource;

/// Credential provider with a fixed, swappable outcome.
#[derive(Debug)]
pub struct StaticCredentialProvider {
    identifier: CredentialIdentifier,
    outcome: Mutex<Result<Credentials>>,
    remediation: Option<Remediation>,
    delay: Option<Duration>,
    resolves: AtomicUsize,
}

impl StaticCredentialProvider {
    /// Provider for `id` (e.g. `profile:dev`) that always succeeds
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let display_name = id.split_once(':').map(|(_, n)| n).unwrap_or(&id).to_string();
        Self::with_identifier(CredentialIdentifier::new(id.clone(), display_name, "test"))
    }

    pub fn with_identifier(identifier: CredentialIdentifier) -> Self {
        let access_key = format!("AKID{}", identifier.id.to_uppercase().replace(':', "_"));
        Self {
            identifier,
            outcome: Mutex::new(Ok(Credentials::new(access_key, "secret"))),
            remediation: None,
            delay: None,
            resolves: AtomicUsize::new(0),
        }
    }

    /// Shorthand for a succeeding provider as a trait object
    pub fn arc(id: impl Into<String>) -> Arc<dyn CredentialProvider> {
        Arc::new(Self::new(id))
    }

    /// Fail every resolution with `error`
    pub fn failing(self, error: Error) -> Self {
        self.set_outcome(Err(error));
        self
    }

    /// Offer `remediation` for any failure
    pub fn with_remediation(mut self, remediation: Remediation) -> Self {
        self.remediation = Some(remediation);
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_outcome(&self, outcome: Result<Credentials>) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = outcome;
    }

    /// How many times credentials were resolved
    pub fn resolve_count(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    fn identifier(&self) -> &CredentialIdentifier {
        &self.identifier
    }

    async fn resolve_credentials(&self) -> Result<Credentials> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.resolves.fetch_add(1, Ordering::SeqCst);
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remediation(&self, _error: &Error) -> Option<Remediation> {
        self.remediation.clone()
    }
}

/// Identity check that only resolves credentials.
///
/// The account id is derived from the access key, so different credentials
/// yield different identities.
pub fn test_identity_resource() -> Resource<CallerIdentity> {
    Resource::cached("test.caller_identity", |ctx| async move {
        let credentials = ctx.credentials.resolve_credentials().await?;
        Ok(CallerIdentity {
            account_id: credentials.access_key_id.clone(),
            arn: format!("arn:aws:iam::{}:user/test", credentials.access_key_id),
            user_id: ctx.settings.credential.id.clone(),
        })
    })
}

/// Records every event it receives.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ChangeEvent>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ChangeListener for RecordingListener {
    fn on_change(&self, event: &ChangeEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Transport that counts shutdowns.
#[derive(Debug, Default)]
pub struct TestTransport {
    shutdowns: AtomicUsize,
}

impl TestTransport {
    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl Transport for TestTransport {
    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Client that remembers what it was built for.
#[derive(Debug)]
pub struct TestClient {
    pub credential_id: String,
    pub region_id: String,
    closed: AtomicBool,
}

impl TestClient {
    pub fn new(credential_id: impl Into<String>, region_id: impl Into<String>) -> Self {
        Self {
            credential_id: credential_id.into(),
            region_id: region_id.into(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ManagedClient for TestClient {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Registry with [`TestClient`] under the service name `test`
pub fn test_registry() -> ClientRegistry<TestTransport> {
    let mut registry = ClientRegistry::new();
    registry.register("test", |ctx: &ClientContext<'_, TestTransport>| {
        Ok(TestClient::new(
            ctx.credentials.identifier().id.clone(),
            ctx.region.id.clone(),
        ))
    });
    registry
}

/// Client lookup answering with pre-registered instances.
///
/// Asking for a type nobody registered fails with a no-registration error.
#[derive(Default)]
pub struct MockClients {
    clients: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl MockClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out `client` for every lookup of type `C`
    pub fn register<C: ManagedClient>(&self, client: C) -> Arc<C> {
        let client = Arc::new(client);
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TypeId::of::<C>(), client.clone());
        client
    }
}

impl ClientLookup for MockClients {
    fn client_any(
        &self,
        type_id: TypeId,
        type_name: &'static str,
        _credential_id: &str,
        _region: &Region,
    ) -> Result<Arc<dyn Any + Send + Sync>> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&type_id)
            .cloned()
            .ok_or_else(|| Error::no_registration(format!("mock client {}", type_name)))
    }
}

impl std::fmt::Debug for MockClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("MockClients").field("clients", &count).finish()
    }
}

/// Two partitions: `aws` (three regions) and `aws-cn` (one region), both
/// with `iam` as a global service.
pub fn test_region_metadata() -> RegionMetadata {
    let region = |id: &str, name: &str| RegionEntry {
        id: id.into(),
        display_name: name.into(),
    };
    RegionMetadata {
        default_region: "us-east-1".into(),
        partitions: vec![
            PartitionMetadata {
                id: "aws".into(),
                display_name: "AWS Standard".into(),
                global_region_id: "us-east-1".into(),
                global_services: BTreeSet::from(["iam".to_string()]),
                regions: vec![
                    region("us-east-1", "US East (N. Virginia)"),
                    region("us-west-2", "US West (Oregon)"),
                    region("eu-west-1", "Europe (Ireland)"),
                ],
            },
            PartitionMetadata {
                id: "aws-cn".into(),
                display_name: "AWS China".into(),
                global_region_id: "cn-north-1".into(),
                global_services: BTreeSet::from(["iam".to_string()]),
                regions: vec![region("cn-north-1", "China (Beijing)")],
            },
        ],
    }
}
