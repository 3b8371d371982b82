//! Session: the lifecycle owner
//!
//! A [`Session`] constructs the change bus, providers, both caches and the
//! connection manager, wires their subscriptions, and closes clients and
//! transport on [`Session::shutdown`] or drop.

use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::Handle;

use crate::client_cache::{ClientCache, ClientRegistry, Transport};
use crate::connection::ConnectionManager;
use crate::credentials::CredentialManager;
use crate::error::{Error, Result};
use crate::events::ChangeBus;
use crate::identity::CallerIdentity;
use crate::regions::{RegionMetadata, RegionProvider};
use crate::resource::{Resource, ResourceFuture};
use crate::resource_cache::ResourceCache;
use crate::settings::Settings;

/// Owns every cache and provider for one application session.
pub struct Session<X: Transport> {
    settings: Settings,
    bus: Arc<ChangeBus>,
    credentials: Arc<CredentialManager>,
    regions: Arc<RegionProvider>,
    clients: Arc<ClientCache<X>>,
    resources: Arc<ResourceCache>,
    connection: Arc<ConnectionManager>,
}

impl<X: Transport> Session<X> {
    /// Build and wire a session.
    ///
    /// `identity` is the resource the connection manager validates with;
    /// fetches and validations run on `runtime`.
    pub fn new(
        settings: Settings,
        mut metadata: RegionMetadata,
        registry: ClientRegistry<X>,
        transport: X,
        identity: Resource<CallerIdentity>,
        runtime: Handle,
    ) -> Result<Self> {
        if let Some(region) = &settings.default_region {
            let known = metadata
                .partitions
                .iter()
                .any(|p| p.regions.iter().any(|r| &r.id == region));
            if !known {
                return Err(Error::region_not_found(region)
                    .with_help("Fix default_region in the settings file"));
            }
            metadata.default_region = region.clone();
        }

        let bus = Arc::new(ChangeBus::new());
        let credentials = Arc::new(CredentialManager::new(bus.clone()));
        let regions = Arc::new(RegionProvider::new(bus.clone(), &metadata));
        let clients = Arc::new(ClientCache::new(
            registry,
            transport,
            credentials.clone(),
            regions.clone(),
        ));
        let resources = Arc::new(ResourceCache::new(
            clients.clone(),
            credentials.clone(),
            runtime.clone(),
            settings.resource_cache_options(),
        ));
        let connection = Arc::new(ConnectionManager::new(
            credentials.clone(),
            regions.clone(),
            resources.clone(),
            identity,
            runtime,
            settings.connection_options(),
        ));

        // Caches first, so the connection manager revalidates against
        // already purged entries
        bus.subscribe(&clients);
        bus.subscribe(&resources);
        bus.subscribe(&connection);

        Ok(Self {
            settings,
            bus,
            credentials,
            regions,
            clients,
            resources,
            connection,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn bus(&self) -> &Arc<ChangeBus> {
        &self.bus
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    pub fn regions(&self) -> &Arc<RegionProvider> {
        &self.regions
    }

    pub fn clients(&self) -> &Arc<ClientCache<X>> {
        &self.clients
    }

    pub fn resources(&self) -> &Arc<ResourceCache> {
        &self.resources
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Fetch `resource` for the current selection
    pub fn get<T>(&self, resource: &Resource<T>) -> ResourceFuture<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        match self.connection.connection_settings() {
            Some(settings) => self.resources.get(resource, &settings),
            None => {
                let missing = if self.connection.selected_credential().is_none() {
                    "credential"
                } else {
                    "region"
                };
                futures::future::ready(Err(Error::incomplete_selection(missing))).boxed()
            }
        }
    }

    /// Drop cached resources, then close every client and the transport.
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.clients.is_closed() {
            return;
        }
        log::debug!("Shutting down session");
        self.resources.clear();
        self.clients.close();
    }
}

impl<X: Transport> Drop for Session<X> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<X: Transport> fmt::Debug for Session<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("credentials", &self.credentials)
            .field("clients", &self.clients)
            .field("resources", &self.resources)
            .field("connection", &self.connection)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{
        test_identity_resource, test_region_metadata, test_registry, StaticCredentialProvider,
        TestClient, TestTransport,
    };
    use std::time::Duration;

    fn session(settings: Settings) -> Result<Session<TestTransport>> {
        Session::new(
            settings,
            test_region_metadata(),
            test_registry(),
            TestTransport::default(),
            test_identity_resource(),
            Handle::current(),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_session_wires_removal_through_every_layer() {
        let session = session(Settings::default()).unwrap();
        session.credentials().add(StaticCredentialProvider::arc("profile:a"));
        let region = session.regions().region("us-west-2").unwrap();
        let settings = crate::identity::ConnectionSettings::new(
            session.credentials().get("profile:a").unwrap().identifier().clone(),
            region.clone(),
        );
        session.connection().change_connection_settings(settings);
        session
            .connection()
            .wait_until_stable(Duration::from_secs(5))
            .await
            .unwrap();
        let client = session
            .clients()
            .get_client::<TestClient>("profile:a", &region)
            .unwrap();
        assert!(!session.resources().is_empty());

        session.credentials().remove("profile:a");

        assert!(client.is_closed());
        assert!(session.clients().is_empty());
        assert!(session.resources().is_empty());
        assert!(!session.connection().is_valid_connection_settings());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_get_without_selection_fails() {
        let session = session(Settings::default()).unwrap();

        let err = session.get(&test_identity_resource()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::IncompleteSelection);
        assert!(err.to_string().contains("No credential selected"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_default_region_override() {
        let settings = Settings {
            default_region: Some("eu-west-1".into()),
            ..Default::default()
        };
        let session = session(settings).unwrap();
        assert_eq!(session.regions().default_region().unwrap().id, "eu-west-1");

        let bad = Settings {
            default_region: Some("mars-1".into()),
            ..Default::default()
        };
        let err = session_err(bad);
        assert!(err.to_string().contains("Region not found: mars-1"));
    }

    fn session_err(settings: Settings) -> Error {
        match session(settings) {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_closes_clients_and_transport_once() {
        let session = session(Settings::default()).unwrap();
        session.credentials().add(StaticCredentialProvider::arc("profile:a"));
        let region = session.regions().region("us-east-1").unwrap();
        let client = session
            .clients()
            .get_client::<TestClient>("profile:a", &region)
            .unwrap();

        session.shutdown();
        session.shutdown();

        assert!(client.is_closed());
        assert_eq!(session.clients().transport().shutdowns(), 1);
        let err = session
            .clients()
            .get_client::<TestClient>("profile:a", &region)
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Disposed { .. }));
    }
}
