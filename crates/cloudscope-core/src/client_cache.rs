//! Shared service client cache.
//!
//! Caches actual service clients so their connection pools are reused.
//! Each unique (service, region, credential) combination gets its own cached
//! client; global services share one client per partition. Every client is
//! built from the same shared [`Transport`].

use std::any::{type_name, Any, TypeId};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::credentials::{CredentialManager, CredentialProvider};
use crate::error::{Error, Result};
use crate::events::{ChangeEvent, ChangeListener};
use crate::identity::{ClientKey, Region};
use crate::regions::RegionProvider;

/// The process-wide connection pool every client is built on.
///
/// Only the [`ClientCache`] that owns it shuts it down.
pub trait Transport: Send + Sync + 'static {
    fn shutdown(&self) {}
}

/// A client the cache can own and close.
pub trait ManagedClient: Send + Sync + 'static {
    fn close(&self) {}
}

/// What a builder receives when asked for a new client.
pub struct ClientContext<'a, X> {
    pub credentials: Arc<dyn CredentialProvider>,
    /// Resolved region (the partition's global region for global services)
    pub region: &'a Region,
    pub transport: &'a Arc<X>,
}

type AnyClient = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
struct CachedClient {
    any: AnyClient,
    managed: Arc<dyn ManagedClient>,
}

type BuildFn<X> = Arc<dyn Fn(&ClientContext<'_, X>) -> Result<CachedClient> + Send + Sync>;

struct Registration<X> {
    service_name: String,
    build: BuildFn<X>,
}

/// Explicit registry from client type to builder and service name.
///
/// Populated once at startup; a lookup miss is a configuration error.
pub struct ClientRegistry<X> {
    entries: HashMap<TypeId, Registration<X>>,
}

impl<X> Default for ClientRegistry<X> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<X: Transport> ClientRegistry<X> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the builder for client type `C` under `service_name`
    pub fn register<C, F>(&mut self, service_name: impl Into<String>, builder: F) -> &mut Self
    where
        C: ManagedClient,
        F: Fn(&ClientContext<'_, X>) -> Result<C> + Send + Sync + 'static,
    {
        let build: BuildFn<X> = Arc::new(move |ctx| {
            let client = Arc::new(builder(ctx)?);
            Ok(CachedClient {
                any: client.clone(),
                managed: client,
            })
        });
        self.entries.insert(
            TypeId::of::<C>(),
            Registration {
                service_name: service_name.into(),
                build,
            },
        );
        self
    }

    pub fn contains<C: ManagedClient>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<C>())
    }

    /// Service name registered for `C`
    pub fn service_name<C: ManagedClient>(&self) -> Result<&str> {
        self.lookup(TypeId::of::<C>(), type_name::<C>())
            .map(|r| r.service_name.as_str())
    }

    fn lookup(&self, type_id: TypeId, type_name: &str) -> Result<&Registration<X>> {
        let registration = self
            .entries
            .get(&type_id)
            .ok_or_else(|| Error::missing_builder(type_name))?;
        if registration.service_name.trim().is_empty() {
            return Err(Error::missing_service_name(type_name));
        }
        Ok(registration)
    }
}

/// Type-erased client access used by resource fetches.
pub trait ClientLookup: Send + Sync {
    fn client_any(
        &self,
        type_id: TypeId,
        type_name: &'static str,
        credential_id: &str,
        region: &Region,
    ) -> Result<Arc<dyn Any + Send + Sync>>;
}

/// Keyed cache of live clients; owns their lifecycle and the transport.
pub struct ClientCache<X: Transport> {
    registry: ClientRegistry<X>,
    transport: Arc<X>,
    credentials: Arc<CredentialManager>,
    regions: Arc<RegionProvider>,
    clients: RwLock<HashMap<ClientKey, CachedClient>>,
    closed: AtomicBool,
}

impl<X: Transport> ClientCache<X> {
    pub fn new(
        registry: ClientRegistry<X>,
        transport: X,
        credentials: Arc<CredentialManager>,
        regions: Arc<RegionProvider>,
    ) -> Self {
        Self {
            registry,
            transport: Arc::new(transport),
            credentials,
            regions,
            clients: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Get or create the client of type `C` for a credential and region.
    ///
    /// Repeated calls with the same key return the same `Arc`.
    pub fn get_client<C: ManagedClient>(&self, credential_id: &str, region: &Region) -> Result<Arc<C>> {
        let client = self.client_any(TypeId::of::<C>(), type_name::<C>(), credential_id, region)?;
        client.downcast::<C>().map_err(|_| {
            Error::internal(format!(
                "Cached client is not a {}",
                type_name::<C>()
            ))
        })
    }

    /// The shared transport
    pub fn transport(&self) -> &Arc<X> {
        &self.transport
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Evict and close every client built for `credential_id`.
    ///
    /// Runs on `CredentialModified` and `CredentialRemoved`.
    pub fn invalidate_credential(&self, credential_id: &str) {
        let evicted: Vec<CachedClient> = {
            let mut clients = self.write();
            let keys: Vec<ClientKey> = clients
                .keys()
                .filter(|k| k.credential_id == credential_id)
                .cloned()
                .collect();
            keys.iter().filter_map(|k| clients.remove(k)).collect()
        };
        if !evicted.is_empty() {
            log::debug!(
                "Closing {} client(s) for credential {}",
                evicted.len(),
                credential_id
            );
        }
        for client in evicted {
            client.managed.close();
        }
    }

    /// Close every cached client, then the transport.
    ///
    /// Idempotent. Later lookups fail with a disposed error.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained: Vec<CachedClient> = self.write().drain().map(|(_, c)| c).collect();
        log::debug!("Closing client cache ({} client(s))", drained.len());
        for client in drained {
            client.managed.close();
        }
        self.transport.shutdown();
    }

    /// Key for a lookup plus the region the client should be built for
    fn resolve_key(&self, service: &str, credential_id: &str, region: &Region) -> (ClientKey, Region) {
        if self.regions.is_service_global(service, &region.partition_id) {
            let placeholder = self
                .regions
                .partition(&region.partition_id)
                .map(|p| p.placeholder_region_id())
                .unwrap_or_else(|| format!("{}-global", region.partition_id));
            let build_region = self
                .regions
                .global_region(&region.partition_id)
                .unwrap_or_else(|| region.clone());
            (
                ClientKey {
                    service: service.to_string(),
                    region_id: placeholder,
                    credential_id: credential_id.to_string(),
                },
                build_region,
            )
        } else {
            (
                ClientKey {
                    service: service.to_string(),
                    region_id: region.id.clone(),
                    credential_id: credential_id.to_string(),
                },
                region.clone(),
            )
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ClientKey, CachedClient>> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ClientKey, CachedClient>> {
        self.clients.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<X: Transport> ClientLookup for ClientCache<X> {
    fn client_any(
        &self,
        type_id: TypeId,
        type_name: &'static str,
        credential_id: &str,
        region: &Region,
    ) -> Result<Arc<dyn Any + Send + Sync>> {
        if self.is_closed() {
            return Err(Error::disposed("client cache"));
        }

        let registration = self.registry.lookup(type_id, type_name)?;
        let (key, build_region) = self.resolve_key(&registration.service_name, credential_id, region);

        // Try read lock first (fast path for cached clients)
        if let Some(client) = self.read().get(&key) {
            return Ok(client.any.clone());
        }

        // Build new client (slow path - only on first access)
        loop {
            let credentials = self.credentials.get(credential_id)?;
            let built = (registration.build)(&ClientContext {
                credentials: credentials.clone(),
                region: &build_region,
                transport: &self.transport,
            })?;

            let mut clients = self.write();
            // Re-check under the write lock: close() may have drained the map
            if self.is_closed() {
                drop(clients);
                built.managed.close();
                return Err(Error::disposed("client cache"));
            }
            // The provider may have been removed or replaced during the build,
            // after its invalidation already ran
            match self.credentials.get(credential_id) {
                Ok(current) if Arc::ptr_eq(&current, &credentials) => {}
                Ok(_) => {
                    drop(clients);
                    built.managed.close();
                    log::debug!("Credential {} replaced during client build, rebuilding", credential_id);
                    continue;
                }
                Err(e) => {
                    drop(clients);
                    built.managed.close();
                    return Err(e);
                }
            }
            return match clients.entry(key) {
                // Another thread may have inserted first; the first insert wins
                Entry::Occupied(existing) => {
                    let winner = existing.get().any.clone();
                    drop(clients);
                    built.managed.close();
                    Ok(winner)
                }
                Entry::Vacant(slot) => {
                    log::debug!(
                        "Created {} client for {} in {}",
                        registration.service_name,
                        credential_id,
                        slot.key().region_id
                    );
                    Ok(slot.insert(built).any.clone())
                }
            };
        }
    }
}

impl<X: Transport> ChangeListener for ClientCache<X> {
    fn on_change(&self, event: &ChangeEvent) {
        match event {
            // Clients capture their provider when built
            ChangeEvent::CredentialModified(id) | ChangeEvent::CredentialRemoved(id) => {
                self.invalidate_credential(id)
            }
            _ => {}
        }
    }
}

impl<X: Transport> Drop for ClientCache<X> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<X: Transport> fmt::Debug for ClientCache<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCache")
            .field("clients", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
