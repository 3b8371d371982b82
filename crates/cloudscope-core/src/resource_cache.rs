//! Credential/region scoped resource cache
//!
//! Values are keyed by resource id, region id and credential id. At most
//! one fetch per key is in flight; concurrent callers share it. Completed
//! values and failures are both cached and go stale after the resource's
//! expiry.

use std::any::{type_name, Any};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::runtime::Handle;

use crate::client_cache::ClientLookup;
use crate::credentials::CredentialManager;
use crate::error::{Error, Result};
use crate::events::{ChangeEvent, ChangeListener};
use crate::identity::{CacheKey, ConnectionSettings};
use crate::resource::{CachedResource, FetchContext, Resource, ResourceFuture};

type ErasedValue = Arc<dyn Any + Send + Sync>;
type SharedFetch = Shared<BoxFuture<'static, Result<ErasedValue>>>;

/// Tuning knobs for a [`ResourceCache`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceCacheOptions {
    /// Entry count above which [`ResourceCache::prune`] drops the oldest
    pub max_entries: usize,
    /// Expiry for resources that do not declare one
    pub default_expiry: Option<Duration>,
}

impl Default for ResourceCacheOptions {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_expiry: None,
        }
    }
}

enum EntryState {
    Pending(SharedFetch),
    Complete {
        result: Result<ErasedValue>,
        completed_at: Instant,
    },
}

struct CacheEntry {
    generation: u64,
    expiry: Option<Duration>,
    state: EntryState,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        match (&self.state, self.expiry) {
            (EntryState::Complete { completed_at, .. }, Some(expiry)) => {
                now.saturating_duration_since(*completed_at) >= expiry
            }
            _ => false,
        }
    }

    fn completed_at(&self) -> Option<Instant> {
        match &self.state {
            EntryState::Complete { completed_at, .. } => Some(*completed_at),
            EntryState::Pending(_) => None,
        }
    }
}

enum Lookup {
    Ready(Result<ErasedValue>),
    InFlight(SharedFetch),
}

/// Asynchronous fetch-or-reuse cache of resource values.
pub struct ResourceCache {
    entries: Arc<DashMap<CacheKey, CacheEntry>>,
    clients: Arc<dyn ClientLookup>,
    credentials: Arc<CredentialManager>,
    runtime: Handle,
    options: ResourceCacheOptions,
    next_generation: AtomicU64,
}

impl ResourceCache {
    /// Create a cache whose fetches run on `runtime`
    pub fn new(
        clients: Arc<dyn ClientLookup>,
        credentials: Arc<CredentialManager>,
        runtime: Handle,
        options: ResourceCacheOptions,
    ) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clients,
            credentials,
            runtime,
            options,
            next_generation: AtomicU64::new(1),
        }
    }

    /// Get a value, reusing stale entries and joining in-flight fetches
    pub fn get<T>(&self, resource: &Resource<T>, settings: &ConnectionSettings) -> ResourceFuture<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.get_with(resource, settings, true, false)
    }

    /// Get a value with explicit staleness and force flags.
    ///
    /// `force_fetch` starts a new fetch unless one is already in flight for
    /// the key, in which case the caller joins it.
    pub fn get_with<T>(
        &self,
        resource: &Resource<T>,
        settings: &ConnectionSettings,
        use_stale: bool,
        force_fetch: bool,
    ) -> ResourceFuture<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        match resource {
            Resource::View(view) => view.source.get(self, settings, use_stale, force_fetch),
            Resource::Cached(cached) => self.get_cached(cached, settings, use_stale, force_fetch),
        }
    }

    /// The cached value, if one is present and usable; never fetches
    pub fn get_if_present<T>(
        &self,
        resource: &Resource<T>,
        settings: &ConnectionSettings,
        use_stale: bool,
    ) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let cached = match resource {
            Resource::View(view) => return view.source.get_if_present(self, settings, use_stale),
            Resource::Cached(cached) => cached,
        };
        let key = CacheKey::new(&cached.id, settings);
        let entry = self.entries.get(&key)?;
        if !use_stale && entry.is_expired(Instant::now()) {
            return None;
        }
        match &entry.state {
            EntryState::Complete { result: Ok(value), .. } => value.downcast_ref::<T>().cloned(),
            _ => None,
        }
    }

    /// Block the calling thread until the value is ready or `timeout` elapses.
    ///
    /// Must not be called from a thread driving the cache's runtime.
    pub fn get_blocking<T>(
        &self,
        resource: &Resource<T>,
        settings: &ConnectionSettings,
        timeout: Duration,
    ) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let future = self.get(resource, settings);
        let (tx, rx) = mpsc::channel();
        self.runtime.spawn(async move {
            let _ = tx.send(future.await);
        });
        rx.recv_timeout(timeout).map_err(|_| {
            Error::timeout(format!("fetching {}", resource.cached_id()), timeout)
        })?
    }

    /// Drop the entry backing `resource` for one credential/region pair
    pub fn clear_resource<T>(&self, resource: &Resource<T>, settings: &ConnectionSettings) {
        match resource {
            Resource::View(view) => view.source.clear(self, settings),
            Resource::Cached(cached) => {
                self.entries.remove(&CacheKey::new(&cached.id, settings));
            }
        }
    }

    /// Drop every entry of one credential/region pair
    pub fn clear_settings(&self, settings: &ConnectionSettings) {
        self.entries.retain(|key, _| !key.is_scoped_to(settings));
    }

    /// Drop every entry of one credential, across regions
    pub fn clear_credential(&self, credential_id: &str) {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.credential_id != credential_id);
        log::debug!(
            "Cleared {} resource(s) for credential {}",
            before.saturating_sub(self.entries.len()),
            credential_id
        );
    }

    /// Drop everything. In-flight fetches finish but are not stored.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drop expired entries, then the oldest completed ones above the cap.
    ///
    /// In-flight entries are never pruned.
    pub fn prune(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));

        let excess = self.entries.len().saturating_sub(self.options.max_entries);
        if excess == 0 {
            return;
        }
        let mut completed: Vec<(CacheKey, Instant)> = self
            .entries
            .iter()
            .filter_map(|e| e.value().completed_at().map(|at| (e.key().clone(), at)))
            .collect();
        completed.sort_by_key(|(_, at)| *at);
        for (key, _) in completed.into_iter().take(excess) {
            self.entries.remove(&key);
        }
        log::trace!("Pruned resource cache to {} entries", self.entries.len());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get_cached<T>(
        &self,
        resource: &CachedResource<T>,
        settings: &ConnectionSettings,
        use_stale: bool,
        force_fetch: bool,
    ) -> ResourceFuture<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let key = CacheKey::new(&resource.id, settings);
        let lookup = self.lookup_or_fetch(key, resource, settings, use_stale, force_fetch);
        if self.entries.len() > self.options.max_entries {
            self.prune();
        }

        let resource_id = resource.id.clone();
        async move {
            let value = match lookup {
                Lookup::Ready(result) => result?,
                Lookup::InFlight(fetch) => fetch.await?,
            };
            value.downcast_ref::<T>().cloned().ok_or_else(|| {
                Error::internal(format!(
                    "Resource {} holds a value that is not a {}",
                    resource_id,
                    type_name::<T>()
                ))
            })
        }
        .boxed()
    }

    fn lookup_or_fetch<T>(
        &self,
        key: CacheKey,
        resource: &CachedResource<T>,
        settings: &ConnectionSettings,
        use_stale: bool,
        force_fetch: bool,
    ) -> Lookup
    where
        T: Clone + Send + Sync + 'static,
    {
        // The entry guard makes check-and-insert atomic per key
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get();
                match &entry.state {
                    EntryState::Pending(fetch) => return Lookup::InFlight(fetch.clone()),
                    EntryState::Complete { result, .. } => {
                        if !force_fetch && (use_stale || !entry.is_expired(Instant::now())) {
                            return Lookup::Ready(result.clone());
                        }
                    }
                }
                let (generation, fetch) = self.start_fetch(key, resource, settings);
                occupied.insert(self.pending_entry(generation, resource, fetch.clone()));
                Lookup::InFlight(fetch)
            }
            Entry::Vacant(vacant) => {
                let (generation, fetch) = self.start_fetch(key, resource, settings);
                vacant.insert(self.pending_entry(generation, resource, fetch.clone()));
                Lookup::InFlight(fetch)
            }
        }
    }

    fn pending_entry<T>(
        &self,
        generation: u64,
        resource: &CachedResource<T>,
        fetch: SharedFetch,
    ) -> CacheEntry {
        CacheEntry {
            generation,
            expiry: resource.expiry.or(self.options.default_expiry),
            state: EntryState::Pending(fetch),
        }
    }

    fn start_fetch<T>(
        &self,
        key: CacheKey,
        resource: &CachedResource<T>,
        settings: &ConnectionSettings,
    ) -> (u64, SharedFetch)
    where
        T: Clone + Send + Sync + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let fetch = resource.fetch.clone();
        let clients = self.clients.clone();
        let credentials = self.credentials.clone();
        let entries = self.entries.clone();
        let settings = settings.clone();
        let resource_id = resource.id.clone();

        log::debug!(
            "Fetching {} for {} in {}",
            resource_id,
            settings.credential.id,
            settings.region.id
        );

        let task_id = resource_id.clone();
        let task = self.runtime.spawn(async move {
            let work = async {
                let provider = credentials.get(&settings.credential.id)?;
                let value = fetch(FetchContext::new(settings, provider, clients)).await?;
                Ok(Arc::new(value) as ErasedValue)
            };
            let result: Result<ErasedValue> = match std::panic::AssertUnwindSafe(work)
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::fetch(&task_id, "Fetch panicked")),
            };
            if let Err(e) = &result {
                log::debug!("Fetch of {} failed: {}", task_id, e);
            }

            // Only the generation that is still in the map may write back
            if let Some(mut entry) = entries.get_mut(&key) {
                if entry.generation == generation {
                    entry.state = EntryState::Complete {
                        result: result.clone(),
                        completed_at: Instant::now(),
                    };
                }
            }
            result
        });

        let shared = async move {
            task.await
                .unwrap_or_else(|e| Err(Error::fetch(resource_id, format!("Fetch task failed: {}", e))))
        }
        .boxed()
        .shared();
        (generation, shared)
    }
}

impl ChangeListener for ResourceCache {
    fn on_change(&self, event: &ChangeEvent) {
        match event {
            ChangeEvent::CredentialRemoved(id) | ChangeEvent::CredentialModified(id) => {
                self.clear_credential(id)
            }
            _ => {}
        }
    }
}

impl fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCache")
            .field("entries", &self.len())
            .field("options", &self.options)
            .finish()
    }
}
