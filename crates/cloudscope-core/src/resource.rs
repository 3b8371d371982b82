//! Resource definitions
//!
//! A [`Resource`] declares how to produce a value for a credential/region
//! pair. `Cached` resources have a stable id and a fetch function; `View`
//! resources map another resource's value and are never cached themselves.

use std::any::{type_name, TypeId};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::client_cache::{ClientLookup, ManagedClient};
use crate::credentials::CredentialProvider;
use crate::error::{Error, Result};
use crate::identity::{ConnectionSettings, Region};
use crate::resource_cache::ResourceCache;

/// Future returned by every resource lookup
pub type ResourceFuture<T> = BoxFuture<'static, Result<T>>;

/// What a fetch function gets to work with.
pub struct FetchContext {
    pub settings: ConnectionSettings,
    pub credentials: Arc<dyn CredentialProvider>,
    clients: Arc<dyn ClientLookup>,
}

impl FetchContext {
    pub(crate) fn new(
        settings: ConnectionSettings,
        credentials: Arc<dyn CredentialProvider>,
        clients: Arc<dyn ClientLookup>,
    ) -> Self {
        Self {
            settings,
            credentials,
            clients,
        }
    }

    pub fn region(&self) -> &Region {
        &self.settings.region
    }

    /// The cached client of type `C` for this fetch's credential and region
    pub fn client<C: ManagedClient>(&self) -> Result<Arc<C>> {
        self.clients
            .client_any(
                TypeId::of::<C>(),
                type_name::<C>(),
                &self.settings.credential.id,
                &self.settings.region,
            )?
            .downcast::<C>()
            .map_err(|_| Error::internal(format!("Cached client is not a {}", type_name::<C>())))
    }
}

type FetchFn<T> = Arc<dyn Fn(FetchContext) -> ResourceFuture<T> + Send + Sync>;

/// A resource with a stable id whose value is cached.
pub struct CachedResource<T> {
    pub(crate) id: String,
    pub(crate) expiry: Option<Duration>,
    pub(crate) fetch: FetchFn<T>,
}

impl<T> CachedResource<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn expiry(&self) -> Option<Duration> {
        self.expiry
    }
}

impl<T> Clone for CachedResource<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            expiry: self.expiry,
            fetch: self.fetch.clone(),
        }
    }
}

/// How a view reaches its underlying cached resource.
pub(crate) trait ViewSource<T>: Send + Sync {
    fn cached_id(&self) -> &str;

    fn get(
        &self,
        cache: &ResourceCache,
        settings: &ConnectionSettings,
        use_stale: bool,
        force_fetch: bool,
    ) -> ResourceFuture<T>;

    fn get_if_present(
        &self,
        cache: &ResourceCache,
        settings: &ConnectionSettings,
        use_stale: bool,
    ) -> Option<T>;

    fn clear(&self, cache: &ResourceCache, settings: &ConnectionSettings);
}

/// A resource computed from another resource's value.
pub struct ViewResource<T> {
    pub(crate) source: Arc<dyn ViewSource<T>>,
}

impl<T> Clone for ViewResource<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
        }
    }
}

struct MappedView<U, T> {
    underlying: Resource<U>,
    map: Arc<dyn Fn(&U) -> T + Send + Sync>,
}

impl<U, T> ViewSource<T> for MappedView<U, T>
where
    U: Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    fn cached_id(&self) -> &str {
        self.underlying.cached_id()
    }

    fn get(
        &self,
        cache: &ResourceCache,
        settings: &ConnectionSettings,
        use_stale: bool,
        force_fetch: bool,
    ) -> ResourceFuture<T> {
        let underlying = cache.get_with(&self.underlying, settings, use_stale, force_fetch);
        let map = self.map.clone();
        async move { underlying.await.map(|value| map(&value)) }.boxed()
    }

    fn get_if_present(
        &self,
        cache: &ResourceCache,
        settings: &ConnectionSettings,
        use_stale: bool,
    ) -> Option<T> {
        cache
            .get_if_present(&self.underlying, settings, use_stale)
            .map(|value| (self.map)(&value))
    }

    fn clear(&self, cache: &ResourceCache, settings: &ConnectionSettings) {
        cache.clear_resource(&self.underlying, settings);
    }
}

/// Declarative description of an asynchronous lookup.
pub enum Resource<T> {
    Cached(CachedResource<T>),
    View(ViewResource<T>),
}

impl<T> Clone for Resource<T> {
    fn clone(&self) -> Self {
        match self {
            Resource::Cached(c) => Resource::Cached(c.clone()),
            Resource::View(v) => Resource::View(v.clone()),
        }
    }
}

impl<T> Resource<T> {
    /// Id of the cached resource backing this one (itself, for cached ones)
    pub fn cached_id(&self) -> &str {
        match self {
            Resource::Cached(c) => &c.id,
            Resource::View(v) => v.source.cached_id(),
        }
    }

    pub fn is_view(&self) -> bool {
        matches!(self, Resource::View(_))
    }
}

impl<T: Clone + Send + Sync + 'static> Resource<T> {
    /// A cached resource fetched by `fetch`
    pub fn cached<F, Fut>(id: impl Into<String>, fetch: F) -> Self
    where
        F: Fn(FetchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Resource::Cached(CachedResource {
            id: id.into(),
            expiry: None,
            fetch: Arc::new(move |ctx| fetch(ctx).boxed()),
        })
    }

    /// Declare how long a fetched value stays fresh.
    ///
    /// Views have no expiry of their own; this leaves them unchanged.
    pub fn with_expiry(self, expiry: Duration) -> Self {
        match self {
            Resource::Cached(mut c) => {
                c.expiry = Some(expiry);
                Resource::Cached(c)
            }
            view => view,
        }
    }

    /// A view of `underlying` through the pure function `map`
    pub fn view<U, F>(underlying: Resource<U>, map: F) -> Self
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&U) -> T + Send + Sync + 'static,
    {
        Resource::View(ViewResource {
            source: Arc::new(MappedView {
                underlying,
                map: Arc::new(map),
            }),
        })
    }

    /// A view of this resource through `map`
    pub fn map<V, F>(self, map: F) -> Resource<V>
    where
        V: Clone + Send + Sync + 'static,
        F: Fn(&T) -> V + Send + Sync + 'static,
    {
        Resource::view(self, map)
    }
}

impl<T: Clone + Send + Sync + 'static> Resource<Vec<T>> {
    /// A view keeping the items matching `predicate`
    pub fn filter<P>(self, predicate: P) -> Resource<Vec<T>>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.map(move |items: &Vec<T>| items.iter().filter(|i| predicate(i)).cloned().collect())
    }

    /// A view of the first item matching `predicate`
    pub fn find<P>(self, predicate: P) -> Resource<Option<T>>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.map(move |items: &Vec<T>| items.iter().find(|i| predicate(i)).cloned())
    }
}

impl<T> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Cached(c) => f
                .debug_struct("Cached")
                .field("id", &c.id)
                .field("expiry", &c.expiry)
                .finish(),
            Resource::View(v) => f
                .debug_struct("View")
                .field("of", &v.source.cached_id())
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers() -> Resource<Vec<u32>> {
        Resource::cached("test.numbers", |_ctx| async { Ok(vec![1, 2, 3, 4]) })
    }

    #[test]
    fn test_view_reports_underlying_id() {
        let evens = numbers().filter(|n| n % 2 == 0);
        let first = numbers().find(|n| *n > 2).map(|n| n.unwrap_or_default());

        assert!(evens.is_view());
        assert_eq!(evens.cached_id(), "test.numbers");
        assert_eq!(first.cached_id(), "test.numbers");
    }

    #[test]
    fn test_with_expiry_only_applies_to_cached() {
        let cached = numbers().with_expiry(Duration::from_secs(60));
        match &cached {
            Resource::Cached(c) => assert_eq!(c.expiry(), Some(Duration::from_secs(60))),
            Resource::View(_) => panic!("expected a cached resource"),
        }

        let view = numbers()
            .map(|v| v.len())
            .with_expiry(Duration::from_secs(60));
        assert!(view.is_view());
    }

    #[test]
    fn test_debug_output() {
        assert!(format!("{:?}", numbers()).contains("test.numbers"));
        assert!(format!("{:?}", numbers().map(|v| v.len())).starts_with("View"));
    }
}
