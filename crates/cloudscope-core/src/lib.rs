//! cloudscope-core: credential and region scoped caching
//!
//! This crate provides the provider-agnostic core: a keyed cache of
//! long-lived service clients, an asynchronous cache of resource values keyed
//! by credential, region and resource id, and a connection state machine that
//! validates the selected credential/region pair.
//!
//! # Example
//!
//! ```rust,ignore
//! use cloudscope_core::{Resource, Session, Settings};
//!
//! let session = Session::new(settings, metadata, registry, transport, identity, handle)?;
//! let buckets: Resource<Vec<String>> = Resource::cached("s3.buckets", |ctx| async move {
//!     let client = ctx.client::<S3Client>()?;
//!     list_buckets(&client).await
//! });
//! let names = session.get(&buckets).await?;
//! ```

pub mod client_cache;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod events;
pub mod identity;
pub mod regions;
pub mod resource;
pub mod resource_cache;
pub mod settings;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

mod session;

pub use client_cache::{
    ClientCache, ClientContext, ClientLookup, ClientRegistry, ManagedClient, Transport,
};
pub use connection::{ConnectionManager, ConnectionOptions, ConnectionState, PersistedSelection};
pub use credentials::{CredentialManager, CredentialProvider, Remediation, RemediationAction};
pub use error::{Error, ErrorKind, Result};
pub use events::{ChangeBus, ChangeEvent, ChangeListener};
pub use identity::{
    CacheKey, CallerIdentity, ClientKey, ConnectionSettings, CredentialIdentifier, Credentials,
    Partition, Region,
};
pub use regions::{RegionMetadata, RegionProvider};
pub use resource::{FetchContext, Resource, ResourceFuture};
pub use resource_cache::{ResourceCache, ResourceCacheOptions};
pub use session::Session;
pub use settings::Settings;
