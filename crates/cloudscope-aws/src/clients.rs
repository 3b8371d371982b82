//! AWS service clients in the client cache
//!
//! SDK clients are wrapped in [`SdkClient`] so the cache can own them.
//! Each service registers once with [`register_clients`]; the cache then
//! hands out one client per (service, region, credential).

use std::ops::Deref;

use aws_config::SdkConfig;
use cloudscope_core::{ClientContext, ClientRegistry, ManagedClient};

use crate::transport::AwsTransport;

/// An SDK client type the cache knows how to build.
pub trait AwsClient: Clone + Send + Sync + 'static {
    /// Service name used for global-service lookups
    const SERVICE_NAME: &'static str;

    fn from_sdk_config(config: &SdkConfig) -> Self;
}

impl AwsClient for aws_sdk_sts::Client {
    const SERVICE_NAME: &'static str = "sts";

    fn from_sdk_config(config: &SdkConfig) -> Self {
        Self::new(config)
    }
}

#[cfg(feature = "iam")]
impl AwsClient for aws_sdk_iam::Client {
    const SERVICE_NAME: &'static str = "iam";

    fn from_sdk_config(config: &SdkConfig) -> Self {
        Self::new(config)
    }
}

#[cfg(feature = "ssm")]
impl AwsClient for aws_sdk_ssm::Client {
    const SERVICE_NAME: &'static str = "ssm";

    fn from_sdk_config(config: &SdkConfig) -> Self {
        Self::new(config)
    }
}

#[cfg(feature = "cfn")]
impl AwsClient for aws_sdk_cloudformation::Client {
    const SERVICE_NAME: &'static str = "cloudformation";

    fn from_sdk_config(config: &SdkConfig) -> Self {
        Self::new(config)
    }
}

#[cfg(feature = "s3")]
impl AwsClient for aws_sdk_s3::Client {
    const SERVICE_NAME: &'static str = "s3";

    fn from_sdk_config(config: &SdkConfig) -> Self {
        // Local endpoints don't resolve virtual-hosted bucket names
        if config.endpoint_url().is_some() {
            let s3_config = aws_sdk_s3::config::Builder::from(config)
                .force_path_style(true)
                .build();
            return Self::from_conf(s3_config);
        }
        Self::new(config)
    }
}

/// A cached SDK client.
#[derive(Debug, Clone)]
pub struct SdkClient<C> {
    inner: C,
}

impl<C: AwsClient> SdkClient<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C> Deref for SdkClient<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.inner
    }
}

impl<C: AwsClient> ManagedClient for SdkClient<C> {
    fn close(&self) {
        log::trace!("Releasing {} client", C::SERVICE_NAME);
    }
}

pub type StsClient = SdkClient<aws_sdk_sts::Client>;
#[cfg(feature = "iam")]
pub type IamClient = SdkClient<aws_sdk_iam::Client>;
#[cfg(feature = "ssm")]
pub type SsmClient = SdkClient<aws_sdk_ssm::Client>;
#[cfg(feature = "cfn")]
pub type CfnClient = SdkClient<aws_sdk_cloudformation::Client>;
#[cfg(feature = "s3")]
pub type S3Client = SdkClient<aws_sdk_s3::Client>;

fn build<C: AwsClient>(ctx: &ClientContext<'_, AwsTransport>) -> cloudscope_core::Result<SdkClient<C>> {
    let config = ctx
        .transport
        .client_config(ctx.region, ctx.credentials.clone());
    Ok(SdkClient::new(C::from_sdk_config(&config)))
}

/// Register one SDK client type
pub fn register<C: AwsClient>(registry: &mut ClientRegistry<AwsTransport>) {
    registry.register(C::SERVICE_NAME, build::<C>);
}

/// Register every client type enabled by crate features
pub fn register_clients(registry: &mut ClientRegistry<AwsTransport>) {
    register::<aws_sdk_sts::Client>(registry);
    #[cfg(feature = "iam")]
    register::<aws_sdk_iam::Client>(registry);
    #[cfg(feature = "ssm")]
    register::<aws_sdk_ssm::Client>(registry);
    #[cfg(feature = "cfn")]
    register::<aws_sdk_cloudformation::Client>(registry);
    #[cfg(feature = "s3")]
    register::<aws_sdk_s3::Client>(registry);
}

/// A registry with every enabled client type
pub fn default_registry() -> ClientRegistry<AwsTransport> {
    let mut registry = ClientRegistry::new();
    register_clients(&mut registry);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regions::embedded_metadata;
    use crate::transport::test_transport;
    use cloudscope_core::events::ChangeBus;
    use cloudscope_core::testing::StaticCredentialProvider;
    use cloudscope_core::{ClientCache, CredentialManager, RegionProvider};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn cache() -> (ClientCache<AwsTransport>, Arc<RegionProvider>) {
        let bus = Arc::new(ChangeBus::new());
        let credentials = Arc::new(CredentialManager::new(bus.clone()));
        credentials.add(StaticCredentialProvider::arc("profile:a"));
        credentials.add(StaticCredentialProvider::arc("profile:b"));
        let regions = Arc::new(RegionProvider::new(bus, &embedded_metadata().unwrap()));
        let cache = ClientCache::new(default_registry(), test_transport(), credentials, regions.clone());
        (cache, regions)
    }

    #[test]
    fn test_registry_names_services() {
        let registry = default_registry();

        assert_eq!(registry.service_name::<StsClient>().unwrap(), "sts");
        #[cfg(feature = "ssm")]
        assert_eq!(registry.service_name::<SsmClient>().unwrap(), "ssm");
        #[cfg(feature = "cfn")]
        assert_eq!(registry.service_name::<CfnClient>().unwrap(), "cloudformation");
    }

    #[cfg(feature = "ssm")]
    #[test]
    fn test_different_regions_different_clients() {
        let (cache, regions) = cache();
        let east = regions.region("us-east-1").unwrap();
        let west = regions.region("us-west-2").unwrap();

        let client1 = cache.get_client::<SsmClient>("profile:a", &east).unwrap();
        let client2 = cache.get_client::<SsmClient>("profile:a", &west).unwrap();

        assert_eq!(client1.config().region().unwrap().as_ref(), "us-east-1");
        assert_eq!(client2.config().region().unwrap().as_ref(), "us-west-2");
        assert!(!Arc::ptr_eq(&client1, &client2));
    }

    #[cfg(feature = "ssm")]
    #[test]
    fn test_same_key_same_client() {
        let (cache, regions) = cache();
        let east = regions.region("us-east-1").unwrap();

        let client1 = cache.get_client::<SsmClient>("profile:a", &east).unwrap();
        let client2 = cache.get_client::<SsmClient>("profile:a", &east).unwrap();
        let other = cache.get_client::<SsmClient>("profile:b", &east).unwrap();

        assert!(Arc::ptr_eq(&client1, &client2));
        assert!(!Arc::ptr_eq(&client1, &other));
    }

    #[cfg(feature = "iam")]
    #[test]
    fn test_global_service_shares_one_client_per_partition() {
        let (cache, regions) = cache();
        let west = regions.region("eu-west-1").unwrap();
        let east = regions.region("ap-southeast-2").unwrap();

        let client1 = cache.get_client::<IamClient>("profile:a", &west).unwrap();
        let client2 = cache.get_client::<IamClient>("profile:a", &east).unwrap();

        assert!(Arc::ptr_eq(&client1, &client2));
        assert_eq!(client1.config().region().unwrap().as_ref(), "us-east-1");
    }

    #[cfg(feature = "s3")]
    #[test]
    fn test_s3_uses_path_style_with_endpoint_override() {
        let transport = test_transport().with_endpoint_url("http://localhost:4566");
        let region = cloudscope_core::Region::new("us-east-1", "US East (N. Virginia)", "aws");
        let config = transport.client_config(&region, StaticCredentialProvider::arc("profile:a"));

        let client = aws_sdk_s3::Client::from_sdk_config(&config);

        assert_eq!(client.config().force_path_style(), Some(true));
    }
}
