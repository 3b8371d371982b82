//! Shared AWS transport
//!
//! One base `SdkConfig` (HTTP client, retry and timeout settings) is loaded
//! once. Every client is built from a copy of it with its own region and
//! credentials, so all clients share the same connection pool.

use std::sync::Arc;
use std::time::Duration;

use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_credential_types::provider::SharedCredentialsProvider;
use cloudscope_core::{CredentialProvider, Region, Transport};

use crate::credentials::SdkCredentials;

const MAX_ATTEMPTS: u32 = 3;
const OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// The base SDK configuration every client is derived from.
#[derive(Debug, Clone)]
pub struct AwsTransport {
    base: SdkConfig,
    endpoint_url: Option<String>,
}

impl AwsTransport {
    /// Load the base configuration from the environment.
    ///
    /// Credentials are never taken from the environment here; each client
    /// gets the provider of its own credential.
    pub async fn load() -> Self {
        let base = aws_config::defaults(BehaviorVersion::latest())
            .no_credentials()
            .retry_config(RetryConfig::standard().with_max_attempts(MAX_ATTEMPTS))
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(OPERATION_TIMEOUT)
                    .build(),
            )
            .load()
            .await;
        Self::from_sdk_config(base)
    }

    pub fn from_sdk_config(base: SdkConfig) -> Self {
        Self {
            base,
            endpoint_url: None,
        }
    }

    /// Send every request to `url` (LocalStack, moto)
    pub fn with_endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    pub fn endpoint_url(&self) -> Option<&str> {
        self.endpoint_url.as_deref()
    }

    /// SDK configuration for one client
    pub fn client_config(&self, region: &Region, credentials: Arc<dyn CredentialProvider>) -> SdkConfig {
        let mut builder = self
            .base
            .to_builder()
            .region(aws_config::Region::new(region.id.clone()))
            .credentials_provider(SharedCredentialsProvider::new(SdkCredentials::new(
                credentials,
            )));
        if let Some(url) = &self.endpoint_url {
            builder = builder.endpoint_url(url.clone());
        }
        builder.build()
    }
}

impl Transport for AwsTransport {
    fn shutdown(&self) {
        // The HTTP client is released with the last client holding it
        log::debug!("Releasing shared AWS transport");
    }
}

#[cfg(test)]
pub(crate) fn test_transport() -> AwsTransport {
    AwsTransport::from_sdk_config(
        SdkConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudscope_core::testing::StaticCredentialProvider;

    #[test]
    fn test_client_config_sets_region_and_credentials() {
        let transport = test_transport();
        let region = Region::new("eu-west-1", "Europe (Ireland)", "aws");

        let config = transport.client_config(&region, StaticCredentialProvider::arc("profile:a"));

        assert_eq!(config.region().unwrap().as_ref(), "eu-west-1");
        assert!(config.credentials_provider().is_some());
        assert_eq!(config.endpoint_url(), None);
    }

    #[test]
    fn test_endpoint_override() {
        let transport = test_transport().with_endpoint_url("http://localhost:4566");
        let region = Region::new("us-east-1", "US East (N. Virginia)", "aws");

        let config = transport.client_config(&region, StaticCredentialProvider::arc("profile:a"));

        assert_eq!(config.endpoint_url(), Some("http://localhost:4566"));
    }
}
