//! AWS bindings for cloudscope
//!
//! This crate plugs AWS into the provider-agnostic core: SDK clients in the
//! client cache, named profiles as credentials, the partition table, and a
//! few ready-made resources.
//!
//! ## Resources
//!
//! | Resource                       | Service        | Feature |
//! |--------------------------------|----------------|---------|
//! | `sts::caller_identity()`       | STS            | always  |
//! | `iam::account_aliases()`       | IAM (global)   | `iam`   |
//! | `ssm::parameter(name)`         | SSM            | `ssm`   |
//! | `cfn::stack_outputs(stack)`    | CloudFormation | `cfn`   |
//! | `s3::buckets()`                | S3             | `s3`    |
//!
//! ## Example
//!
//! ```rust,ignore
//! let session = cloudscope_aws::new_session(Settings::default(), Handle::current()).await?;
//! let watcher = cloudscope_aws::profile_watcher(&session, ProfileFileLocations::from_env());
//! watcher.reload()?;
//! let profile = session.credentials().get("profile:default")?;
//! session.connection().change_credential_provider(Some(profile.identifier().clone()));
//! let identity = session.get(&cloudscope_aws::sts::caller_identity()).await?;
//! ```

use aws_sdk_sts::error::DisplayErrorContext;
use cloudscope_core::error::{Error, Result};
use cloudscope_core::{Session, Settings};
use tokio::runtime::Handle;

pub mod clients;
pub mod credentials;
pub mod profiles;
pub mod regions;
pub mod sts;
pub mod transport;

#[cfg(feature = "iam")]
pub mod iam;

#[cfg(feature = "ssm")]
pub mod ssm;

#[cfg(feature = "cfn")]
pub mod cfn;

#[cfg(feature = "s3")]
pub mod s3;

pub use clients::{default_registry, register_clients, AwsClient, SdkClient};
pub use credentials::{ProfileCredentialProvider, SdkCredentials};
pub use profiles::{Profile, ProfileChanges, ProfileFileLocations, ProfileWatcher};
pub use regions::{embedded_metadata, region_metadata};
pub use transport::AwsTransport;

/// A session wired with every enabled AWS client, validating with STS
pub async fn new_session(settings: Settings, runtime: Handle) -> Result<Session<AwsTransport>> {
    let transport = AwsTransport::load().await;
    session_with_transport(settings, transport, runtime)
}

/// Like [`new_session`], with a caller-built transport
pub fn session_with_transport(
    settings: Settings,
    transport: AwsTransport,
    runtime: Handle,
) -> Result<Session<AwsTransport>> {
    let metadata = region_metadata(&settings)?;
    Session::new(
        settings,
        metadata,
        default_registry(),
        transport,
        sts::caller_identity(),
        runtime,
    )
}

/// A watcher feeding the session's credential manager from profile files
pub fn profile_watcher(
    session: &Session<AwsTransport>,
    locations: ProfileFileLocations,
) -> ProfileWatcher {
    ProfileWatcher::new(session.credentials().clone(), locations)
}

/// Fetch error for an SDK failure, with the full error chain
pub(crate) fn fetch_error<E>(resource_id: &str, error: E) -> Error
where
    E: std::error::Error + 'static,
{
    Error::fetch(resource_id, DisplayErrorContext(&error).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_transport;
    use cloudscope_core::{ConnectionState, ErrorKind};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn test_fetch_error_keeps_source_chain() {
        let source = std::io::Error::new(std::io::ErrorKind::Other, "connection reset");
        let err = fetch_error("s3.buckets", source);

        assert_eq!(
            err.kind,
            ErrorKind::Fetch {
                resource_id: "s3.buckets".into()
            }
        );
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_session_wiring() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config");
        std::fs::write(&config, "[profile dev]\nregion = eu-west-1\n").unwrap();

        let session =
            session_with_transport(Settings::default(), test_transport(), Handle::current())
                .unwrap();
        let watcher = profile_watcher(
            &session,
            ProfileFileLocations {
                config,
                credentials: dir.path().join("credentials"),
            },
        );

        assert_eq!(watcher.reload().unwrap().added, vec!["profile:dev"]);
        assert!(session.credentials().contains("profile:dev"));
        let default_region = session.regions().default_region().unwrap();
        assert_eq!(default_region.id, "us-east-1");

        // Only a region selected: nothing to validate against
        session.connection().change_region(Some(default_region));
        let state = session
            .connection()
            .wait_until_stable(Duration::from_secs(5))
            .await
            .unwrap();
        assert!(matches!(state, ConnectionState::InvalidConnection { .. }));
    }

    #[test]
    fn test_unknown_default_region_is_rejected() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let settings = Settings {
            default_region: Some("mars-north-1".into()),
            ..Default::default()
        };

        let err = session_with_transport(settings, test_transport(), runtime.handle().clone())
            .err()
            .unwrap();
        assert_eq!(
            err.kind,
            ErrorKind::RegionNotFound {
                id: "mars-north-1".into()
            }
        );
    }
}
