//! Credential adapters between cloudscope and the AWS SDK
//!
//! [`SdkCredentials`] lets SDK clients resolve through a cloudscope
//! [`CredentialProvider`]; [`ProfileCredentialProvider`] resolves a named
//! profile of the shared config files through `aws-config`.

use std::sync::Arc;

use async_trait::async_trait;
use aws_config::profile::profile_file::ProfileFiles;
use aws_config::profile::ProfileFileCredentialsProvider;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::{self, ProvideCredentials};
use aws_sdk_sts::error::DisplayErrorContext;
use cloudscope_core::error::{Error, Result};
use cloudscope_core::{CredentialIdentifier, CredentialProvider, Credentials, Remediation};

const PROVIDER_NAME: &str = "cloudscope";

/// Prefix of a profile that could not be resolved at all
const LOAD_FAILURE: &str = "Could not load credentials for";

/// SDK view of a cloudscope credential provider
#[derive(Debug, Clone)]
pub struct SdkCredentials {
    provider: Arc<dyn CredentialProvider>,
}

impl SdkCredentials {
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self { provider }
    }
}

impl ProvideCredentials for SdkCredentials {
    fn provide_credentials<'a>(&'a self) -> provider::future::ProvideCredentials<'a>
    where
        Self: 'a,
    {
        provider::future::ProvideCredentials::new(async move {
            let resolved = self
                .provider
                .resolve_credentials()
                .await
                .map_err(CredentialsError::provider_error)?;
            Ok(aws_credential_types::Credentials::new(
                resolved.access_key_id,
                resolved.secret_access_key,
                resolved.session_token,
                resolved.expiration,
                PROVIDER_NAME,
            ))
        })
    }
}

/// Credentials of one named profile in the shared config files.
#[derive(Debug)]
pub struct ProfileCredentialProvider {
    identifier: CredentialIdentifier,
    inner: ProfileFileCredentialsProvider,
}

impl ProfileCredentialProvider {
    /// Resolve `profile_name` from `files`, or from the default locations
    pub fn new(
        identifier: CredentialIdentifier,
        profile_name: &str,
        files: Option<ProfileFiles>,
    ) -> Self {
        let mut builder = ProfileFileCredentialsProvider::builder().profile_name(profile_name);
        if let Some(files) = files {
            builder = builder.profile_files(files);
        }
        Self {
            identifier,
            inner: builder.build(),
        }
    }

    fn is_sso(&self) -> bool {
        self.identifier.sso_session.is_some()
    }
}

#[async_trait]
impl CredentialProvider for ProfileCredentialProvider {
    fn identifier(&self) -> &CredentialIdentifier {
        &self.identifier
    }

    async fn resolve_credentials(&self) -> Result<Credentials> {
        let resolved = self.inner.provide_credentials().await.map_err(|e| {
            Error::validation(format!(
                "{} {}: {}",
                LOAD_FAILURE,
                self.identifier.id,
                DisplayErrorContext(&e)
            ))
        })?;

        let mut credentials = Credentials::new(
            resolved.access_key_id(),
            resolved.secret_access_key(),
        );
        if let Some(token) = resolved.session_token() {
            credentials = credentials.with_session_token(token);
        }
        if let Some(expiry) = resolved.expiry() {
            credentials = credentials.with_expiration(expiry);
        }
        Ok(credentials)
    }

    /// SSO profiles recover by signing in again; other profiles only when
    /// the failure names expired or unloadable credentials
    fn remediation(&self, error: &Error) -> Option<Remediation> {
        if self.is_sso() {
            return Some(Remediation::reauthenticate(
                self.identifier.sso_session.clone(),
            ));
        }
        let message = error.to_string();
        if message.contains(LOAD_FAILURE) {
            Some(Remediation::edit_configuration(&self.identifier.id))
        } else if message.contains("ExpiredToken") || message.to_lowercase().contains("expired") {
            Some(Remediation::refresh_credentials(&self.identifier.id))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudscope_core::testing::StaticCredentialProvider;
    use cloudscope_core::RemediationAction;

    #[tokio::test]
    async fn test_sdk_credentials_adapter() {
        let provider = Arc::new(StaticCredentialProvider::new("profile:a"));
        provider.set_outcome(Ok(Credentials::new("AKIDEXAMPLE", "secret").with_session_token("tok")));
        let sdk = SdkCredentials::new(provider);

        let resolved = sdk.provide_credentials().await.unwrap();

        assert_eq!(resolved.access_key_id(), "AKIDEXAMPLE");
        assert_eq!(resolved.session_token(), Some("tok"));
    }

    #[tokio::test]
    async fn test_sdk_credentials_adapter_propagates_failure() {
        let sdk = SdkCredentials::new(Arc::new(
            StaticCredentialProvider::new("profile:a").failing(Error::validation("ExpiredToken")),
        ));

        let err = sdk.provide_credentials().await.unwrap_err();
        assert!(matches!(err, CredentialsError::ProviderError(_)));
    }

    #[test]
    fn test_only_sso_profiles_offer_reauthentication() {
        let plain = ProfileCredentialProvider::new(
            CredentialIdentifier::new("profile:dev", "dev", "profile"),
            "dev",
            None,
        );
        let sso = ProfileCredentialProvider::new(
            CredentialIdentifier::new("profile:corp", "corp", "profile").with_sso_session("corp"),
            "corp",
            None,
        );
        let error = Error::validation("AccessDenied");

        assert_eq!(plain.remediation(&error), None);
        let remediation = sso.remediation(&error).unwrap();
        assert_eq!(
            remediation.action,
            RemediationAction::Reauthenticate {
                sso_session: Some("corp".into())
            }
        );
    }

    #[test]
    fn test_plain_profile_remediation_follows_failure() {
        let plain = ProfileCredentialProvider::new(
            CredentialIdentifier::new("profile:dev", "dev", "profile"),
            "dev",
            None,
        );

        let expired = plain
            .remediation(&Error::fetch("sts.caller_identity", "ExpiredToken: The security token included in the request is expired"))
            .unwrap();
        assert_eq!(expired.action, RemediationAction::RefreshCredentials);

        let unloadable = plain
            .remediation(&Error::validation(format!(
                "{} profile:dev: profile `dev` not found",
                LOAD_FAILURE
            )))
            .unwrap();
        assert_eq!(unloadable.action, RemediationAction::EditConfiguration);
        assert!(unloadable.message.contains("profile:dev"));
    }
}
