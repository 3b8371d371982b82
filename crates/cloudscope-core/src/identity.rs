//! Credential and region identity
//!
//! Value types naming a credential profile and a region. Their ids are the
//! stable string components of every cache key.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Stable handle naming a way to authenticate, independent of region.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialIdentifier {
    /// Stable id, e.g. `profile:default`
    pub id: String,
    /// Human readable name
    pub display_name: String,
    /// Id of the factory that discovered this credential
    pub factory_id: String,
    /// Region to select when this credential is picked and none is given
    pub default_region_id: Option<String>,
    /// SSO session this credential authenticates through, if any
    pub sso_session: Option<String>,
}

impl CredentialIdentifier {
    /// Create an identifier with no default region or SSO session
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        factory_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            factory_id: factory_id.into(),
            default_region_id: None,
            sso_session: None,
        }
    }

    /// Set the default region id
    pub fn with_default_region(mut self, region_id: impl Into<String>) -> Self {
        self.default_region_id = Some(region_id.into());
        self
    }

    /// Set the SSO session name
    pub fn with_sso_session(mut self, session: impl Into<String>) -> Self {
        self.sso_session = Some(session.into());
        self
    }
}

impl fmt::Display for CredentialIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name)
    }
}

/// A partition groups regions (e.g. `aws`, `aws-cn`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Partition {
    pub id: String,
    pub display_name: String,
    /// Region that serves the partition's global services
    pub global_region_id: String,
}

impl Partition {
    /// Region id placeholder shared by all clients of a global service
    pub fn placeholder_region_id(&self) -> String {
        format!("{}-global", self.id)
    }
}

/// A named deployment locality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub display_name: String,
    pub partition_id: String,
}

impl Region {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        partition_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            partition_id: partition_id.into(),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}

/// The credential + region pair a cached resource is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionSettings {
    pub credential: CredentialIdentifier,
    pub region: Region,
}

impl ConnectionSettings {
    pub fn new(credential: CredentialIdentifier, region: Region) -> Self {
        Self { credential, region }
    }
}

/// Resolved secret material for a credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expiration: Option<SystemTime>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            expiration: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn with_expiration(mut self, expiration: SystemTime) -> Self {
        self.expiration = Some(expiration);
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Who the active credential authenticates as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub account_id: String,
    pub arn: String,
    pub user_id: String,
}

/// Identifies exactly one cached client instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub service: String,
    /// Region id, or the partition placeholder for global services
    pub region_id: String,
    pub credential_id: String,
}

/// Identifies exactly one cached resource entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub resource_id: String,
    pub region_id: String,
    pub credential_id: String,
}

impl CacheKey {
    pub fn new(resource_id: impl Into<String>, settings: &ConnectionSettings) -> Self {
        Self {
            resource_id: resource_id.into(),
            region_id: settings.region.id.clone(),
            credential_id: settings.credential.id.clone(),
        }
    }

    /// Whether this key belongs to the given credential/region pair
    pub fn is_scoped_to(&self, settings: &ConnectionSettings) -> bool {
        self.region_id == settings.region.id && self.credential_id == settings.credential.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacts_secrets() {
        let creds = Credentials::new("AKIDEXAMPLE", "very-secret").with_session_token("token");
        let debug = format!("{:?}", creds);

        assert!(debug.contains("AKIDEXAMPLE"));
        assert!(!debug.contains("very-secret"));
        assert!(!debug.contains("\"token\""));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_cache_key_scope() {
        let settings = ConnectionSettings::new(
            CredentialIdentifier::new("profile:dev", "dev", "profile"),
            Region::new("us-west-2", "US West (Oregon)", "aws"),
        );
        let key = CacheKey::new("s3.buckets", &settings);

        assert!(key.is_scoped_to(&settings));

        let other = ConnectionSettings::new(
            settings.credential.clone(),
            Region::new("us-east-1", "US East (N. Virginia)", "aws"),
        );
        assert!(!key.is_scoped_to(&other));
    }

    #[test]
    fn test_partition_placeholder() {
        let partition = Partition {
            id: "aws-cn".into(),
            display_name: "AWS China".into(),
            global_region_id: "cn-north-1".into(),
        };
        assert_eq!(partition.placeholder_region_id(), "aws-cn-global");
    }

    #[test]
    fn test_display() {
        let cred = CredentialIdentifier::new("profile:dev", "dev", "profile");
        let region = Region::new("eu-west-1", "Europe (Ireland)", "aws");

        assert_eq!(cred.to_string(), "dev");
        assert_eq!(region.to_string(), "Europe (Ireland) (eu-west-1)");
    }
}
