//! SSM Parameter Store
//!
//! `parameter(name)` fetches one parameter with decryption.
//!
//! ## Parameter Types
//!
//! - **String**: Returned as-is
//! - **SecureString**: Returned decrypted, flagged as sensitive
//! - **StringList**: Split on commas

use std::fmt;

use aws_sdk_ssm::types::ParameterType;
use cloudscope_core::error::{Error, Result};
use cloudscope_core::Resource;

use crate::clients::SsmClient;
use crate::fetch_error;

const MAX_NAME_LENGTH: usize = 2048;

/// A fetched parameter
#[derive(Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub value: ParameterValue,
    pub version: i64,
}

#[derive(Clone, PartialEq, Eq)]
pub enum ParameterValue {
    String(String),
    /// Decrypted `SecureString`; `Debug` and `Display` redact it
    Secure(String),
    List(Vec<String>),
}

impl ParameterValue {
    fn from_parts(value: &str, parameter_type: Option<&ParameterType>) -> Self {
        match parameter_type {
            Some(ParameterType::SecureString) => ParameterValue::Secure(value.to_string()),
            Some(ParameterType::StringList) => {
                ParameterValue::List(value.split(',').map(str::to_string).collect())
            }
            _ => ParameterValue::String(value.to_string()),
        }
    }

    pub fn is_sensitive(&self) -> bool {
        matches!(self, ParameterValue::Secure(_))
    }

    /// The raw value, lists joined with commas
    pub fn expose(&self) -> String {
        match self {
            ParameterValue::String(s) | ParameterValue::Secure(s) => s.clone(),
            ParameterValue::List(items) => items.join(","),
        }
    }
}

impl fmt::Debug for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::String(s) => f.debug_tuple("String").field(s).finish(),
            ParameterValue::Secure(_) => f.debug_tuple("Secure").field(&"<redacted>").finish(),
            ParameterValue::List(items) => f.debug_tuple("List").field(items).finish(),
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Secure(_) => write!(f, "********"),
            other => write!(f, "{}", other.expose()),
        }
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.name)
            .field("value", &self.value)
            .field("version", &self.version)
            .finish()
    }
}

/// Check a parameter name before it reaches the API.
///
/// Hierarchical names must start with `/`.
pub fn validate_parameter_name(name: &str) -> Result<()> {
    let invalid = |message: String| Error::fetch(resource_id(name), message);
    if name.trim().is_empty() {
        return Err(invalid("SSM parameter name is empty".to_string()));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(invalid(format!(
            "SSM parameter name is longer than {} characters",
            MAX_NAME_LENGTH
        )));
    }
    if name.contains('/') && !name.starts_with('/') {
        return Err(
            invalid(format!("SSM parameter path must start with /: {}", name))
                .with_help(format!("Did you mean '/{}'?", name)),
        );
    }
    Ok(())
}

fn resource_id(name: &str) -> String {
    format!("ssm.parameter:{}", name)
}

/// One parameter, decrypted
pub fn parameter(name: impl Into<String>) -> Resource<Parameter> {
    let name = name.into();
    let id = resource_id(&name);
    Resource::cached(id.clone(), move |ctx| {
        let name = name.clone();
        let id = id.clone();
        async move {
            validate_parameter_name(&name)?;
            let client = ctx.client::<SsmClient>()?;
            let response = client
                .get_parameter()
                .name(&name)
                .with_decryption(true)
                .send()
                .await
                .map_err(|e| fetch_error(&id, e))?;

            let parameter = response
                .parameter()
                .ok_or_else(|| Error::fetch(&id, format!("SSM parameter '{}' not found", name)))?;
            let value = parameter
                .value()
                .ok_or_else(|| Error::fetch(&id, format!("SSM parameter '{}' has no value", name)))?;

            Ok(Parameter {
                name: parameter.name().unwrap_or(name.as_str()).to_string(),
                value: ParameterValue::from_parts(value, parameter.r#type()),
                version: parameter.version(),
            })
        }
    })
}

/// Just the value of `parameter(name)`
pub fn parameter_value(name: impl Into<String>) -> Resource<ParameterValue> {
    parameter(name).map(|p| p.value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudscope_core::testing::{test_identity_resource, MockClients, StaticCredentialProvider};
    use cloudscope_core::events::ChangeBus;
    use cloudscope_core::{
        ConnectionSettings, CredentialManager, CredentialProvider, ErrorKind, Region,
        ResourceCache, ResourceCacheOptions,
    };
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn test_parameter_types() {
        assert_eq!(
            ParameterValue::from_parts("a,b,c", Some(&ParameterType::StringList)),
            ParameterValue::List(vec!["a".into(), "b".into(), "c".into()])
        );
        assert_eq!(
            ParameterValue::from_parts("a,b", None),
            ParameterValue::String("a,b".into())
        );
        let secure = ParameterValue::from_parts("hunter2", Some(&ParameterType::SecureString));
        assert!(secure.is_sensitive());
        assert_eq!(secure.expose(), "hunter2");
        assert_eq!(secure.to_string(), "********");
        assert!(!format!("{:?}", secure).contains("hunter2"));
    }

    #[test]
    fn test_validate_parameter_name() {
        assert!(validate_parameter_name("/app/prod/db-host").is_ok());
        assert!(validate_parameter_name("plain-name").is_ok());

        let err = validate_parameter_name("app/prod").unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::Fetch {
                resource_id: "ssm.parameter:app/prod".into()
            }
        );
        assert_eq!(err.help.as_deref(), Some("Did you mean '/app/prod'?"));

        assert!(validate_parameter_name("  ").is_err());
        assert!(validate_parameter_name(&"x".repeat(MAX_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_each_name_is_its_own_resource() {
        assert_eq!(parameter("/a").cached_id(), "ssm.parameter:/a");
        assert_ne!(parameter("/a").cached_id(), parameter("/b").cached_id());
        assert_eq!(parameter_value("/a").cached_id(), "ssm.parameter:/a");
    }

    #[tokio::test]
    async fn test_invalid_name_fails_before_any_client_lookup() {
        let credentials = Arc::new(CredentialManager::new(Arc::new(ChangeBus::new())));
        let provider = StaticCredentialProvider::arc("profile:a");
        let identifier = provider.identifier().clone();
        credentials.add(provider);
        let cache = ResourceCache::new(
            Arc::new(MockClients::new()),
            credentials,
            tokio::runtime::Handle::current(),
            ResourceCacheOptions::default(),
        );
        let settings = ConnectionSettings::new(
            identifier,
            Region::new("us-east-1", "US East (N. Virginia)", "aws"),
        );
        // The identity resource needs no client
        assert!(cache.get(&test_identity_resource(), &settings).await.is_ok());

        let err = cache.get(&parameter("app/prod"), &settings).await.unwrap_err();
        assert!(err.to_string().contains("must start with /"));

        // A valid name reaches the client lookup, which the mocks don't have
        let err = cache.get(&parameter("/app/prod"), &settings).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::NoRegistration { .. }));
    }
}
