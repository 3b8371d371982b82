//! Error types for cloudscope
//!
//! Errors are structured: a kind, an optional underlying cause and an
//! actionable help message. The type is `Clone` because a failed fetch is
//! cached and handed to every caller that joined it.

use std::fmt;

/// Result type alias for cloudscope operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for cloudscope operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    /// The kind of error that occurred
    pub kind: ErrorKind,
    /// Actionable help message
    pub help: Option<String>,
    /// Underlying cause (as string for Clone compatibility)
    pub cause: Option<String>,
}

/// Categories of errors that can occur
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A registration convention is missing (programming mistake, never cached)
    Configuration(ConfigurationErrorKind),
    /// A test double was asked for something nobody registered
    NoRegistration { element: String },
    /// A resource fetch failed (network, auth, API errors)
    Fetch { resource_id: String },
    /// No credential provider with this id is known
    CredentialNotFound { id: String },
    /// No region with this id is known
    RegionNotFound { id: String },
    /// Credential or region not selected
    IncompleteSelection,
    /// The selected credential failed validation
    Validation,
    /// The owning cache has been closed
    Disposed { component: String },
    /// A bounded wait elapsed
    Timeout { operation: String },
    /// I/O error (settings file not readable, etc.)
    Io,
    /// Error parsing YAML/JSON
    Parse,
    /// Internal error (bug in cloudscope)
    Internal,
}

/// Which client registration convention is missing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationErrorKind {
    /// No builder (factory) registered for the client type
    MissingBuilder { client_type: String },
    /// Builder registered without a service name
    MissingServiceName { client_type: String },
}

impl Error {
    fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            help: None,
            cause: None,
        }
    }

    /// Create a missing builder error for an unregistered client type
    pub fn missing_builder(client_type: impl Into<String>) -> Self {
        let ty = client_type.into();
        Self::new(ErrorKind::Configuration(
            ConfigurationErrorKind::MissingBuilder {
                client_type: ty.clone(),
            },
        ))
        .with_help(format!(
            "Register a builder for '{}' with ClientRegistry::register before requesting it",
            ty
        ))
    }

    /// Create a missing service name error for a malformed registration
    pub fn missing_service_name(client_type: impl Into<String>) -> Self {
        let ty = client_type.into();
        Self::new(ErrorKind::Configuration(
            ConfigurationErrorKind::MissingServiceName {
                client_type: ty.clone(),
            },
        ))
        .with_help(format!(
            "Register '{}' with a non-empty service name (e.g. \"sts\")",
            ty
        ))
    }

    /// Create a no-registration error raised by test doubles
    pub fn no_registration(element: impl Into<String>) -> Self {
        let el = element.into();
        Self::new(ErrorKind::NoRegistration {
            element: el.clone(),
        })
        .with_help(format!("Register a mock for '{}' in the test setup", el))
    }

    /// Create a resource fetch error
    pub fn fetch(resource_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fetch {
            resource_id: resource_id.into(),
        })
        .with_cause(message)
    }

    /// Create a credential not found error
    pub fn credential_not_found(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(ErrorKind::CredentialNotFound { id: id.clone() }).with_help(format!(
            "Check that the credential '{}' still exists in your configuration",
            id
        ))
    }

    /// Create a region not found error
    pub fn region_not_found(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(ErrorKind::RegionNotFound { id: id.clone() })
            .with_help(format!("'{}' is not a known region id", id))
    }

    /// Create an incomplete selection error
    pub fn incomplete_selection(missing: impl Into<String>) -> Self {
        Self::new(ErrorKind::IncompleteSelection)
            .with_cause(format!("No {} selected", missing.into()))
            .with_help("Select both a credential and a region")
    }

    /// Create a credential validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation).with_cause(message)
    }

    /// Create a disposed error for use after close
    pub fn disposed(component: impl Into<String>) -> Self {
        let c = component.into();
        Self::new(ErrorKind::Disposed {
            component: c.clone(),
        })
        .with_help(format!("The {} is single-use; create a new one", c))
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, after: std::time::Duration) -> Self {
        Self::new(ErrorKind::Timeout {
            operation: operation.into(),
        })
        .with_cause(format!("Gave up after {:?}", after))
    }

    /// Create an I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io).with_cause(message)
    }

    /// Create a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse).with_cause(message)
    }

    /// Create an internal error (bug in cloudscope)
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal)
            .with_cause(message)
            .with_help("This is likely a bug in cloudscope. Please report it.")
    }

    /// Add help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Add cause to the error
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Whether this is a configuration (programming) error
    pub fn is_configuration(&self) -> bool {
        matches!(self.kind, ErrorKind::Configuration(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Main error message
        match &self.kind {
            ErrorKind::Configuration(c) => match c {
                ConfigurationErrorKind::MissingBuilder { client_type } => write!(
                    f,
                    "Configuration error: no builder registered for client type {}",
                    client_type
                )?,
                ConfigurationErrorKind::MissingServiceName { client_type } => write!(
                    f,
                    "Configuration error: no service name registered for client type {}",
                    client_type
                )?,
            },
            ErrorKind::NoRegistration { element } => {
                write!(f, "No registration for {}", element)?
            }
            ErrorKind::Fetch { resource_id } => {
                write!(f, "Failed to fetch resource: {}", resource_id)?
            }
            ErrorKind::CredentialNotFound { id } => write!(f, "Credential not found: {}", id)?,
            ErrorKind::RegionNotFound { id } => write!(f, "Region not found: {}", id)?,
            ErrorKind::IncompleteSelection => write!(f, "Incomplete connection settings")?,
            ErrorKind::Validation => write!(f, "Credential validation failed")?,
            ErrorKind::Disposed { component } => write!(f, "The {} has been closed", component)?,
            ErrorKind::Timeout { operation } => write!(f, "Timed out: {}", operation)?,
            ErrorKind::Io => write!(f, "I/O error")?,
            ErrorKind::Parse => write!(f, "Parse error")?,
            ErrorKind::Internal => write!(f, "Internal error")?,
        }

        // Cause
        if let Some(cause) = &self.cause {
            write!(f, "\n  {}", cause)?;
        }

        // Help
        if let Some(help) = &self.help {
            write!(f, "\n  Help: {}", help)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_builder_names_convention() {
        let err = Error::missing_builder("my_crate::FooClient");
        let display = format!("{}", err);

        assert!(display.contains("no builder registered"));
        assert!(display.contains("my_crate::FooClient"));
        assert!(display.contains("Help:"));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_missing_service_name_names_convention() {
        let err = Error::missing_service_name("FooClient");
        let display = format!("{}", err);

        assert!(display.contains("no service name registered"));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_fetch_error_carries_cause() {
        let err = Error::fetch("sts.caller_identity", "ExpiredToken");
        let display = format!("{}", err);

        assert!(display.contains("Failed to fetch resource: sts.caller_identity"));
        assert!(display.contains("ExpiredToken"));
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_incomplete_selection() {
        let err = Error::incomplete_selection("credential");
        let display = format!("{}", err);

        assert_eq!(err.kind, ErrorKind::IncompleteSelection);
        assert!(display.contains("No credential selected"));
    }

    #[test]
    fn test_timeout_error() {
        let err = Error::timeout("waiting for connection state", std::time::Duration::from_secs(2));
        let display = format!("{}", err);

        assert!(display.contains("Timed out: waiting for connection state"));
        assert!(display.contains("2s"));
    }

    #[test]
    fn test_no_registration_error() {
        let err = Error::no_registration("mock client 'sts'");
        let display = format!("{}", err);

        assert!(display.contains("No registration for mock client 'sts'"));
        assert!(display.contains("Help:"));
    }

    #[test]
    fn test_errors_are_cloneable_for_sharing() {
        let err = Error::validation("AccessDenied");
        let clone = err.clone();
        assert_eq!(err, clone);
    }

    #[test]
    fn test_internal_error() {
        let err = Error::internal("Unexpected state");
        let display = format!("{}", err);

        assert!(display.contains("Internal error"));
        assert!(display.contains("Unexpected state"));
    }
}
