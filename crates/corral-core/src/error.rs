//! Error taxonomy shared by the corral crates

use std::time::Duration;
use thiserror::Error;

/// Result type alias for corral operations
pub type Result<T> = std::result::Result<T, Error>;

/// OAuth metadata attached to an [`AuthRequiredError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthInfo {
    /// Token issuer URL
    pub issuer: String,
    /// Requested scope
    pub scope: String,
}

/// Structured "authentication required" failure.
///
/// This is a distinct error type (not an [`Error`] variant string) so that it
/// can be detected anywhere in a cause chain by [`find_auth_required`],
/// regardless of how many layers wrapped it on the way up.
#[derive(Debug, Error)]
#[error("authentication required for {url}")]
pub struct AuthRequiredError {
    /// Endpoint that rejected the connection
    pub url: String,
    /// OAuth issuer/scope advertised by the endpoint
    pub auth_info: OAuthInfo,
    /// Underlying transport error, if any
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AuthRequiredError {
    /// Create an auth-required error without an underlying cause.
    pub fn new(url: impl Into<String>, issuer: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_info: OAuthInfo {
                issuer: issuer.into(),
                scope: scope.into(),
            },
            source: None,
        }
    }
}

/// Walk an error's cause chain looking for a structured [`AuthRequiredError`].
///
/// Detection is by type, never by message text: a plain error whose message
/// happens to say "authentication required" does not match.
pub fn find_auth_required<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a AuthRequiredError> {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(auth) = e.downcast_ref::<AuthRequiredError>() {
            return Some(auth);
        }
        current = e.source();
    }
    None
}

/// Corral error kinds.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request (empty name, missing class, invalid args)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown service, instance, or ServiceClass
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate name in the registry or instance map
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A required collaborator is not registered, or a ServiceClass is
    /// missing its tools
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The tool caller returned an error or the response indicated failure
    #[error("{0}")]
    ToolExecution(String),

    /// An argument template could not be rendered, or rendered to a non-map
    #[error("template error: {0}")]
    Template(String),

    /// Authentication required; carries structured OAuth info in the chain
    #[error("{0}")]
    AuthRequired(#[from] AuthRequiredError),

    /// Certificate/TLS problem; fails fast with no backoff progression
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A remote service crossed the consecutive-failure threshold
    #[error("service unreachable: {0}")]
    Unreachable(String),

    /// An operation exceeded its deadline
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Uncategorized error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an invalid-argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a not-found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create an already-exists error
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::AlreadyExists(message.into())
    }

    /// Create an unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Create a tool-execution error
    pub fn tool_execution(message: impl Into<String>) -> Self {
        Self::ToolExecution(message.into())
    }

    /// Create a template error
    pub fn template(message: impl Into<String>) -> Self {
        Self::Template(message.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an unreachable error
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable(message.into())
    }

    /// Create an uncategorized error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Whether this error is a not-found kind
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Whether a structured auth-required error sits anywhere in this
    /// error's cause chain
    pub fn is_auth_required(&self) -> bool {
        find_auth_required(self).is_some()
    }
}
