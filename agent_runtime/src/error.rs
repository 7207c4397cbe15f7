//! Error types for the agent runtime.

use serde::Serialize;
use thiserror::Error;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Broad error category, used to pick HTTP status codes and stream payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Construction-time failure; fatal to the instance being built
    Configuration,
    /// Name collision while registering a plugin
    Registry,
    /// Unknown plugin, function or catalog entry
    NotFound,
    /// Document fetch or remote call failed
    Transport,
    /// Malformed document or response body
    Parse,
    /// A function or completion call was rejected or failed
    Invocation,
    /// The caller cancelled or the deadline elapsed
    Cancelled,
}

/// Errors that can occur in the agent runtime
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid agent, task or service configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A plugin with the same name is already registered
    #[error("plugin already registered: {0}")]
    DuplicatePlugin(String),

    /// Two functions resolve to the same `plugin.function` key
    #[error("function already registered: {0}")]
    DuplicateFunction(String),

    /// Plugin not registered in the kernel
    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    /// Function not registered in the kernel
    #[error("function not found: {0}")]
    FunctionNotFound(String),

    /// Remote plugin not declared in the catalog
    #[error("plugin {0} not found in catalog")]
    PluginNotFoundInCatalog(String),

    /// Local plugin name has no registered factory
    #[error("local plugin not found: {0}")]
    LocalPluginNotFound(String),

    /// OpenAPI document could not be fetched
    #[error("failed to fetch OpenAPI document {source_ref}: {reason}")]
    DocumentFetch { source_ref: String, reason: String },

    /// OpenAPI document could not be parsed
    #[error("failed to parse OpenAPI document {source_ref}: {reason}")]
    DocumentParse { source_ref: String, reason: String },

    /// Neither the catalog nor the document declares a server URL
    #[error("no server URL resolved for function {0}")]
    UnresolvedServerUrl(String),

    /// Argument missing or not representable as the declared type
    #[error("invalid argument for {function}: {reason}")]
    InvalidArgument { function: String, reason: String },

    /// Remote service answered with a non-2xx status
    #[error("HTTP request failed with status {status}")]
    Http { status: u16, body: String },

    /// Remote service could not be reached
    #[error("transport error: {0}")]
    Transport(String),

    /// Remote service returned a body that is not JSON
    #[error("invalid response body: {0}")]
    InvalidResponseBody(String),

    /// Completion client failure
    #[error("completion error: {0}")]
    Completion(String),

    /// The call was cancelled before it finished
    #[error("operation cancelled")]
    Cancelled,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Category of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) | Self::Yaml(_) => ErrorKind::Configuration,
            Self::DuplicatePlugin(_) | Self::DuplicateFunction(_) => ErrorKind::Registry,
            Self::PluginNotFound(_)
            | Self::FunctionNotFound(_)
            | Self::PluginNotFoundInCatalog(_)
            | Self::LocalPluginNotFound(_) => ErrorKind::NotFound,
            Self::DocumentFetch { .. }
            | Self::Http { .. }
            | Self::Transport(_)
            | Self::UnresolvedServerUrl(_)
            | Self::Io(_) => ErrorKind::Transport,
            Self::DocumentParse { .. } | Self::InvalidResponseBody(_) | Self::Json(_) => {
                ErrorKind::Parse
            }
            Self::InvalidArgument { .. } | Self::Completion(_) => ErrorKind::Invocation,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub(crate) fn invalid_argument(function: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            function: function.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
                body: String::new(),
            }
        } else {
            Self::Transport(err.to_string())
        }
    }
}
