//! Unified error handling for the GraphQL pipeline
//!
//! Every failure the pipeline can observe is one of these variants. Only
//! `MalformedInput` and `AmbientState` abort a request; everything else is
//! scoped to a single operation and serialized into its `errors` array.

use std::fmt;

use serde_json::{json, Value as JsonValue};

/// Well-known message for an APQ miss, part of the client contract.
pub const PERSISTED_QUERY_NOT_FOUND: &str = "PersistedQueryNotFound";

/// Error types for the request pipeline
#[derive(Debug)]
pub enum PipelineError {
    /// Unparsable body or batch shape
    MalformedInput(String),

    /// APQ hash that no store could resolve; carries the hash
    PersistedQueryNotFound(String),

    /// Variables present but undecodable
    InvalidVariables(String),

    /// Engine-level failure, wrapped and never re-thrown
    Execution(String),

    /// Persisted query backing store failure
    StoreUnavailable(String),

    /// Deadline elapsed before the work finished
    Timeout(String),

    /// Caller cancelled the request
    Cancelled(String),

    /// Ambient state could not be captured
    AmbientState(String),

    /// Configuration-related errors
    Configuration(String),

    /// Plugin construction errors
    Plugin(String),

    /// Internal system errors
    Internal(String),

    /// I/O errors
    Io(std::io::Error),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::MalformedInput(msg) => write!(f, "Malformed input: {msg}"),
            PipelineError::PersistedQueryNotFound(id) => {
                write!(f, "{PERSISTED_QUERY_NOT_FOUND}: {id}")
            }
            PipelineError::InvalidVariables(msg) => write!(f, "Invalid variables: {msg}"),
            PipelineError::Execution(msg) => write!(f, "Execution error: {msg}"),
            PipelineError::StoreUnavailable(msg) => write!(f, "Store unavailable: {msg}"),
            PipelineError::Timeout(msg) => write!(f, "Timed out: {msg}"),
            PipelineError::Cancelled(msg) => write!(f, "Cancelled: {msg}"),
            PipelineError::AmbientState(msg) => write!(f, "Ambient state error: {msg}"),
            PipelineError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            PipelineError::Plugin(msg) => write!(f, "Plugin error: {msg}"),
            PipelineError::Internal(msg) => write!(f, "Internal error: {msg}"),
            PipelineError::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err)
    }
}

impl PipelineError {
    /// Machine-readable code placed in `extensions.code`
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::MalformedInput(_) | PipelineError::InvalidVariables(_) => "BAD_REQUEST",
            PipelineError::PersistedQueryNotFound(_) => "PERSISTED_QUERY_NOT_FOUND",
            PipelineError::Timeout(_) => "TIMEOUT",
            PipelineError::Cancelled(_) => "CANCELLED",
            PipelineError::StoreUnavailable(_) => "SERVICE_UNAVAILABLE",
            _ => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Whether this error aborts the whole request rather than one operation
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::MalformedInput(_) | PipelineError::AmbientState(_)
        )
    }

    /// Render as a GraphQL error object.
    ///
    /// Client-facing variants expose their message. Internal variants are
    /// masked unless `debug` is set, in which case the detail travels in
    /// `extensions.debugMessage`.
    pub fn to_graphql_error(&self, debug: bool) -> JsonValue {
        let message = match self {
            PipelineError::MalformedInput(msg) | PipelineError::InvalidVariables(msg) => msg.clone(),
            PipelineError::PersistedQueryNotFound(_) => PERSISTED_QUERY_NOT_FOUND.to_string(),
            PipelineError::Timeout(what) => format!("Timed out while {what}"),
            PipelineError::Cancelled(what) => format!("Request cancelled while {what}"),
            _ => "Internal server error".to_string(),
        };

        let mut extensions = json!({ "code": self.code() });
        if debug && self.code() == "INTERNAL_SERVER_ERROR" {
            extensions["debugMessage"] = JsonValue::String(self.to_string());
        }

        json!({ "message": message, "extensions": extensions })
    }
}

/// Result type alias for pipeline operations
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> PipelineResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> PipelineResult<T> {
        self.map_err(|e| PipelineError::Internal(format!("{context}: {e}")))
    }
}

/// Convenience macros for error creation
#[macro_export]
macro_rules! config_error {
    ($msg:literal $(,)?) => {
        $crate::core::error::PipelineError::Configuration(format!($msg))
    };
    ($msg:expr $(,)?) => {
        $crate::core::error::PipelineError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::PipelineError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! internal_error {
    ($msg:literal $(,)?) => {
        $crate::core::error::PipelineError::Internal(format!($msg))
    };
    ($msg:expr $(,)?) => {
        $crate::core::error::PipelineError::Internal($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::PipelineError::Internal(format!($fmt, $($arg)*))
    };
}
