use serde_json::{json, Value};
use thiserror::Error;

use crate::schema::ValidationError;

/// Boxed error type returned by hooks and services.
///
/// The pipeline downcasts it to [`ServiceError`] to decide whether the
/// failure carries a user-facing status code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Request-level failures with a fixed status code.
///
/// Each variant carries a user-visible message and opaque `data` that is
/// returned verbatim as the `details` of the error response.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("{message}")]
    BadRequest { message: String, data: Value },

    #[error("{message}")]
    NotFound { message: String, data: Value },

    #[error("{message}")]
    MethodNotAllowed { message: String, data: Value },

    #[error("{message}")]
    Conflict { message: String, data: Value },

    #[error("{message}")]
    InternalServerError { message: String, data: Value },
}

impl ServiceError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::MethodNotAllowed {
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalServerError {
            message: message.into(),
            data: Value::Null,
        }
    }

    /// Attach structured details to the error.
    pub fn with_data(mut self, value: Value) -> Self {
        match &mut self {
            Self::BadRequest { data, .. }
            | Self::NotFound { data, .. }
            | Self::MethodNotAllowed { data, .. }
            | Self::Conflict { data, .. }
            | Self::InternalServerError { data, .. } => *data = value,
        }
        self
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::MethodNotAllowed { .. } => 405,
            Self::Conflict { .. } => 409,
            Self::InternalServerError { .. } => 500,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::NotFound { message, .. }
            | Self::MethodNotAllowed { message, .. }
            | Self::Conflict { message, .. }
            | Self::InternalServerError { message, .. } => message,
        }
    }

    pub fn data(&self) -> &Value {
        match self {
            Self::BadRequest { data, .. }
            | Self::NotFound { data, .. }
            | Self::MethodNotAllowed { data, .. }
            | Self::Conflict { data, .. }
            | Self::InternalServerError { data, .. } => data,
        }
    }
}

/// Schema validation failures surface to clients as a 400 carrying the
/// offending field and the reason.
impl From<ValidationError> for ServiceError {
    fn from(error: ValidationError) -> Self {
        ServiceError::bad_request(error.to_string()).with_data(json!({
            "field": error.field,
            "detail": error.detail,
        }))
    }
}

/// Setup failures hit while serving (e.g. an administrative mount) are
/// internal errors.
impl From<SetupError> for ServiceError {
    fn from(error: SetupError) -> Self {
        ServiceError::internal(error.to_string())
    }
}

/// Fatal errors raised while wiring an [`App`](crate::app::App) together.
///
/// These never become HTTP responses; the process is expected to abort
/// startup when one is returned.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Hook '{0}' is already registered")]
    DuplicateHook(String),

    #[error("Hook '{0}' is not registered")]
    HookNotFound(String),

    #[error("Invalid config schema for hook '{id}': {source}")]
    InvalidHookSchema {
        id: String,
        #[source]
        source: ValidationError,
    },

    #[error("Invalid config for hook '{id}': {source}")]
    InvalidHookConfig {
        id: String,
        #[source]
        source: ValidationError,
    },

    #[error("Route '{path}' could not be registered: {reason}")]
    Route { path: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Manifest error: {0}")]
    Manifest(#[from] crate::manifest::ManifestError),

    #[error("Database error: {0}")]
    Database(#[from] crate::database::DatabaseError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for setup operations
pub type SetupResult<T> = Result<T, SetupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ServiceError::bad_request("x").status_code(), 400);
        assert_eq!(ServiceError::not_found("x").status_code(), 404);
        assert_eq!(ServiceError::method_not_allowed("x").status_code(), 405);
        assert_eq!(ServiceError::conflict("x").status_code(), 409);
        assert_eq!(ServiceError::internal("x").status_code(), 500);
    }

    #[test]
    fn test_validation_error_becomes_bad_request() {
        let err: ServiceError = ValidationError::new("address.city", "must be a string").into();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.data()["field"], "address.city");
        assert_eq!(err.data()["detail"], "must be a string");
        assert!(err.message().contains("address.city"));
    }
}
