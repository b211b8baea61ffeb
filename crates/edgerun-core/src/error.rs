//! Error types module
//!
//! This module provides the core error type used throughout the edgerun
//! runtime. All errors are unified under the `AppError` enum so the HTTP
//! layer, the stores, and the sandbox executor can share one taxonomy.

use sqlx::Error as SqlxError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented.
/// This trait lets errors self-describe their HTTP response characteristics.
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "NOT_FOUND")
    fn error_code(&self) -> &'static str;

    /// Whether this error feeds the scheduler's retry logic
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the client
    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message (may differ from the internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden in production
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Name conflict: {0}")]
    NameConflict(String),

    #[error("Handler timed out after {0}ms")]
    Timeout(u64),

    #[error("Handler error: {0}")]
    HandlerError(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl From<SqlxError> for AppError {
    fn from(e: SqlxError) -> Self {
        match e {
            SqlxError::RowNotFound => AppError::NotFound("row not found".to_string()),
            other => AppError::Database(other),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: e.to_string(),
            source: e,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("invalid JSON: {e}"))
    }
}

impl AppError {
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Database(_) => "Database",
            AppError::NotFound(_) => "NotFound",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::NameConflict(_) => "NameConflict",
            AppError::Timeout(_) => "Timeout",
            AppError::HandlerError(_) => "HandlerError",
            AppError::Internal(_) => "Internal",
            AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// Walks this error's message plus source chain into one string, for logs.
    pub fn detailed_message(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        let mut depth = 0;
        while let Some(s) = source {
            out.push_str(&format!(" <- {s}"));
            source = s.source();
            depth += 1;
            if depth >= 5 {
                break;
            }
        }
        out
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        match self {
            AppError::Database(_) => 500,
            AppError::NotFound(_) => 404,
            AppError::InvalidInput(_) => 400,
            AppError::NameConflict(_) => 409,
            AppError::Timeout(_) => 504,
            AppError::HandlerError(_) => 500,
            AppError::Internal(_) => 500,
            AppError::InternalWithSource { .. } => 500,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidInput(_) => "INVALID_INPUT",
            AppError::NameConflict(_) => "NAME_CONFLICT",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::HandlerError(_) => "HANDLER_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::InternalWithSource { .. } => "INTERNAL_ERROR",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            AppError::Database(_) => true,
            AppError::NotFound(_) => false,
            AppError::InvalidInput(_) => false,
            AppError::NameConflict(_) => false,
            AppError::Timeout(_) => true,
            AppError::HandlerError(_) => true,
            AppError::Internal(_) => true,
            AppError::InternalWithSource { .. } => true,
        }
    }

    fn suggested_action(&self) -> Option<&'static str> {
        match self {
            AppError::Database(_) => Some("Retry after a short delay"),
            AppError::NotFound(_) => Some("Verify the resource id exists"),
            AppError::InvalidInput(_) => Some("Check request parameters and try again"),
            AppError::NameConflict(_) => Some("Choose a different name"),
            AppError::Timeout(_) => Some("The job will be retried if retries remain"),
            AppError::HandlerError(_) => Some("The job will be retried if retries remain"),
            AppError::Internal(_) => Some("Retry after a short delay"),
            AppError::InternalWithSource { .. } => Some("Retry after a short delay"),
        }
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Database(_) => "Failed to access the database".to_string(),
            AppError::NotFound(ref msg) => msg.clone(),
            AppError::InvalidInput(ref msg) => msg.clone(),
            AppError::NameConflict(ref msg) => msg.clone(),
            AppError::Timeout(ms) => format!("Handler timed out after {ms}ms"),
            AppError::HandlerError(ref msg) => msg.clone(),
            AppError::Internal(_) => "Internal server error".to_string(),
            AppError::InternalWithSource { .. } => "Internal server error".to_string(),
        }
    }

    fn is_sensitive(&self) -> bool {
        match self {
            AppError::Database(_) => true,
            AppError::Internal(_) => true,
            AppError::InternalWithSource { .. } => true,
            _ => false,
        }
    }

    fn log_level(&self) -> LogLevel {
        match self {
            AppError::Database(_) => LogLevel::Error,
            AppError::NotFound(_) => LogLevel::Debug,
            AppError::InvalidInput(_) => LogLevel::Debug,
            AppError::NameConflict(_) => LogLevel::Debug,
            AppError::Timeout(_) => LogLevel::Warn,
            AppError::HandlerError(_) => LogLevel::Warn,
            AppError::Internal(_) => LogLevel::Error,
            AppError::InternalWithSource { .. } => LogLevel::Error,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404_and_is_not_recoverable() {
        let err = AppError::NotFound("task missing".to_string());
        assert_eq!(err.http_status_code(), 404);
        assert!(!err.is_recoverable());
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[test]
    fn handler_error_is_recoverable_for_retry() {
        let err = AppError::HandlerError("boom".to_string());
        assert!(err.is_recoverable());
        assert_eq!(err.http_status_code(), 500);
    }

    #[test]
    fn name_conflict_maps_to_409() {
        let err = AppError::NameConflict("task_hello_1 exists".to_string());
        assert_eq!(err.http_status_code(), 409);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn sqlx_row_not_found_becomes_not_found() {
        let err: AppError = SqlxError::RowNotFound.into();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn database_errors_are_sensitive() {
        assert!(AppError::Database(SqlxError::RowNotFound).is_sensitive());
        assert!(!AppError::InvalidInput("x".to_string()).is_sensitive());
    }
}
