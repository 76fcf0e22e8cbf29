use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Application-specific error types.
///
/// Expected "no match" business outcomes (no eligible partner, nothing to
/// bill) are *not* modeled here where a structured result exists
/// (`AssignResult`); the variants below are the failures a caller must be
/// able to distinguish from success.
#[derive(Debug)]
pub enum AppError {
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// Referenced lead/partner/assignment missing.
    NotFound(String),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// Invoice generation found nothing to bill for the given period.
    /// Surfaced so callers can tell "nothing owed" from a system failure.
    NoLeadsToInvoice,
    /// Partner already has an assignment on this lead; the existing one
    /// is preserved.
    DuplicateAssignment(String),
    /// Error interacting with an external collaborator (notifications).
    ExternalApiError(String),
    /// Internal server error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NoLeadsToInvoice => write!(f, "No leads to invoice in the given period"),
            AppError::DuplicateAssignment(msg) => write!(f, "Duplicate assignment: {}", msg),
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl IntoResponse for AppError {
    /// Maps each error variant to an appropriate HTTP status code and JSON
    /// body. Business-rule outcomes are logged at info/warn, never as
    /// error-level events; only system failures log as errors.
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::DatabaseError(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NoLeadsToInvoice => {
                tracing::info!("Invoice generation found nothing to bill");
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "No leads to invoice in the given period".to_string(),
                )
            }
            AppError::DuplicateAssignment(msg) => {
                tracing::warn!("Duplicate assignment rejected: {}", msg);
                (StatusCode::CONFLICT, msg.clone())
            }
            AppError::ExternalApiError(msg) => {
                tracing::error!("External API error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "External service error".to_string(),
                )
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::WithContext { source, context } => {
                // Log full context chain for debugging
                tracing::error!("Error with context: {} -> {}", context, source);
                // Delegate to underlying error's response
                return source.clone().into_response();
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

// Make AppError cloneable for WithContext variant
impl Clone for AppError {
    /// Note: `sqlx::Error` is not cloneable, so `DatabaseError` is
    /// simplified to `RowNotFound` during cloning.
    fn clone(&self) -> Self {
        match self {
            AppError::DatabaseError(_e) => AppError::DatabaseError(sqlx::Error::RowNotFound),
            AppError::NotFound(msg) => AppError::NotFound(msg.clone()),
            AppError::BadRequest(msg) => AppError::BadRequest(msg.clone()),
            AppError::NoLeadsToInvoice => AppError::NoLeadsToInvoice,
            AppError::DuplicateAssignment(msg) => AppError::DuplicateAssignment(msg.clone()),
            AppError::ExternalApiError(msg) => AppError::ExternalApiError(msg.clone()),
            AppError::InternalError(msg) => AppError::InternalError(msg.clone()),
            AppError::WithContext { source, context } => AppError::WithContext {
                source: source.clone(),
                context: context.clone(),
            },
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::ExternalApiError(err.to_string())
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    #[allow(dead_code)]
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

/// Extension for sqlx::Error to add context
impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: f(),
        })
    }
}
