use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;

/// Failure of a single upstream query.
///
/// Cloneable because one coalesced fetch hands the same outcome to every
/// waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Could not decode upstream response: {0}")]
    Decode(String),

    /// A fetch settled after its view moved to another key or was torn down.
    /// Expected race outcome; never shown to the operator.
    #[error("Stale resolution discarded")]
    StaleResolutionDiscarded,
}

impl From<reqwest::Error> for QueryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            QueryError::Decode(err.to_string())
        } else {
            QueryError::Network(err.to_string())
        }
    }
}

/// Application-specific error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("View not found or already unmounted")]
    ViewNotFound,

    #[error("Webhook event {0} is not in the current page")]
    EventNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Upstream error: {0}")]
    Upstream(#[from] QueryError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::ViewNotFound => StatusCode::NOT_FOUND,
            AppError::EventNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream(QueryError::Server { status, .. }) => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let error_code = match self {
            AppError::ViewNotFound => "view_not_found",
            AppError::EventNotFound(_) => "event_not_found",
            AppError::Validation(_) => "validation_error",
            AppError::Upstream(QueryError::Network(_)) => "network_error",
            AppError::Upstream(QueryError::Server { .. }) => "server_error",
            AppError::Upstream(_) => "upstream_error",
            AppError::Internal(_) => "internal_error",
        };

        HttpResponse::build(status).json(ErrorResponse {
            error: error_code.to_string(),
            message: self.to_string(),
            status: status.as_u16(),
        })
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;
