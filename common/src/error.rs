use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error kinds shared by every component. Recovery policy and HTTP surface
/// for each variant is documented in the component design (deployer-style:
/// one enum per crate boundary, converted with `#[from]` rather than
/// stringly-typed errors).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("rate limited")]
    RateLimited,

    /// Caused by a timeout or an upstream 5xx/network reset; safe to retry
    /// with exponential backoff per the retry policy in §5.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Caused by an upstream 4xx or a structurally invalid response; not
    /// retried.
    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("row".into()),
            other => Error::Internal(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl Error {
    fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NOT_FOUND",
            Error::Conflict(_) => "CONFLICT",
            Error::Invalid(_) => "VALIDATION_ERROR",
            Error::Unauthorized => "UNAUTHORIZED",
            Error::Forbidden => "FORBIDDEN",
            Error::RateLimited => "RATE_LIMITED",
            Error::Transient(_) | Error::Permanent(_) | Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Invalid(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Error::Transient(_) | Error::Permanent(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// A message free of stack traces or internal identifiers, safe to show a user.
    pub fn user_message(&self) -> String {
        match self {
            Error::Transient(_) => "the operation timed out, it will be retried".to_string(),
            Error::Permanent(msg) => msg.clone(),
            Error::Internal(_) => "an internal error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = ErrorBody {
            code: self.code(),
            message: self.user_message(),
            details: None,
        };
        (status, Json(body)).into_response()
    }
}
