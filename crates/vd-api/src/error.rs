use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use vd_infra::SessionError;

use crate::lifecycle::LifecycleError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::Invalid(msg) => Self::BadRequest(msg),
            LifecycleError::Conflict(msg) => Self::Conflict(msg),
            LifecycleError::Store(e @ vd_store::Error::NotFound(_)) => Self::NotFound(e.to_string()),
            LifecycleError::Store(e @ vd_store::Error::UnknownOs(_)) => {
                Self::BadRequest(e.to_string())
            }
            LifecycleError::Store(e) => Self::Internal(e.to_string()),
            LifecycleError::Provision(e) if e.is_timeout() => Self::Timeout(e.to_string()),
            LifecycleError::Provision(e) => Self::Runtime(e.to_string()),
            LifecycleError::Session(e) if session_timed_out(&e) => Self::Timeout(e.to_string()),
            LifecycleError::Session(e) => Self::Runtime(e.to_string()),
            LifecycleError::Runtime(e) if e.is_timeout() => Self::Timeout(e.to_string()),
            LifecycleError::Runtime(e) => Self::Runtime(e.to_string()),
        }
    }
}

fn session_timed_out(e: &SessionError) -> bool {
    match e {
        SessionError::NotReady { .. } => true,
        SessionError::Start(e) | SessionError::Terminate(e) => e.is_timeout(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Runtime(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
