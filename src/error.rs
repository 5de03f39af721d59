use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Crate-wide error taxonomy. Each variant maps to one status code and JSON
/// body on the HTTP surface; see the `IntoResponse` impl below.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("chain {0} is not configured")]
    ChainNotFound(u64),

    #[error("no healthy rpc available for chain {0}")]
    NoHealthyRpc(u64),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid json-rpc request")]
    InvalidRequest,

    #[error("session {0} is invalid or expired")]
    InvalidSession(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<redis::RedisError> for RouterError {
    fn from(err: redis::RedisError) -> Self {
        RouterError::Internal(format!("kv error: {err}"))
    }
}

impl From<serde_json::Error> for RouterError {
    fn from(err: serde_json::Error) -> Self {
        RouterError::Internal(format!("serialization error: {err}"))
    }
}

impl IntoResponse for RouterError {
    fn into_response(self) -> Response {
        let status = match &self {
            RouterError::ChainNotFound(_) => StatusCode::NOT_FOUND,
            RouterError::InvalidRequest => StatusCode::BAD_REQUEST,
            RouterError::NoHealthyRpc(_)
            | RouterError::InvalidConfig(_)
            | RouterError::InvalidSession(_)
            | RouterError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}

pub type RouterResult<T> = Result<T, RouterError>;
