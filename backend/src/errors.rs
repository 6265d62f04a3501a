use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};

/// Error taxonomy for the store-provisioning core, per the propagation
/// policy: nothing escapes a reconciler task boundary without first being
/// committed as a terminal store status. This enum is only ever surfaced
/// from the lifecycle entry points the HTTP layer calls directly.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("store name already in use: {0}")]
    Conflict(String),

    #[error("store not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("database error: {source}")]
    Pool {
        #[from]
        source: deadpool_postgres::PoolError,
    },

    #[error("database error: {source}")]
    Postgres {
        #[from]
        source: tokio_postgres::Error,
    },

    #[error("kubernetes error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(_) => StatusCode::BAD_REQUEST,
            Error::InvalidState(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Pool { .. } | Error::Postgres { .. } | Error::Kube { .. } | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = self.to_string();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %message, "request failed");
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
