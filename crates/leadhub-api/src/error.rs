use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use leadhub_connect::ConnectError;
use leadhub_types::api::ErrorBody;

/// Every failure a handler can return. Rendered as `{ "error", "code" }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("invalid username or password")]
    BadCredentials,

    #[error("{0}")]
    InvalidInput(String),

    #[error("not found")]
    NotFound,

    #[error("{message}")]
    Conflict { code: &'static str, message: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated | Self::BadCredentials => StatusCode::UNAUTHORIZED,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::BadCredentials => "bad_credentials",
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound => "not_found",
            Self::Conflict { code, .. } => code,
            Self::Internal(_) => "store_failure",
        }
    }
}

impl From<ConnectError> for ApiError {
    fn from(err: ConnectError) -> Self {
        let code = err.kind();
        match err {
            ConnectError::Unauthenticated => Self::Unauthenticated,
            ConnectError::InvalidInput(msg) => Self::InvalidInput(msg),
            ConnectError::NotFound => Self::NotFound,
            ConnectError::DuplicateAttempt(status) => Self::Conflict {
                code,
                message: format!("channel is already {}", status.as_str()),
            },
            ConnectError::StoreFailure(e) => Self::Internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Store details stay in the log.
        let message = match &self {
            Self::Internal(e) => {
                error!("Request failed: {:#}", e);
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody {
            error: message,
            code: self.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Run a blocking store call off the async runtime.
pub(crate) async fn blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!("store task failed"))
        })?
        .map_err(ApiError::Internal)
}
