//! HTTP mapping of [`ArenaError`] and the JSON body extractor.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::ArenaError;
use crate::observability::metrics;

impl ArenaError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Validation(_) | Self::Json(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::MutationInProgress { .. } | Self::RunNotTerminal { .. } => StatusCode::CONFLICT,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Persistence(_) | Self::Config(_) | Self::Yaml(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ArenaError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        metrics::record_error(&self);
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self, "request failed");
        } else {
            tracing::debug!(kind = self.kind(), error = %self, "request rejected");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

/// `Json<T>` whose rejections become 422 `{detail}` responses.
///
/// Oversized bodies keep their 413.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                Err(rejection.into_response())
            }
            Err(rejection) => {
                Err(ArenaError::Validation(rejection.body_text()).into_response())
            }
        }
    }
}
