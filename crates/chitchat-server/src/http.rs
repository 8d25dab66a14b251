use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use chitchat_core::errors::ApiError;
use chitchat_identity::IdentityError;
use chitchat_store::StoreError;

/// Axum-facing wrapper for [`ApiError`]. Maps the taxonomy onto HTTP
/// status codes; internal failures are logged and surfaced as a generic
/// message without the underlying detail.
#[derive(Debug)]
pub struct HttpError(pub ApiError);

impl From<ApiError> for HttpError {
    fn from(e: ApiError) -> Self {
        Self(e)
    }
}

impl From<StoreError> for HttpError {
    fn from(e: StoreError) -> Self {
        Self(ApiError::from(e))
    }
}

impl From<IdentityError> for HttpError {
    fn from(e: IdentityError) -> Self {
        Self(ApiError::from(e))
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            ApiError::Unauthenticated(detail) => (StatusCode::UNAUTHORIZED, detail.clone()),
            ApiError::Forbidden(detail) => (StatusCode::FORBIDDEN, detail.clone()),
            ApiError::Validation(detail) => (StatusCode::BAD_REQUEST, detail.clone()),
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, detail.clone()),
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_owned())
            }
        };

        let body = serde_json::json!({
            "error": {
                "code": self.0.error_kind(),
                "message": message,
            }
        });
        (status, Json(body)).into_response()
    }
}

/// Extract the bearer credential from the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ApiError::Unauthenticated("missing or invalid Authorization header".into())
        })?;

    header.strip_prefix("Bearer ").ok_or_else(|| {
        ApiError::Unauthenticated("missing or invalid Authorization header".into())
    })
}
