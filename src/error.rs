use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// Error raised by a malformed form template or validation rule. This is an
/// operator mistake, never the patient's.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct ConfigurationError(pub String);

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required: {0}")]
    Unauthorized(&'static str),
    #[error("Forbidden: {0}")]
    Forbidden(&'static str),
    #[error("Profile has no tenant")]
    TenantNotFound,
    /// Absent or outside the caller's tenant. Callers cannot tell the two apart.
    #[error("Not found: {0}")]
    NotFound(&'static str),
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Protocol assignment failed after {inserted_before_failure} task(s): {source}")]
    AssignmentFailed {
        inserted_before_failure: usize,
        #[source]
        source: sqlx::Error,
    },
    #[error("Upstream failure: {0}")]
    Upstream(String),
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: u64 },
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::TenantNotFound => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::AssignmentFailed { .. }
            | AppError::Upstream(_)
            | AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::TenantNotFound => "TENANT_NOT_FOUND",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Conflict(_) => "CONFLICT",
            AppError::AssignmentFailed { .. } => "ASSIGNMENT_FAILED",
            AppError::Upstream(_) => "UPSTREAM_ERROR",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::RateLimited { .. } => "RATE_LIMITED",
        }
    }

    /// Message safe to hand to the client.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Unauthorized(msg) => (*msg).to_string(),
            AppError::Forbidden(msg) => (*msg).to_string(),
            AppError::TenantNotFound => "No tenant is associated with this account".to_string(),
            AppError::NotFound(what) => format!("{what} not found"),
            AppError::Validation(msg) | AppError::Conflict(msg) => msg.clone(),
            AppError::RateLimited { retry_after } => {
                format!("Too many requests. Retry after {retry_after}s")
            }
            AppError::AssignmentFailed { .. }
            | AppError::Upstream(_)
            | AppError::Configuration(_) => "An internal error occurred".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, code = self.code(), "request failed");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.public_message(),
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let AppError::RateLimited { retry_after } = &self {
            if let Ok(val) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("Retry-After", val);
            }
        }
        response
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => AppError::NotFound("Resource"),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::Conflict("Resource already exists".to_string())
            }
            _ => AppError::Upstream(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Upstream(format!("JSON: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn unauthorized_returns_401() {
        let response = AppError::Unauthorized("Missing session token").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "UNAUTHORIZED");
        assert_eq!(json["error"]["message"], "Missing session token");
    }

    #[tokio::test]
    async fn tenant_not_found_is_forbidden() {
        let response = AppError::TenantNotFound.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn conflict_returns_409_with_message() {
        let response = AppError::Conflict("Patient already has an active protocol".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["error"]["message"], "Patient already has an active protocol");
    }

    #[tokio::test]
    async fn upstream_hides_detail() {
        let response = AppError::Upstream("connection reset by peer at 10.0.0.3".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"]["message"], "An internal error occurred");
    }

    #[tokio::test]
    async fn configuration_error_hides_detail() {
        let err: AppError = ConfigurationError("question q3 has min > max".into()).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "CONFIGURATION_ERROR");
        assert_eq!(json["error"]["message"], "An internal error occurred");
    }

    #[tokio::test]
    async fn assignment_failure_is_500() {
        let err = AppError::AssignmentFailed {
            inserted_before_failure: 2,
            source: sqlx::Error::PoolTimedOut,
        };
        assert!(err.to_string().contains("after 2 task(s)"));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn rate_limited_sets_retry_after() {
        let response = AppError::RateLimited { retry_after: 60 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "60");
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err: AppError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
