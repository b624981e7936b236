use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::services::query_filter::ParamError;
use crate::services::upstream::UpstreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    MethodNotAllowed,
    InvalidParameter,
    ParamConflict,
    UpstreamTimeout,
    UpstreamHttpError,
    UpstreamNoResponse,
    UpstreamEmptyBody,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub code: ErrorKind,
    pub detail: String,
    pub timestamp: String,
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub kind: ErrorKind,
    pub detail: String,
}

impl AppError {
    pub fn new(status: StatusCode, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            detail: detail.into(),
        }
    }

    pub fn method_not_allowed(method: &Method) -> Self {
        Self::new(
            StatusCode::METHOD_NOT_ALLOWED,
            ErrorKind::MethodNotAllowed,
            format!("{method} is not allowed; use GET"),
        )
    }
}

impl From<ParamError> for AppError {
    fn from(err: ParamError) -> Self {
        let kind = match err {
            ParamError::Invalid { .. } => ErrorKind::InvalidParameter,
            ParamError::Conflict { .. } => ErrorKind::ParamConflict,
        };
        Self::new(StatusCode::BAD_REQUEST, kind, err.to_string())
    }
}

impl From<UpstreamError> for AppError {
    fn from(err: UpstreamError) -> Self {
        let (status, kind) = match &err {
            UpstreamError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, ErrorKind::UpstreamTimeout),
            UpstreamError::Http { status, .. } => {
                (mirrored_status(*status), ErrorKind::UpstreamHttpError)
            }
            UpstreamError::NoResponse(_) => (StatusCode::BAD_GATEWAY, ErrorKind::UpstreamNoResponse),
            UpstreamError::EmptyBody(_) => (StatusCode::BAD_GATEWAY, ErrorKind::UpstreamEmptyBody),
        };
        let detail = match &err {
            UpstreamError::Http { body, .. } if !body.trim().is_empty() => {
                format!("{err}: {}", body.trim())
            }
            _ => err.to_string(),
        };
        Self::new(status, kind, detail)
    }
}

/// Upstream error statuses pass through; anything else is a generic 502.
fn mirrored_status(status: StatusCode) -> StatusCode {
    if status.is_client_error() || status.is_server_error() {
        status
    } else {
        StatusCode::BAD_GATEWAY
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let envelope = ErrorEnvelope {
            success: false,
            code: self.kind,
            detail: self.detail,
            timestamp: Utc::now().to_rfc3339(),
        };
        (self.status, Json(envelope)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn upstream_errors_map_to_gateway_statuses() {
        let cases = [
            (
                UpstreamError::Timeout(Duration::from_secs(10)),
                StatusCode::GATEWAY_TIMEOUT,
                ErrorKind::UpstreamTimeout,
            ),
            (
                UpstreamError::NoResponse("connection refused".to_string()),
                StatusCode::BAD_GATEWAY,
                ErrorKind::UpstreamNoResponse,
            ),
            (
                UpstreamError::EmptyBody("empty body".to_string()),
                StatusCode::BAD_GATEWAY,
                ErrorKind::UpstreamEmptyBody,
            ),
            (
                UpstreamError::Http {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    body: String::new(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::UpstreamHttpError,
            ),
            (
                UpstreamError::Http {
                    status: StatusCode::NOT_MODIFIED,
                    body: String::new(),
                },
                StatusCode::BAD_GATEWAY,
                ErrorKind::UpstreamHttpError,
            ),
        ];
        for (err, status, kind) in cases {
            let app_err = AppError::from(err);
            assert_eq!(app_err.status, status);
            assert_eq!(app_err.kind, kind);
        }
    }

    #[test]
    fn upstream_http_error_detail_carries_the_body() {
        let with_body = AppError::from(UpstreamError::Http {
            status: StatusCode::BAD_REQUEST,
            body: " limit too large\n".to_string(),
        });
        assert_eq!(with_body.status, StatusCode::BAD_REQUEST);
        assert_eq!(with_body.detail, "upstream returned HTTP 400 Bad Request: limit too large");

        let without_body = AppError::from(UpstreamError::Http {
            status: StatusCode::BAD_GATEWAY,
            body: "  ".to_string(),
        });
        assert_eq!(without_body.detail, "upstream returned HTTP 502 Bad Gateway");
    }

    #[test]
    fn parameter_errors_are_client_errors() {
        let conflict = AppError::from(ParamError::Conflict {
            rectangle: "minlat".to_string(),
            radial: "lat".to_string(),
        });
        assert_eq!(conflict.status, StatusCode::BAD_REQUEST);
        assert_eq!(conflict.kind, ErrorKind::ParamConflict);

        let envelope = serde_json::to_value(ErrorEnvelope {
            success: false,
            code: conflict.kind,
            detail: conflict.detail,
            timestamp: String::new(),
        })
        .expect("serialize");
        assert_eq!(envelope["code"], "PARAM_CONFLICT");
    }
}
