// Response types for API endpoints

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::core::errors::AegisError;

/// Error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Paginated-style list envelope: `{"count": N, "results": [...]}`.
#[derive(Debug, Serialize)]
pub struct ListResponse<T: Serialize> {
    pub count: usize,
    pub results: Vec<T>,
}

impl<T: Serialize> ListResponse<T> {
    pub fn new(results: Vec<T>) -> Self {
        Self {
            count: results.len(),
            results,
        }
    }
}

/// Short reference to a related object: `{"id": ..., "str": ...}`.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedRef {
    pub id: Uuid,
    pub str: String,
}

impl RelatedRef {
    pub fn new(id: Uuid, label: impl Into<String>) -> Self {
        Self {
            id,
            str: label.into(),
        }
    }
}

/// API error type that converts domain errors to HTTP responses
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: String) -> Self {
        Self {
            status,
            message,
            request_id: None,
        }
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Not found".to_string())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message.into())
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
            request_id: self.request_id,
        });
        (self.status, body).into_response()
    }
}

impl From<AegisError> for ApiError {
    fn from(err: AegisError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        ApiError::new(status, err.user_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_response_counts() {
        let response = ListResponse::new(vec![1, 2, 3]);
        assert_eq!(response.count, 3);
    }

    #[test]
    fn test_domain_errors_map_to_status() {
        let err: ApiError = AegisError::NotFound.into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err: ApiError = AegisError::Unauthorized.into();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);

        let err: ApiError = AegisError::PermissionDenied("nope".to_string()).into();
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        // Internal detail never reaches the client.
        let err: ApiError = AegisError::Internal("secret detail".to_string()).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message.contains("secret detail"));
    }
}
