// Domain error types - secure error handling with no information disclosure

use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum AegisError {
    /// Missing or invalid session token (HTTP 401)
    #[error("Invalid credentials")]
    Unauthorized,

    /// Permission denied by the access engine (HTTP 403)
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Object does not exist or is not visible to the caller (HTTP 404)
    #[error("Not found")]
    NotFound,

    /// Request payload failed validation (HTTP 400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Database error (HTTP 500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Report generation error (HTTP 500)
    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    /// Object library parsing/import error (HTTP 500)
    #[error("Library error: {0}")]
    Library(String),

    /// Configuration error (HTTP 500)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal invariant broken (HTTP 500)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Export/report generation errors
#[derive(Error, Debug)]
pub enum ReportError {
    /// CSV writer failure
    #[error("Failed to write CSV: {0}")]
    Csv(String),

    /// PDF document failure
    #[error("Failed to render PDF: {0}")]
    Pdf(String),

    /// Zip archive failure
    #[error("Failed to build archive: {0}")]
    Zip(String),
}

impl AegisError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            AegisError::Unauthorized => 401,
            AegisError::PermissionDenied(_) => 403,
            AegisError::NotFound => 404,
            AegisError::Validation(_) => 400,
            AegisError::Database(_) => 500,
            AegisError::Report(_) => 500,
            AegisError::Library(_) => 500,
            AegisError::Configuration(_) => 500,
            AegisError::Internal(_) => 500,
        }
    }

    /// Get user-facing error message (no sensitive information)
    pub fn user_message(&self) -> String {
        match self {
            AegisError::Unauthorized => "Invalid credentials".to_string(),
            AegisError::PermissionDenied(reason) => format!("Permission denied: {}", reason),
            AegisError::NotFound => "Not found".to_string(),
            AegisError::Validation(reason) => reason.clone(),
            AegisError::Database(_) => "Internal error".to_string(),
            AegisError::Report(_) => "Internal error".to_string(),
            AegisError::Library(_) => "Internal error".to_string(),
            AegisError::Configuration(_) => "Internal error".to_string(),
            AegisError::Internal(_) => "Internal error".to_string(),
        }
    }
}

impl From<serde_json::Error> for AegisError {
    fn from(err: serde_json::Error) -> Self {
        AegisError::Internal(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AegisError::Unauthorized.status_code(), 401);
        assert_eq!(AegisError::PermissionDenied("test".to_string()).status_code(), 403);
        assert_eq!(AegisError::NotFound.status_code(), 404);
        assert_eq!(AegisError::Validation("bad".to_string()).status_code(), 400);
        assert_eq!(AegisError::Report(ReportError::Csv("x".to_string())).status_code(), 500);
    }

    #[test]
    fn test_error_conversion() {
        let report_err = ReportError::Pdf("page overflow".to_string());
        let err: AegisError = report_err.into();

        match err {
            AegisError::Report(ReportError::Pdf(_)) => (),
            _ => panic!("Expected Report(Pdf)"),
        }
    }

    #[test]
    fn test_user_messages_no_sensitive_data() {
        let err = AegisError::Database(sqlx::Error::PoolTimedOut);
        let user_msg = err.user_message();

        assert!(!user_msg.contains("pool"));
        assert_eq!(user_msg, "Internal error");
    }

    #[test]
    fn test_validation_message_preserved() {
        let err = AegisError::Validation("eta must be a date".to_string());
        assert_eq!(err.user_message(), "eta must be a date");
    }
}
