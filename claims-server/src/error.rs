use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use claims_engine::ClaimsError;
use error_common::codes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

/// Standard API error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Error type
    pub error_type: String,
    /// Stable error code (`CLAIMS_xxxx`)
    pub code: String,
    /// Human-readable error message naming the failed rule
    pub message: String,
    /// Whether the same request may succeed if retried
    pub retryable: bool,
    /// Timestamp when error occurred
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Suggested actions for resolving the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
}

/// Standard API success response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<usize>,
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// Main API error enum
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{message}")]
    Validation { code: &'static str, message: String },

    #[error("Missing caller identity: {message}")]
    Authentication { message: String },

    #[error("{message}")]
    NotFound { message: String },

    #[error("{message}")]
    Conflict { message: String },

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("{message}")]
    ServiceUnavailable { code: &'static str, message: String },

    #[error("Internal server error: {message}")]
    Internal { code: &'static str, message: String },
}

impl ApiError {
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Authentication { .. } => StatusCode::UNAUTHORIZED,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::ServiceUnavailable { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type string
    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "validation_error",
            ApiError::Authentication { .. } => "authentication_error",
            ApiError::NotFound { .. } => "not_found",
            ApiError::Conflict { .. } => "conflict",
            ApiError::BadRequest { .. } => "bad_request",
            ApiError::ServiceUnavailable { .. } => "service_unavailable",
            ApiError::Internal { .. } => "internal_error",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation { code, .. }
            | ApiError::ServiceUnavailable { code, .. }
            | ApiError::Internal { code, .. } => *code,
            ApiError::Authentication { .. } | ApiError::BadRequest { .. } => {
                codes::validation::INVALID_INPUT
            }
            ApiError::NotFound { .. } => codes::system::NOT_FOUND,
            ApiError::Conflict { .. } => codes::system::CONCURRENCY_CONFLICT,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Conflict { .. } | ApiError::ServiceUnavailable { .. }
        )
    }

    /// Get suggested actions for resolving the error
    pub fn suggestions(&self) -> Option<Vec<String>> {
        match self {
            ApiError::Validation { .. } => Some(vec![
                "Correct the claim data named in the message and resend".to_string(),
            ]),
            ApiError::Authentication { .. } => Some(vec![
                "Send the caller identity in the X-Actor-Id header".to_string(),
            ]),
            ApiError::Conflict { .. } => Some(vec![
                "Reload the claim and retry the operation".to_string(),
            ]),
            ApiError::ServiceUnavailable { .. } => Some(vec![
                "Retry the request; the claim was left unchanged".to_string(),
            ]),
            _ => None,
        }
    }
}

impl From<ClaimsError> for ApiError {
    fn from(err: ClaimsError) -> Self {
        let code = err.code();
        match err {
            ClaimsError::Validation(violation) => ApiError::Validation {
                code,
                message: violation.to_string(),
            },
            ClaimsError::NotFound { .. } => ApiError::NotFound {
                message: err.to_string(),
            },
            ClaimsError::Conflict { .. } => ApiError::Conflict {
                message: err.to_string(),
            },
            ClaimsError::ExternalDependency { .. } => ApiError::ServiceUnavailable {
                code,
                message: err.to_string(),
            },
            ClaimsError::Storage(_) | ClaimsError::Configuration(_) => ApiError::Internal {
                code,
                message: err.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_id = Uuid::new_v4().to_string();
        let status_code = self.status_code();

        if status_code.is_server_error() {
            error!(
                error_id = %error_id,
                error_type = %self.error_type(),
                code = self.code(),
                status_code = %status_code.as_u16(),
                error = %self,
                "API error occurred"
            );
        } else {
            warn!(
                error_id = %error_id,
                error_type = %self.error_type(),
                code = self.code(),
                status_code = %status_code.as_u16(),
                "Request rejected"
            );
        }

        // Storage details stay in the log
        let message = match &self {
            ApiError::Internal { .. } => "The request could not be completed".to_string(),
            _ => self.to_string(),
        };

        let error_response = ApiErrorResponse {
            error_id,
            error_type: self.error_type().to_string(),
            code: self.code().to_string(),
            message,
            retryable: self.is_retryable(),
            timestamp: chrono::Utc::now(),
            suggestions: self.suggestions(),
        };

        (status_code, Json(error_response)).into_response()
    }
}

/// Helper function to create successful API responses
pub fn api_success<T>(data: T) -> ApiResponse<T> {
    ApiResponse {
        success: true,
        data,
        metadata: None,
    }
}

/// Successful list response carrying the item count
pub fn api_list<T>(data: Vec<T>) -> ApiResponse<Vec<T>> {
    let total_count = data.len();
    ApiResponse {
        success: true,
        data,
        metadata: Some(ResponseMetadata {
            total_count: Some(total_count),
        }),
    }
}

pub type ApiResult<T> = Result<ApiResponse<T>, ApiError>;
