//! API error type and HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ipam_core::IpamError;
use serde::Serialize;
use thiserror::Error;

/// Result type alias using `ApiError`
pub type Result<T> = std::result::Result<T, ApiError>;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    /// The request body could not be decoded
    #[error("malformed request body: {0}")]
    MalformedBody(String),

    #[error(transparent)]
    Ipam(#[from] IpamError),
}

/// JSON error body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    code: &'static str,
    message: &'a str,
}

impl ApiError {
    /// Stable error code for clients
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MalformedBody(_) => "MalformedBody",
            Self::Ipam(e) if e.is_invalid_input() => "InvalidRequest",
            Self::Ipam(IpamError::NoSpaceAvailable { .. }) => "NoSpaceAvailable",
            Self::Ipam(IpamError::Cancelled) => "RequestTimeout",
            Self::Ipam(_) => "InternalError",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedBody(_) => StatusCode::BAD_REQUEST,
            Self::Ipam(e) if e.is_invalid_input() => StatusCode::BAD_REQUEST,
            Self::Ipam(IpamError::NoSpaceAvailable { .. }) => StatusCode::INSUFFICIENT_STORAGE,
            Self::Ipam(IpamError::Cancelled) => StatusCode::REQUEST_TIMEOUT,
            Self::Ipam(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let message = self.to_string();
        let body = ErrorBody {
            code: self.error_code(),
            message: &message,
        };
        (status, Json(body)).into_response()
    }
}
