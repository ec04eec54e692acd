//! Error to HTTP response mapping.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use streamify_core::{HandleError, StreamingError};

/// Failure of an HTTP handler.
///
/// Client errors echo their message. Server errors are logged with their
/// cause and answered with a generic body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Streaming pipeline failure
    #[error(transparent)]
    Streaming(#[from] StreamingError),

    /// Handle manager failure outside of a stream
    #[error(transparent)]
    Handles(#[from] HandleError),

    /// Path segment is not a 40-character hex info hash
    #[error("Invalid info hash: {value}")]
    InvalidHash {
        /// Rejected path segment
        value: String,
    },
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Streaming(error) => StatusCode::from_u16(error.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            ApiError::Handles(HandleError::ManagerShutdown) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Handles(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::InvalidHash { .. } => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
            match status {
                StatusCode::SERVICE_UNAVAILABLE => "Service unavailable".to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
            self.to_string()
        };

        let mut response = (status, Json(json!({ "error": message }))).into_response();

        if let ApiError::Streaming(StreamingError::RangeInvalid { file_length }) = &self {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{file_length}")) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }

        response
    }
}

/// Failure to start or run the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Listener could not bind
    #[error("Failed to bind {address}: {source}")]
    Bind {
        /// Address that was requested
        address: String,
        /// Underlying socket error
        source: std::io::Error,
    },

    /// Server loop ended with an I/O error
    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_range_invalid_carries_content_range() {
        let response =
            ApiError::from(StreamingError::RangeInvalid { file_length: 1000 }).into_response();

        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */1000");
    }

    #[tokio::test]
    async fn test_server_errors_hide_cause() {
        let error = StreamingError::Acquire(HandleError::AcquireFailed {
            reason: "tracker at 10.1.2.3 refused".to_string(),
        });
        let response = ApiError::from(error).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Internal server error");
    }

    #[tokio::test]
    async fn test_client_errors_echo_message() {
        let response = ApiError::from(StreamingError::RangeRequired).into_response();

        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert!(response.headers().get(header::CONTENT_RANGE).is_none());
        let body = body_json(response).await;
        assert_eq!(body["error"], "Range header is required");
    }

    #[test]
    fn test_shutdown_is_unavailable() {
        assert_eq!(
            ApiError::Handles(HandleError::ManagerShutdown).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
