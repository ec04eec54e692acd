//! HTTP Range request plumbing for partial content responses
//!
//! Parsing and validation live in `streamify_core::streaming`; this module
//! only moves header values in and builds the `206` response out.

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use streamify_core::StreamingError;
use streamify_core::streaming::RangeStream;

/// Extracts the Range header value.
///
/// Returns `Ok(None)` when the header is absent.
///
/// # Errors
/// - `StreamingError::RangeMalformed` - Header value is not visible ASCII
pub fn extract_range_header(headers: &HeaderMap) -> Result<Option<&str>, StreamingError> {
    headers
        .get(header::RANGE)
        .map(|value| {
            value.to_str().map_err(|_| StreamingError::RangeMalformed {
                header: String::from_utf8_lossy(value.as_bytes()).into_owned(),
            })
        })
        .transpose()
}

/// Builds the `206 Partial Content` response for a prepared stream.
///
/// The body owns the stream's handle lease, so the lease is released when
/// the body finishes or the client goes away.
pub fn partial_content_response(stream: RangeStream) -> Response {
    let content_range = stream.content_range();
    let content_length = stream.content_length();
    let content_type = stream.content_type.clone();

    Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, content_length.to_string())
        .header(header::CONTENT_RANGE, content_range)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_extract_range_header() {
        let mut headers = HeaderMap::new();
        assert!(extract_range_header(&headers).unwrap().is_none());

        headers.insert(header::RANGE, HeaderValue::from_static("bytes=0-99"));
        assert_eq!(extract_range_header(&headers).unwrap(), Some("bytes=0-99"));

        headers.insert(
            header::RANGE,
            HeaderValue::from_bytes(b"bytes=\xff-").unwrap(),
        );
        assert!(matches!(
            extract_range_header(&headers),
            Err(StreamingError::RangeMalformed { .. })
        ));
    }
}
