//! Range streaming endpoint.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use streamify_core::InfoHash;

use super::range::{extract_range_header, partial_content_response};
use crate::error::ApiError;
use crate::server::AppState;

/// `GET /stream/{content_id}/{hash}`
///
/// Always answers `206` with the requested bytes or a typed failure;
/// requests without a Range header get `416`, never a full `200` body.
///
/// # Errors
/// Any [`ApiError`]; see its status mapping.
pub async fn stream_content(
    State(state): State<AppState>,
    Path((content_id, hash)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let info_hash: InfoHash = hash
        .parse()
        .map_err(|_| ApiError::InvalidHash { value: hash.clone() })?;
    let range = extract_range_header(&headers)?;

    let stream = state.streaming.stream(&content_id, info_hash, range).await?;
    Ok(partial_content_response(stream))
}
