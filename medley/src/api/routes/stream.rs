//! Video streaming routes.

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, header};
use axum::response::Response;
use axum::routing::get;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::StreamQuery;
use crate::api::server::AppState;
use crate::streaming::transcode::{OutputContainer, QualityPreset, TranscodeSpec};
use crate::streaming::service;

/// Create the stream router.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_stream))
}

/// Stream a video file.
///
/// Direct mode serves the file bytes with standard `Range` support. With
/// `transcode=true`, the file is piped through the external encoder and
/// served as an unbounded body; `Range` is ignored in that mode.
async fn get_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let path = state.media_root.resolve_existing(&query.path)?;

    if query.transcode {
        let container = match query.format.as_deref() {
            Some(raw) => OutputContainer::from_str(raw)
                .ok_or_else(|| ApiError::bad_request(format!("unsupported format: {}", raw)))?,
            None => OutputContainer::default(),
        };
        let quality = match query.quality.as_deref() {
            Some(raw) => QualityPreset::from_str(raw)
                .ok_or_else(|| ApiError::bad_request(format!("unsupported quality: {}", raw)))?,
            None => QualityPreset::default(),
        };
        let spec = TranscodeSpec {
            input: path,
            container,
            quality,
        };
        return Ok(service::transcode_response(&state.transcoder, &spec)?);
    }

    let range_header = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());
    Ok(service::direct_response(&path, range_header).await?)
}
