//! Video streaming response assembly.

use std::io::SeekFrom;
use std::path::Path;

use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::Response;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::streaming::range::{ByteRange, content_type_for};
use crate::streaming::transcode::{StreamingChild, TranscodeSpec, TranscoderConfig};
use crate::utils::fs;
use crate::{Error, Result};

/// Serve a file directly, honoring a `Range` request header when present.
///
/// A valid range yields a 206 with exactly `end - start + 1` body bytes: the
/// reader is wrapped in `take`, so the byte budget holds regardless of the
/// buffer sizes used underneath. An unusable range falls back to a full 200.
pub async fn direct_response(path: &Path, range_header: Option<&str>) -> Result<Response> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| fs::io_error("reading file metadata", path, e))?;
    if !meta.is_file() {
        return Err(Error::validation(format!(
            "not a file: {}",
            path.display()
        )));
    }
    let file_size = meta.len();
    let content_type = content_type_for(path);

    let mut file = File::open(path)
        .await
        .map_err(|e| fs::io_error("opening file", path, e))?;

    let range = range_header.and_then(|h| ByteRange::parse(h, file_size));
    let response = match range {
        Some(range) => {
            file.seek(SeekFrom::Start(range.start))
                .await
                .map_err(|e| fs::io_error("seeking file", path, e))?;
            let limited = file.take(range.len());
            Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::ACCEPT_RANGES, "bytes")
                .header(header::CONTENT_RANGE, range.content_range(file_size))
                .header(header::CONTENT_LENGTH, range.len())
                .body(Body::from_stream(ReaderStream::new(limited)))
        }
        None => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CONTENT_LENGTH, file_size)
            .body(Body::from_stream(ReaderStream::new(file))),
    };
    response.map_err(|e| Error::Other(format!("failed to build response: {e}")))
}

/// Serve a file through the external encoder, piping its stdout into the
/// response body as it is produced.
///
/// No `Content-Length` (the output size is unknown ahead of time) and no
/// `Range` support: seeking is unsupported while transcoding.
pub fn transcode_response(config: &TranscoderConfig, spec: &TranscodeSpec) -> Result<Response> {
    let child = StreamingChild::spawn(config, spec)?;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, spec.container.mime_type())
        .body(Body::from_stream(child.into_stream()))
        .map_err(|e| Error::Other(format!("failed to build response: {e}")))
}
