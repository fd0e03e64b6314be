//! HTTP byte-range parsing and content-type lookup for direct streaming.

use std::path::Path;

/// An inclusive byte range within a file of known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Parse a `Range: bytes=...` header value against a file size.
    ///
    /// Accepts `start-end`, the open-ended `start-` and the suffix form
    /// `-len`. Returns `None` for anything unusable (malformed input,
    /// multiple ranges, `start > end`, `start >= file_size`), in which case
    /// the caller falls back to a full response. `end` is clamped to the
    /// last byte of the file.
    pub fn parse(header: &str, file_size: u64) -> Option<Self> {
        let spec = header.strip_prefix("bytes=")?.trim();
        if spec.contains(',') {
            // Multipart ranges are not supported; serve the whole file.
            return None;
        }
        let (start_str, end_str) = spec.split_once('-')?;
        let (start_str, end_str) = (start_str.trim(), end_str.trim());

        if start_str.is_empty() {
            // Suffix form: the final `len` bytes.
            let len: u64 = end_str.parse().ok()?;
            if len == 0 || file_size == 0 {
                return None;
            }
            let len = len.min(file_size);
            return Some(Self {
                start: file_size - len,
                end: file_size - 1,
            });
        }

        let start: u64 = start_str.parse().ok()?;
        if start >= file_size {
            return None;
        }
        let end = if end_str.is_empty() {
            file_size - 1
        } else {
            end_str.parse().ok()?
        };
        if start > end {
            return None;
        }
        Some(Self {
            start,
            end: end.min(file_size - 1),
        })
    }

    /// Number of bytes the range covers.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` header value for this range.
    pub fn content_range(&self, file_size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, file_size)
    }
}

/// Content-Type for a video file, derived from its extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mp4") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        Some("avi") => "video/x-msvideo",
        Some("mov") => "video/quicktime",
        Some("wmv") => "video/x-ms-wmv",
        Some("flv") => "video/x-flv",
        Some("m4v") => "video/x-m4v",
        Some("mpg") | Some("mpeg") => "video/mpeg",
        Some("ogv") => "video/ogg",
        Some("3gp") => "video/3gpp",
        _ => "application/octet-stream",
    }
}
