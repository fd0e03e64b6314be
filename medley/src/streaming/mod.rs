//! Video streaming: HTTP range serving and live process-piped transcoding.

pub mod range;
pub mod service;
pub mod transcode;

pub use range::{ByteRange, content_type_for};
pub use transcode::{OutputContainer, QualityPreset, StreamingChild, TranscodeSpec, TranscoderConfig};
