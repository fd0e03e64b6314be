//! Medley: a self-hosted media server backend.
//!
//! The crate is organized around three pieces:
//! - [`copy`]: long-running copy operations executed as background tasks
//!   with byte-accurate progress reporting.
//! - [`streaming`]: HTTP range serving of video files and live
//!   process-piped transcoding.
//! - [`api`]: the axum HTTP surface tying both to the task engine.

pub mod api;
pub mod config;
pub mod copy;
pub mod error;
pub mod library;
pub mod streaming;
pub mod tasks;
pub mod utils;

pub use error::{Error, Result};
