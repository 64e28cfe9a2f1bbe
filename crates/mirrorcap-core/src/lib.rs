//! mirrorcap Core - Shared types and the frame protocol decoder
//!
//! This crate provides the foundational types used across all mirrorcap components.

pub mod config;
pub mod display;
pub mod error;
pub mod frame;
pub mod protocol;

pub use config::{CaptureConfig, RestartPolicy, RetryPolicy};
pub use display::{CaptureParams, DisplayInfo, Orientation};
pub use error::{Error, Result};
pub use frame::{Frame, FrameImage, ImageCodec, JpegCodec};
pub use protocol::{read_header, FrameReader, FrameStreamHeader, HEADER_LENGTH};
