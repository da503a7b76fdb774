use thiserror::Error;

use crate::ingest::capture::CaptureState;

/// Errors produced while opening, decoding or converting a camera stream.
///
/// `init`-time variants are reported to the caller of `CameraDevice::try_init`;
/// loop-time variants are logged on the capture thread and never re-raised.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("invalid session address: {0}")]
    Address(String),
    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },
    #[error("failed to probe stream information: {0}")]
    StreamInfo(String),
    #[error("no video stream found")]
    NoVideoStream,
    #[error("no decoder available for codec '{0}'")]
    UnsupportedCodec(String),
    #[error("failed to initialise decoder: {0}")]
    DecoderInit(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("unsupported image layout: {0}")]
    UnsupportedLayout(String),
    #[error("failed to build conversion plan: {0}")]
    ConversionPlan(String),
    #[error("conversion failed: {0}")]
    Conversion(String),
    #[error("stream read failed: {0}")]
    Read(String),
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("camera already started (state: {0:?})")]
    AlreadyStarted(CaptureState),
}

pub type Result<T, E = CaptureError> = std::result::Result<T, E>;
