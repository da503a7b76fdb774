//! Capture pipeline.
//!
//! This module provides the pieces a camera device is assembled from:
//! - `address`: session address construction (credentials, vendor paths)
//! - `session`: transport/demux session and video stream selection
//! - `decoder`: submit/drain video decoding
//! - `convert`: pixel layout conversion with a lazily rebuilt plan
//! - `capture`: the background capture loop and its state machine
//!
//! The decoding/transport library sits behind `MediaBackend`. Two backends
//! exist:
//! - `FfmpegBackend` (feature: rtsp-ffmpeg) for real cameras
//! - `SyntheticBackend` for stub cameras and tests
//!
//! Data flows one way: network bytes -> access unit -> decoded frame ->
//! converted image -> delivered frame.

pub mod address;
pub mod capture;
pub mod convert;
pub mod decoder;
#[cfg(feature = "rtsp-ffmpeg")]
pub mod ffmpeg;
pub mod session;
pub mod synthetic;

pub use address::{SessionAddress, VendorPath};
pub use capture::{CaptureState, CaptureStats};
pub use convert::{ConversionContext, ConversionPlan};
pub use decoder::{DecodeContext, DecodeStatus, DecodedFrame, Drain, VideoDecoder};
#[cfg(feature = "rtsp-ffmpeg")]
pub use ffmpeg::FfmpegBackend;
pub use session::{
    AccessUnit, MediaKind, ReadOutcome, SessionHandle, SessionOptions, StreamInfo, StreamSession,
};
pub use synthetic::{ReleaseLog, SyntheticBackend, SyntheticRead};

use crate::error::Result;
use crate::frame::PixelLayout;

/// Boundary to the external decoding/transport library.
///
/// A backend opens sessions by address, opens a decoder for a probed video
/// stream, and builds conversion plans for a decoded frame's source format
/// and dimensions. Everything it hands out is owned by the caller and
/// released on drop.
pub trait MediaBackend: Send + Sync + 'static {
    type Unit: AccessUnit + Send;
    type Frame: DecodedFrame + Send;
    type Session: StreamSession<Unit = Self::Unit> + 'static;
    type Decoder: VideoDecoder<Unit = Self::Unit, Frame = Self::Frame> + 'static;
    type Plan: ConversionPlan<Frame = Self::Frame> + 'static;

    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Connect and perform the transport handshake.
    fn connect(&self, address: &SessionAddress, options: &SessionOptions)
        -> Result<Self::Session>;

    /// Open a decoder for `stream`, keyed by its codec id.
    fn open_decoder(&self, session: &Self::Session, stream: &StreamInfo) -> Result<Self::Decoder>;

    /// Build a plan converting frames shaped like `frame` into `layout`.
    fn build_plan(&self, frame: &Self::Frame, layout: PixelLayout) -> Result<Self::Plan>;
}
