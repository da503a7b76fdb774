//! RTSP camera capture.
//!
//! This crate connects to a network camera over RTSP, decodes its video
//! stream on a background thread, converts each decoded frame to a packed
//! RGB, BGR or GRAY buffer and hands it to a consumer callback together with
//! camera metadata, a capture timestamp and a per-device sequence number.
//!
//! # Module Structure
//!
//! - `config`: camera settings and the layered daemon configuration
//! - `device`: `CameraDevice`, the init/teardown unit owning the capture thread
//! - `error`: `CaptureError`
//! - `frame`: color modes, images and delivered frames
//! - `ingest`: session, decoder, converter, capture loop and media backends
//! - `registry`: named camera constructors (`rtsp_camera`, `stub_camera`)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rtsp_capture::{CameraDevice, CameraImageData, CameraInitConfig, SyntheticBackend};
//!
//! let mut device = CameraDevice::new(
//!     SyntheticBackend::pattern(320, 240),
//!     Arc::new(|frame: Arc<CameraImageData>| {
//!         println!("frame #{} {}x{}", frame.sequence_num, frame.width, frame.height);
//!     }),
//! );
//! if device.init(&CameraInitConfig::default()) {
//!     std::thread::sleep(std::time::Duration::from_secs(1));
//! }
//! device.teardown();
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod registry;

pub use config::{CameraInitConfig, CaptureConfig};
pub use device::CameraDevice;
pub use error::{CaptureError, Result};
pub use frame::{CameraImageCallback, CameraImageData, ColorMode, Image, PixelLayout};
#[cfg(feature = "rtsp-ffmpeg")]
pub use ingest::FfmpegBackend;
pub use ingest::{
    CaptureState, CaptureStats, MediaBackend, ReleaseLog, SessionAddress, SyntheticBackend,
    SyntheticRead, VendorPath,
};
pub use registry::{Camera, CameraRegistry, RTSP_CAMERA, STUB_CAMERA};
