use std::collections::HashMap;

use anyhow::{anyhow, Result};

use crate::config::CameraInitConfig;
use crate::device::CameraDevice;
use crate::frame::CameraImageCallback;
use crate::ingest::{CaptureState, CaptureStats, MediaBackend, SyntheticBackend};

pub const RTSP_CAMERA: &str = "rtsp_camera";
pub const STUB_CAMERA: &str = "stub_camera";

const STUB_WIDTH: u32 = 640;
const STUB_HEIGHT: u32 = 480;

/// Object-safe view of a camera device.
pub trait Camera: Send {
    fn init(&mut self, config: &CameraInitConfig) -> bool;
    fn teardown(&mut self);
    fn state(&self) -> CaptureState;
    fn stats(&self) -> CaptureStats;
}

impl<B: MediaBackend> Camera for CameraDevice<B> {
    fn init(&mut self, config: &CameraInitConfig) -> bool {
        CameraDevice::init(self, config)
    }

    fn teardown(&mut self) {
        CameraDevice::teardown(self)
    }

    fn state(&self) -> CaptureState {
        CameraDevice::state(self)
    }

    fn stats(&self) -> CaptureStats {
        CameraDevice::stats(self)
    }
}

type CameraFactory = Box<dyn Fn(CameraImageCallback) -> Box<dyn Camera> + Send + Sync>;

/// Camera constructors keyed by registration name.
pub struct CameraRegistry {
    factories: HashMap<String, CameraFactory>,
}

impl CameraRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in cameras: `stub_camera` always, and
    /// `rtsp_camera` when built with FFmpeg support.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(STUB_CAMERA, |callback| -> Box<dyn Camera> {
            Box::new(CameraDevice::new(
                SyntheticBackend::pattern(STUB_WIDTH, STUB_HEIGHT),
                callback,
            ))
        });
        #[cfg(feature = "rtsp-ffmpeg")]
        registry.register(RTSP_CAMERA, |callback| -> Box<dyn Camera> {
            Box::new(CameraDevice::new(crate::ingest::FfmpegBackend::new(), callback))
        });
        registry
    }

    /// Register a constructor. A later registration replaces an earlier one
    /// with the same name.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(CameraImageCallback) -> Box<dyn Camera> + Send + Sync + 'static,
    {
        if self
            .factories
            .insert(name.to_string(), Box::new(factory))
            .is_some()
        {
            log::warn!("camera '{}' re-registered", name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Construct a registered camera.
    pub fn create(&self, name: &str, callback: CameraImageCallback) -> Result<Box<dyn Camera>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            anyhow!(
                "camera '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            )
        })?;
        Ok(factory(callback))
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for CameraRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CameraImageData;
    use std::sync::Arc;

    #[test]
    fn defaults_include_stub_camera() {
        let registry = CameraRegistry::with_defaults();
        assert!(registry.contains(STUB_CAMERA));
        assert_eq!(registry.contains(RTSP_CAMERA), cfg!(feature = "rtsp-ffmpeg"));
    }

    #[test]
    fn unknown_camera_is_an_error() {
        let registry = CameraRegistry::new();
        let callback: CameraImageCallback = Arc::new(|_: Arc<CameraImageData>| {});
        let err = registry.create("thermal", callback).err().expect("not registered");
        assert!(err.to_string().contains("thermal"));
    }

    #[test]
    fn created_camera_starts_idle() -> Result<()> {
        let registry = CameraRegistry::with_defaults();
        let callback: CameraImageCallback = Arc::new(|_: Arc<CameraImageData>| {});
        let mut camera = registry.create(STUB_CAMERA, callback)?;
        assert_eq!(camera.state(), CaptureState::Idle);
        camera.teardown();
        assert_eq!(camera.state(), CaptureState::Stopped);
        Ok(())
    }
}
