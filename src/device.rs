//! Camera device.
//!
//! `CameraDevice` is the public unit: `init` opens the session and decoder
//! on the caller's thread and, on success, hands both to a dedicated capture
//! thread. Teardown (explicit or on drop) clears the running flag, joins the
//! thread and releases the conversion plan. Teardown is idempotent and safe
//! whether or not `init` ever succeeded.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::config::CameraInitConfig;
use crate::error::{CaptureError, Result};
use crate::frame::CameraImageCallback;
use crate::ingest::capture::{CaptureLoop, CaptureShared, FrameMetadata, FrameSink, Pipeline};
use crate::ingest::{
    CaptureState, CaptureStats, ConversionContext, DecodeContext, MediaBackend, SessionAddress,
    SessionHandle, SessionOptions,
};

pub struct CameraDevice<B: MediaBackend> {
    backend: Arc<B>,
    callback: CameraImageCallback,
    options: SessionOptions,
    shared: Arc<CaptureShared>,
    conversion: Arc<Mutex<ConversionContext<B>>>,
    worker: Option<JoinHandle<()>>,
    camera_name: String,
    address: Option<SessionAddress>,
}

impl<B: MediaBackend> CameraDevice<B> {
    pub fn new(backend: B, callback: CameraImageCallback) -> Self {
        let backend = Arc::new(backend);
        log::info!("camera device created ({} backend)", backend.name());
        Self {
            conversion: Arc::new(Mutex::new(ConversionContext::new(
                Arc::clone(&backend),
                Default::default(),
            ))),
            backend,
            callback,
            options: SessionOptions::default(),
            shared: Arc::new(CaptureShared::new()),
            worker: None,
            camera_name: String::new(),
            address: None,
        }
    }

    /// Override the transport options used by the next `init`.
    pub fn with_session_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Start capturing. Returns false if the session or decoder could not be
    /// opened; the reason is logged. No thread is started on failure.
    pub fn init(&mut self, config: &CameraInitConfig) -> bool {
        self.try_init(config).is_ok()
    }

    /// Like `init`, returning the reason on failure.
    pub fn try_init(&mut self, config: &CameraInitConfig) -> Result<()> {
        {
            let mut state = self.shared.lock_state();
            if *state != CaptureState::Idle {
                return Err(CaptureError::AlreadyStarted(*state));
            }
            *state = CaptureState::Connecting;
        }
        self.shared.running.store(true, Ordering::SeqCst);
        self.camera_name = config.camera_name.clone();

        match self.start(config) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.shared.running.store(false, Ordering::SeqCst);
                self.shared.set_state(CaptureState::ErrorStopped);
                log::error!("camera {}: init failed: {}", self.camera_name, err);
                Err(err)
            }
        }
    }

    fn start(&mut self, config: &CameraInitConfig) -> Result<()> {
        if let Err(err) = config.color_mode.layout() {
            log::warn!(
                "camera {}: {}; every frame will be dropped",
                config.camera_name,
                err
            );
        }

        let address = SessionAddress::from_config(config)?;
        log::info!("camera {}: connecting to {}", config.camera_name, address);
        self.address = Some(address.clone());

        let session = SessionHandle::open(&*self.backend, &address, &self.options)?;
        let decoder = DecodeContext::open(&*self.backend, &session)?;
        self.lock_conversion().configure(config.color_mode);

        let sink = FrameSink {
            conversion: Arc::clone(&self.conversion),
            shared: Arc::clone(&self.shared),
            metadata: FrameMetadata {
                device_id: config.device_id,
                camera_name: config.camera_name.clone(),
                camera_manufacturer: config.camera_manufacturer.clone(),
                lens_type: config.lens_type.clone(),
            },
            callback: Arc::clone(&self.callback),
        };
        let capture = CaptureLoop::new(
            Pipeline { decoder, session },
            sink,
            config.max_transient_retries,
        );

        // Set before spawning so a fast terminal exit is never overwritten.
        self.shared
            .transition(CaptureState::Connecting, CaptureState::Streaming);
        let handle = thread::Builder::new()
            .name(format!("capture-{}", config.camera_name))
            .spawn(move || capture.run())?;
        self.worker = Some(handle);

        log::info!(
            "camera {}: streaming ({} mode)",
            config.camera_name,
            config.color_mode
        );
        Ok(())
    }

    /// Stop capturing and release resources. Blocks until the capture
    /// thread has exited. Safe to call more than once.
    pub fn teardown(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared
            .transition(CaptureState::Streaming, CaptureState::Stopping);

        if let Some(handle) = self.worker.take() {
            log::info!("camera {}: stopping capture thread", self.camera_name);
            if handle.join().is_err() {
                log::error!("camera {}: capture thread panicked", self.camera_name);
                self.shared.set_state(CaptureState::ErrorStopped);
            }
        }

        self.shared
            .transition(CaptureState::Stopping, CaptureState::Stopped);
        self.shared.transition(CaptureState::Idle, CaptureState::Stopped);
        self.lock_conversion().release_plan();
    }

    pub fn state(&self) -> CaptureState {
        self.shared.state()
    }

    pub fn stats(&self) -> CaptureStats {
        let mut stats = self.shared.stats();
        let conversion = self.lock_conversion();
        stats.plan_builds = conversion.plan_builds();
        stats.plan_rebuilds = conversion.plan_rebuilds();
        stats
    }

    /// True while a capture thread is attached (started and not yet joined).
    pub fn has_capture_thread(&self) -> bool {
        self.worker.is_some()
    }

    /// Address of the last `init` attempt, if one was built.
    pub fn address(&self) -> Option<&SessionAddress> {
        self.address.as_ref()
    }

    pub fn camera_name(&self) -> &str {
        &self.camera_name
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn lock_conversion(&self) -> MutexGuard<'_, ConversionContext<B>> {
        self.conversion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<B: MediaBackend> Drop for CameraDevice<B> {
    fn drop(&mut self) {
        self.teardown();
        log::info!("camera device {} released", self.camera_name);
    }
}
