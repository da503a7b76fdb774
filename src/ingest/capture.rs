//! Capture loop.
//!
//! State machine:
//!
//! ```text
//! Idle -> Connecting -> Streaming -> Stopping -> Stopped
//!             |             |
//!             +-------------+--> ErrorStopped
//! ```
//!
//! The loop runs on one dedicated thread. It owns the session and decoder
//! outright; the conversion context and the running flag are the only state
//! shared with the owning device. The flag is checked once per iteration, so
//! the session's read timeout bounds how long a stop request can take.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use super::convert::ConversionContext;
use super::decoder::DecodeContext;
use super::session::{AccessUnit, ReadOutcome, SessionHandle};
use super::MediaBackend;
use crate::error::CaptureError;
use crate::frame::{CameraImageCallback, CameraImageData};

/// Sleep between reads while the session reports no data yet.
pub const TRANSIENT_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Connecting,
    Streaming,
    Stopping,
    Stopped,
    ErrorStopped,
}

impl CaptureState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CaptureState::Stopped | CaptureState::ErrorStopped)
    }
}

/// Snapshot of capture counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub units_read: u64,
    pub transient_retries: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub plan_builds: u64,
    pub plan_rebuilds: u64,
}

/// State shared between a device and its capture thread.
pub(crate) struct CaptureShared {
    pub(crate) running: AtomicBool,
    state: Mutex<CaptureState>,
    sequence: AtomicU64,
    units_read: AtomicU64,
    transient_retries: AtomicU64,
    frames_delivered: AtomicU64,
    frames_dropped: AtomicU64,
}

impl CaptureShared {
    pub(crate) fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            state: Mutex::new(CaptureState::Idle),
            sequence: AtomicU64::new(0),
            units_read: AtomicU64::new(0),
            transient_retries: AtomicU64::new(0),
            frames_delivered: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> CaptureState {
        *self.lock_state()
    }

    pub(crate) fn set_state(&self, next: CaptureState) {
        let mut state = self.lock_state();
        if *state != next {
            log::debug!("capture state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    /// Move to `next` only if the current state is `from`.
    pub(crate) fn transition(&self, from: CaptureState, next: CaptureState) -> bool {
        let mut state = self.lock_state();
        if *state == from {
            log::debug!("capture state {:?} -> {:?}", from, next);
            *state = next;
            true
        } else {
            false
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn stats(&self) -> CaptureStats {
        CaptureStats {
            units_read: self.units_read.load(Ordering::Relaxed),
            transient_retries: self.transient_retries.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            plan_builds: 0,
            plan_rebuilds: 0,
        }
    }
}

/// Camera identity stamped onto every delivered frame.
#[derive(Clone, Debug)]
pub(crate) struct FrameMetadata {
    pub(crate) device_id: u32,
    pub(crate) camera_name: String,
    pub(crate) camera_manufacturer: String,
    pub(crate) lens_type: String,
}

/// Session and decoder for one capture run.
pub(crate) struct Pipeline<B: MediaBackend> {
    // Fields drop in declaration order: the decoder may reference
    // session-owned stream parameters, so it goes first.
    pub(crate) decoder: DecodeContext<B::Decoder>,
    pub(crate) session: SessionHandle<B::Session>,
}

/// Converts decoded frames and hands them to the consumer.
pub(crate) struct FrameSink<B: MediaBackend> {
    pub(crate) conversion: Arc<Mutex<ConversionContext<B>>>,
    pub(crate) shared: Arc<CaptureShared>,
    pub(crate) metadata: FrameMetadata,
    pub(crate) callback: CameraImageCallback,
}

impl<B: MediaBackend> FrameSink<B> {
    fn deliver(&self, frame: &B::Frame) {
        let converted = {
            let mut conversion = self
                .conversion
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            conversion.convert(frame)
        };

        let image = match converted {
            Ok(image) => image,
            Err(err) => {
                self.shared.frames_dropped.fetch_add(1, Ordering::Relaxed);
                log::error!(
                    "camera {}: dropping frame, conversion failed: {}",
                    self.metadata.camera_name,
                    err
                );
                return;
            }
        };

        let data = CameraImageData {
            width: image.width,
            height: image.height,
            mode: image.layout,
            image,
            device_id: self.metadata.device_id,
            camera_name: self.metadata.camera_name.clone(),
            camera_manufacturer: self.metadata.camera_manufacturer.clone(),
            lens_type: self.metadata.lens_type.clone(),
            timestamp: SystemTime::now(),
            sequence_num: self.shared.sequence.fetch_add(1, Ordering::SeqCst),
        };
        log::trace!(
            "camera {}: delivering frame #{} ({}x{})",
            data.camera_name,
            data.sequence_num,
            data.width,
            data.height
        );

        (self.callback)(Arc::new(data));
        self.shared.frames_delivered.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, PartialEq, Eq)]
enum LoopExit {
    Cancelled,
    EndOfStream,
    Failed,
}

pub(crate) struct CaptureLoop<B: MediaBackend> {
    pipeline: Option<Pipeline<B>>,
    sink: FrameSink<B>,
    max_transient_retries: Option<u32>,
}

impl<B: MediaBackend> CaptureLoop<B> {
    pub(crate) fn new(
        pipeline: Pipeline<B>,
        sink: FrameSink<B>,
        max_transient_retries: Option<u32>,
    ) -> Self {
        Self {
            pipeline: Some(pipeline),
            sink,
            max_transient_retries,
        }
    }

    /// Thread body. Returns once the loop reaches a terminal condition or
    /// the running flag is cleared.
    pub(crate) fn run(mut self) {
        let name = self.sink.metadata.camera_name.clone();
        log::info!("decoding thread started for camera {}", name);

        let exit = match self.pipeline.as_mut() {
            Some(pipeline) => pump(pipeline, &self.sink, self.max_transient_retries),
            None => LoopExit::Cancelled,
        };

        // Decoder, then session. The conversion plan is released by the device.
        drop(self.pipeline.take());

        let state = match exit {
            LoopExit::Cancelled | LoopExit::EndOfStream => CaptureState::Stopped,
            LoopExit::Failed => CaptureState::ErrorStopped,
        };
        self.sink.shared.set_state(state);

        log::info!(
            "decoding thread stopped for camera {} ({:?}, {} frames delivered)",
            name,
            exit,
            self.sink.shared.frames_delivered.load(Ordering::Relaxed)
        );
    }
}

fn pump<B: MediaBackend>(
    pipeline: &mut Pipeline<B>,
    sink: &FrameSink<B>,
    max_transient_retries: Option<u32>,
) -> LoopExit {
    let camera = &sink.metadata.camera_name;
    let video_index = pipeline.session.video_stream().index;
    let mut consecutive_retries: u32 = 0;

    while sink.shared.is_running() {
        let unit = match pipeline.session.read() {
            ReadOutcome::Unit(unit) => unit,
            ReadOutcome::Retry => {
                sink.shared.transient_retries.fetch_add(1, Ordering::Relaxed);
                consecutive_retries = consecutive_retries.saturating_add(1);
                if let Some(limit) = max_transient_retries {
                    if consecutive_retries > limit {
                        let err = CaptureError::Read(format!("no data after {limit} retries"));
                        log::error!("camera {}: {}, giving up", camera, err);
                        return LoopExit::Failed;
                    }
                }
                std::thread::sleep(TRANSIENT_BACKOFF);
                continue;
            }
            ReadOutcome::EndOfStream => {
                log::warn!("camera {}: end of stream reached", camera);
                return LoopExit::EndOfStream;
            }
            ReadOutcome::Failed(err) => {
                log::error!("camera {}: {}", camera, err);
                return LoopExit::Failed;
            }
        };

        consecutive_retries = 0;
        sink.shared.units_read.fetch_add(1, Ordering::Relaxed);

        if unit.stream_index() != video_index {
            log::trace!("camera {}: skipping unit on stream #{}", camera, unit.stream_index());
            continue;
        }

        decode_unit(&mut pipeline.decoder, sink, &unit);

        if pipeline.decoder.is_finished() {
            log::warn!("camera {}: decoder reached end of stream", camera);
            return LoopExit::EndOfStream;
        }
    }

    LoopExit::Cancelled
}

fn decode_unit<B: MediaBackend>(
    decoder: &mut DecodeContext<B::Decoder>,
    sink: &FrameSink<B>,
    unit: &B::Unit,
) {
    if let Err(err) = decoder.submit(unit) {
        log::error!(
            "camera {}: failed to decode frame: {}",
            sink.metadata.camera_name,
            err
        );
        return;
    }

    for decoded in decoder.drain() {
        match decoded {
            Ok(frame) => sink.deliver(&frame),
            Err(err) => log::error!(
                "camera {}: error receiving frame from decoder: {}",
                sink.metadata.camera_name,
                err
            ),
        }
    }
}

impl<B: MediaBackend> Drop for CaptureLoop<B> {
    fn drop(&mut self) {
        // A panicking consumer callback unwinds through here.
        if std::thread::panicking() {
            self.sink.shared.set_state(CaptureState::ErrorStopped);
        }
    }
}
