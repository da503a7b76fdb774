//! Synthetic media backend.
//!
//! Used by `stub_camera` and by tests. A synthetic session replays a script
//! of read outcomes; once the script is exhausted it either idles (transient
//! reads forever) or, in pattern mode, produces one frame per unit at a fixed
//! interval. Decoded frames are NV12 and plans convert them to RGB, BGR or
//! GRAY with BT.601 coefficients.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::address::SessionAddress;
use super::convert::ConversionPlan;
use super::decoder::{DecodeStatus, DecodedFrame, VideoDecoder};
use super::session::{AccessUnit, ReadOutcome, SessionOptions, StreamInfo, StreamSession};
use super::MediaBackend;
use crate::error::{CaptureError, Result};
use crate::frame::PixelLayout;

const SUPPORTED_CODECS: &[&str] = &["h264", "hevc", "mjpeg"];
const PATTERN_INTERVAL: Duration = Duration::from_millis(40);

/// Names of released resources, in release order.
pub type ReleaseLog = Arc<Mutex<Vec<&'static str>>>;

fn record_release(log: &Option<ReleaseLog>, what: &'static str) {
    if let Some(log) = log {
        log.lock().unwrap_or_else(PoisonError::into_inner).push(what);
    }
}

/// One scripted read outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyntheticRead {
    /// A unit on `stream_index` that decodes into frames of the given sizes.
    Unit {
        stream_index: usize,
        frames: Vec<(u32, u32)>,
    },
    /// A unit that flushes the decoder; it reports end of stream afterwards.
    DecoderEnd,
    Retry,
    EndOfStream,
    Fail(String),
}

impl SyntheticRead {
    pub fn unit(stream_index: usize, frames: &[(u32, u32)]) -> Self {
        SyntheticRead::Unit {
            stream_index,
            frames: frames.to_vec(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Tail {
    Idle,
    Pattern { width: u32, height: u32 },
}

#[derive(Clone, Debug)]
pub struct SyntheticBackend {
    streams: Vec<StreamInfo>,
    reads: Vec<SyntheticRead>,
    tail: Tail,
    connect_failure: Option<String>,
    probe_failure: Option<String>,
    decoder_failure: Option<String>,
    release_log: Option<ReleaseLog>,
}

impl SyntheticBackend {
    /// One H.264 video stream at index 0, empty script, idle afterwards.
    pub fn new() -> Self {
        Self {
            streams: vec![StreamInfo::video(0, "h264")],
            reads: Vec::new(),
            tail: Tail::Idle,
            connect_failure: None,
            probe_failure: None,
            decoder_failure: None,
            release_log: None,
        }
    }

    /// Endless stream of `width x height` frames, one per unit.
    pub fn pattern(width: u32, height: u32) -> Self {
        Self {
            tail: Tail::Pattern { width, height },
            ..Self::new()
        }
    }

    pub fn with_streams(mut self, streams: Vec<StreamInfo>) -> Self {
        self.streams = streams;
        self
    }

    pub fn with_reads(mut self, reads: impl IntoIterator<Item = SyntheticRead>) -> Self {
        self.reads.extend(reads);
        self
    }

    pub fn refusing_connections(mut self, reason: &str) -> Self {
        self.connect_failure = Some(reason.to_string());
        self
    }

    pub fn failing_probe(mut self, reason: &str) -> Self {
        self.probe_failure = Some(reason.to_string());
        self
    }

    pub fn failing_decoder_init(mut self, reason: &str) -> Self {
        self.decoder_failure = Some(reason.to_string());
        self
    }

    /// Record "session", "decoder" and "plan" into `log` as each is dropped.
    pub fn recording_releases(mut self, log: ReleaseLog) -> Self {
        self.release_log = Some(log);
        self
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaBackend for SyntheticBackend {
    type Unit = SyntheticUnit;
    type Frame = SyntheticPicture;
    type Session = SyntheticSession;
    type Decoder = SyntheticDecoder;
    type Plan = SyntheticPlan;

    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn connect(&self, address: &SessionAddress, _options: &SessionOptions) -> Result<SyntheticSession> {
        if let Some(reason) = &self.connect_failure {
            return Err(CaptureError::Connect {
                address: address.redacted().to_string(),
                reason: reason.clone(),
            });
        }
        log::info!("connected to {} (synthetic)", address);
        Ok(SyntheticSession {
            streams: self.streams.clone(),
            probe_failure: self.probe_failure.clone(),
            reads: self.reads.iter().cloned().collect(),
            tail: self.tail,
            video_index: self.streams.first().map(|s| s.index).unwrap_or(0),
            closed: false,
            release_log: self.release_log.clone(),
        })
    }

    fn open_decoder(&self, _session: &SyntheticSession, stream: &StreamInfo) -> Result<SyntheticDecoder> {
        if !SUPPORTED_CODECS.contains(&stream.codec.as_str()) {
            return Err(CaptureError::UnsupportedCodec(stream.codec.clone()));
        }
        if let Some(reason) = &self.decoder_failure {
            return Err(CaptureError::DecoderInit(reason.clone()));
        }
        Ok(SyntheticDecoder {
            pending: VecDeque::new(),
            flushed: false,
            produced: 0,
            release_log: self.release_log.clone(),
        })
    }

    fn build_plan(&self, frame: &SyntheticPicture, layout: PixelLayout) -> Result<SyntheticPlan> {
        if frame.width == 0 || frame.height == 0 {
            return Err(CaptureError::ConversionPlan(format!(
                "invalid source size {}x{}",
                frame.width, frame.height
            )));
        }
        Ok(SyntheticPlan {
            width: frame.width,
            height: frame.height,
            layout,
            release_log: self.release_log.clone(),
        })
    }
}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct SyntheticUnit {
    stream_index: usize,
    frames: Vec<(u32, u32)>,
    flush: bool,
}

impl AccessUnit for SyntheticUnit {
    fn stream_index(&self) -> usize {
        self.stream_index
    }
}

pub struct SyntheticSession {
    streams: Vec<StreamInfo>,
    probe_failure: Option<String>,
    reads: VecDeque<SyntheticRead>,
    tail: Tail,
    video_index: usize,
    closed: bool,
    release_log: Option<ReleaseLog>,
}

impl StreamSession for SyntheticSession {
    type Unit = SyntheticUnit;

    fn probe(&mut self) -> Result<Vec<StreamInfo>> {
        if let Some(reason) = &self.probe_failure {
            return Err(CaptureError::StreamInfo(reason.clone()));
        }
        if let Some(video) = super::session::select_video_stream(&self.streams) {
            self.video_index = video.index;
        }
        Ok(self.streams.clone())
    }

    fn read_unit(&mut self) -> ReadOutcome<SyntheticUnit> {
        if self.closed {
            return ReadOutcome::Failed(CaptureError::Read("session closed".to_string()));
        }
        match self.reads.pop_front() {
            Some(SyntheticRead::Unit {
                stream_index,
                frames,
            }) => ReadOutcome::Unit(SyntheticUnit {
                stream_index,
                frames,
                flush: false,
            }),
            Some(SyntheticRead::DecoderEnd) => ReadOutcome::Unit(SyntheticUnit {
                stream_index: self.video_index,
                frames: Vec::new(),
                flush: true,
            }),
            Some(SyntheticRead::Retry) => ReadOutcome::Retry,
            Some(SyntheticRead::EndOfStream) => ReadOutcome::EndOfStream,
            Some(SyntheticRead::Fail(reason)) => {
                ReadOutcome::Failed(CaptureError::Read(reason))
            }
            None => match self.tail {
                Tail::Idle => ReadOutcome::Retry,
                Tail::Pattern { width, height } => {
                    std::thread::sleep(PATTERN_INTERVAL);
                    ReadOutcome::Unit(SyntheticUnit {
                        stream_index: self.video_index,
                        frames: vec![(width, height)],
                        flush: false,
                    })
                }
            },
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.reads.clear();
    }
}

impl Drop for SyntheticSession {
    fn drop(&mut self) {
        record_release(&self.release_log, "session");
    }
}

// ----------------------------------------------------------------------------
// Decoder
// ----------------------------------------------------------------------------

/// NV12 picture: a full-resolution Y plane followed by interleaved U/V at
/// half resolution in both directions (rounded up).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticPicture {
    width: u32,
    height: u32,
    nv12: Vec<u8>,
}

impl SyntheticPicture {
    fn chroma_dims(width: u32, height: u32) -> (usize, usize) {
        (width.div_ceil(2) as usize, height.div_ceil(2) as usize)
    }

    /// Picture with constant luma and chroma.
    pub fn uniform(width: u32, height: u32, y: u8, u: u8, v: u8) -> Self {
        let luma = width as usize * height as usize;
        let (cw, ch) = Self::chroma_dims(width, height);
        let mut nv12 = vec![y; luma];
        for _ in 0..cw * ch {
            nv12.push(u);
            nv12.push(v);
        }
        Self {
            width,
            height,
            nv12,
        }
    }

    /// Diagonal luma ramp shifted by `seed`, neutral chroma.
    fn ramp(width: u32, height: u32, seed: u64) -> Self {
        let mut picture = Self::uniform(width, height, 0, 128, 128);
        let w = width as usize;
        for (i, pixel) in picture.nv12[..w * height as usize].iter_mut().enumerate() {
            let (x, y) = (i % w, i / w);
            *pixel = ((x as u64 + y as u64 + seed) % 256) as u8;
        }
        picture
    }
}

impl DecodedFrame for SyntheticPicture {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}

pub struct SyntheticDecoder {
    pending: VecDeque<(u32, u32)>,
    flushed: bool,
    produced: u64,
    release_log: Option<ReleaseLog>,
}

impl Drop for SyntheticDecoder {
    fn drop(&mut self) {
        record_release(&self.release_log, "decoder");
    }
}

impl VideoDecoder for SyntheticDecoder {
    type Unit = SyntheticUnit;
    type Frame = SyntheticPicture;

    fn submit(&mut self, unit: &SyntheticUnit) -> Result<()> {
        if unit.frames.iter().any(|&(w, h)| w == 0 || h == 0) {
            return Err(CaptureError::Decode("corrupt access unit".to_string()));
        }
        self.pending.extend(unit.frames.iter().copied());
        self.flushed |= unit.flush;
        Ok(())
    }

    fn receive(&mut self) -> Result<DecodeStatus<SyntheticPicture>> {
        match self.pending.pop_front() {
            Some((width, height)) => {
                let picture = SyntheticPicture::ramp(width, height, self.produced);
                self.produced += 1;
                Ok(DecodeStatus::Frame(picture))
            }
            None if self.flushed => Ok(DecodeStatus::EndOfStream),
            None => Ok(DecodeStatus::Pending),
        }
    }
}

// ----------------------------------------------------------------------------
// Conversion
// ----------------------------------------------------------------------------

pub struct SyntheticPlan {
    width: u32,
    height: u32,
    layout: PixelLayout,
    release_log: Option<ReleaseLog>,
}

impl Drop for SyntheticPlan {
    fn drop(&mut self) {
        record_release(&self.release_log, "plan");
    }
}

impl ConversionPlan for SyntheticPlan {
    type Frame = SyntheticPicture;

    fn run(&mut self, frame: &SyntheticPicture, dst: &mut [u8]) -> Result<()> {
        if frame.width != self.width || frame.height != self.height {
            return Err(CaptureError::Conversion(format!(
                "plan built for {}x{}, got {}x{}",
                self.width, self.height, frame.width, frame.height
            )));
        }
        nv12_to_packed(frame, self.layout, dst)
    }
}

fn nv12_to_packed(frame: &SyntheticPicture, layout: PixelLayout, dst: &mut [u8]) -> Result<()> {
    let w = frame.width as usize;
    let h = frame.height as usize;
    let y_plane = w * h;
    let (cw, ch) = SyntheticPicture::chroma_dims(frame.width, frame.height);
    let expected = y_plane + cw * ch * 2;
    if frame.nv12.len() != expected {
        return Err(CaptureError::Conversion(format!(
            "NV12 frame length mismatch: expected {}, got {}",
            expected,
            frame.nv12.len()
        )));
    }
    let channels = layout.channels();
    if dst.len() != y_plane * channels {
        return Err(CaptureError::Conversion(format!(
            "destination length mismatch: expected {}, got {}",
            y_plane * channels,
            dst.len()
        )));
    }

    if layout == PixelLayout::Gray {
        dst.copy_from_slice(&frame.nv12[..y_plane]);
        return Ok(());
    }

    let pixels = &frame.nv12;
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * cw * 2 + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;

            let r = clamp_to_u8(y + 1.402_f32 * v);
            let g = clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v);
            let b = clamp_to_u8(y + 1.772_f32 * u);

            let offset = (j * w + i) * 3;
            let px = match layout {
                PixelLayout::Bgr => [b, g, r],
                _ => [r, g, b],
            };
            dst[offset..offset + 3].copy_from_slice(&px);
        }
    }

    Ok(())
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_chroma_converts_to_gray_rgb() -> Result<()> {
        let frame = SyntheticPicture::uniform(2, 2, 128, 128, 128);
        let mut dst = vec![0u8; 12];
        nv12_to_packed(&frame, PixelLayout::Rgb, &mut dst)?;
        assert_eq!(dst, vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn odd_dimensions_round_chroma_up() -> Result<()> {
        let frame = SyntheticPicture::uniform(3, 3, 10, 128, 128);
        assert_eq!(frame.nv12.len(), 9 + 2 * 2 * 2);
        let mut dst = vec![0u8; 27];
        nv12_to_packed(&frame, PixelLayout::Bgr, &mut dst)?;
        assert!(dst.iter().all(|&p| p == 10));
        Ok(())
    }

    #[test]
    fn destination_length_is_checked() {
        let frame = SyntheticPicture::uniform(2, 2, 0, 128, 128);
        let mut dst = vec![0u8; 5];
        assert!(nv12_to_packed(&frame, PixelLayout::Gray, &mut dst).is_err());
    }

    #[test]
    fn script_then_idle() {
        let backend = SyntheticBackend::new().with_reads([
            SyntheticRead::Fail("reset".to_string()),
            SyntheticRead::EndOfStream,
        ]);
        let address = SessionAddress::from_config(&crate::config::CameraInitConfig::default())
            .expect("default address");
        let mut session = backend
            .connect(&address, &SessionOptions::default())
            .expect("connect");
        assert!(matches!(
            session.read_unit(),
            ReadOutcome::Failed(CaptureError::Read(reason)) if reason == "reset"
        ));
        assert!(matches!(session.read_unit(), ReadOutcome::EndOfStream));
        assert!(matches!(session.read_unit(), ReadOutcome::Retry));
        session.close();
        session.close();
        assert!(matches!(session.read_unit(), ReadOutcome::Failed(_)));
    }

    #[test]
    fn corrupt_units_fail_to_decode() {
        let mut decoder = SyntheticDecoder {
            pending: VecDeque::new(),
            flushed: false,
            produced: 0,
            release_log: None,
        };
        let unit = SyntheticUnit {
            stream_index: 0,
            frames: vec![(0, 4)],
            flush: false,
        };
        assert!(matches!(decoder.submit(&unit), Err(CaptureError::Decode(_))));
        assert!(matches!(decoder.receive(), Ok(DecodeStatus::Pending)));
    }
}
