//! FFmpeg media backend (feature: rtsp-ffmpeg).
//!
//! Sessions are libavformat inputs opened over RTSP/TCP, decoders are
//! libavcodec video decoders, and conversion plans are libswscale contexts.
//!
//! Opening a session performs the transport handshake only; stream info is
//! read in `probe`, so the two failures stay distinguishable.

use ffmpeg_next as ffmpeg;
use std::ffi::CString;
use std::ptr;

use super::address::SessionAddress;
use super::convert::ConversionPlan;
use super::decoder::{DecodeStatus, DecodedFrame, VideoDecoder};
use super::session::{
    AccessUnit, MediaKind, ReadOutcome, SessionOptions, StreamInfo, StreamSession,
};
use super::MediaBackend;
use crate::error::{CaptureError, Result};
use crate::frame::PixelLayout;

use ffmpeg::ffi;
use ffmpeg::format::context::Input;
use ffmpeg::software::scaling;
use ffmpeg::util::error::EAGAIN;
use ffmpeg::util::format::pixel::Pixel;

#[derive(Clone, Copy, Debug, Default)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Self {
        Self
    }
}

impl MediaBackend for FfmpegBackend {
    type Unit = FfmpegUnit;
    type Frame = FfmpegFrame;
    type Session = FfmpegSession;
    type Decoder = FfmpegDecoder;
    type Plan = FfmpegPlan;

    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn connect(&self, address: &SessionAddress, options: &SessionOptions) -> Result<FfmpegSession> {
        let connect_error = |reason: String| CaptureError::Connect {
            address: address.redacted().to_string(),
            reason,
        };

        ffmpeg::init().map_err(|err| connect_error(format!("initialize ffmpeg: {err}")))?;

        let mut dictionary = ffmpeg::Dictionary::new();
        for (key, value) in options.transport_options() {
            dictionary.set(key, &value);
        }

        let input = open_input(address.as_str(), dictionary).map_err(connect_error)?;

        log::info!("connected to {} (ffmpeg)", address);
        Ok(FfmpegSession {
            input: Some(input),
            probed: false,
        })
    }

    fn open_decoder(&self, session: &FfmpegSession, stream: &StreamInfo) -> Result<FfmpegDecoder> {
        let input = session
            .input
            .as_ref()
            .ok_or_else(|| CaptureError::DecoderInit("session closed".to_string()))?;
        let source = input
            .streams()
            .find(|s| s.index() == stream.index)
            .ok_or_else(|| {
                CaptureError::DecoderInit(format!("stream #{} not found", stream.index))
            })?;

        let parameters = source.parameters();
        if ffmpeg::codec::decoder::find(parameters.id()).is_none() {
            return Err(CaptureError::UnsupportedCodec(stream.codec.clone()));
        }

        let context = ffmpeg::codec::context::Context::from_parameters(parameters)
            .map_err(|err| CaptureError::DecoderInit(format!("load decoder parameters: {err}")))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|err| CaptureError::DecoderInit(format!("open video decoder: {err}")))?;

        Ok(FfmpegDecoder { decoder })
    }

    fn build_plan(&self, frame: &FfmpegFrame, layout: PixelLayout) -> Result<FfmpegPlan> {
        let source = &frame.0;
        let (width, height) = (source.width(), source.height());
        let target = match layout {
            PixelLayout::Rgb => Pixel::RGB24,
            PixelLayout::Bgr => Pixel::BGR24,
            PixelLayout::Gray => Pixel::GRAY8,
        };

        let context = scaling::Context::get(
            source.format(),
            width,
            height,
            target,
            width,
            height,
            scaling::Flags::BILINEAR,
        )
        .map_err(|err| CaptureError::ConversionPlan(err.to_string()))?;

        Ok(FfmpegPlan {
            scaler: Scaler(context),
            output: ffmpeg::frame::Video::new(target, width, height),
            layout,
        })
    }
}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

pub struct FfmpegUnit(ffmpeg::Packet);

impl AccessUnit for FfmpegUnit {
    fn stream_index(&self) -> usize {
        self.0.stream()
    }
}

pub struct FfmpegSession {
    input: Option<Input>,
    probed: bool,
}

/// `avformat_open_input` without the stream-info pass that
/// `format::input_with_dictionary` adds.
fn open_input(url: &str, options: ffmpeg::Dictionary) -> std::result::Result<Input, String> {
    let url = CString::new(url).map_err(|_| "address contains a NUL byte".to_string())?;
    let mut context = ptr::null_mut();

    // SAFETY: `context` starts null, as avformat_open_input requires. The
    // options dictionary is handed over and taken back before returning; on
    // failure libavformat frees the context itself, on success `Input` owns
    // it and closes it on drop.
    unsafe {
        let mut raw_options = options.disown();
        let code =
            ffi::avformat_open_input(&mut context, url.as_ptr(), ptr::null_mut(), &mut raw_options);
        drop(ffmpeg::Dictionary::own(raw_options));
        if code < 0 {
            return Err(ffmpeg::Error::from(code).to_string());
        }
        Ok(Input::wrap(context))
    }
}

impl StreamSession for FfmpegSession {
    type Unit = FfmpegUnit;

    fn probe(&mut self) -> Result<Vec<StreamInfo>> {
        let input = self
            .input
            .as_mut()
            .ok_or_else(|| CaptureError::StreamInfo("session closed".to_string()))?;

        if !self.probed {
            // SAFETY: the format context is open and owned by `input`.
            let code = unsafe { ffi::avformat_find_stream_info(input.as_mut_ptr(), ptr::null_mut()) };
            if code < 0 {
                return Err(CaptureError::StreamInfo(
                    ffmpeg::Error::from(code).to_string(),
                ));
            }
            self.probed = true;
        }

        let streams: Vec<StreamInfo> = input
            .streams()
            .map(|stream| {
                let parameters = stream.parameters();
                StreamInfo {
                    index: stream.index(),
                    media: media_kind(parameters.medium()),
                    codec: parameters.id().name().to_string(),
                }
            })
            .collect();

        if streams.is_empty() {
            return Err(CaptureError::StreamInfo("no streams advertised".to_string()));
        }
        Ok(streams)
    }

    fn read_unit(&mut self) -> ReadOutcome<FfmpegUnit> {
        let Some(input) = self.input.as_mut() else {
            return ReadOutcome::Failed(CaptureError::Read("session closed".to_string()));
        };

        let mut packet = ffmpeg::Packet::empty();
        match packet.read(input) {
            Ok(()) => ReadOutcome::Unit(FfmpegUnit(packet)),
            Err(ffmpeg::Error::Eof) => ReadOutcome::EndOfStream,
            Err(ffmpeg::Error::Other { errno }) if errno == EAGAIN => ReadOutcome::Retry,
            Err(err) => ReadOutcome::Failed(CaptureError::Read(err.to_string())),
        }
    }

    fn close(&mut self) {
        // Dropping the input closes the connection.
        self.input.take();
    }
}

fn media_kind(medium: ffmpeg::media::Type) -> MediaKind {
    match medium {
        ffmpeg::media::Type::Video => MediaKind::Video,
        ffmpeg::media::Type::Audio => MediaKind::Audio,
        ffmpeg::media::Type::Data => MediaKind::Data,
        ffmpeg::media::Type::Subtitle => MediaKind::Subtitle,
        ffmpeg::media::Type::Attachment => MediaKind::Attachment,
        ffmpeg::media::Type::Unknown => MediaKind::Unknown,
    }
}

// ----------------------------------------------------------------------------
// Decoder
// ----------------------------------------------------------------------------

pub struct FfmpegFrame(ffmpeg::frame::Video);

impl DecodedFrame for FfmpegFrame {
    fn width(&self) -> u32 {
        self.0.width()
    }

    fn height(&self) -> u32 {
        self.0.height()
    }
}

pub struct FfmpegDecoder {
    decoder: ffmpeg::codec::decoder::Video,
}

impl VideoDecoder for FfmpegDecoder {
    type Unit = FfmpegUnit;
    type Frame = FfmpegFrame;

    fn submit(&mut self, unit: &FfmpegUnit) -> Result<()> {
        self.decoder
            .send_packet(&unit.0)
            .map_err(|err| CaptureError::Decode(err.to_string()))
    }

    fn receive(&mut self) -> Result<DecodeStatus<FfmpegFrame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        match self.decoder.receive_frame(&mut decoded) {
            Ok(()) => Ok(DecodeStatus::Frame(FfmpegFrame(decoded))),
            Err(ffmpeg::Error::Other { errno }) if errno == EAGAIN => Ok(DecodeStatus::Pending),
            Err(ffmpeg::Error::Eof) => Ok(DecodeStatus::EndOfStream),
            Err(err) => Err(CaptureError::Decode(err.to_string())),
        }
    }
}

// ----------------------------------------------------------------------------
// Conversion
// ----------------------------------------------------------------------------

struct Scaler(scaling::Context);

// SAFETY: the swscale context holds no thread-local state. It is owned by one
// conversion plan, and every use goes through the conversion context's mutex.
unsafe impl Send for Scaler {}

pub struct FfmpegPlan {
    scaler: Scaler,
    output: ffmpeg::frame::Video,
    layout: PixelLayout,
}

impl ConversionPlan for FfmpegPlan {
    type Frame = FfmpegFrame;

    fn run(&mut self, frame: &FfmpegFrame, dst: &mut [u8]) -> Result<()> {
        self.scaler
            .0
            .run(&frame.0, &mut self.output)
            .map_err(|err| CaptureError::Conversion(err.to_string()))?;
        copy_packed_rows(&self.output, self.layout.channels(), dst)
    }
}

/// Copy the first plane of `frame` into `dst`, dropping row padding.
fn copy_packed_rows(frame: &ffmpeg::frame::Video, channels: usize, dst: &mut [u8]) -> Result<()> {
    let row_bytes = frame.width() as usize * channels;
    let height = frame.height() as usize;
    if dst.len() != row_bytes * height {
        return Err(CaptureError::Conversion(format!(
            "destination length mismatch: expected {}, got {}",
            row_bytes * height,
            dst.len()
        )));
    }

    if row_bytes == 0 {
        return Ok(());
    }

    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let src = data.get(..dst.len()).ok_or_else(|| {
            CaptureError::Conversion("converted plane is shorter than expected".to_string())
        })?;
        dst.copy_from_slice(src);
        return Ok(());
    }

    for (row, out) in dst.chunks_exact_mut(row_bytes).enumerate() {
        let start = row * stride;
        let src = data.get(start..start + row_bytes).ok_or_else(|| {
            CaptureError::Conversion("converted frame row is out of bounds".to_string())
        })?;
        out.copy_from_slice(src);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraInitConfig;

    #[test]
    fn refused_handshake_is_a_connect_error() {
        let config = CameraInitConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            user: Some("admin".to_string()),
            password: Some("secret".to_string()),
            ..CameraInitConfig::default()
        };
        let address = SessionAddress::from_config(&config).expect("address");
        let options = SessionOptions {
            io_timeout: std::time::Duration::from_secs(1),
            ..SessionOptions::default()
        };

        let err = FfmpegBackend::new()
            .connect(&address, &options)
            .err()
            .expect("nothing listens on port 1");
        match err {
            CaptureError::Connect { address, .. } => assert!(!address.contains("secret")),
            other => panic!("expected a connect error, got {other:?}"),
        }
    }

    #[test]
    fn probing_a_closed_session_is_a_stream_info_error() {
        let mut session = FfmpegSession {
            input: None,
            probed: false,
        };
        assert!(matches!(session.probe(), Err(CaptureError::StreamInfo(_))));
        assert!(matches!(
            session.read_unit(),
            ReadOutcome::Failed(CaptureError::Read(_))
        ));
    }
}
