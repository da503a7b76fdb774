//! Stream session.
//!
//! A `SessionHandle` owns one open transport/demux context and the index of
//! the selected video sub-stream (the first stream whose media type is video).
//! Handles are never reused: a reconnect needs a fresh handle.

use std::time::Duration;

use super::address::SessionAddress;
use super::MediaBackend;
use crate::error::{CaptureError, Result};

/// Socket I/O timeout. Also the upper bound on teardown latency.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RECEIVE_BUFFER_BYTES: usize = 1_024_000;

/// Transport options applied when a session is opened.
///
/// Transport is always RTSP over TCP (interleaved): out-of-order video
/// packets are useless to the decoder, so UDP is never negotiated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    pub io_timeout: Duration,
    pub receive_buffer_bytes: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            io_timeout: DEFAULT_IO_TIMEOUT,
            receive_buffer_bytes: DEFAULT_RECEIVE_BUFFER_BYTES,
        }
    }
}

impl SessionOptions {
    /// Key/value options for the demuxer (timeout in microseconds).
    pub fn transport_options(&self) -> Vec<(&'static str, String)> {
        vec![
            ("rtsp_transport", "tcp".to_string()),
            ("timeout", self.io_timeout.as_micros().to_string()),
            ("buffer_size", self.receive_buffer_bytes.to_string()),
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Data,
    Subtitle,
    Attachment,
    Unknown,
}

/// One probed sub-stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamInfo {
    pub index: usize,
    pub media: MediaKind,
    pub codec: String,
}

impl StreamInfo {
    pub fn video(index: usize, codec: &str) -> Self {
        Self {
            index,
            media: MediaKind::Video,
            codec: codec.to_string(),
        }
    }

    pub fn audio(index: usize, codec: &str) -> Self {
        Self {
            index,
            media: MediaKind::Audio,
            codec: codec.to_string(),
        }
    }
}

/// Result of one read from the session.
#[derive(Debug)]
pub enum ReadOutcome<U> {
    Unit(U),
    /// No data available yet; retry after a short backoff.
    Retry,
    EndOfStream,
    /// Terminal read error, always `CaptureError::Read`.
    Failed(CaptureError),
}

/// A compressed access unit.
pub trait AccessUnit {
    fn stream_index(&self) -> usize;
}

/// Open transport/demux context produced by `MediaBackend::connect`.
pub trait StreamSession: Send {
    type Unit: AccessUnit;

    /// Enumerate sub-streams. Fails when stream metadata cannot be probed.
    fn probe(&mut self) -> Result<Vec<StreamInfo>>;

    /// Read the next access unit. Blocks at most for the I/O timeout.
    fn read_unit(&mut self) -> ReadOutcome<Self::Unit>;

    /// Release the transport. Must be idempotent.
    fn close(&mut self);
}

/// First sub-stream whose media type is video.
pub fn select_video_stream(streams: &[StreamInfo]) -> Option<&StreamInfo> {
    streams.iter().find(|s| s.media == MediaKind::Video)
}

pub struct SessionHandle<S: StreamSession> {
    session: S,
    video: StreamInfo,
    address: String,
    closed: bool,
}

impl<S: StreamSession> SessionHandle<S> {
    /// Connect, probe and select the video stream.
    pub fn open<B>(backend: &B, address: &SessionAddress, options: &SessionOptions) -> Result<Self>
    where
        B: MediaBackend<Session = S>,
    {
        log::debug!("opening session {} via {}", address, backend.name());
        let mut session = backend.connect(address, options)?;

        let streams = match session.probe() {
            Ok(streams) => streams,
            Err(err) => {
                session.close();
                return Err(err);
            }
        };
        let Some(video) = select_video_stream(&streams).cloned() else {
            session.close();
            return Err(CaptureError::NoVideoStream);
        };

        log::info!(
            "session {} opened: {} streams, video stream #{} ({})",
            address,
            streams.len(),
            video.index,
            video.codec
        );
        Ok(Self {
            session,
            video,
            address: address.redacted().to_string(),
            closed: false,
        })
    }

    pub fn video_stream(&self) -> &StreamInfo {
        &self.video
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn read(&mut self) -> ReadOutcome<S::Unit> {
        if self.closed {
            return ReadOutcome::Failed(CaptureError::Read("session closed".to_string()));
        }
        self.session.read_unit()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.session.close();
        self.closed = true;
        log::info!("session {} closed", self.address);
    }
}

impl<S: StreamSession> Drop for SessionHandle<S> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraInitConfig;
    use crate::ingest::synthetic::SyntheticBackend;

    fn address() -> SessionAddress {
        SessionAddress::from_config(&CameraInitConfig::default()).unwrap()
    }

    #[test]
    fn selects_first_video_stream() {
        let streams = vec![
            StreamInfo::audio(0, "aac"),
            StreamInfo::video(1, "h264"),
            StreamInfo::video(2, "hevc"),
        ];
        assert_eq!(select_video_stream(&streams).unwrap().index, 1);
        assert!(select_video_stream(&streams[..1]).is_none());
    }

    #[test]
    fn transport_is_always_tcp() {
        let options = SessionOptions::default().transport_options();
        assert!(options.contains(&("rtsp_transport", "tcp".to_string())));
        assert!(options.contains(&("timeout", "5000000".to_string())));
        assert!(options.contains(&("buffer_size", "1024000".to_string())));
    }

    #[test]
    fn open_fails_without_video_stream() {
        let backend = SyntheticBackend::new().with_streams(vec![StreamInfo::audio(0, "aac")]);
        let err = SessionHandle::open(&backend, &address(), &SessionOptions::default())
            .err()
            .expect("audio-only session must not open");
        assert!(matches!(err, CaptureError::NoVideoStream));
    }

    #[test]
    fn open_reports_connect_and_probe_failures() {
        let backend = SyntheticBackend::new().refusing_connections("connection refused");
        let err = SessionHandle::open(&backend, &address(), &SessionOptions::default())
            .err()
            .expect("refused");
        assert!(matches!(err, CaptureError::Connect { .. }));

        let backend = SyntheticBackend::new().failing_probe("no sdp");
        let err = SessionHandle::open(&backend, &address(), &SessionOptions::default())
            .err()
            .expect("probe failure");
        assert!(matches!(err, CaptureError::StreamInfo(_)));
    }

    #[test]
    fn close_is_idempotent() {
        let backend = SyntheticBackend::new();
        let mut handle =
            SessionHandle::open(&backend, &address(), &SessionOptions::default()).unwrap();
        handle.close();
        handle.close();
        assert!(handle.is_closed());
        assert!(matches!(
            handle.read(),
            ReadOutcome::Failed(CaptureError::Read(_))
        ));
    }
}
