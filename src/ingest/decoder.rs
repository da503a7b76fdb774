//! Video decoding.
//!
//! Decoding is submit-one, drain-many: one access unit may yield zero, one or
//! several frames. `DecodeContext::drain` exposes the frames available right
//! now as a finite iterator; callers drain it fully before the next submit.

use super::session::{SessionHandle, StreamInfo};
use super::MediaBackend;
use crate::error::{CaptureError, Result};

/// A decoded raster in the decoder's native pixel layout.
pub trait DecodedFrame {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
}

#[derive(Debug)]
pub enum DecodeStatus<F> {
    Frame(F),
    /// Would block: the decoder needs more input.
    Pending,
    /// The decoder has been fully flushed; no further output.
    EndOfStream,
}

pub trait VideoDecoder: Send {
    type Unit;
    type Frame: DecodedFrame;

    fn submit(&mut self, unit: &Self::Unit) -> Result<()>;
    fn receive(&mut self) -> Result<DecodeStatus<Self::Frame>>;
}

/// Decoder state for the session's selected video stream.
pub struct DecodeContext<D: VideoDecoder> {
    decoder: D,
    codec: String,
    finished: bool,
    frames_decoded: u64,
}

impl<D: VideoDecoder> DecodeContext<D> {
    pub fn open<B>(backend: &B, session: &SessionHandle<B::Session>) -> Result<Self>
    where
        B: MediaBackend<Decoder = D>,
    {
        let stream: &StreamInfo = session.video_stream();
        let decoder = backend.open_decoder(session.session(), stream)?;
        log::info!("decoder opened for stream #{} ({})", stream.index, stream.codec);
        Ok(Self {
            decoder,
            codec: stream.codec.clone(),
            finished: false,
            frames_decoded: 0,
        })
    }

    pub fn codec(&self) -> &str {
        &self.codec
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// True once the decoder reported end of stream.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn submit(&mut self, unit: &D::Unit) -> Result<()> {
        if self.finished {
            return Err(CaptureError::Decode(
                "decoder already reached end of stream".to_string(),
            ));
        }
        self.decoder.submit(unit)
    }

    pub fn drain(&mut self) -> Drain<'_, D> {
        Drain {
            context: self,
            done: false,
        }
    }
}

/// Frames available after the last submit.
///
/// Yields `Err` at most once; iteration stops after an error.
pub struct Drain<'a, D: VideoDecoder> {
    context: &'a mut DecodeContext<D>,
    done: bool,
}

impl<D: VideoDecoder> Drain<'_, D> {
    pub fn reached_end(&self) -> bool {
        self.context.finished
    }
}

impl<D: VideoDecoder> Iterator for Drain<'_, D> {
    type Item = Result<D::Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.context.finished {
            return None;
        }
        match self.context.decoder.receive() {
            Ok(DecodeStatus::Frame(frame)) => {
                self.context.frames_decoded += 1;
                Some(Ok(frame))
            }
            Ok(DecodeStatus::Pending) => {
                self.done = true;
                None
            }
            Ok(DecodeStatus::EndOfStream) => {
                self.done = true;
                self.context.finished = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraInitConfig;
    use crate::ingest::address::SessionAddress;
    use crate::ingest::session::{ReadOutcome, SessionOptions};
    use crate::ingest::synthetic::{SyntheticBackend, SyntheticRead};

    fn open(
        backend: &SyntheticBackend,
    ) -> Result<(
        SessionHandle<<SyntheticBackend as MediaBackend>::Session>,
        DecodeContext<<SyntheticBackend as MediaBackend>::Decoder>,
    )> {
        let address = SessionAddress::from_config(&CameraInitConfig::default())?;
        let session = SessionHandle::open(backend, &address, &SessionOptions::default())?;
        let decoder = DecodeContext::open(backend, &session)?;
        Ok((session, decoder))
    }

    #[test]
    fn one_unit_may_yield_several_frames() -> Result<()> {
        let backend = SyntheticBackend::new().with_reads([
            SyntheticRead::unit(0, &[]),
            SyntheticRead::unit(0, &[(4, 4), (4, 4), (4, 4)]),
        ]);
        let (mut session, mut decoder) = open(&backend)?;

        let mut counts = Vec::new();
        for _ in 0..2 {
            let ReadOutcome::Unit(unit) = session.read() else {
                panic!("expected a unit");
            };
            decoder.submit(&unit)?;
            counts.push(decoder.drain().collect::<Result<Vec<_>>>()?.len());
        }

        assert_eq!(counts, vec![0, 3]);
        assert_eq!(decoder.frames_decoded(), 3);
        Ok(())
    }

    #[test]
    fn end_of_stream_stops_submission() -> Result<()> {
        let backend = SyntheticBackend::new().with_reads([SyntheticRead::DecoderEnd]);
        let (mut session, mut decoder) = open(&backend)?;

        let ReadOutcome::Unit(unit) = session.read() else {
            panic!("expected a unit");
        };
        decoder.submit(&unit)?;
        let mut drain = decoder.drain();
        assert!(drain.next().is_none());
        assert!(drain.reached_end());
        assert!(decoder.is_finished());
        assert!(decoder.submit(&unit).is_err());
        Ok(())
    }

    #[test]
    fn unknown_codec_is_unsupported() {
        let backend = SyntheticBackend::new()
            .with_streams(vec![crate::ingest::StreamInfo::video(0, "theora")]);
        let err = open(&backend).err().expect("theora is not decodable");
        assert!(matches!(err, CaptureError::UnsupportedCodec(codec) if codec == "theora"));
    }

    #[test]
    fn decoder_activation_failure_is_reported() {
        let backend = SyntheticBackend::new().failing_decoder_init("missing extradata");
        let err = open(&backend).err().expect("decoder init must fail");
        assert!(matches!(err, CaptureError::DecoderInit(_)));
    }
}
