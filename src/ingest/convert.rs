//! Pixel format conversion.
//!
//! `ConversionContext` keeps one conversion plan and reuses it across frames.
//! The plan is rebuilt only when the incoming frame's width or height differs
//! from the dimensions it was built for. Every conversion writes into a newly
//! allocated buffer, so delivered images never alias decoder storage.

use std::sync::Arc;

use super::decoder::DecodedFrame;
use super::MediaBackend;
use crate::error::{CaptureError, Result};
use crate::frame::{ColorMode, Image, PixelLayout};

/// A prepared conversion for one (source format, dimensions) -> layout pair.
pub trait ConversionPlan: Send {
    type Frame: DecodedFrame;

    /// Convert `frame` into `dst`, which holds exactly
    /// `width * height * channels` bytes of tightly packed output.
    fn run(&mut self, frame: &Self::Frame, dst: &mut [u8]) -> Result<()>;
}

struct PlanSlot<P> {
    plan: P,
    width: u32,
    height: u32,
}

pub struct ConversionContext<B: MediaBackend> {
    backend: Arc<B>,
    mode: ColorMode,
    plan: Option<PlanSlot<B::Plan>>,
    builds: u64,
    rebuilds: u64,
}

impl<B: MediaBackend> ConversionContext<B> {
    pub fn new(backend: Arc<B>, mode: ColorMode) -> Self {
        Self {
            backend,
            mode,
            plan: None,
            builds: 0,
            rebuilds: 0,
        }
    }

    /// Set the target mode for a new session. Drops any existing plan.
    pub fn configure(&mut self, mode: ColorMode) {
        self.mode = mode;
        self.plan = None;
    }

    pub fn mode(&self) -> ColorMode {
        self.mode
    }

    pub fn convert(&mut self, frame: &B::Frame) -> Result<Image> {
        let layout = self.mode.layout()?;
        let (width, height) = (frame.width(), frame.height());

        let plan = self.plan_for(frame, layout, width, height)?;

        let len = layout.buffer_len(width, height).ok_or_else(|| {
            CaptureError::Conversion(format!("frame dimensions overflow: {width}x{height}"))
        })?;
        let mut data = vec![0u8; len];
        plan.run(frame, &mut data)?;

        Image::from_packed(width, height, layout, data)
    }

    fn plan_for(
        &mut self,
        frame: &B::Frame,
        layout: PixelLayout,
        width: u32,
        height: u32,
    ) -> Result<&mut B::Plan> {
        let stale = match &self.plan {
            None => true,
            Some(slot) => slot.width != width || slot.height != height,
        };

        if stale {
            if let Some(old) = self.plan.take() {
                log::warn!(
                    "frame size changed {}x{} -> {}x{}, rebuilding conversion plan",
                    old.width,
                    old.height,
                    width,
                    height
                );
                self.rebuilds += 1;
            }
            let plan = self
                .backend
                .build_plan(frame, layout)
                .map_err(|err| match err {
                    CaptureError::ConversionPlan(_) => err,
                    other => CaptureError::ConversionPlan(other.to_string()),
                })?;
            self.builds += 1;
            log::debug!("conversion plan built for {width}x{height} -> {layout:?}");
            self.plan = Some(PlanSlot {
                plan,
                width,
                height,
            });
        }

        match self.plan.as_mut() {
            Some(slot) => Ok(&mut slot.plan),
            None => Err(CaptureError::ConversionPlan(
                "no conversion plan available".to_string(),
            )),
        }
    }

    /// Dimensions the current plan was built for.
    pub fn plan_dims(&self) -> Option<(u32, u32)> {
        self.plan.as_ref().map(|slot| (slot.width, slot.height))
    }

    /// Plans built so far, including the first one.
    pub fn plan_builds(&self) -> u64 {
        self.builds
    }

    /// Plans replaced because the frame size changed.
    pub fn plan_rebuilds(&self) -> u64 {
        self.rebuilds
    }

    pub fn release_plan(&mut self) {
        if self.plan.take().is_some() {
            log::debug!("conversion plan released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::synthetic::{SyntheticBackend, SyntheticPicture};

    fn context(mode: ColorMode) -> ConversionContext<SyntheticBackend> {
        ConversionContext::new(Arc::new(SyntheticBackend::new()), mode)
    }

    #[test]
    fn rebuilds_only_when_dimensions_change() -> Result<()> {
        let mut ctx = context(ColorMode::Rgb);

        ctx.convert(&SyntheticPicture::uniform(8, 6, 100, 128, 128))?;
        assert_eq!((ctx.plan_builds(), ctx.plan_rebuilds()), (1, 0));

        ctx.convert(&SyntheticPicture::uniform(8, 6, 100, 128, 128))?;
        assert_eq!((ctx.plan_builds(), ctx.plan_rebuilds()), (1, 0));

        let image = ctx.convert(&SyntheticPicture::uniform(4, 2, 100, 128, 128))?;
        assert_eq!((ctx.plan_builds(), ctx.plan_rebuilds()), (2, 1));
        assert_eq!(ctx.plan_dims(), Some((4, 2)));
        assert_eq!((image.width, image.height), (4, 2));
        Ok(())
    }

    #[test]
    fn output_is_sized_for_layout() -> Result<()> {
        let frame = SyntheticPicture::uniform(5, 3, 90, 128, 128);

        let rgb = context(ColorMode::Rgb).convert(&frame)?;
        assert_eq!(rgb.as_bytes().len(), 5 * 3 * 3);

        let gray = context(ColorMode::Gray).convert(&frame)?;
        assert_eq!(gray.as_bytes().len(), 5 * 3);
        assert!(gray.as_bytes().iter().all(|&p| p == 90));
        Ok(())
    }

    #[test]
    fn bgr_swaps_red_and_blue() -> Result<()> {
        let frame = SyntheticPicture::uniform(2, 2, 128, 128, 255);

        let rgb = context(ColorMode::Rgb).convert(&frame)?;
        let bgr = context(ColorMode::Bgr).convert(&frame)?;
        assert_eq!(rgb.pixel(0, 0), Some(&[255u8, 37, 128][..]));
        assert_eq!(bgr.pixel(0, 0), Some(&[128u8, 37, 255][..]));
        Ok(())
    }

    #[test]
    fn unsupported_mode_fails_without_building_a_plan() {
        let mut ctx = context(ColorMode::Rgba);
        let err = ctx
            .convert(&SyntheticPicture::uniform(2, 2, 0, 128, 128))
            .unwrap_err();
        assert!(matches!(err, CaptureError::UnsupportedLayout(_)));
        assert_eq!(ctx.plan_builds(), 0);
    }

    #[test]
    fn configure_and_release_drop_the_plan() -> Result<()> {
        let mut ctx = context(ColorMode::Rgb);
        ctx.convert(&SyntheticPicture::uniform(2, 2, 0, 128, 128))?;
        ctx.release_plan();
        assert_eq!(ctx.plan_dims(), None);

        ctx.convert(&SyntheticPicture::uniform(2, 2, 0, 128, 128))?;
        ctx.configure(ColorMode::Gray);
        assert_eq!(ctx.plan_dims(), None);
        assert_eq!(ctx.mode(), ColorMode::Gray);
        Ok(())
    }
}
