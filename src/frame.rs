//! Delivered frame types.
//!
//! - `ColorMode`: the image mode a camera is configured for.
//! - `PixelLayout`: the subset of modes the converter can produce.
//! - `Image`: an owned, tightly packed 8-bit pixel buffer.
//! - `CameraImageData`: one delivered frame with camera metadata.
//!
//! Frames are handed to consumers as `Arc<CameraImageData>` and are never
//! mutated after dispatch.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::CaptureError;

/// Image mode requested in the camera configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    #[default]
    Rgb,
    Bgr,
    Gray,
    Rgba,
    Yuv420,
}

impl ColorMode {
    /// Destination layout for this mode. Only RGB, BGR and GRAY are produced.
    pub fn layout(self) -> Result<PixelLayout, CaptureError> {
        match self {
            ColorMode::Rgb => Ok(PixelLayout::Rgb),
            ColorMode::Bgr => Ok(PixelLayout::Bgr),
            ColorMode::Gray => Ok(PixelLayout::Gray),
            other => Err(CaptureError::UnsupportedLayout(other.to_string())),
        }
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColorMode::Rgb => "rgb",
            ColorMode::Bgr => "bgr",
            ColorMode::Gray => "gray",
            ColorMode::Rgba => "rgba",
            ColorMode::Yuv420 => "yuv420",
        };
        f.write_str(name)
    }
}

impl FromStr for ColorMode {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rgb" => Ok(ColorMode::Rgb),
            "bgr" => Ok(ColorMode::Bgr),
            "gray" | "grey" => Ok(ColorMode::Gray),
            "rgba" => Ok(ColorMode::Rgba),
            "yuv420" => Ok(ColorMode::Yuv420),
            other => Err(CaptureError::UnsupportedLayout(other.to_string())),
        }
    }
}

/// Packed 8-bit destination layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelLayout {
    Rgb,
    Bgr,
    Gray,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Rgb | PixelLayout::Bgr => 3,
            PixelLayout::Gray => 1,
        }
    }

    /// Bytes needed for a packed `width x height` image, or `None` on overflow.
    pub fn buffer_len(self, width: u32, height: u32) -> Option<usize> {
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|px| px.checked_mul(self.channels()))
    }
}

/// Owned, tightly packed image. Row stride is `width * channels`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    data: Vec<u8>,
}

impl Image {
    pub(crate) fn from_packed(
        width: u32,
        height: u32,
        layout: PixelLayout,
        data: Vec<u8>,
    ) -> Result<Self, CaptureError> {
        let expected = layout.buffer_len(width, height).ok_or_else(|| {
            CaptureError::Conversion(format!("image dimensions overflow: {width}x{height}"))
        })?;
        if data.len() != expected {
            return Err(CaptureError::Conversion(format!(
                "image length mismatch: expected {}, got {}",
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            layout,
            data,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn stride(&self) -> usize {
        self.width as usize * self.layout.channels()
    }

    /// Pixel at `(x, y)`, one byte per channel.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let channels = self.layout.channels();
        let start = y as usize * self.stride() + x as usize * channels;
        self.data.get(start..start + channels)
    }
}

/// One frame delivered to the consumer callback.
#[derive(Clone, Debug)]
pub struct CameraImageData {
    pub image: Image,
    pub width: u32,
    pub height: u32,
    pub mode: PixelLayout,
    pub device_id: u32,
    pub camera_name: String,
    pub camera_manufacturer: String,
    pub lens_type: String,
    pub timestamp: SystemTime,
    pub sequence_num: u64,
}

impl CameraImageData {
    /// Capture time in seconds since the Unix epoch.
    pub fn timestamp_secs(&self) -> f64 {
        self.timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Consumer callback. Runs on the capture thread; it must return promptly.
pub type CameraImageCallback = Arc<dyn Fn(Arc<CameraImageData>) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_packed_modes_have_layouts() {
        assert_eq!(ColorMode::Rgb.layout().unwrap(), PixelLayout::Rgb);
        assert_eq!(ColorMode::Bgr.layout().unwrap(), PixelLayout::Bgr);
        assert_eq!(ColorMode::Gray.layout().unwrap(), PixelLayout::Gray);
        assert!(matches!(
            ColorMode::Rgba.layout(),
            Err(CaptureError::UnsupportedLayout(_))
        ));
        assert!(matches!(
            ColorMode::Yuv420.layout(),
            Err(CaptureError::UnsupportedLayout(_))
        ));
    }

    #[test]
    fn color_mode_parses_case_insensitively() {
        assert_eq!("BGR".parse::<ColorMode>().unwrap(), ColorMode::Bgr);
        assert_eq!("grey".parse::<ColorMode>().unwrap(), ColorMode::Gray);
        assert!("hsv".parse::<ColorMode>().is_err());
    }

    #[test]
    fn image_rejects_wrong_length() {
        let err = Image::from_packed(2, 2, PixelLayout::Rgb, vec![0; 11]).unwrap_err();
        assert!(err.to_string().contains("expected 12"));
    }

    #[test]
    fn image_pixel_lookup_respects_stride() {
        let data: Vec<u8> = (0..12).collect();
        let image = Image::from_packed(2, 2, PixelLayout::Rgb, data).unwrap();
        assert_eq!(image.stride(), 6);
        assert_eq!(image.pixel(1, 1), Some(&[9u8, 10, 11][..]));
        assert_eq!(image.pixel(2, 0), None);
    }
}
