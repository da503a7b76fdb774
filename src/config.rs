use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::Path;

use crate::frame::ColorMode;
use crate::ingest::address::DEFAULT_RTSP_PORT;
use crate::ingest::VendorPath;

const DEFAULT_BACKEND: &str = crate::registry::RTSP_CAMERA;
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_CHANNEL: u32 = 1;
const DEFAULT_CAMERA_NAME: &str = "rtsp_camera";
const DEFAULT_MANUFACTURER: &str = "generic";
const DEFAULT_LENS_TYPE: &str = "pinhole";

pub const CONFIG_ENV: &str = "RTSP_CAMERA_CONFIG";

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    backend: Option<String>,
    camera: Option<CameraConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    name: Option<String>,
    manufacturer: Option<String>,
    lens_type: Option<String>,
    device_id: Option<u32>,
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    password: Option<String>,
    channel: Option<u32>,
    vendor: Option<VendorPath>,
    color_mode: Option<ColorMode>,
    max_transient_retries: Option<u32>,
}

/// Per-camera settings consumed by `CameraDevice::init`.
#[derive(Clone, PartialEq, Eq)]
pub struct CameraInitConfig {
    pub camera_name: String,
    pub camera_manufacturer: String,
    pub lens_type: String,
    pub device_id: u32,
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub channel: u32,
    pub vendor: VendorPath,
    pub color_mode: ColorMode,
    /// Consecutive "no data yet" reads tolerated before the capture loop
    /// gives up. `None` retries forever.
    pub max_transient_retries: Option<u32>,
}

impl Default for CameraInitConfig {
    fn default() -> Self {
        Self {
            camera_name: DEFAULT_CAMERA_NAME.to_string(),
            camera_manufacturer: DEFAULT_MANUFACTURER.to_string(),
            lens_type: DEFAULT_LENS_TYPE.to_string(),
            device_id: 0,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_RTSP_PORT,
            user: None,
            password: None,
            channel: DEFAULT_CHANNEL,
            vendor: VendorPath::default(),
            color_mode: ColorMode::default(),
            max_transient_retries: None,
        }
    }
}

impl fmt::Debug for CameraInitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraInitConfig")
            .field("camera_name", &self.camera_name)
            .field("camera_manufacturer", &self.camera_manufacturer)
            .field("lens_type", &self.lens_type)
            .field("device_id", &self.device_id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("channel", &self.channel)
            .field("vendor", &self.vendor)
            .field("color_mode", &self.color_mode)
            .field("max_transient_retries", &self.max_transient_retries)
            .finish()
    }
}

/// Daemon configuration: which registered camera to create and how.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub backend: String,
    pub camera: CameraInitConfig,
}

impl CaptureConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CaptureConfigFile) -> Self {
        let defaults = CameraInitConfig::default();
        let camera = file.camera.unwrap_or_default();
        Self {
            backend: file
                .backend
                .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
            camera: CameraInitConfig {
                camera_name: camera.name.unwrap_or(defaults.camera_name),
                camera_manufacturer: camera
                    .manufacturer
                    .unwrap_or(defaults.camera_manufacturer),
                lens_type: camera.lens_type.unwrap_or(defaults.lens_type),
                device_id: camera.device_id.unwrap_or(defaults.device_id),
                host: camera.host.unwrap_or(defaults.host),
                port: camera.port.unwrap_or(defaults.port),
                user: camera.user,
                password: camera.password,
                channel: camera.channel.unwrap_or(defaults.channel),
                vendor: camera.vendor.unwrap_or(defaults.vendor),
                color_mode: camera.color_mode.unwrap_or(defaults.color_mode),
                max_transient_retries: camera.max_transient_retries,
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("RTSP_CAMERA_HOST") {
            if !host.trim().is_empty() {
                self.camera.host = host.trim().to_string();
            }
        }
        if let Ok(port) = std::env::var("RTSP_CAMERA_PORT") {
            self.camera.port = port
                .trim()
                .parse()
                .map_err(|_| anyhow!("RTSP_CAMERA_PORT must be a port number"))?;
        }
        if let Ok(user) = std::env::var("RTSP_CAMERA_USER") {
            self.camera.user = Some(user);
        }
        if let Ok(password) = std::env::var("RTSP_CAMERA_PASSWORD") {
            self.camera.password = Some(password);
        }
        if let Ok(channel) = std::env::var("RTSP_CAMERA_CHANNEL") {
            self.camera.channel = channel
                .trim()
                .parse()
                .map_err(|_| anyhow!("RTSP_CAMERA_CHANNEL must be a positive integer"))?;
        }
        if let Ok(mode) = std::env::var("RTSP_CAMERA_MODE") {
            self.camera.color_mode = mode
                .parse()
                .with_context(|| format!("RTSP_CAMERA_MODE has unknown mode '{mode}'"))?;
        }
        if let Ok(retries) = std::env::var("RTSP_CAMERA_MAX_RETRIES") {
            let retries = retries.trim();
            self.camera.max_transient_retries = if retries.is_empty() {
                None
            } else {
                Some(retries.parse().map_err(|_| {
                    anyhow!("RTSP_CAMERA_MAX_RETRIES must be a non-negative integer")
                })?)
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend.trim().is_empty() {
            return Err(anyhow!("backend must not be empty"));
        }
        if self.camera.host.trim().is_empty() {
            return Err(anyhow!("camera host must not be empty"));
        }
        if self.camera.port == 0 {
            return Err(anyhow!("camera port must be greater than zero"));
        }
        if self.camera.channel == 0 {
            return Err(anyhow!("camera channel must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<CaptureConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_takes_defaults() {
        let cfg = CaptureConfig::from_file(CaptureConfigFile::default());
        assert_eq!(cfg.backend, "rtsp_camera");
        assert_eq!(cfg.camera.port, 554);
        assert_eq!(cfg.camera.channel, 1);
        assert_eq!(cfg.camera.vendor, VendorPath::Dahua);
        assert_eq!(cfg.camera.color_mode, ColorMode::Rgb);
        assert_eq!(cfg.camera.camera_name, "rtsp_camera");
        assert!(cfg.camera.max_transient_retries.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_zero_channel_and_port() {
        let mut cfg = CaptureConfig::from_file(CaptureConfigFile::default());
        cfg.camera.channel = 0;
        assert!(cfg.validate().is_err());

        cfg.camera.channel = 1;
        cfg.camera.port = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn debug_masks_password() {
        let cfg = CameraInitConfig {
            user: Some("admin".to_string()),
            password: Some("hunter2".to_string()),
            ..CameraInitConfig::default()
        };
        let rendered = format!("{cfg:?}");
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }
}
