//! rtsp_camerad - RTSP camera capture daemon
//!
//! This daemon:
//! 1. Loads the camera configuration (file, environment, then flags)
//! 2. Creates the configured camera from the registry
//! 3. Logs capture throughput periodically until Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use rtsp_capture::{Camera, CameraImageData, CameraRegistry, CaptureConfig, ColorMode};

#[derive(Parser, Debug)]
#[command(author, version, about = "Capture frames from an RTSP camera")]
struct Args {
    /// Registered camera to create (rtsp_camera, stub_camera).
    #[arg(long)]
    camera: Option<String>,

    /// Camera host; overrides the configured host.
    #[arg(long)]
    host: Option<String>,

    /// Channel index; overrides the configured channel.
    #[arg(long)]
    channel: Option<u32>,

    /// Output color mode (rgb, bgr, gray).
    #[arg(long, value_name = "MODE")]
    mode: Option<ColorMode>,

    /// Seconds between throughput log lines.
    #[arg(long, default_value_t = 10)]
    stats_interval: u64,

    /// List registered cameras and exit.
    #[arg(long)]
    list: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let registry = CameraRegistry::with_defaults();

    if args.list {
        for name in registry.list() {
            println!("{name}");
        }
        return Ok(());
    }

    let mut config = CaptureConfig::load()?;
    if let Some(camera) = args.camera {
        config.backend = camera;
    }
    if let Some(host) = args.host {
        config.camera.host = host;
    }
    if let Some(channel) = args.channel {
        config.camera.channel = channel;
    }
    if let Some(mode) = args.mode {
        config.camera.color_mode = mode;
    }
    config.validate()?;

    let received = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&received);
    let mut camera = registry.create(
        &config.backend,
        Arc::new(move |_frame: Arc<CameraImageData>| {
            counter.fetch_add(1, Ordering::Relaxed);
        }),
    )?;

    if !camera.init(&config.camera) {
        return Err(anyhow!(
            "camera {} failed to start (state {:?})",
            config.camera.camera_name,
            camera.state()
        ));
    }
    log::info!(
        "rtsp_camerad running: {} ({}) channel {}",
        config.camera.camera_name,
        config.backend,
        config.camera.channel
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {e}"))?;

    let interval = Duration::from_secs(args.stats_interval.max(1));
    let mut last_count = 0u64;
    loop {
        match rx.recv_timeout(interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                log::info!("shutdown signal received, stopping capture...");
                break;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        let state = camera.state();
        let stats = camera.stats();
        let count = received.load(Ordering::Relaxed);
        log::info!(
            "state={:?} frames={} (+{}) dropped={} units={} plan_rebuilds={}",
            state,
            count,
            count - last_count,
            stats.frames_dropped,
            stats.units_read,
            stats.plan_rebuilds
        );
        last_count = count;

        if state.is_terminal() {
            log::warn!("capture ended ({:?}), exiting", state);
            break;
        }
    }

    camera.teardown();
    Ok(())
}
