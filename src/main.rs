use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};

use prusa_timelapse::config::constants;
use prusa_timelapse::notifier::Notifier;
use prusa_timelapse::process::CommandRunner;
use prusa_timelapse::sanitizer::{ENCODE_RESERVED_OPTIONS, sanitize, sanitize_with_reserved};
use prusa_timelapse::{
    CaptureDriver, Config, PrintLogWriter, PrinterService, Shutdown, SnapshotUploader,
    SystemRunner, TimelapseMonitor, VideoAssembler, WebhookNotifier,
};

/// Prusa Timelapse - automatic print timelapses for PrusaLink printers.
///
/// Polls the printer, captures a still every capture interval while a print
/// is running, and assembles the frames into `<prints dir>/<date>_<job>.mp4`
/// when the print ends.
///
/// # Environment Variables
///
/// Required:
/// * `PRUSA_PRINTER_HOST` - Printer hostname or IP address
/// * `PRUSA_API_KEY` - PrusaLink API key
///
/// Optional (with defaults):
/// * `POLL_INTERVAL_SECONDS` - Status poll period (default: "10")
/// * `CAPTURE_INTERVAL_SECONDS` - Frame capture period (default: "30")
/// * `IMAGE_WIDTH` / `IMAGE_HEIGHT` - Still resolution (default: "1920" / "1080")
/// * `CAMERA_ROTATION` - 0, 90, 180 or 270 (default: "0")
/// * `FOCUS_DISTANCE` - Focus distance in cm, 10 to 100 (default: "22")
/// * `VIDEO_FPS` - Output frame rate (default: "30")
/// * `VIDEO_QUALITY` - x264 CRF, 0 to 51 (default: "23")
/// * `VIDEO_BATCH_SIZE` - Frames per encoder pass (default: "150")
/// * `RPICAM_EXTRA_PARAMS` / `VIDEO_EXTRA_PARAMS` - Extra capture / encoder arguments
/// * `PRINTS_DIR` - Output directory (default: "$HOME/prints")
/// * `PRUSA_CONNECT_CAMERA_TOKEN` / `PRUSA_CONNECT_CAMERA_FINGERPRINT` - Live snapshots
/// * `DISCORD_WEBHOOK` - Completion notices
///
/// # Usage
///
/// ```bash
/// export PRUSA_PRINTER_HOST="192.168.1.50"
/// export PRUSA_API_KEY="..."
/// export CAMERA_ROTATION="180"
/// ./prusa-timelapse
/// ```
fn main() -> Result<()> {
    // Initialize logger to output to stdout, using RUST_LOG env var or info level by default
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Stdout)
        .filter_level(
            std::env::var("RUST_LOG")
                .ok()
                .and_then(|level| level.parse().ok())
                .unwrap_or(log::LevelFilter::Info),
        )
        .init();

    let config = Config::load().context(
        "Failed to load configuration. Please ensure all required environment variables are set.",
    )?;

    info!("Prusa Timelapse starting...");
    info!("Using PrusaLink API: {}", config.api_base_url());
    info!(
        "Capturing {}x{} every {}s, rotation {}°, focus {}cm",
        config.image_width,
        config.image_height,
        config.capture_interval_seconds,
        config.camera_rotation.degrees(),
        config.focus_distance_cm
    );

    // Bad extra parameters only fail the operations that use them, but say so up front.
    if let Err(e) = sanitize(&config.extra_capture_params) {
        warn!("RPICAM_EXTRA_PARAMS rejected, captures will be skipped: {}", e);
    }
    if let Err(e) = sanitize_with_reserved(&config.extra_encode_params, &ENCODE_RESERVED_OPTIONS)
    {
        warn!("VIDEO_EXTRA_PARAMS rejected, videos will not be assembled: {}", e);
    }

    fs::create_dir_all(&config.prints_dir).with_context(|| {
        format!(
            "Failed to create prints directory {}",
            config.prints_dir.display()
        )
    })?;
    info!("Saving timelapses to: {}", config.prints_dir.display());

    let shutdown = Shutdown::new();
    let handler = shutdown.clone();
    ctrlc::set_handler(move || {
        if handler.is_requested() {
            warn!("Stop forced, abandoning work in progress");
        } else {
            info!("Stop requested, saving the current print (Ctrl-C again to abandon)");
        }
        handler.request();
    })?;

    // Initialize services
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new(shutdown.clone()));
    let printer = PrinterService::new(
        config.api_base_url(),
        config.api_key.clone(),
        Duration::from_secs(constants::STATUS_TIMEOUT_SECONDS),
    )?;
    let capture = CaptureDriver::new(
        runner.clone(),
        config.capture_program.clone(),
        config.capture_timeout(),
    );
    let assembler = VideoAssembler::new(
        runner,
        config.ffmpeg_program.clone(),
        config.encode_timeout(),
    );

    let mut notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(PrintLogWriter::new(
        config.capture_interval_seconds,
    ))];
    if let Some(url) = &config.webhook_url {
        info!("Discord notifications enabled");
        notifiers.push(Box::new(WebhookNotifier::new(
            url.clone(),
            constants::WEBHOOK_ATTACHMENT_LIMIT_BYTES,
        )));
    }

    let uploader = match &config.prusa_connect {
        Some(camera) => match SnapshotUploader::spawn(
            camera.clone(),
            constants::PRUSA_CONNECT_SNAPSHOT_URL.to_string(),
            Duration::from_secs(constants::UPLOAD_TIMEOUT_SECONDS),
            constants::UPLOAD_QUEUE_DEPTH,
        ) {
            Ok(uploader) => {
                info!("Prusa Connect live snapshots enabled");
                Some(uploader)
            }
            Err(e) => {
                error!("Failed to start Prusa Connect uploader: {}", e);
                None
            }
        },
        None => None,
    };

    let mut monitor = TimelapseMonitor::new(
        config,
        Box::new(printer),
        capture,
        assembler,
        notifiers,
        uploader,
    );

    info!("Prusa Timelapse initialized successfully. Starting monitoring loop...");
    monitor.run(&shutdown);
    Ok(())
}
