use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Camera mounting rotation, applied clockwise to encoded video and uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    None,
    Clockwise90,
    Clockwise180,
    Clockwise270,
}

impl Rotation {
    /// Parse a rotation given in degrees. Only right angles are accepted.
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Clockwise90),
            180 => Some(Rotation::Clockwise180),
            270 => Some(Rotation::Clockwise270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Clockwise90 => 90,
            Rotation::Clockwise180 => 180,
            Rotation::Clockwise270 => 270,
        }
    }

    /// The ffmpeg video filter implementing this rotation, if any.
    pub fn transpose_filter(self) -> Option<&'static str> {
        match self {
            Rotation::None => None,
            Rotation::Clockwise90 => Some("transpose=1"),
            Rotation::Clockwise180 => Some("transpose=1,transpose=1"),
            Rotation::Clockwise270 => Some("transpose=2"),
        }
    }
}

/// Credentials for relaying live snapshots to Prusa Connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrusaConnectCamera {
    pub token: String,
    pub fingerprint: String,
}

/// Configuration for the timelapse monitor loaded from environment variables.
///
/// All values are read once at start-up. Everything except the two free-form
/// parameter strings is validated here; those strings go through the
/// sanitizer each time they are used.
#[derive(Debug, Clone)]
pub struct Config {
    /// Printer hostname or IP address serving the PrusaLink API.
    /// Environment variable: `PRUSA_PRINTER_HOST`
    pub printer_host: String,

    /// PrusaLink API key, sent as `X-Api-Key`.
    /// Environment variable: `PRUSA_API_KEY`
    pub api_key: String,

    /// Seconds between printer status polls.
    /// Environment variable: `POLL_INTERVAL_SECONDS`
    pub poll_interval_seconds: u64,

    /// Seconds between timelapse frames while printing.
    /// Environment variable: `CAPTURE_INTERVAL_SECONDS`
    pub capture_interval_seconds: u64,

    /// Still resolution.
    /// Environment variables: `IMAGE_WIDTH`, `IMAGE_HEIGHT`
    pub image_width: u32,
    pub image_height: u32,

    /// Environment variable: `CAMERA_ROTATION` (0, 90, 180 or 270)
    pub camera_rotation: Rotation,

    /// Distance from lens to subject, 10 to 100 cm.
    /// Environment variable: `FOCUS_DISTANCE`
    pub focus_distance_cm: u32,

    /// Environment variable: `VIDEO_FPS`
    pub video_fps: u32,

    /// Constant rate factor, lower is better quality (0 to 51).
    /// Environment variable: `VIDEO_QUALITY`
    pub video_quality: u32,

    /// Maximum frames encoded by a single encoder invocation.
    ///
    /// This bounds the encoder's peak memory on small boards; sessions longer
    /// than this are encoded in segments and joined without re-encoding.
    /// Environment variable: `VIDEO_BATCH_SIZE`
    pub video_batch_size: usize,

    /// Extra `rpicam-still` arguments, unsanitized.
    /// Environment variable: `RPICAM_EXTRA_PARAMS`
    pub extra_capture_params: String,

    /// Extra ffmpeg output arguments, unsanitized.
    /// Environment variable: `VIDEO_EXTRA_PARAMS`
    pub extra_encode_params: String,

    /// Where per-print frame directories, videos and logs are written.
    /// Environment variables: `PRINTS_DIR`, or `PRINTS_DIR_NAME` under `$HOME`
    pub prints_dir: PathBuf,

    /// Consecutive failed polls tolerated; one more enters ERROR.
    /// Environment variable: `POLL_FAILURE_THRESHOLD`
    pub poll_failure_threshold: u32,

    /// Environment variable: `CAPTURE_TIMEOUT_SECONDS`
    pub capture_timeout_seconds: u64,

    /// Deadline for each individual encoder invocation.
    /// Environment variable: `ENCODE_TIMEOUT_SECONDS`
    pub encode_timeout_seconds: u64,

    /// Environment variable: `CAPTURE_COMMAND`
    pub capture_program: String,

    /// Environment variable: `FFMPEG_COMMAND`
    pub ffmpeg_program: String,

    /// Live snapshot relay, enabled when both
    /// `PRUSA_CONNECT_CAMERA_TOKEN` and `PRUSA_CONNECT_CAMERA_FINGERPRINT` are set.
    pub prusa_connect: Option<PrusaConnectCamera>,

    /// Discord webhook URL for completion notices.
    /// Environment variable: `DISCORD_WEBHOOK`
    pub webhook_url: Option<String>,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `PRUSA_PRINTER_HOST` or `PRUSA_API_KEY` is missing,
    /// or if any variable holds a value outside its valid range.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let printer_host = get("PRUSA_PRINTER_HOST").ok_or_else(|| ConfigError::MissingEnvVar {
            var_name: "PRUSA_PRINTER_HOST".to_string(),
        })?;
        let api_key = get("PRUSA_API_KEY").ok_or_else(|| ConfigError::MissingEnvVar {
            var_name: "PRUSA_API_KEY".to_string(),
        })?;

        let poll_interval_seconds = parse_positive(&get, "POLL_INTERVAL_SECONDS", 10)?;
        let capture_interval_seconds = parse_positive(&get, "CAPTURE_INTERVAL_SECONDS", 30)?;
        let image_width = parse_positive(&get, "IMAGE_WIDTH", 1920)?;
        let image_height = parse_positive(&get, "IMAGE_HEIGHT", 1080)?;

        let rotation_degrees: u32 = parse_or(&get, "CAMERA_ROTATION", 0)?;
        let camera_rotation =
            Rotation::from_degrees(rotation_degrees).ok_or_else(|| ConfigError::InvalidValue {
                field: "CAMERA_ROTATION".to_string(),
                value: rotation_degrees.to_string(),
                reason: "must be 0, 90, 180 or 270".to_string(),
            })?;

        let focus_distance_cm: u32 = parse_or(&get, "FOCUS_DISTANCE", 22)?;
        if !(constants::MIN_FOCUS_DISTANCE_CM..=constants::MAX_FOCUS_DISTANCE_CM)
            .contains(&focus_distance_cm)
        {
            return Err(ConfigError::InvalidValue {
                field: "FOCUS_DISTANCE".to_string(),
                value: focus_distance_cm.to_string(),
                reason: format!(
                    "must be between {} and {} cm",
                    constants::MIN_FOCUS_DISTANCE_CM,
                    constants::MAX_FOCUS_DISTANCE_CM
                ),
            });
        }

        let video_fps = parse_positive(&get, "VIDEO_FPS", 30)?;
        let video_quality: u32 = parse_or(&get, "VIDEO_QUALITY", 23)?;
        if video_quality > constants::MAX_CRF {
            return Err(ConfigError::InvalidValue {
                field: "VIDEO_QUALITY".to_string(),
                value: video_quality.to_string(),
                reason: format!("must be between 0 and {}", constants::MAX_CRF),
            });
        }
        let video_batch_size = parse_positive(&get, "VIDEO_BATCH_SIZE", 150)?;

        let prints_dir = match get("PRINTS_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let name = lookup("PRINTS_DIR_NAME").unwrap_or_else(|| "prints".to_string());
                let name = name.trim();
                if name.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "PRINTS_DIR_NAME".to_string(),
                        value: String::new(),
                        reason: "cannot be empty".to_string(),
                    });
                }
                let home = get("HOME").unwrap_or_else(|| ".".to_string());
                PathBuf::from(home).join(name)
            }
        };

        let prusa_connect = match (
            get("PRUSA_CONNECT_CAMERA_TOKEN"),
            get("PRUSA_CONNECT_CAMERA_FINGERPRINT"),
        ) {
            (Some(token), Some(fingerprint)) => Some(PrusaConnectCamera { token, fingerprint }),
            (None, None) => None,
            (token, _) => {
                let missing = if token.is_none() {
                    "PRUSA_CONNECT_CAMERA_TOKEN"
                } else {
                    "PRUSA_CONNECT_CAMERA_FINGERPRINT"
                };
                return Err(ConfigError::InvalidValue {
                    field: missing.to_string(),
                    value: String::new(),
                    reason: "camera token and fingerprint must be set together".to_string(),
                });
            }
        };

        Ok(Config {
            printer_host,
            api_key,
            poll_interval_seconds,
            capture_interval_seconds,
            image_width,
            image_height,
            camera_rotation,
            focus_distance_cm,
            video_fps,
            video_quality,
            video_batch_size,
            extra_capture_params: get("RPICAM_EXTRA_PARAMS").unwrap_or_default(),
            extra_encode_params: get("VIDEO_EXTRA_PARAMS").unwrap_or_default(),
            prints_dir,
            poll_failure_threshold: parse_positive(
                &get,
                "POLL_FAILURE_THRESHOLD",
                constants::DEFAULT_POLL_FAILURE_THRESHOLD,
            )?,
            capture_timeout_seconds: parse_positive(&get, "CAPTURE_TIMEOUT_SECONDS", 10)?,
            encode_timeout_seconds: parse_positive(&get, "ENCODE_TIMEOUT_SECONDS", 300)?,
            capture_program: get("CAPTURE_COMMAND")
                .unwrap_or_else(|| constants::DEFAULT_CAPTURE_PROGRAM.to_string()),
            ffmpeg_program: get("FFMPEG_COMMAND")
                .unwrap_or_else(|| constants::DEFAULT_FFMPEG_PROGRAM.to_string()),
            prusa_connect,
            webhook_url: get("DISCORD_WEBHOOK"),
        })
    }

    /// Base URL of the PrusaLink v1 API.
    pub fn api_base_url(&self) -> String {
        format!("http://{}/api/v1", self.printer_host)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_secs(self.capture_interval_seconds)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_seconds)
    }

    pub fn encode_timeout(&self) -> Duration {
        Duration::from_secs(self.encode_timeout_seconds)
    }
}

fn parse_or<G, T>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
            field: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_positive<G, T>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialOrd + Default + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    let value = parse_or(get, key, default)?;
    if value <= T::default() {
        return Err(ConfigError::InvalidValue {
            field: key.to_string(),
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

/// Application constants used throughout the system.
pub mod constants {
    pub const DEFAULT_CAPTURE_PROGRAM: &str = "rpicam-still";

    pub const DEFAULT_FFMPEG_PROGRAM: &str = "ffmpeg";

    pub const DEFAULT_POLL_FAILURE_THRESHOLD: u32 = 6;

    pub const MIN_FOCUS_DISTANCE_CM: u32 = 10;

    pub const MAX_FOCUS_DISTANCE_CM: u32 = 100;

    /// Upper bound of the x264 constant rate factor.
    pub const MAX_CRF: u32 = 51;

    /// Timeout for the status and job info requests, in seconds.
    pub const STATUS_TIMEOUT_SECONDS: u64 = 20;

    /// Timeout for a single live snapshot upload, in seconds.
    pub const UPLOAD_TIMEOUT_SECONDS: u64 = 10;

    /// Snapshots waiting for upload before new ones are dropped.
    pub const UPLOAD_QUEUE_DEPTH: usize = 2;

    /// Prusa Connect camera snapshot endpoint.
    pub const PRUSA_CONNECT_SNAPSHOT_URL: &str = "https://webcam.connect.prusa3d.com/c/snapshot";

    /// Largest video attached to a webhook notice, in bytes.
    pub const WEBHOOK_ATTACHMENT_LIMIT_BYTES: u64 = 25 * 1024 * 1024;

    /// How often blocking waits re-check the shutdown flag, in milliseconds.
    pub const SHUTDOWN_POLL_MILLIS: u64 = 200;
}
