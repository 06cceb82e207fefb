use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{CaptureError, ProcessError};
use crate::process::{CommandRunner, display_command};
use crate::sanitizer::ArgumentList;

/// Lens position for a manual-focus camera module.
///
/// The camera expects focus in dioptres, i.e. the reciprocal of the distance
/// in metres, which is `100 / cm`. The result is rounded to two decimals so the
/// value in logs and argument vectors is reproducible.
///
/// ```rust
/// assert_eq!(prusa_timelapse::capture::lens_position(22), 4.55);
/// ```
pub fn lens_position(focus_distance_cm: u32) -> f64 {
    (100.0 / focus_distance_cm as f64 * 100.0).round() / 100.0
}

/// Still capture through an external camera program (`rpicam-still`).
pub struct CaptureDriver {
    runner: Arc<dyn CommandRunner>,
    program: String,
    timeout: Duration,
}

impl CaptureDriver {
    /// Create a new CaptureDriver.
    ///
    /// # Arguments
    ///
    /// * `runner` - Subprocess runner used for every capture
    /// * `program` - Capture program name or path
    /// * `timeout` - Deadline for a single capture
    pub fn new(runner: Arc<dyn CommandRunner>, program: String, timeout: Duration) -> Self {
        Self {
            runner,
            program,
            timeout,
        }
    }

    /// Build the argument vector for one capture.
    pub fn build_args(
        output_path: &Path,
        width: u32,
        height: u32,
        extra_args: &ArgumentList,
        lens_position: f64,
    ) -> Vec<String> {
        let mut args = vec![
            "--width".to_string(),
            width.to_string(),
            "--height".to_string(),
            height.to_string(),
            "--output".to_string(),
            output_path.display().to_string(),
            "--nopreview".to_string(),
            "--autofocus-mode".to_string(),
            "manual".to_string(),
            "--timeout".to_string(),
            "1".to_string(),
            "--immediate".to_string(),
            "--lens-position".to_string(),
            lens_position.to_string(),
        ];
        args.extend(extra_args.iter().cloned());
        args
    }

    /// Capture a single still to `output_path`.
    ///
    /// A failed capture never leaves a partial file behind.
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be started, times out, exits
    /// unsuccessfully, or exits successfully without writing the image.
    pub fn capture(
        &self,
        output_path: &Path,
        width: u32,
        height: u32,
        extra_args: &ArgumentList,
        lens_position: f64,
    ) -> Result<(), CaptureError> {
        let args = Self::build_args(output_path, width, height, extra_args, lens_position);
        info!("Capturing image: {}", display_command(&self.program, &args));

        let result = match self.runner.run(&self.program, &args, self.timeout) {
            Ok(output) if output.success() => {
                if output_path.exists() {
                    debug!("Captured image: {}", output_path.display());
                    return Ok(());
                }
                Err(CaptureError::MissingOutput {
                    path: output_path.display().to_string(),
                })
            }
            Ok(output) => Err(CaptureError::NonZeroExit {
                code: output.code,
                stderr: output.stderr_tail(),
            }),
            Err(ProcessError::TimedOut {
                timeout_seconds, ..
            }) => Err(CaptureError::Timeout {
                path: output_path.display().to_string(),
                timeout_seconds,
            }),
            Err(ProcessError::Cancelled { .. }) => Err(CaptureError::Cancelled),
            Err(ProcessError::SpawnFailed { program, reason }) => {
                Err(CaptureError::ProcessSpawnFailed { program, reason })
            }
            Err(ProcessError::WaitFailed { reason, .. }) => Err(CaptureError::NonZeroExit {
                code: None,
                stderr: reason,
            }),
        };

        match fs::remove_file(output_path) {
            Ok(()) => debug!("Removed partial frame {}", output_path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove partial frame {}: {}",
                output_path.display(),
                e
            ),
        }
        result
    }
}
