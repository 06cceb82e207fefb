//! Prusa Timelapse - automatic timelapse videos of PrusaLink printers.
//!
//! This library watches a printer's job state over the PrusaLink API, captures
//! a still on a fixed cadence while a print runs, and turns each print's frames
//! into a single H.264 video when it finishes. Encoding is split into batches
//! so that memory use stays bounded on small single-board computers.
//!
//! # Core Components
//!
//! * [`config`] - Configuration loaded from environment variables
//! * [`printer`] - PrusaLink status client
//! * [`sanitizer`] - Validation of operator-supplied subprocess arguments
//! * [`process`] - Subprocess execution with deadlines and cancellation
//! * [`capture`] - Still capture through `rpicam-still`
//! * [`assembler`] - Single-pass and batched video assembly with ffmpeg
//! * [`lifecycle`] - The print lifecycle monitor tying it all together
//! * [`notifier`] - Webhook and print-log notifications
//! * [`uploader`] - Live snapshot relay to Prusa Connect
//! * [`error`] - Error types for every component
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use prusa_timelapse::*;
//!
//! let config = Config::load()?;
//! let shutdown = Shutdown::new();
//! let runner: Arc<dyn process::CommandRunner> = Arc::new(SystemRunner::new(shutdown.clone()));
//!
//! let printer = PrinterService::new(
//!     config.api_base_url(),
//!     config.api_key.clone(),
//!     std::time::Duration::from_secs(config::constants::STATUS_TIMEOUT_SECONDS),
//! )?;
//! let capture = CaptureDriver::new(runner.clone(), config.capture_program.clone(), config.capture_timeout());
//! let assembler = VideoAssembler::new(runner, config.ffmpeg_program.clone(), config.encode_timeout());
//!
//! let mut monitor = TimelapseMonitor::new(config, Box::new(printer), capture, assembler, Vec::new(), None);
//! monitor.run(&shutdown);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod assembler;
pub mod capture;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod notifier;
pub mod printer;
pub mod process;
pub mod sanitizer;
pub mod scheduler;
pub mod session;
pub mod shutdown;
pub mod uploader;

// Re-export commonly used types for convenience
pub use assembler::{EncodeSettings, VideoArtifact, VideoAssembler};
pub use capture::CaptureDriver;
pub use config::{Config, Rotation};
pub use lifecycle::{MonitorState, TimelapseMonitor};
pub use notifier::{Notifier, PrintLogWriter, WebhookNotifier};
pub use printer::{JobMetadata, PrinterService, PrinterState, PrinterStatus, StatusSource};
pub use process::SystemRunner;
pub use session::PrintSession;
pub use shutdown::Shutdown;
pub use uploader::SnapshotUploader;
