//! The print lifecycle monitor.
//!
//! A single cooperative loop drives two cadences: status polling and, while a
//! session is open, frame capture. Both run on `&mut self`, so a poll that
//! closes a session can never interleave with a capture appending to it.
//! Assembly runs inline and blocks the loop; no new session can be detected
//! while a video is being encoded.

use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use chrono::Local;
use log::{debug, error, info, warn};

use crate::assembler::{EncodeSettings, VideoAssembler};
use crate::capture::{CaptureDriver, lens_position};
use crate::config::Config;
use crate::error::{AssemblyError, PollError};
use crate::notifier::Notifier;
use crate::printer::{PrinterState, PrinterStatus, StatusSource};
use crate::sanitizer::sanitize;
use crate::scheduler::Cadence;
use crate::session::PrintSession;
use crate::shutdown::Shutdown;
use crate::uploader::SnapshotUploader;

/// Job name used when the printer is active but does not report one.
pub const UNKNOWN_JOB_NAME: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Printing,
    /// A finished session is being assembled.
    Finishing,
    /// Contact with the printer was lost; left on the next successful poll.
    Error,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MonitorState::Idle => "IDLE",
            MonitorState::Printing => "PRINTING",
            MonitorState::Finishing => "FINISHING",
            MonitorState::Error => "ERROR",
        };
        write!(f, "{}", name)
    }
}

/// Watches the printer and turns each print into a timelapse.
///
/// At most one session exists at a time, either open (capturing) or
/// retained after contact with the printer was lost.
pub struct TimelapseMonitor {
    config: Config,
    status_source: Box<dyn StatusSource>,
    capture: CaptureDriver,
    assembler: VideoAssembler,
    notifiers: Vec<Box<dyn Notifier>>,
    uploader: Option<SnapshotUploader>,
    state: MonitorState,
    session: Option<PrintSession>,
    retained: Option<PrintSession>,
    consecutive_failures: u32,
    poll_cadence: Cadence,
    capture_cadence: Cadence,
}

impl TimelapseMonitor {
    pub fn new(
        config: Config,
        status_source: Box<dyn StatusSource>,
        capture: CaptureDriver,
        assembler: VideoAssembler,
        notifiers: Vec<Box<dyn Notifier>>,
        uploader: Option<SnapshotUploader>,
    ) -> Self {
        let poll_cadence = Cadence::new(config.poll_interval());
        let capture_cadence = Cadence::new(config.capture_interval());
        Self {
            config,
            status_source,
            capture,
            assembler,
            notifiers,
            uploader,
            state: MonitorState::Idle,
            session: None,
            retained: None,
            consecutive_failures: 0,
            poll_cadence,
            capture_cadence,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// The session currently capturing frames.
    pub fn session(&self) -> Option<&PrintSession> {
        self.session.as_ref()
    }

    /// A session kept after losing contact with the printer.
    pub fn retained_session(&self) -> Option<&PrintSession> {
        self.retained.as_ref()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Run until `shutdown` is requested.
    pub fn run(&mut self, shutdown: &Shutdown) {
        info!(
            "Monitoring printer at {} (poll every {}s, capture every {}s)",
            self.config.printer_host,
            self.config.poll_interval_seconds,
            self.config.capture_interval_seconds
        );

        while !shutdown.is_requested() {
            let now = Instant::now();
            if self.poll_cadence.due(now) {
                self.poll_cadence.mark(now);
                self.poll_once();
            }
            if shutdown.is_requested() {
                break;
            }

            let now = Instant::now();
            if self.session.is_some() && self.capture_cadence.due(now) {
                self.capture_cadence.mark(now);
                self.capture_tick();
            }

            let now = Instant::now();
            let mut wake = self.poll_cadence.next_due().unwrap_or(now);
            if self.session.is_some() {
                wake = wake.min(self.capture_cadence.next_due().unwrap_or(now));
            }
            shutdown.sleep_until(wake);
        }

        self.stop();
    }

    /// Take one status sample and apply it.
    pub fn poll_once(&mut self) {
        let result = self.status_source.poll();
        self.apply_poll(result);
    }

    pub fn apply_poll(&mut self, result: Result<PrinterStatus, PollError>) {
        match result {
            Ok(status) => self.apply_status(&status),
            Err(e) => self.record_poll_failure(&e),
        }
    }

    fn record_poll_failure(&mut self, e: &PollError) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let threshold = self.config.poll_failure_threshold;

        if self.consecutive_failures == 1 {
            warn!("Lost connection to printer: {}", e);
        } else {
            debug!(
                "Printer poll failed ({}/{}): {}",
                self.consecutive_failures, threshold, e
            );
        }

        if self.consecutive_failures == threshold.saturating_add(1) {
            error!(
                "No response from printer after {} consecutive polls",
                self.consecutive_failures
            );
            self.enter_error();
        }
    }

    /// Stop capturing but keep the frames; the print may still be running.
    fn enter_error(&mut self) {
        self.state = MonitorState::Error;
        self.capture_cadence.reset();
        if let Some(session) = self.session.take() {
            warn!(
                "Capture suspended for '{}', keeping {} frames in {}",
                session.job_name(),
                session.frame_count(),
                session.frame_dir().display()
            );
            self.retained = Some(session);
        }
    }

    pub fn apply_status(&mut self, status: &PrinterStatus) {
        if self.consecutive_failures > 0 {
            info!(
                "Connection to printer restored after {} failed polls",
                self.consecutive_failures
            );
            self.consecutive_failures = 0;
        }
        if self.state == MonitorState::Error {
            self.state = MonitorState::Idle;
        }

        if let Some(progress) = status.progress {
            debug!("Printer {} ({}%)", status.state, progress);
        } else {
            debug!("Printer {}", status.state);
        }

        if let Some(retained) = self.retained.take() {
            self.resolve_retained(retained, status);
            if self.retained.is_some() || self.session.is_some() {
                return;
            }
        }

        match self.session.take() {
            None => {
                if status.state.is_active() {
                    self.start_session(status);
                }
            }
            Some(session) => match status.state {
                PrinterState::Printing | PrinterState::Paused
                    if job_changed(&session, status.job_name.as_deref()) =>
                {
                    info!(
                        "Job changed from '{}' to '{}'",
                        session.job_name(),
                        status.job_name.as_deref().unwrap_or(UNKNOWN_JOB_NAME)
                    );
                    self.finalize(session);
                    self.start_session(status);
                }
                PrinterState::Printing | PrinterState::Paused | PrinterState::Unknown => {
                    let mut session = session;
                    session.record_job_metadata(status.job.as_ref());
                    self.session = Some(session);
                }
                PrinterState::Idle | PrinterState::Finished | PrinterState::Error => {
                    info!(
                        "Print '{}' ended (printer {})",
                        session.job_name(),
                        status.state
                    );
                    self.finalize(session);
                }
            },
        }
    }

    fn resolve_retained(&mut self, retained: PrintSession, status: &PrinterStatus) {
        match status.state {
            PrinterState::Unknown => self.retained = Some(retained),
            state if state.is_active() && !job_changed(&retained, status.job_name.as_deref()) => {
                info!(
                    "Resuming capture for '{}' with {} frames",
                    retained.job_name(),
                    retained.frame_count()
                );
                self.session = Some(retained);
                self.state = MonitorState::Printing;
                self.capture_cadence.reset();
            }
            _ => {
                info!(
                    "Finalizing '{}' left over from the lost connection",
                    retained.job_name()
                );
                self.finalize(retained);
            }
        }
    }

    fn start_session(&mut self, status: &PrinterStatus) {
        let job_name = status.job_name.as_deref().unwrap_or(UNKNOWN_JOB_NAME);
        match PrintSession::start(&self.config.prints_dir, job_name, Local::now()) {
            Ok(mut session) => {
                session.record_job_metadata(status.job.as_ref());
                info!(
                    "Print started: {} (frames in {})",
                    job_name,
                    session.frame_dir().display()
                );
                self.session = Some(session);
                self.state = MonitorState::Printing;
                self.capture_cadence.reset();
            }
            Err(e) => {
                error!(
                    "Failed to create frame directory under {}: {}",
                    self.config.prints_dir.display(),
                    e
                );
                self.state = MonitorState::Idle;
            }
        }
    }

    /// Capture one frame into the open session, if any.
    ///
    /// Returns the path of the new frame.
    pub fn capture_tick(&mut self) -> Option<PathBuf> {
        let session = self.session.as_mut()?;

        let extra_args = match sanitize(&self.config.extra_capture_params) {
            Ok(args) => args,
            Err(e) => {
                error!("Skipping capture, invalid RPICAM_EXTRA_PARAMS: {}", e);
                return None;
            }
        };

        let path = session.next_frame_path();
        match self.capture.capture(
            &path,
            self.config.image_width,
            self.config.image_height,
            &extra_args,
            lens_position(self.config.focus_distance_cm),
        ) {
            Ok(()) => {
                session.push_frame(path.clone());
                info!(
                    "Captured frame {} for '{}'",
                    session.frame_count(),
                    session.job_name()
                );
                if let Some(uploader) = &self.uploader {
                    uploader.submit(&path, self.config.camera_rotation);
                }
                Some(path)
            }
            Err(e) => {
                warn!("Capture failed for {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Assemble a closed session, notify, and clean up its frames.
    fn finalize(&mut self, session: PrintSession) {
        self.state = MonitorState::Finishing;
        self.capture_cadence.reset();

        if session.frame_count() == 0 {
            info!(
                "No frames captured for '{}', nothing to assemble",
                session.job_name()
            );
            self.discard(&session);
            self.state = MonitorState::Idle;
            return;
        }

        let output = self
            .config
            .prints_dir
            .join(format!("{}.mp4", session.name()));
        let settings = EncodeSettings {
            fps: self.config.video_fps,
            quality: self.config.video_quality,
            rotation: self.config.camera_rotation,
            batch_size: self.config.video_batch_size,
            extra_params: self.config.extra_encode_params.clone(),
        };

        match self.assembler.assemble(
            session.frame_dir(),
            session.frame_paths(),
            &output,
            &settings,
        ) {
            Ok(artifact) => {
                for notifier in &self.notifiers {
                    if let Err(e) = notifier.notify(
                        &artifact,
                        session.job_name(),
                        session.started_at(),
                        session.job_metadata(),
                    ) {
                        warn!("{} notification failed: {}", notifier.name(), e);
                    }
                }
                self.discard(&session);
            }
            Err(AssemblyError::Cancelled) => {
                warn!(
                    "Video assembly for '{}' interrupted, frames kept in {}",
                    session.job_name(),
                    session.frame_dir().display()
                );
            }
            Err(e) => {
                error!(
                    "Video assembly for '{}' failed, discarding {} frames: {}",
                    session.job_name(),
                    session.frame_count(),
                    e
                );
                self.discard(&session);
            }
        }

        self.state = MonitorState::Idle;
    }

    fn discard(&self, session: &PrintSession) {
        if let Err(e) = session.remove_frames() {
            warn!(
                "Failed to remove frame directory {}: {}",
                session.frame_dir().display(),
                e
            );
        }
    }

    /// Save the open session's timelapse and stop background work.
    ///
    /// A retained session stays on disk; the print it belongs to may still be
    /// running.
    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            info!(
                "Saving timelapse for '{}' before stopping",
                session.job_name()
            );
            self.finalize(session);
        }
        if let Some(retained) = &self.retained {
            warn!(
                "Stopping with {} frames for '{}' kept in {}",
                retained.frame_count(),
                retained.job_name(),
                retained.frame_dir().display()
            );
        }
        self.uploader.take();
        info!("Timelapse monitor stopped");
    }
}

/// A name change only counts when both names are known.
fn job_changed(session: &PrintSession, polled: Option<&str>) -> bool {
    match polled {
        Some(name) => session.job_name() != UNKNOWN_JOB_NAME && session.job_name() != name,
        None => false,
    }
}
