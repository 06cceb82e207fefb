use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Local};
use log::{info, warn};
use reqwest::blocking::multipart;
use serde_json::json;

use crate::assembler::VideoArtifact;
use crate::printer::JobMetadata;

/// Receives every finished timelapse.
///
/// Implementations are never called for a failed assembly, and their own
/// failures never affect the monitor.
pub trait Notifier {
    /// Short label used in log lines.
    fn name(&self) -> &str;

    fn notify(
        &self,
        artifact: &VideoArtifact,
        job_name: &str,
        started_at: DateTime<Local>,
        job: Option<&JobMetadata>,
    ) -> Result<()>;
}

/// Render a duration as `Hh Mm`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
}

/// Discord webhook announcing finished timelapses.
pub struct WebhookNotifier {
    webhook_url: String,
    attachment_limit_bytes: u64,
    client: reqwest::blocking::Client,
}

impl WebhookNotifier {
    /// Create a new WebhookNotifier.
    ///
    /// # Arguments
    ///
    /// * `webhook_url` - A valid Discord webhook URL
    /// * `attachment_limit_bytes` - Videos larger than this are announced without the file
    pub fn new(webhook_url: String, attachment_limit_bytes: u64) -> Self {
        Self {
            webhook_url,
            attachment_limit_bytes,
            client: reqwest::blocking::Client::new(),
        }
    }

    fn description(artifact: &VideoArtifact, job_name: &str, started_at: DateTime<Local>) -> String {
        let finished_at = Local::now();
        let elapsed = (finished_at - started_at).to_std().unwrap_or_default();
        let size_mb = artifact.size_bytes().unwrap_or(0) as f64 / (1024.0 * 1024.0);

        format!(
            "Print **{}** has finished.\n\n**Print Stats:**\n• Started: {}\n• Finished: {}\n• Duration: {}\n• Frames: {}\n• Video: {:.2} MB ({:.0}s)",
            job_name,
            started_at.format("%Y-%m-%d %H:%M:%S"),
            finished_at.format("%Y-%m-%d %H:%M:%S"),
            format_duration(elapsed),
            artifact.frame_count,
            size_mb,
            artifact.duration_estimate.as_secs_f64(),
        )
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    fn notify(
        &self,
        artifact: &VideoArtifact,
        job_name: &str,
        started_at: DateTime<Local>,
        _job: Option<&JobMetadata>,
    ) -> Result<()> {
        let embed = json!({
            "embeds": [{
                "title": format!("🎬 Timelapse ready: {}", job_name),
                "description": Self::description(artifact, job_name, started_at),
                "color": 0x00FF00,
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "footer": {
                    "text": "Prusa Timelapse"
                }
            }]
        });

        let attach = artifact
            .size_bytes()
            .is_some_and(|size| size <= self.attachment_limit_bytes);

        let request = if attach {
            let file_name = artifact
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "timelapse.mp4".to_string());
            let form = multipart::Form::new()
                .text("payload_json", embed.to_string())
                .part(
                    "files[0]",
                    multipart::Part::bytes(fs::read(&artifact.path)?)
                        .file_name(file_name)
                        .mime_str("video/mp4")?,
                );
            self.client.post(&self.webhook_url).multipart(form)
        } else {
            warn!(
                "Video {} is over the attachment limit, sending notice without it",
                artifact.path.display()
            );
            self.client.post(&self.webhook_url).json(&embed)
        };

        let response = request.send()?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Failed to send timelapse notice: HTTP {}",
                response.status()
            ));
        }

        info!("Sent timelapse notice for {}", job_name);
        Ok(())
    }
}

/// Writes a plain-text `<video stem>.log` next to each video.
pub struct PrintLogWriter {
    capture_interval_seconds: u64,
}

impl PrintLogWriter {
    pub fn new(capture_interval_seconds: u64) -> Self {
        Self {
            capture_interval_seconds,
        }
    }

    pub fn log_path(artifact: &VideoArtifact) -> PathBuf {
        artifact.path.with_extension("log")
    }

    pub fn render(
        &self,
        artifact: &VideoArtifact,
        job_name: &str,
        started_at: DateTime<Local>,
        finished_at: DateTime<Local>,
        job: Option<&JobMetadata>,
    ) -> String {
        let elapsed = (finished_at - started_at).to_std().unwrap_or_default();
        let rule = "=".repeat(50);
        let mut text = format!(
            "Prusa Timelapse Print Log\n{rule}\n\n\
             File Name: {job_name}\n\
             Start Time: {}\n\
             End Time: {}\n\
             Duration: {}\n\
             Frames Captured: {}\n\
             Capture Interval: {} seconds\n\
             Video: {}\n",
            started_at.format("%Y-%m-%d %H:%M:%S"),
            finished_at.format("%Y-%m-%d %H:%M:%S"),
            format_duration(elapsed),
            artifact.frame_count,
            self.capture_interval_seconds,
            artifact.path.display(),
        );

        if let Some(job) = job {
            let or_na = |value: &Option<String>| value.clone().unwrap_or_else(|| "N/A".to_string());
            text.push_str(&format!(
                "\n{rule}\nJob Metadata\n{rule}\n\n\
                 Display Name: {}\n\
                 File Name: {}\n\
                 File Path: {}\n",
                or_na(&job.display_name),
                or_na(&job.file_name),
                or_na(&job.path),
            ));
            if let Some(size) = job.size_bytes.filter(|size| *size > 0) {
                text.push_str(&format!(
                    "File Size: {:.2} MB\n",
                    size as f64 / (1024.0 * 1024.0)
                ));
            }
        }
        text
    }
}

impl Notifier for PrintLogWriter {
    fn name(&self) -> &str {
        "print log"
    }

    fn notify(
        &self,
        artifact: &VideoArtifact,
        job_name: &str,
        started_at: DateTime<Local>,
        job: Option<&JobMetadata>,
    ) -> Result<()> {
        let path = Self::log_path(artifact);
        let text = self.render(artifact, job_name, started_at, Local::now(), job);
        fs::write(&path, text)?;
        info!("Print log saved: {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn artifact(dir: &std::path::Path) -> VideoArtifact {
        VideoArtifact {
            path: dir.join("2024-01-04-09-30_cube.mp4"),
            frame_count: 120,
            duration_estimate: Duration::from_secs(4),
        }
    }

    #[test]
    fn durations_render_hours_and_minutes() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0h 0m");
        assert_eq!(format_duration(Duration::from_secs(3 * 3600 + 25 * 60 + 59)), "3h 25m");
    }

    #[test]
    fn print_log_lists_the_session() {
        let writer = PrintLogWriter::new(30);
        let start = Local.with_ymd_and_hms(2024, 1, 4, 9, 30, 0).unwrap();
        let end = Local.with_ymd_and_hms(2024, 1, 4, 11, 45, 0).unwrap();
        let text = writer.render(&artifact(std::path::Path::new("/p")), "cube", start, end, None);

        assert!(text.contains("File Name: cube\n"));
        assert!(text.contains("Start Time: 2024-01-04 09:30:00\n"));
        assert!(text.contains("Duration: 2h 15m\n"));
        assert!(text.contains("Frames Captured: 120\n"));
        assert!(text.contains("Capture Interval: 30 seconds\n"));
        assert!(!text.contains("Job Metadata"));
    }

    #[test]
    fn print_log_includes_job_metadata() {
        let job = JobMetadata {
            display_name: Some("Cube".to_string()),
            file_name: Some("cube.gcode".to_string()),
            path: None,
            size_bytes: Some(3 * 1024 * 1024 / 2),
        };
        let now = Local::now();
        let text = PrintLogWriter::new(30).render(
            &artifact(std::path::Path::new("/p")),
            "cube",
            now,
            now,
            Some(&job),
        );

        assert!(text.contains("Job Metadata\n"));
        assert!(text.contains("Display Name: Cube\n"));
        assert!(text.contains("File Name: cube.gcode\n"));
        assert!(text.contains("File Path: N/A\n"));
        assert!(text.contains("File Size: 1.50 MB\n"));
    }

    #[test]
    fn print_log_is_written_next_to_the_video() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = artifact(dir.path());
        PrintLogWriter::new(30)
            .notify(&artifact, "cube", Local::now(), None)
            .unwrap();
        let log = dir.path().join("2024-01-04-09-30_cube.log");
        assert!(fs::read_to_string(log).unwrap().starts_with("Prusa Timelapse Print Log"));
    }
}
