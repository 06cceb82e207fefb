use std::fmt;
use std::path::Path;
use std::time::Duration;

use log::debug;
use serde_json::Value;

use crate::error::PollError;

/// Printer state as reported by PrusaLink, collapsed to what the monitor acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrinterState {
    Idle,
    Printing,
    Paused,
    Finished,
    Error,
    Unknown,
}

impl PrinterState {
    /// Map a PrusaLink `printer.state` string.
    pub fn from_api(state: &str) -> Self {
        match state.to_ascii_uppercase().as_str() {
            "IDLE" | "READY" => PrinterState::Idle,
            "PRINTING" => PrinterState::Printing,
            "PAUSED" => PrinterState::Paused,
            "FINISHED" | "STOPPED" => PrinterState::Finished,
            "ERROR" | "ATTENTION" => PrinterState::Error,
            _ => PrinterState::Unknown,
        }
    }

    /// A print is underway, even if paused.
    pub fn is_active(self) -> bool {
        matches!(self, PrinterState::Printing | PrinterState::Paused)
    }
}

impl fmt::Display for PrinterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrinterState::Idle => "IDLE",
            PrinterState::Printing => "PRINTING",
            PrinterState::Paused => "PAUSED",
            PrinterState::Finished => "FINISHED",
            PrinterState::Error => "ERROR",
            PrinterState::Unknown => "UNKNOWN",
        };
        write!(f, "{}", name)
    }
}

/// One normalized status sample.
#[derive(Debug, Clone, PartialEq)]
pub struct PrinterStatus {
    pub state: PrinterState,
    pub job_name: Option<String>,
    /// Job progress in percent.
    pub progress: Option<u8>,
    /// File details of the running job, when reported.
    pub job: Option<JobMetadata>,
    pub raw_payload: Value,
}

/// File details of a print job, as shown in the print log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobMetadata {
    pub display_name: Option<String>,
    pub file_name: Option<String>,
    pub path: Option<String>,
    pub size_bytes: Option<u64>,
}

impl JobMetadata {
    /// Read `file.*` from a PrusaLink job object. `None` without a file entry.
    pub fn from_job(job: &Value) -> Option<Self> {
        let file = job.get("file").filter(|file| file.is_object())?;
        let text = |key: &str| {
            file.get(key)
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        Some(Self {
            display_name: text("display_name"),
            file_name: text("name"),
            path: text("path"),
            size_bytes: file.get("size").and_then(Value::as_u64),
        })
    }
}

impl PrinterStatus {
    /// A status with no payload behind it.
    pub fn new(state: PrinterState, job_name: Option<&str>) -> Self {
        Self {
            state,
            job_name: job_name.map(str::to_string),
            progress: None,
            job: None,
            raw_payload: Value::Null,
        }
    }

    /// Normalize a `/api/v1/status` payload.
    ///
    /// The only required field is `printer.state`; everything under `job` is
    /// optional.
    pub fn from_payload(payload: Value) -> Result<Self, String> {
        let state = payload
            .get("printer")
            .and_then(|printer| printer.get("state"))
            .and_then(Value::as_str)
            .map(PrinterState::from_api)
            .ok_or_else(|| "missing printer.state".to_string())?;

        let job = payload.get("job").filter(|job| job.is_object());
        let job_name = job.and_then(job_name_from);
        let progress = job
            .and_then(|job| job.get("progress"))
            .and_then(Value::as_f64)
            .map(|p| p.round().clamp(0.0, 100.0) as u8);

        let job_metadata = job.and_then(JobMetadata::from_job);

        Ok(Self {
            state,
            job_name,
            progress,
            job: job_metadata,
            raw_payload: payload,
        })
    }
}

/// Extract a job name from a PrusaLink job object.
///
/// Prefers `file.display_name` over `file.name` and strips any directory and
/// extension, so `/usb/benchy.gcode` becomes `benchy`.
pub fn job_name_from(job: &Value) -> Option<String> {
    let file = job.get("file")?;
    let name = ["display_name", "name"]
        .iter()
        .filter_map(|key| file.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|name| !name.is_empty())?;

    Path::new(name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
}

/// A source of printer status samples.
pub trait StatusSource {
    /// Take one status sample. No retries; the caller owns retry policy.
    fn poll(&self) -> Result<PrinterStatus, PollError>;
}

/// PrusaLink v1 API client.
pub struct PrinterService {
    api_url: String,
    api_key: String,
    timeout: Duration,
    client: reqwest::blocking::Client,
}

impl PrinterService {
    /// Create a new PrinterService.
    ///
    /// # Arguments
    ///
    /// * `api_url` - Base URL of the API (e.g., "http://printer.local/api/v1")
    /// * `api_key` - PrusaLink API key
    /// * `timeout` - Deadline for each request
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_url: String, api_key: String, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
            client,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Get the current printer status.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The request times out or the printer cannot be reached
    /// - The API returns an error status
    /// - The body is not a status payload
    pub fn get_printer_status(&self) -> Result<PrinterStatus, PollError> {
        let url = format!("{}/status", self.api_url);
        let payload = self.get_json(&url)?;
        PrinterStatus::from_payload(payload)
            .map_err(|reason| PollError::MalformedResponse { url, reason })
    }

    /// Get the current job from `/job`.
    pub fn get_job_info(&self) -> Result<Value, PollError> {
        self.get_json(&format!("{}/job", self.api_url))
    }

    fn get_json(&self, url: &str) -> Result<Value, PollError> {
        let response = self
            .client
            .get(url)
            .header("X-Api-Key", &self.api_key)
            .send()
            .map_err(|e| self.request_error(url, e))?;

        if !response.status().is_success() {
            return Err(PollError::HttpError {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        response
            .json::<Value>()
            .map_err(|e| PollError::MalformedResponse {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }

    fn request_error(&self, url: &str, e: reqwest::Error) -> PollError {
        if e.is_timeout() {
            PollError::Timeout {
                url: url.to_string(),
                timeout_seconds: self.timeout.as_secs(),
            }
        } else if e.is_decode() {
            PollError::MalformedResponse {
                url: url.to_string(),
                reason: e.to_string(),
            }
        } else {
            PollError::ConnectionFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

impl StatusSource for PrinterService {
    fn poll(&self) -> Result<PrinterStatus, PollError> {
        let mut status = self.get_printer_status()?;

        if status.state.is_active() && status.job_name.is_none() {
            match self.get_job_info() {
                Ok(job) => {
                    status.job_name = job_name_from(&job);
                    status.job = JobMetadata::from_job(&job);
                }
                Err(e) => debug!("Job info request failed: {}", e),
            }
        }

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_prusalink_states() {
        assert_eq!(PrinterState::from_api("READY"), PrinterState::Idle);
        assert_eq!(PrinterState::from_api("printing"), PrinterState::Printing);
        assert_eq!(PrinterState::from_api("STOPPED"), PrinterState::Finished);
        assert_eq!(PrinterState::from_api("ATTENTION"), PrinterState::Error);
        assert_eq!(PrinterState::from_api("BUSY"), PrinterState::Unknown);
        assert!(PrinterState::Paused.is_active());
        assert!(!PrinterState::Finished.is_active());
    }

    #[test]
    fn job_name_prefers_display_name_and_drops_extension() {
        let job = json!({"file": {"name": "test_print.gcode", "display_name": "Test Print.bgcode"}});
        assert_eq!(job_name_from(&job).as_deref(), Some("Test Print"));

        let job = json!({"file": {"name": "/usb/cube.gcode"}});
        assert_eq!(job_name_from(&job).as_deref(), Some("cube"));

        assert_eq!(job_name_from(&json!({"id": 3})), None);
    }

    #[test]
    fn progress_is_rounded() {
        let status = PrinterStatus::from_payload(json!({
            "printer": {"state": "PRINTING"},
            "job": {"progress": 45.5, "file": {"display_name": "Test Print"}}
        }))
        .unwrap();
        assert_eq!(status.progress, Some(46));
        assert_eq!(status.job_name.as_deref(), Some("Test Print"));
    }

    #[test]
    fn job_metadata_reads_file_details() {
        let job = json!({"file": {
            "name": "cube.gcode",
            "display_name": "Cube",
            "path": "/usb",
            "size": 2_097_152
        }});
        let metadata = JobMetadata::from_job(&job).unwrap();
        assert_eq!(metadata.display_name.as_deref(), Some("Cube"));
        assert_eq!(metadata.file_name.as_deref(), Some("cube.gcode"));
        assert_eq!(metadata.path.as_deref(), Some("/usb"));
        assert_eq!(metadata.size_bytes, Some(2_097_152));

        assert_eq!(JobMetadata::from_job(&json!({"id": 3})), None);
        assert_eq!(PrinterStatus::new(PrinterState::Printing, Some("a")).job, None);
    }

    #[test]
    fn payload_without_state_is_rejected() {
        assert!(PrinterStatus::from_payload(json!({"job": null})).is_err());
        assert!(PrinterStatus::from_payload(json!([1, 2])).is_err());
    }
}
