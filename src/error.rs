//! Error types for the timelapse monitor.
//!
//! Each component owns a closed set of failures. Recoverable ones (a single
//! poll or capture) are absorbed by the lifecycle monitor, while session-level
//! ones (assembly, sustained poll loss) drive its cleanup rules.

use std::fmt;

/// Failures of a single printer status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    /// The request did not complete within the client timeout.
    Timeout { url: String, timeout_seconds: u64 },

    /// The printer could not be reached at all.
    ConnectionFailed { url: String, reason: String },

    /// The printer answered with a non-success HTTP status.
    HttpError { url: String, status: u16 },

    /// The response body was not a status payload we understand.
    MalformedResponse { url: String, reason: String },
}

/// Rejection of an operator-supplied argument string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanitizationError {
    /// The string could not be split into shell words (e.g. unbalanced quotes).
    Unparseable { input: String, reason: String },

    /// A token contains a shell metacharacter.
    ForbiddenPattern { token: String, pattern: &'static str },

    /// A token tries to set an option the monitor controls itself.
    ReservedOption { option: String },
}

/// Failures of the subprocess runner itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// The program could not be started.
    SpawnFailed { program: String, reason: String },

    /// The program ran past its deadline and was killed.
    TimedOut { program: String, timeout_seconds: u64 },

    /// The operator stop signal arrived and the program was killed.
    Cancelled { program: String },

    /// Waiting on the child failed.
    WaitFailed { program: String, reason: String },
}

/// Failures of a single still capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The capture program was killed after its timeout.
    Timeout { path: String, timeout_seconds: u64 },

    /// The capture program exited unsuccessfully.
    NonZeroExit { code: Option<i32>, stderr: String },

    /// The capture program could not be started.
    ProcessSpawnFailed { program: String, reason: String },

    /// The program reported success but no image was written.
    MissingOutput { path: String },

    /// The capture was interrupted by the operator stop signal.
    Cancelled,
}

/// Failures of timelapse video assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    /// There is nothing to encode.
    NoFrames { dir: String },

    /// A batch size of zero can never make progress.
    InvalidBatchSize,

    /// Extra encoder parameters were rejected by the sanitizer.
    InvalidParameters(SanitizationError),

    /// Encoding a chunk (or the single pass, index 0) failed.
    EncodeFailed { batch_index: usize, reason: String },

    /// Joining the encoded segments failed.
    ConcatFailed { reason: String },

    /// Working files could not be written.
    Io { path: String, reason: String },

    /// The operator stop signal interrupted the encoder.
    Cancelled,
}

/// Errors related to configuration loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Required environment variable is missing.
    MissingEnvVar { var_name: String },

    /// Invalid configuration values provided.
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl fmt::Display for PollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollError::Timeout {
                url,
                timeout_seconds,
            } => {
                write!(
                    f,
                    "Status request to '{}' timed out after {} seconds",
                    url, timeout_seconds
                )
            }
            PollError::ConnectionFailed { url, reason } => {
                write!(f, "Failed to connect to printer at '{}': {}", url, reason)
            }
            PollError::HttpError { url, status } => {
                write!(f, "Printer API at '{}' returned HTTP {}", url, status)
            }
            PollError::MalformedResponse { url, reason } => {
                write!(f, "Malformed status response from '{}': {}", url, reason)
            }
        }
    }
}

impl fmt::Display for SanitizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SanitizationError::Unparseable { input, reason } => {
                write!(f, "Cannot parse parameters '{}': {}", input, reason)
            }
            SanitizationError::ForbiddenPattern { token, pattern } => {
                write!(
                    f,
                    "Dangerous pattern '{}' detected in parameter '{}'",
                    pattern, token
                )
            }
            SanitizationError::ReservedOption { option } => {
                write!(
                    f,
                    "Parameter '{}' is set by configuration and may not be overridden",
                    option
                )
            }
        }
    }
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::SpawnFailed { program, reason } => {
                write!(f, "Failed to start '{}': {}", program, reason)
            }
            ProcessError::TimedOut {
                program,
                timeout_seconds,
            } => {
                write!(
                    f,
                    "'{}' killed after exceeding {} seconds",
                    program, timeout_seconds
                )
            }
            ProcessError::Cancelled { program } => {
                write!(f, "'{}' killed on shutdown request", program)
            }
            ProcessError::WaitFailed { program, reason } => {
                write!(f, "Failed waiting on '{}': {}", program, reason)
            }
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Timeout {
                path,
                timeout_seconds,
            } => {
                write!(
                    f,
                    "Capture of '{}' timed out after {}s",
                    path, timeout_seconds
                )
            }
            CaptureError::NonZeroExit { code, stderr } => match code {
                Some(code) => write!(f, "Capture exited with status {}: {}", code, stderr),
                None => write!(f, "Capture terminated by signal: {}", stderr),
            },
            CaptureError::ProcessSpawnFailed { program, reason } => {
                write!(f, "Failed to start capture program '{}': {}", program, reason)
            }
            CaptureError::MissingOutput { path } => {
                write!(f, "Capture reported success but '{}' was not written", path)
            }
            CaptureError::Cancelled => write!(f, "Capture cancelled by shutdown"),
        }
    }
}

impl fmt::Display for AssemblyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssemblyError::NoFrames { dir } => write!(f, "No frames to encode in {}", dir),
            AssemblyError::InvalidBatchSize => write!(f, "Video batch size must be at least 1"),
            AssemblyError::InvalidParameters(e) => {
                write!(f, "Invalid video encoder parameters: {}", e)
            }
            AssemblyError::EncodeFailed {
                batch_index,
                reason,
            } => {
                write!(f, "Failed to encode batch {}: {}", batch_index, reason)
            }
            AssemblyError::ConcatFailed { reason } => {
                write!(f, "Failed to concatenate segments: {}", reason)
            }
            AssemblyError::Io { path, reason } => {
                write!(f, "I/O error on '{}': {}", path, reason)
            }
            AssemblyError::Cancelled => write!(f, "Video assembly cancelled by shutdown"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingEnvVar { var_name } => {
                write!(f, "Required environment variable '{}' is not set", var_name)
            }
            ConfigError::InvalidValue {
                field,
                value,
                reason,
            } => {
                write!(
                    f,
                    "Invalid value '{}' for field '{}': {}",
                    value, field, reason
                )
            }
        }
    }
}

impl std::error::Error for PollError {}
impl std::error::Error for SanitizationError {}
impl std::error::Error for ProcessError {}
impl std::error::Error for CaptureError {}
impl std::error::Error for ConfigError {}

impl std::error::Error for AssemblyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AssemblyError::InvalidParameters(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SanitizationError> for AssemblyError {
    fn from(err: SanitizationError) -> Self {
        AssemblyError::InvalidParameters(err)
    }
}
