//! Memory-bounded timelapse encoding.
//!
//! Up to `batch_size` frames are encoded in a single encoder pass. Longer
//! sessions are split into contiguous chunks of `batch_size` frames, each
//! encoded to its own segment, and the segments are joined with a stream copy.
//! Peak encoder memory then depends on the batch size, not on print length.

use std::fs;
use std::io::{self, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::Rotation;
use crate::error::{AssemblyError, ProcessError};
use crate::process::{CommandRunner, display_command};
use crate::sanitizer::{ENCODE_RESERVED_OPTIONS, sanitize_with_reserved};

/// Encoder parameters for one assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    pub fps: u32,
    /// x264 constant rate factor; lower is better quality.
    pub quality: u32,
    pub rotation: Rotation,
    /// Hard ceiling on frames per encoder invocation.
    pub batch_size: usize,
    /// Operator-supplied output options, sanitized before use.
    pub extra_params: String,
}

/// A contiguous chunk of frames encoded to its own segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeBatch {
    pub batch_index: usize,
    pub frame_range: Range<usize>,
    pub segment_path: PathBuf,
}

/// A finished timelapse video.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoArtifact {
    pub path: PathBuf,
    pub frame_count: usize,
    pub duration_estimate: Duration,
}

impl VideoArtifact {
    pub fn size_bytes(&self) -> Option<u64> {
        fs::metadata(&self.path).map(|m| m.len()).ok()
    }
}

/// Split `frame_count` frames into chunks of exactly `batch_size`, the last
/// chunk taking the remainder.
pub fn plan_batches(frame_count: usize, batch_size: usize, work_dir: &Path) -> Vec<EncodeBatch> {
    if batch_size == 0 {
        return Vec::new();
    }
    (0..frame_count.div_ceil(batch_size))
        .map(|batch_index| {
            let start = batch_index * batch_size;
            EncodeBatch {
                batch_index,
                frame_range: start..(start + batch_size).min(frame_count),
                segment_path: work_dir.join(format!("segment_{:03}.mp4", batch_index)),
            }
        })
        .collect()
}

/// Scratch directory next to the output, removed on drop.
struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    fn create(output: &Path) -> Result<Self, AssemblyError> {
        let stem = output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "timelapse".to_string());
        let parent = output.parent().unwrap_or_else(|| Path::new("."));
        let path = parent.join(format!(".tmp_{}", stem));

        fs::create_dir_all(&path).map_err(|e| io_error(&path, e))?;
        debug!("Created temporary directory: {}", path.display());
        Ok(Self { path })
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Cleaned up temporary directory: {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to clean up temp directory {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

fn remove_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

/// Turns an ordered frame sequence into a single H.264 video with ffmpeg.
pub struct VideoAssembler {
    runner: Arc<dyn CommandRunner>,
    program: String,
    timeout: Duration,
}

impl VideoAssembler {
    /// Create a new VideoAssembler.
    ///
    /// # Arguments
    ///
    /// * `runner` - Subprocess runner used for every encoder invocation
    /// * `program` - ffmpeg binary name or path
    /// * `timeout` - Deadline applied to each individual invocation
    pub fn new(runner: Arc<dyn CommandRunner>, program: String, timeout: Duration) -> Self {
        Self {
            runner,
            program,
            timeout,
        }
    }

    /// Encode `frames`, in the given order, into `output`.
    ///
    /// All intermediate files live in a scratch directory that is removed
    /// before this returns, whatever the outcome. On failure no partial
    /// `output` is left behind either.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no frames, the batch size is zero, the
    /// extra parameters are rejected, or any encoder invocation fails.
    pub fn assemble(
        &self,
        frame_dir: &Path,
        frames: &[PathBuf],
        output: &Path,
        settings: &EncodeSettings,
    ) -> Result<VideoArtifact, AssemblyError> {
        if frames.is_empty() {
            return Err(AssemblyError::NoFrames {
                dir: frame_dir.display().to_string(),
            });
        }
        if settings.batch_size == 0 {
            return Err(AssemblyError::InvalidBatchSize);
        }
        let extra_args =
            sanitize_with_reserved(&settings.extra_params, &ENCODE_RESERVED_OPTIONS)?;

        info!(
            "Creating video from {} frames in {}",
            frames.len(),
            frame_dir.display()
        );

        let result = {
            let work = WorkDir::create(output)?;
            if frames.len() <= settings.batch_size {
                self.encode_single(&work, frames, output, settings, extra_args.as_slice())
            } else {
                info!(
                    "Using batch processing ({} frames/batch) to minimize memory usage",
                    settings.batch_size
                );
                self.encode_batched(&work, frames, output, settings, extra_args.as_slice())
            }
        };

        if let Err(e) = result {
            error!("Failed to create video {}: {}", output.display(), e);
            remove_partial(output);
            return Err(e);
        }

        let artifact = VideoArtifact {
            path: output.to_path_buf(),
            frame_count: frames.len(),
            duration_estimate: Duration::try_from_secs_f64(frames.len() as f64 / settings.fps as f64)
                .unwrap_or_default(),
        };
        info!(
            "Video created successfully: {} ({:.2} MB)",
            output.display(),
            artifact.size_bytes().unwrap_or(0) as f64 / (1024.0 * 1024.0)
        );
        Ok(artifact)
    }

    fn encode_single(
        &self,
        work: &WorkDir,
        frames: &[PathBuf],
        output: &Path,
        settings: &EncodeSettings,
        extra_args: &[String],
    ) -> Result<(), AssemblyError> {
        let list = work.path.join("frames.txt");
        write_frame_list(&list, frames, settings.fps)?;

        let args = encode_args(&list, output, settings, extra_args, true);
        info!("Creating video: {}", display_command(&self.program, &args));
        self.run_encoder(&args, output)
            .map_err(|reason| into_encode_error(0, reason))
    }

    fn encode_batched(
        &self,
        work: &WorkDir,
        frames: &[PathBuf],
        output: &Path,
        settings: &EncodeSettings,
        extra_args: &[String],
    ) -> Result<(), AssemblyError> {
        let batches = plan_batches(frames.len(), settings.batch_size, &work.path);
        info!("Processing {} batches...", batches.len());

        for batch in &batches {
            info!(
                "Processing batch {}/{} (frames {} to {})",
                batch.batch_index + 1,
                batches.len(),
                batch.frame_range.start,
                batch.frame_range.end - 1
            );

            let list = work
                .path
                .join(format!("batch_{:03}_files.txt", batch.batch_index));
            write_frame_list(&list, &frames[batch.frame_range.clone()], settings.fps)?;

            let args = encode_args(&list, &batch.segment_path, settings, extra_args, false);
            debug!("Batch command: {}", display_command(&self.program, &args));
            self.run_encoder(&args, &batch.segment_path)
                .map_err(|reason| into_encode_error(batch.batch_index, reason))?;

            remove_partial(&list);
        }

        info!(
            "Concatenating {} segments into final video...",
            batches.len()
        );
        let concat_list = work.path.join("concat_list.txt");
        let segments: Vec<PathBuf> = batches.iter().map(|b| b.segment_path.clone()).collect();
        write_concat_list(&concat_list, &segments)?;

        let args = concat_args(&concat_list, output);
        info!("Final concatenation: {}", display_command(&self.program, &args));
        self.run_encoder(&args, output).map_err(|reason| match reason {
            EncoderFailure::Cancelled => AssemblyError::Cancelled,
            EncoderFailure::Failed(reason) => AssemblyError::ConcatFailed { reason },
        })
    }

    fn run_encoder(&self, args: &[String], expected_output: &Path) -> Result<(), EncoderFailure> {
        match self.runner.run(&self.program, args, self.timeout) {
            Ok(output) if output.success() && expected_output.exists() => Ok(()),
            Ok(output) if output.success() => Err(EncoderFailure::Failed(format!(
                "encoder exited successfully but {} is missing",
                expected_output.display()
            ))),
            Ok(output) => Err(EncoderFailure::Failed(format!(
                "exit status {:?}: {}",
                output.code,
                output.stderr_tail()
            ))),
            Err(ProcessError::Cancelled { .. }) => Err(EncoderFailure::Cancelled),
            Err(e) => Err(EncoderFailure::Failed(e.to_string())),
        }
    }
}

enum EncoderFailure {
    Cancelled,
    Failed(String),
}

fn into_encode_error(batch_index: usize, failure: EncoderFailure) -> AssemblyError {
    match failure {
        EncoderFailure::Cancelled => AssemblyError::Cancelled,
        EncoderFailure::Failed(reason) => AssemblyError::EncodeFailed {
            batch_index,
            reason,
        },
    }
}

fn io_error(path: &Path, e: io::Error) -> AssemblyError {
    AssemblyError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn encode_args(
    list: &Path,
    output: &Path,
    settings: &EncodeSettings,
    extra_args: &[String],
    faststart: bool,
) -> Vec<String> {
    let mut args: Vec<String> = ["-y", "-f", "concat", "-safe", "0", "-i"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.push(list.display().to_string());

    if let Some(filter) = settings.rotation.transpose_filter() {
        args.push("-vf".to_string());
        args.push(filter.to_string());
    }

    args.extend([
        "-r".to_string(),
        settings.fps.to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-crf".to_string(),
        settings.quality.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
    ]);
    args.extend(extra_args.iter().cloned());
    if faststart {
        args.push("-movflags".to_string());
        args.push("+faststart".to_string());
    }
    args.push(output.display().to_string());
    args
}

fn concat_args(list: &Path, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = ["-y", "-f", "concat", "-safe", "0", "-i"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.push(list.display().to_string());
    args.extend(
        ["-c", "copy", "-movflags", "+faststart"]
            .iter()
            .map(|s| s.to_string()),
    );
    args.push(output.display().to_string());
    args
}

/// Quote a path for an ffmpeg concat list.
fn concat_entry(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    format!(
        "file '{}'",
        absolute.display().to_string().replace('\'', r"'\''")
    )
}

/// Image lists need an explicit duration per entry, and the last image
/// repeated, or the demuxer drops the final frame.
fn write_frame_list(list: &Path, frames: &[PathBuf], fps: u32) -> Result<(), AssemblyError> {
    let frame_duration = 1.0 / fps as f64;
    let mut contents = String::new();
    for frame in frames {
        contents.push_str(&concat_entry(frame));
        contents.push('\n');
        contents.push_str(&format!("duration {:.6}\n", frame_duration));
    }
    if let Some(last) = frames.last() {
        contents.push_str(&concat_entry(last));
        contents.push('\n');
    }
    write_file(list, &contents)
}

fn write_concat_list(list: &Path, segments: &[PathBuf]) -> Result<(), AssemblyError> {
    let contents: String = segments
        .iter()
        .map(|segment| format!("{}\n", concat_entry(segment)))
        .collect();
    write_file(list, &contents)
}

fn write_file(path: &Path, contents: &str) -> Result<(), AssemblyError> {
    fs::File::create(path)
        .and_then(|mut file| file.write_all(contents.as_bytes()))
        .map_err(|e| io_error(path, e))
}
