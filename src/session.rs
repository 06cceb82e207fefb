use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::printer::JobMetadata;

/// One in-progress print and the frames captured for it.
///
/// Frames are appended in capture order and never reordered or removed; the
/// frame directory is owned by the session until it is finalized.
#[derive(Debug, Clone)]
pub struct PrintSession {
    job_name: String,
    started_at: DateTime<Local>,
    frame_dir: PathBuf,
    frame_paths: Vec<PathBuf>,
    job: Option<JobMetadata>,
}

impl PrintSession {
    /// Open a session and create its frame directory under `prints_dir`.
    ///
    /// The directory is named `<YYYY-MM-DD-HH-MM>_<job>`; if that name is
    /// already taken by a directory or a finished video, a numeric suffix is
    /// appended.
    pub fn start(
        prints_dir: &Path,
        job_name: &str,
        started_at: DateTime<Local>,
    ) -> io::Result<Self> {
        let base = format!(
            "{}_{}",
            started_at.format("%Y-%m-%d-%H-%M"),
            safe_file_name(job_name)
        );

        let mut name = base.clone();
        let mut suffix = 2;
        while prints_dir.join(&name).exists() || prints_dir.join(format!("{}.mp4", name)).exists()
        {
            name = format!("{}-{}", base, suffix);
            suffix += 1;
        }

        let frame_dir = prints_dir.join(name);
        fs::create_dir_all(&frame_dir)?;

        Ok(Self {
            job_name: job_name.to_string(),
            started_at,
            frame_dir,
            frame_paths: Vec::new(),
            job: None,
        })
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn job_metadata(&self) -> Option<&JobMetadata> {
        self.job.as_ref()
    }

    /// Attach file details of the job, keeping any already known.
    pub fn record_job_metadata(&mut self, job: Option<&JobMetadata>) {
        if self.job.is_none() {
            self.job = job.cloned();
        }
    }

    pub fn frame_dir(&self) -> &Path {
        &self.frame_dir
    }

    pub fn frame_paths(&self) -> &[PathBuf] {
        &self.frame_paths
    }

    pub fn frame_count(&self) -> usize {
        self.frame_paths.len()
    }

    /// Directory name, also used as the stem of the video and log files.
    pub fn name(&self) -> String {
        self.frame_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "timelapse".to_string())
    }

    /// Path the next frame should be captured to.
    pub fn next_frame_path(&self) -> PathBuf {
        self.frame_dir
            .join(format!("frame_{:05}.jpg", self.frame_paths.len()))
    }

    /// Record a frame that was written to [`next_frame_path`](Self::next_frame_path).
    pub fn push_frame(&mut self, path: PathBuf) {
        self.frame_paths.push(path);
    }

    /// Delete the frame directory and everything in it.
    pub fn remove_frames(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.frame_dir) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Keep ASCII alphanumerics, `-` and `_`.
pub fn safe_file_name(name: &str) -> String {
    let safe: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if safe.is_empty() {
        "print".to_string()
    } else {
        safe
    }
}
