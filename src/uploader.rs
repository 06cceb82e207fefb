//! Live snapshot relay to Prusa Connect.
//!
//! Uploads run on a worker thread behind a small bounded queue. Submitting
//! never blocks the capture loop: when the queue is full the snapshot is
//! dropped, since only the latest image matters for a live view.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use log::{debug, info, warn};

use crate::config::{PrusaConnectCamera, Rotation};

struct Snapshot {
    path: PathBuf,
    rotation: Rotation,
}

/// Background uploader for captured frames.
pub struct SnapshotUploader {
    sender: Option<SyncSender<Snapshot>>,
    worker: Option<JoinHandle<()>>,
}

impl SnapshotUploader {
    /// Start the upload worker.
    ///
    /// # Arguments
    ///
    /// * `camera` - Prusa Connect camera token and fingerprint
    /// * `url` - Snapshot endpoint
    /// * `timeout` - Deadline for each upload
    /// * `queue_depth` - Snapshots that may wait for the worker
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the thread
    /// cannot be spawned.
    pub fn spawn(
        camera: PrusaConnectCamera,
        url: String,
        timeout: Duration,
        queue_depth: usize,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        let (sender, receiver) = mpsc::sync_channel(queue_depth);

        let worker = thread::Builder::new()
            .name("snapshot-upload".to_string())
            .spawn(move || run_worker(receiver, client, camera, url))?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// Queue a frame for upload. Returns `false` if it was dropped.
    pub fn submit(&self, path: &Path, rotation: Rotation) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        let snapshot = Snapshot {
            path: path.to_path_buf(),
            rotation,
        };
        match sender.try_send(snapshot) {
            Ok(()) => true,
            Err(TrySendError::Full(snapshot)) => {
                debug!(
                    "Upload queue full, skipping snapshot {}",
                    snapshot.path.display()
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("Snapshot upload worker has stopped");
                false
            }
        }
    }
}

impl Drop for SnapshotUploader {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Snapshot upload worker panicked");
            }
        }
    }
}

fn run_worker(
    receiver: Receiver<Snapshot>,
    client: reqwest::blocking::Client,
    camera: PrusaConnectCamera,
    url: String,
) {
    for snapshot in receiver {
        if let Err(e) = upload_snapshot(&client, &url, &camera, &snapshot) {
            warn!(
                "Failed to upload {} to Prusa Connect: {}",
                snapshot.path.display(),
                e
            );
        }
    }
    debug!("Snapshot upload worker exiting");
}

fn upload_snapshot(
    client: &reqwest::blocking::Client,
    url: &str,
    camera: &PrusaConnectCamera,
    snapshot: &Snapshot,
) -> Result<()> {
    let image_data = rotate_jpeg(&fs::read(&snapshot.path)?, snapshot.rotation)?;
    info!(
        "Uploading to Prusa Connect: {} (size: {} bytes)",
        url,
        image_data.len()
    );

    let response = client
        .put(url)
        .header("Accept", "text/plain")
        .header("Content-Type", "image/jpg")
        .header("Token", &camera.token)
        .header("Fingerprint", &camera.fingerprint)
        .body(image_data)
        .send()?;

    match response.status().as_u16() {
        200 | 204 => {
            debug!("Snapshot uploaded to Prusa Connect");
            Ok(())
        }
        status => Err(anyhow::anyhow!("HTTP {}", status)),
    }
}

/// Rotate a JPEG clockwise and re-encode it. Unrotated data is returned as is.
pub fn rotate_jpeg(image_data: &[u8], rotation: Rotation) -> Result<Vec<u8>> {
    if rotation == Rotation::None {
        return Ok(image_data.to_vec());
    }

    let image = image::load_from_memory(image_data)?;
    let rotated = match rotation {
        Rotation::Clockwise90 => image.rotate90(),
        Rotation::Clockwise180 => image.rotate180(),
        Rotation::Clockwise270 => image.rotate270(),
        Rotation::None => image,
    };

    let mut buffer = Vec::new();
    rotated.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Jpeg)?;
    Ok(buffer)
}
