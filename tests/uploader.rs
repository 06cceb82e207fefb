mod common;

use std::io::Cursor;
use std::time::Duration;

use common::serve_once;
use prusa_timelapse::config::PrusaConnectCamera;
use prusa_timelapse::{Rotation, SnapshotUploader};

fn camera() -> PrusaConnectCamera {
    PrusaConnectCamera {
        token: "camera-token".to_string(),
        fingerprint: "fingerprint-0123456789".to_string(),
    }
}

#[test]
fn test_snapshot_is_rotated_and_uploaded_with_camera_headers() {
    let dir = tempfile::tempdir().unwrap();
    let frame = dir.path().join("frame_00000.jpg");
    let mut jpeg = Vec::new();
    image::DynamicImage::new_rgb8(32, 16)
        .write_to(&mut Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
        .unwrap();
    std::fs::write(&frame, &jpeg).unwrap();

    let (url, request) = serve_once("200 OK", "");
    let uploader = SnapshotUploader::spawn(
        camera(),
        format!("{}/c/snapshot", url),
        Duration::from_secs(5),
        2,
    )
    .unwrap();

    assert!(uploader.submit(&frame, Rotation::Clockwise90));
    // Dropping waits for the queued upload to finish.
    drop(uploader);

    let request = request.join().unwrap();
    let lower = request.to_ascii_lowercase();
    assert!(lower.starts_with("put /c/snapshot "));
    assert!(lower.contains("token: camera-token"));
    assert!(lower.contains("fingerprint: fingerprint-0123456789"));
    assert!(lower.contains("content-type: image/jpg"));
}

#[test]
fn test_full_queue_drops_snapshots_without_blocking() {
    let dir = tempfile::tempdir().unwrap();
    let frame = dir.path().join("frame_00000.jpg");
    std::fs::write(&frame, b"jpeg").unwrap();

    // Accepts connections but never answers, so the worker stays busy.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/c/snapshot", listener.local_addr().unwrap());
    let uploader =
        SnapshotUploader::spawn(camera(), url, Duration::from_millis(500), 1).unwrap();

    let start = std::time::Instant::now();
    let accepted = (0..50)
        .filter(|_| uploader.submit(&frame, Rotation::None))
        .count();

    assert!(start.elapsed() < Duration::from_millis(400));
    assert!(accepted >= 1);
    assert!(accepted <= 2);
    drop(uploader);
    drop(listener);
}
