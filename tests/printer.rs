mod common;

use std::time::Duration;

use common::{serve, serve_once};
use prusa_timelapse::error::PollError;
use prusa_timelapse::{PrinterService, PrinterState, PrinterStatus, StatusSource};
use serde_json::json;

fn service(url: &str) -> PrinterService {
    PrinterService::new(
        format!("{}/api/v1", url),
        "secret-key".to_string(),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn printing_payload() -> serde_json::Value {
    json!({
        "printer": {
            "state": "PRINTING",
            "temp_nozzle": 215.0,
            "target_nozzle": 215.0,
            "temp_bed": 60.0,
            "target_bed": 60.0
        },
        "job": {
            "id": 1234,
            "state": "PRINTING",
            "progress": 45.5,
            "time_printing": 2700,
            "time_remaining": 3300,
            "file": {
                "name": "test_print.gcode",
                "display_name": "Test Print",
                "path": "/usb/test_print.gcode"
            }
        }
    })
}

#[test]
fn test_idle_payload_is_a_status_not_an_error() {
    let status = PrinterStatus::from_payload(json!({
        "printer": {"state": "IDLE", "temp_nozzle": 25.0},
        "job": null,
        "storage": {"path": "/usb/", "name": "USB", "read_only": false}
    }))
    .unwrap();

    assert_eq!(status.state, PrinterState::Idle);
    assert_eq!(status.job_name, None);
    assert_eq!(status.progress, None);
}

#[test]
fn test_printing_payload_is_normalized() {
    let status = PrinterStatus::from_payload(printing_payload()).unwrap();
    assert_eq!(status.state, PrinterState::Printing);
    assert_eq!(status.job_name.as_deref(), Some("Test Print"));
    assert_eq!(status.progress, Some(46));
    assert_eq!(status.raw_payload, printing_payload());
    let job = status.job.unwrap();
    assert_eq!(job.display_name.as_deref(), Some("Test Print"));
    assert_eq!(job.path.as_deref(), Some("/usb/test_print.gcode"));
    assert_eq!(job.size_bytes, None);
}

#[test]
fn test_paused_payload_is_active() {
    let status = PrinterStatus::from_payload(json!({
        "printer": {"state": "PAUSED"},
        "job": {"state": "PAUSED", "progress": 30.0, "file": {"name": "test_print.gcode"}}
    }))
    .unwrap();
    assert!(status.state.is_active());
    assert_eq!(status.job_name.as_deref(), Some("test_print"));
}

#[test]
fn test_poll_sends_api_key() {
    let (url, request) = serve_once("200 OK", &printing_payload().to_string());

    let status = service(&url).poll().unwrap();

    assert_eq!(status.job_name.as_deref(), Some("Test Print"));
    let request = request.join().unwrap().to_ascii_lowercase();
    assert!(request.starts_with("get /api/v1/status "));
    assert!(request.contains("x-api-key: secret-key"));
}

#[test]
fn test_job_name_falls_back_to_job_endpoint() {
    let status = json!({"printer": {"state": "PRINTING"}}).to_string();
    let job = json!({"id": 7, "file": {"name": "/usb/cube.bgcode"}}).to_string();
    let (url, requests) = serve(vec![
        ("200 OK".to_string(), status),
        ("200 OK".to_string(), job),
    ]);

    let status = service(&url).poll().unwrap();

    assert_eq!(status.state, PrinterState::Printing);
    assert_eq!(status.job_name.as_deref(), Some("cube"));
    assert_eq!(
        status.job.and_then(|job| job.file_name).as_deref(),
        Some("/usb/cube.bgcode")
    );
    assert!(requests.join().unwrap().contains("GET /api/v1/job "));
}

#[test]
fn test_failed_job_lookup_leaves_name_empty() {
    let status = json!({"printer": {"state": "PRINTING"}}).to_string();
    let (url, _requests) = serve(vec![
        ("200 OK".to_string(), status),
        ("500 Internal Server Error".to_string(), String::new()),
    ]);

    let status = service(&url).poll().unwrap();
    assert_eq!(status.state, PrinterState::Printing);
    assert_eq!(status.job_name, None);
}

#[test]
fn test_http_error_status_is_reported() {
    let (url, _request) = serve_once("401 Unauthorized", "{}");
    match service(&url).poll() {
        Err(PollError::HttpError { status, .. }) => assert_eq!(status, 401),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_garbage_body_is_malformed() {
    let (url, _request) = serve_once("200 OK", "<html>not json</html>");
    assert!(matches!(
        service(&url).poll(),
        Err(PollError::MalformedResponse { .. })
    ));
}

#[test]
fn test_json_without_state_is_malformed() {
    let (url, _request) = serve_once("200 OK", r#"{"storage": {}}"#);
    assert!(matches!(
        service(&url).poll(),
        Err(PollError::MalformedResponse { .. })
    ));
}

#[test]
fn test_unreachable_printer_is_a_connection_failure() {
    // Bind and immediately drop a listener to get a port nobody is serving.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let result = service(&format!("http://127.0.0.1:{}", port)).poll();
    assert!(matches!(result, Err(PollError::ConnectionFailed { .. })));
}
