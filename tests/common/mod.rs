#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Local};
use prusa_timelapse::assembler::VideoArtifact;
use prusa_timelapse::error::{PollError, ProcessError};
use prusa_timelapse::notifier::Notifier;
use prusa_timelapse::printer::{JobMetadata, PrinterState, PrinterStatus, StatusSource};
use prusa_timelapse::process::{CommandOutput, CommandRunner};

/// How a scripted invocation behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeed,
    Exit(i32),
    /// Exit 0 without writing the output file.
    NoOutput,
    /// Write a partial output file, then exit non-zero.
    PartialThenExit(i32),
    Cancel,
    TimeOut,
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Contents of the `-i` list file at the time of the call.
    pub input_list: Option<String>,
}

impl Invocation {
    pub fn output_path(&self) -> PathBuf {
        match self.args.iter().position(|a| a == "--output") {
            Some(i) => PathBuf::from(&self.args[i + 1]),
            None => PathBuf::from(self.args.last().cloned().unwrap_or_default()),
        }
    }

    pub fn is_concat_copy(&self) -> bool {
        self.args.windows(2).any(|w| w == ["-c", "copy"])
    }

    /// Frame or segment paths named in the input list, in order, without
    /// the repeated trailing entry of an image list.
    pub fn listed_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self
            .input_list
            .as_deref()
            .unwrap_or_default()
            .lines()
            .filter_map(|l| l.strip_prefix("file '"))
            .filter_map(|l| l.strip_suffix('\''))
            .map(str::to_string)
            .collect();
        if !self.is_concat_copy() {
            files.pop();
        }
        files
    }
}

/// Stands in for `rpicam-still` and `ffmpeg`: records every call and writes
/// the file the real program would have written.
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<Invocation>>,
    script: Mutex<HashMap<usize, Outcome>>,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the `index`-th call (zero based) behave as `outcome`.
    pub fn script(&self, index: usize, outcome: Outcome) {
        self.script.lock().unwrap().insert(index, outcome);
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn encoder_invocations(&self) -> Vec<Invocation> {
        self.invocations()
            .into_iter()
            .filter(|i| i.program == "ffmpeg")
            .collect()
    }

    pub fn capture_invocations(&self) -> Vec<Invocation> {
        self.invocations()
            .into_iter()
            .filter(|i| i.program == "rpicam-still")
            .collect()
    }
}

impl CommandRunner for FakeRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        _timeout: Duration,
    ) -> Result<CommandOutput, ProcessError> {
        let input_list = args
            .iter()
            .position(|a| a == "-i")
            .and_then(|i| args.get(i + 1))
            .and_then(|list| fs::read_to_string(list).ok());
        let invocation = Invocation {
            program: program.to_string(),
            args: args.to_vec(),
            input_list,
        };
        let output = invocation.output_path();

        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(invocation);
            calls.len() - 1
        };
        let outcome = self
            .script
            .lock()
            .unwrap()
            .get(&index)
            .copied()
            .unwrap_or(Outcome::Succeed);

        let exited = |code: i32| -> Result<CommandOutput, ProcessError> {
            Ok(CommandOutput {
                code: Some(code),
                stderr: format!("{} exited with {}", program, code),
            })
        };
        match outcome {
            Outcome::Succeed => {
                fs::write(&output, b"data").unwrap();
                exited(0)
            }
            Outcome::NoOutput => exited(0),
            Outcome::Exit(code) => exited(code),
            Outcome::PartialThenExit(code) => {
                fs::write(&output, b"partial").unwrap();
                exited(code)
            }
            Outcome::Cancel => {
                fs::write(&output, b"partial").unwrap();
                Err(ProcessError::Cancelled {
                    program: program.to_string(),
                })
            }
            Outcome::TimeOut => Err(ProcessError::TimedOut {
                program: program.to_string(),
                timeout_seconds: 1,
            }),
        }
    }
}

/// Write `count` fake frames into `dir`.
pub fn write_frames(dir: &Path, count: usize) -> Vec<PathBuf> {
    fs::create_dir_all(dir).unwrap();
    (0..count)
        .map(|i| {
            let path = dir.join(format!("frame_{:05}.jpg", i));
            fs::write(&path, b"jpeg").unwrap();
            path
        })
        .collect()
}

/// Replays a fixed sequence of poll results, then reports IDLE.
pub struct ScriptedPrinter {
    polls: Mutex<VecDeque<Result<PrinterStatus, PollError>>>,
}

impl ScriptedPrinter {
    pub fn new(polls: Vec<Result<PrinterStatus, PollError>>) -> Self {
        Self {
            polls: Mutex::new(polls.into()),
        }
    }
}

impl StatusSource for ScriptedPrinter {
    fn poll(&self) -> Result<PrinterStatus, PollError> {
        self.polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(PrinterStatus::new(PrinterState::Idle, None)))
    }
}

pub fn printing(job: &str) -> PrinterStatus {
    PrinterStatus::new(PrinterState::Printing, Some(job))
}

pub fn status(state: PrinterState) -> PrinterStatus {
    PrinterStatus::new(state, None)
}

pub fn connection_lost() -> PollError {
    PollError::ConnectionFailed {
        url: "http://printer/api/v1/status".to_string(),
        reason: "connection refused".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct Notice {
    pub path: PathBuf,
    pub job_name: String,
    pub frame_count: usize,
    pub started_at: DateTime<Local>,
}

/// Records every notice it receives.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub notices: Arc<Mutex<Vec<Notice>>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    fn notify(
        &self,
        artifact: &VideoArtifact,
        job_name: &str,
        started_at: DateTime<Local>,
        _job: Option<&JobMetadata>,
    ) -> anyhow::Result<()> {
        self.notices.lock().unwrap().push(Notice {
            path: artifact.path.clone(),
            job_name: job_name.to_string(),
            frame_count: artifact.frame_count,
            started_at,
        });
        if self.fail {
            anyhow::bail!("notifier unavailable");
        }
        Ok(())
    }
}

/// A one-shot HTTP responder on localhost.
///
/// Returns the base URL and a handle yielding the raw request (head and body).
pub fn serve_once(status_line: &str, body: &str) -> (String, JoinHandle<String>) {
    serve(vec![(status_line.to_string(), body.to_string())])
}

/// Answers consecutive requests with the given responses, one per connection.
pub fn serve(responses: Vec<(String, String)>) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    let handle = thread::spawn(move || {
        let mut requests = String::new();
        for (status_line, body) in responses {
            let (mut stream, _) = listener.accept().unwrap();
            requests.push_str(&read_request(&mut stream));
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
        }
        requests
    });

    (url, handle)
}

fn read_request(stream: &mut std::net::TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);

        let text = String::from_utf8_lossy(&data);
        if let Some(head_end) = text.find("\r\n\r\n") {
            let content_length = text[..head_end]
                .lines()
                .filter_map(|l| l.split_once(':'))
                .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if data.len() >= head_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&data).into_owned()
}
