//! External transcoder process engine

use super::{EngineError, EngineHandle, EngineReport, JobParams, WorkEngine, WorkRequest};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::oneshot;

/// Playlist written inside an HLS output directory
pub const HLS_PLAYLIST: &str = "index.m3u8";

const STDERR_TAIL_LINES: usize = 8;

type StopSignal = oneshot::Sender<oneshot::Sender<()>>;

#[derive(Default)]
struct TranscodeTask {
    progress: AtomicU8,
    outcome: Mutex<Option<EngineReport>>,
    stop: Mutex<Option<StopSignal>>,
}

/// Runs the transcoder binary as a child process
///
/// Invocation: `<binary> transcode <input> <output> [--format=..] [--vcodec=..]
/// [--acodec=..] [--vbitrate=..] [--abitrate=..] [--width=..] [--height=..]
/// [--no-hwaccel]`. Progress is read from stdout as `NN%` tokens separated by
/// `\r` or `\n`.
pub struct ExternalTranscoder {
    binary: PathBuf,
    tasks: DashMap<String, Arc<TranscodeTask>>,
}

impl ExternalTranscoder {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            tasks: DashMap::new(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

/// Last percentage token in `line`, clamped to 0..=100
pub fn parse_progress(line: &str) -> Option<u8> {
    let bytes = line.as_bytes();
    let mut result = None;

    for (i, &b) in bytes.iter().enumerate() {
        if b != b'%' {
            continue;
        }
        let mut start = i;
        while start > 0 && (bytes[start - 1].is_ascii_digit() || bytes[start - 1] == b'.') {
            start -= 1;
        }
        if start < i {
            if let Ok(value) = line[start..i].parse::<f64>() {
                result = Some(value.clamp(0.0, 100.0) as u8);
            }
        }
    }

    result
}

/// Incremental progress reader for chunked stdout
#[derive(Debug, Default)]
pub struct ProgressParser {
    pending: String,
}

impl ProgressParser {
    /// Feed a chunk; returns the latest complete progress value seen
    pub fn feed(&mut self, chunk: &str) -> Option<u8> {
        self.pending.push_str(chunk);

        let mut latest = None;
        while let Some(pos) = self.pending.find(['\r', '\n']) {
            let line: String = self.pending.drain(..=pos).collect();
            if let Some(progress) = parse_progress(&line) {
                latest = Some(progress);
            }
        }

        // A runaway line without separators is not progress output
        if self.pending.len() > 4096 {
            self.pending.clear();
        }

        latest
    }
}

fn describe_exit(status: ExitStatus, stderr_tail: &str) -> String {
    let mut description = match status.code() {
        Some(code) => format!("exit status {}", code),
        None => {
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                match status.signal() {
                    Some(signal) => format!("terminated by signal {}", signal),
                    None => "terminated abnormally".to_string(),
                }
            }
            #[cfg(not(unix))]
            {
                "terminated abnormally".to_string()
            }
        }
    };

    if let Some(last) = stderr_tail.lines().rev().find(|l| !l.trim().is_empty()) {
        description.push_str(": ");
        description.push_str(last.trim());
    }

    description
}

async fn read_progress(stdout: Option<ChildStdout>, task: Arc<TranscodeTask>) {
    let Some(mut stdout) = stdout else {
        return;
    };

    let mut parser = ProgressParser::default();
    let mut buf = [0u8; 1024];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if let Some(progress) = parser.feed(&String::from_utf8_lossy(&buf[..n])) {
                    // 100 is reported only after a clean exit
                    task.progress.fetch_max(progress.min(99), Ordering::Relaxed);
                }
            }
        }
    }
}

async fn read_stderr_tail(stderr: Option<ChildStderr>) -> String {
    let Some(stderr) = stderr else {
        return String::new();
    };

    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    tail.into_iter().collect::<Vec<_>>().join("\n")
}

/// Waits for the child or a stop signal, then records the outcome
async fn monitor(
    mut child: Child,
    task: Arc<TranscodeTask>,
    stop_rx: oneshot::Receiver<oneshot::Sender<()>>,
    output: String,
) {
    let stdout_reader = tokio::spawn(read_progress(child.stdout.take(), task.clone()));
    let stderr_reader = tokio::spawn(read_stderr_tail(child.stderr.take()));

    tokio::select! {
        status = child.wait() => {
            let stderr_tail = stderr_reader.await.unwrap_or_default();
            let _ = stdout_reader.await;
            let progress = task.progress.load(Ordering::Relaxed);

            let report = match status {
                Ok(status) if status.success() => EngineReport::completed().with_output(output),
                Ok(status) => EngineReport::failed(
                    progress,
                    EngineError::Crashed(describe_exit(status, &stderr_tail)).to_string(),
                ),
                Err(e) => EngineReport::failed(
                    progress,
                    EngineError::Crashed(format!("lost track of transcoder process: {}", e))
                        .to_string(),
                ),
            };
            *task.outcome.lock() = Some(report);
        }
        ack = stop_rx => {
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to kill transcoder process: {}", e);
            }
            stdout_reader.abort();
            stderr_reader.abort();

            let progress = task.progress.load(Ordering::Relaxed);
            *task.outcome.lock() = Some(EngineReport::cancelled(progress));
            if let Ok(ack) = ack {
                let _ = ack.send(());
            }
        }
    }
}

fn output_dir_error(dir: &Path, error: io::Error) -> EngineError {
    let dir = dir.to_string_lossy();
    match app_fs::FsError::from_io(error, &dir) {
        app_fs::FsError::PermissionDenied { path, hint } => {
            EngineError::PermissionDenied { path, hint }
        }
        app_fs::FsError::Io(e) => EngineError::Io(e),
        other => EngineError::Unavailable(format!("cannot prepare output directory: {}", other)),
    }
}

#[async_trait]
impl WorkEngine for ExternalTranscoder {
    fn name(&self) -> &str {
        "external-transcoder"
    }

    async fn begin(&self, request: &WorkRequest) -> Result<EngineHandle, EngineError> {
        let (input, output, options) = match &request.params {
            JobParams::Transcode {
                input,
                output,
                options,
            } => (input.clone(), output.clone(), options.clone()),
            JobParams::Hls {
                input,
                output_dir,
                options,
            } => {
                let mut options = options.clone();
                options.output_format = Some("hls".to_string());
                let playlist = app_fs::path::join(&app_fs::path::normalize(output_dir), HLS_PLAYLIST);
                (input.clone(), playlist, options)
            }
            JobParams::Scan { .. } => {
                return Err(EngineError::Unsupported(
                    "scan work cannot run on the transcoder".to_string(),
                ))
            }
        };

        if let Err(e) = tokio::fs::File::open(&input).await {
            return Err(EngineError::InputUnreadable {
                path: input,
                reason: e.to_string(),
            });
        }

        if let Some(parent) = Path::new(&output).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| output_dir_error(parent, e))?;
        }

        let child = Command::new(&self.binary)
            .arg("transcode")
            .arg(&input)
            .arg(&output)
            .args(options.to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => EngineError::Unavailable(format!(
                    "transcoder binary not found: {}",
                    self.binary.display()
                )),
                _ => EngineError::Unavailable(format!(
                    "failed to start {}: {}",
                    self.binary.display(),
                    e
                )),
            })?;

        tracing::info!(
            job_id = %request.job_id,
            input = %input,
            output = %output,
            "Transcoder started"
        );

        let task = Arc::new(TranscodeTask::default());
        let (stop_tx, stop_rx) = oneshot::channel();
        *task.stop.lock() = Some(stop_tx);

        let handle = EngineHandle(request.job_id.clone());
        self.tasks.insert(handle.0.clone(), task.clone());
        tokio::spawn(monitor(child, task, stop_rx, output));

        Ok(handle)
    }

    async fn poll(&self, handle: &EngineHandle) -> Result<EngineReport, EngineError> {
        let task = self
            .tasks
            .get(&handle.0)
            .map(|t| t.value().clone())
            .ok_or_else(|| EngineError::UnknownHandle(handle.0.clone()))?;

        let outcome = task.outcome.lock().clone();
        match outcome {
            Some(report) => {
                self.tasks.remove(&handle.0);
                Ok(report)
            }
            None => Ok(EngineReport::running(task.progress.load(Ordering::Relaxed))),
        }
    }

    async fn stop(&self, handle: &EngineHandle) -> Result<bool, EngineError> {
        let Some(task) = self.tasks.get(&handle.0).map(|t| t.value().clone()) else {
            return Ok(false);
        };
        if task.outcome.lock().is_some() {
            return Ok(false);
        }
        let Some(signal) = task.stop.lock().take() else {
            return Ok(false);
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if signal.send(ack_tx).is_err() {
            return Ok(false);
        }

        match ack_rx.await {
            Ok(()) => {
                self.tasks.remove(&handle.0);
                tracing::info!(handle = %handle, "Transcoder stopped");
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress() {
        assert_eq!(parse_progress("Progress: 42%"), Some(42));
        assert_eq!(parse_progress("frame=10 12.7% done"), Some(12));
        assert_eq!(parse_progress("a 10% then 20%"), Some(20));
        assert_eq!(parse_progress("150%"), Some(100));
        assert_eq!(parse_progress("no numbers %"), None);
        assert_eq!(parse_progress("plain text"), None);
    }

    #[test]
    fn test_parser_handles_carriage_returns_and_split_chunks() {
        let mut parser = ProgressParser::default();
        assert_eq!(parser.feed("\rProgress: 1"), None);
        assert_eq!(parser.feed("5%\rProgress: 3"), Some(15));
        assert_eq!(parser.feed("0%\n"), Some(30));
        assert_eq!(parser.feed("starting\n"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_describe_exit_uses_last_stderr_line() {
        use std::os::unix::process::ExitStatusExt;

        let status = ExitStatus::from_raw(2 << 8);
        assert_eq!(
            describe_exit(status, "warming up\ncodec not supported\n"),
            "exit status 2: codec not supported"
        );
        assert_eq!(describe_exit(ExitStatus::from_raw(9), ""), "terminated by signal 9");
    }

    #[tokio::test]
    async fn test_missing_input_is_unreadable() {
        let temp = tempfile::TempDir::new().unwrap();
        let engine = ExternalTranscoder::new("/nonexistent/transcoder");
        let request = WorkRequest {
            job_id: "j".into(),
            subject_id: "m".into(),
            params: JobParams::Transcode {
                input: temp.path().join("missing.mkv").to_string_lossy().into_owned(),
                output: temp.path().join("out.mp4").to_string_lossy().into_owned(),
                options: Default::default(),
            },
        };

        let err = engine.begin(&request).await.unwrap_err();
        assert!(err.to_string().starts_with("input unreadable"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let temp = tempfile::TempDir::new().unwrap();
        let input = temp.path().join("movie.mkv");
        std::fs::write(&input, b"data").unwrap();

        let engine = ExternalTranscoder::new(temp.path().join("no-such-transcoder"));
        let request = WorkRequest {
            job_id: "j".into(),
            subject_id: "m".into(),
            params: JobParams::Transcode {
                input: input.to_string_lossy().into_owned(),
                output: temp.path().join("out/movie.mp4").to_string_lossy().into_owned(),
                options: Default::default(),
            },
        };

        let err = engine.begin(&request).await.unwrap_err();
        assert!(err.to_string().starts_with("engine unavailable"));
    }
}
