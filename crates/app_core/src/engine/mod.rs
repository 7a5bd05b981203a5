//! Work engines
//!
//! A [`WorkEngine`] performs the actual long-running work behind a job. The
//! job manager only knows this contract: begin a unit of work, poll it for a
//! progress report, and ask it to stop.

mod scanner;
mod transcoder;

pub use scanner::DirectoryScanEngine;
pub use transcoder::{parse_progress, ExternalTranscoder, ProgressParser, HLS_PLAYLIST};

use api_proto::{FieldError, JobKind, LibraryType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Opaque reference to work an engine has accepted
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineHandle(pub String);

impl std::fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encoding options passed through to the transcoder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TranscodeOptions {
    /// Container format (mp4, webm, mkv, ...); forced to hls for HLS jobs
    pub output_format: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub video_bitrate_kbps: Option<u32>,
    pub audio_bitrate_kbps: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub hardware_acceleration: bool,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            output_format: None,
            video_codec: None,
            audio_codec: None,
            video_bitrate_kbps: None,
            audio_bitrate_kbps: None,
            width: None,
            height: None,
            hardware_acceleration: true,
        }
    }
}

impl TranscodeOptions {
    /// Flags appended to the transcoder command line
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(format) = &self.output_format {
            args.push(format!("--format={}", format));
        }
        if let Some(codec) = &self.video_codec {
            args.push(format!("--vcodec={}", codec));
        }
        if let Some(codec) = &self.audio_codec {
            args.push(format!("--acodec={}", codec));
        }
        if let Some(rate) = self.video_bitrate_kbps {
            args.push(format!("--vbitrate={}k", rate));
        }
        if let Some(rate) = self.audio_bitrate_kbps {
            args.push(format!("--abitrate={}k", rate));
        }
        if let Some(width) = self.width {
            args.push(format!("--width={}", width));
        }
        if let Some(height) = self.height {
            args.push(format!("--height={}", height));
        }
        if !self.hardware_acceleration {
            args.push("--no-hwaccel".to_string());
        }

        args
    }

    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();

        let positive = |value: Option<u32>, field: &str, errors: &mut Vec<FieldError>| {
            if value == Some(0) {
                errors.push(FieldError::new(field, "must be greater than zero"));
            }
        };
        positive(self.video_bitrate_kbps, "options.videoBitrateKbps", &mut errors);
        positive(self.audio_bitrate_kbps, "options.audioBitrateKbps", &mut errors);
        positive(self.width, "options.width", &mut errors);
        positive(self.height, "options.height", &mut errors);

        let token = |value: &Option<String>, field: &str, errors: &mut Vec<FieldError>| {
            if let Some(value) = value {
                let valid = !value.is_empty()
                    && value
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
                if !valid {
                    errors.push(FieldError::new(field, "must be a plain codec or format name"));
                }
            }
        };
        token(&self.output_format, "options.outputFormat", &mut errors);
        token(&self.video_codec, "options.videoCodec", &mut errors);
        token(&self.audio_codec, "options.audioCodec", &mut errors);

        errors
    }
}

/// What a job asks its engine to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobParams {
    /// Walk a library root and count media files
    Scan {
        root: String,
        library_type: LibraryType,
    },
    /// Convert `input` into a single file at `output`
    Transcode {
        input: String,
        output: String,
        options: TranscodeOptions,
    },
    /// Package `input` as an HLS playlist under `output_dir`
    Hls {
        input: String,
        output_dir: String,
        options: TranscodeOptions,
    },
}

impl JobParams {
    pub fn kind(&self) -> JobKind {
        match self {
            JobParams::Scan { .. } => JobKind::Scan,
            JobParams::Transcode { .. } => JobKind::Transcode,
            JobParams::Hls { .. } => JobKind::Hls,
        }
    }

    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let absolute = |value: &str, field: &str, errors: &mut Vec<FieldError>| {
            if value.trim().is_empty() {
                errors.push(FieldError::new(field, "must not be empty"));
            } else if !app_fs::path::is_absolute(&app_fs::path::normalize(value)) {
                errors.push(FieldError::new(field, "must be an absolute path"));
            }
        };

        match self {
            JobParams::Scan { root, .. } => absolute(root, "root", &mut errors),
            JobParams::Transcode {
                input,
                output,
                options,
            } => {
                absolute(input, "input", &mut errors);
                absolute(output, "output", &mut errors);
                errors.extend(options.validate());
            }
            JobParams::Hls {
                input,
                output_dir,
                options,
            } => {
                absolute(input, "input", &mut errors);
                absolute(output_dir, "outputDir", &mut errors);
                errors.extend(options.validate());
            }
        }

        errors
    }
}

/// Work handed to an engine
#[derive(Debug, Clone)]
pub struct WorkRequest {
    pub job_id: String,
    pub subject_id: String,
    pub params: JobParams,
}

/// Engine-side state of a unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Snapshot returned by [`WorkEngine::poll`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineReport {
    pub state: EngineState,
    /// 0..=100; values outside are clamped by the job manager
    pub progress: u8,
    pub output_path: Option<String>,
    pub error: Option<String>,
    pub items_found: Option<u64>,
}

impl EngineReport {
    pub fn running(progress: u8) -> Self {
        Self {
            state: EngineState::Running,
            progress,
            output_path: None,
            error: None,
            items_found: None,
        }
    }

    pub fn completed() -> Self {
        Self {
            state: EngineState::Completed,
            progress: 100,
            ..Self::running(100)
        }
    }

    pub fn failed(progress: u8, error: impl Into<String>) -> Self {
        Self {
            state: EngineState::Failed,
            error: Some(error.into()),
            ..Self::running(progress)
        }
    }

    pub fn cancelled(progress: u8) -> Self {
        Self {
            state: EngineState::Cancelled,
            ..Self::running(progress)
        }
    }

    pub fn with_output(mut self, output_path: impl Into<String>) -> Self {
        self.output_path = Some(output_path.into());
        self
    }

    pub fn with_items(mut self, items_found: u64) -> Self {
        self.items_found = Some(items_found);
        self
    }
}

/// Work engine errors
///
/// The display strings end up in `Job::error`, so each variant starts with a
/// stable prefix clients can match on.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("input unreadable: {path}: {reason}")]
    InputUnreadable { path: String, reason: String },

    #[error("permission denied: {path} ({hint})")]
    PermissionDenied { path: String, hint: String },

    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("engine crashed: {0}")]
    Crashed(String),

    #[error("unknown engine handle: {0}")]
    UnknownHandle(String),

    #[error("unsupported request: {0}")]
    Unsupported(String),

    #[error("engine I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Contract between the job manager and whatever does the work
#[async_trait]
pub trait WorkEngine: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Accept the work; errors here fail the job immediately
    async fn begin(&self, request: &WorkRequest) -> Result<EngineHandle, EngineError>;

    /// Current state of accepted work
    async fn poll(&self, handle: &EngineHandle) -> Result<EngineReport, EngineError>;

    /// Ask the work to stop. `Ok(true)` acknowledges that no further
    /// progress will be made; `Ok(false)` means the work was already over.
    async fn stop(&self, handle: &EngineHandle) -> Result<bool, EngineError>;
}
