//! Wire types shared between the core and its HTTP/CLI clients
//!
//! This crate defines the vocabulary of the exposed surface: job and library
//! enums, the job record, and the error body every failed call returns.
//! JSON field names are camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Kind of long-running operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Scan,
    Transcode,
    Hls,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Scan => "scan",
            JobKind::Transcode => "transcode",
            JobKind::Hls => "hls",
        }
    }
}

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Pending or processing
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    /// Completed, failed or cancelled; no further changes
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

/// Kind of media a library holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryType {
    Movies,
    Series,
    Music,
    Photos,
}

impl LibraryType {
    pub const ALL: [LibraryType; 4] = [
        LibraryType::Movies,
        LibraryType::Series,
        LibraryType::Music,
        LibraryType::Photos,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LibraryType::Movies => "movies",
            LibraryType::Series => "series",
            LibraryType::Music => "music",
            LibraryType::Photos => "photos",
        }
    }
}

/// Unknown enum spelling
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} {value:?} (expected one of: {expected})")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
    pub expected: &'static str,
}

impl FromStr for JobKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scan" => Ok(JobKind::Scan),
            "transcode" => Ok(JobKind::Transcode),
            "hls" => Ok(JobKind::Hls),
            _ => Err(ParseEnumError {
                kind: "job kind",
                value: s.to_string(),
                expected: "scan, transcode, hls",
            }),
        }
    }
}

impl FromStr for LibraryType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "movies" => Ok(LibraryType::Movies),
            "series" => Ok(LibraryType::Series),
            "music" => Ok(LibraryType::Music),
            "photos" => Ok(LibraryType::Photos),
            _ => Err(ParseEnumError {
                kind: "library type",
                value: s.to_string(),
                expected: "movies, series, music, photos",
            }),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for LibraryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracked long-running operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub kind: JobKind,
    /// Library id for scans, media id for transcodes
    pub subject_id: String,
    pub status: JobStatus,
    /// 0..=100
    pub progress: u8,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Media files found, set by completed scans
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_found: Option<u64>,
}

/// Job plus derived display fields
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    #[serde(flatten)]
    pub job: Job,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_remaining_secs: Option<u64>,
}

/// Error category clients branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    NotFound,
    Conflict,
    Permission,
    InvalidPath,
    Engine,
    Internal,
}

impl ErrorCode {
    /// HTTP status the thin API layer maps this code to
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::Validation | ErrorCode::InvalidPath => 400,
            ErrorCode::Permission => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::Conflict => 409,
            ErrorCode::Engine => 502,
            ErrorCode::Internal => 500,
        }
    }
}

/// One failing input field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Body of every failed response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    /// Manual remediation, always present for permission errors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

/// Response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApiResponse<T> {
    Ok { data: T },
    Error { error: ErrorBody },
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        ApiResponse::Ok { data }
    }

    pub fn error(error: ErrorBody) -> Self {
        ApiResponse::Error { error }
    }
}

impl<T, E: Into<ErrorBody>> From<Result<T, E>> for ApiResponse<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => ApiResponse::ok(data),
            Err(e) => ApiResponse::error(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job {
            job_id: "j1".to_string(),
            kind: JobKind::Transcode,
            subject_id: "media-7".to_string(),
            status: JobStatus::Processing,
            progress: 40,
            started_at: Utc::now(),
            finished_at: None,
            output_path: None,
            error: None,
            items_found: None,
        }
    }

    #[test]
    fn test_status_classification() {
        assert!(JobStatus::Pending.is_active());
        assert!(JobStatus::Processing.is_active());
        for status in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(status.is_terminal());
        }
    }

    #[test]
    fn test_library_type_parse() {
        assert_eq!("Movies".parse::<LibraryType>().unwrap(), LibraryType::Movies);
        let err = "podcasts".parse::<LibraryType>().unwrap_err();
        assert!(err.to_string().contains("podcasts"));
    }

    #[test]
    fn test_job_view_json_shape() {
        let view = JobView {
            job: sample_job(),
            estimated_remaining_secs: Some(30),
        };
        let json = serde_json::to_value(&view).unwrap();

        assert_eq!(json["jobId"], "j1");
        assert_eq!(json["kind"], "transcode");
        assert_eq!(json["status"], "processing");
        assert_eq!(json["estimatedRemainingSecs"], 30);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_error_envelope() {
        let response: ApiResponse<()> = ApiResponse::error(ErrorBody {
            code: ErrorCode::Validation,
            message: "invalid library".to_string(),
            hint: None,
            fields: vec![FieldError::new("name", "must not be empty")],
        });
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["status"], "error");
        assert_eq!(json["error"]["code"], "validation");
        assert_eq!(json["error"]["fields"][0]["field"], "name");
        assert_eq!(ErrorCode::Conflict.http_status(), 409);
    }
}
