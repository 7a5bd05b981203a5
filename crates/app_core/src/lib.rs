//! StreamVio Core Domain Logic
//!
//! This crate contains:
//! - Application state management
//! - Configuration
//! - Error types
//! - Folder picker navigation
//! - Work engines (library scan, external transcoder)
//! - Job orchestration
//! - Library registry

pub mod state;
pub mod config;
pub mod error;
pub mod navigation;
pub mod engine;
pub mod jobs;
pub mod library;

#[cfg(test)]
pub(crate) mod testing;

pub use state::AppState;
pub use config::{
    AppConfig, FilesystemConfig, GeneralConfig, JobsConfig, ScannerConfig, TranscoderConfig,
};
pub use error::AppError;
pub use navigation::{BrowseSession, BrowseView};
pub use engine::{
    DirectoryScanEngine, EngineError, EngineHandle, EngineReport, EngineState,
    ExternalTranscoder, JobParams, TranscodeOptions, WorkEngine, WorkRequest,
};
pub use jobs::{estimate_remaining, CancelOutcome, JobEvent, JobManager, JobManagerBuilder};
pub use library::{Library, LibraryRegistry, LibrarySpec};
