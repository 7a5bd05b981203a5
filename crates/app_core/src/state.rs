//! Application state management

use crate::config::AppConfig;
use crate::engine::{
    DirectoryScanEngine, ExternalTranscoder, JobParams, TranscodeOptions, WorkEngine,
};
use crate::error::AppError;
use crate::jobs::JobManager;
use crate::library::LibraryRegistry;
use crate::navigation::BrowseSession;
use api_proto::{Job, JobKind};
use app_db::LibraryStore;
use app_fs::{FilesystemAccessor, PermissionDiagnostics};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Media ids name files under the transcode directory, so they must stay a
/// single path component
fn check_media_id(media_id: &str) -> Result<(), AppError> {
    if media_id.contains(['/', '\\', '\0']) || media_id.contains("..") {
        return Err(AppError::validation(
            "mediaId",
            "must not contain path separators or '..'",
        ));
    }
    Ok(())
}

/// Main application state
///
/// Must be created inside a tokio runtime; job drivers are spawned on it.
pub struct AppState {
    /// Application configuration
    pub config: RwLock<AppConfig>,

    /// Roots, browsing, directory creation
    pub filesystem: FilesystemAccessor,

    /// Access checks and repair for the service account
    pub permissions: PermissionDiagnostics,

    /// Long-running work
    pub jobs: JobManager,

    /// Library records and scans
    pub libraries: LibraryRegistry,

    scan_listener: JoinHandle<()>,
}

impl AppState {
    /// Create a new application state with the built-in engines
    pub fn new(config: AppConfig) -> Result<Self, AppError> {
        let transcoder: Arc<dyn WorkEngine> =
            Arc::new(ExternalTranscoder::new(config.transcoder.binary.clone()));
        let jobs = JobManager::builder()
            .config(config.jobs.clone())
            .engine(
                JobKind::Scan,
                Arc::new(DirectoryScanEngine::new(config.scanner.clone())),
            )
            .engine(JobKind::Transcode, transcoder.clone())
            .engine(JobKind::Hls, transcoder)
            .build()?;

        Self::with_jobs(config, jobs)
    }

    /// Create a state around an existing job manager
    pub fn with_jobs(config: AppConfig, jobs: JobManager) -> Result<Self, AppError> {
        let pool = app_db::init(&config.data_dir()).map_err(|e| AppError::Init(e.to_string()))?;

        let filesystem = FilesystemAccessor::new()
            .with_extra_candidates(config.filesystem.extra_root_candidates.clone())
            .show_hidden(config.filesystem.show_hidden)
            .media_folder_name(config.filesystem.media_folder_name.clone());
        let permissions = PermissionDiagnostics::new(config.service_account());

        let libraries = LibraryRegistry::new(LibraryStore::new(pool), jobs.clone());
        let scan_listener = libraries.spawn_scan_listener();

        tracing::info!(
            data_dir = %config.data_dir().display(),
            account = %permissions.account(),
            "Application state ready"
        );

        Ok(Self {
            config: RwLock::new(config),
            filesystem,
            permissions,
            jobs,
            libraries,
            scan_listener,
        })
    }

    /// Save the current configuration
    pub fn save_config(&self) -> anyhow::Result<()> {
        self.config.read().save()
    }

    /// Fresh folder-picker session
    pub fn browse_session(&self) -> BrowseSession {
        BrowseSession::new()
    }

    /// Create (or find) the default media folder under the discovered roots
    pub fn default_media_folder(&self) -> Option<String> {
        let roots = self.filesystem.list_roots();
        self.filesystem.discover_default_media_folder(&roots)
    }

    fn transcode_dir(&self) -> PathBuf {
        let config = self.config.read();
        config
            .transcoder
            .output_dir
            .clone()
            .unwrap_or_else(|| config.data_dir().join("transcodes"))
    }

    /// Start a transcode of `input` for `media_id`
    ///
    /// Without `output` the result lands in the transcode directory as
    /// `<media_id>.<format>`.
    pub fn start_transcode(
        &self,
        media_id: &str,
        input: &str,
        output: Option<&str>,
        options: TranscodeOptions,
    ) -> Result<Job, AppError> {
        check_media_id(media_id)?;
        let output = match output {
            Some(output) => app_fs::path::normalize(output),
            None => {
                let extension = options.output_format.as_deref().unwrap_or("mp4");
                let dir = app_fs::path::normalize(&self.transcode_dir().to_string_lossy());
                app_fs::path::join(&dir, &format!("{}.{}", media_id, extension))
            }
        };

        self.jobs.start(
            JobKind::Transcode,
            media_id,
            JobParams::Transcode {
                input: app_fs::path::normalize(input),
                output,
                options,
            },
        )
    }

    /// Start HLS packaging of `input` for `media_id`
    ///
    /// Without `output_dir` the playlist lands in `<transcode dir>/hls/<media_id>`.
    pub fn start_hls(
        &self,
        media_id: &str,
        input: &str,
        output_dir: Option<&str>,
        options: TranscodeOptions,
    ) -> Result<Job, AppError> {
        check_media_id(media_id)?;
        let output_dir = match output_dir {
            Some(dir) => app_fs::path::normalize(dir),
            None => {
                let base = app_fs::path::normalize(&self.transcode_dir().to_string_lossy());
                app_fs::path::join(&app_fs::path::join(&base, "hls"), media_id)
            }
        };

        self.jobs.start(
            JobKind::Hls,
            media_id,
            JobParams::Hls {
                input: app_fs::path::normalize(input),
                output_dir,
                options,
            },
        )
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        self.scan_listener.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualEngine;
    use api_proto::JobStatus;
    use tempfile::TempDir;

    fn state_in(dir: &TempDir) -> AppState {
        let mut config = AppConfig::default();
        config.general.data_dir = Some(dir.path().join("data"));
        config.transcoder.output_dir = Some(dir.path().join("out"));

        let engine = ManualEngine::new();
        let jobs = JobManager::builder()
            .engine(JobKind::Transcode, engine.clone())
            .engine(JobKind::Hls, engine)
            .build()
            .unwrap();
        AppState::with_jobs(config, jobs).unwrap()
    }

    #[tokio::test]
    async fn test_default_transcode_output() {
        let dir = TempDir::new().unwrap();
        let state = state_in(&dir);
        let options = TranscodeOptions {
            output_format: Some("webm".into()),
            ..Default::default()
        };

        let job = state
            .start_transcode("media-9", "/srv/in.mkv", None, options)
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let err = state
            .start_transcode("media-9", "/srv/in.mkv", Some("/tmp/x.mp4"), Default::default())
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_hls_and_transcode_are_independent() {
        let dir = TempDir::new().unwrap();
        let state = state_in(&dir);

        state
            .start_transcode("media-1", "/srv/in.mkv", None, Default::default())
            .unwrap();
        state
            .start_hls("media-1", "/srv/in.mkv", None, Default::default())
            .unwrap();
        assert!(state.jobs.has_active_subject("media-1"));
    }

    #[tokio::test]
    async fn test_media_id_cannot_escape_transcode_dir() {
        let dir = TempDir::new().unwrap();
        let state = state_in(&dir);

        for media_id in ["../../x", "a/b", "a\\b", ".."] {
            let err = state
                .start_transcode(media_id, "/srv/in.mkv", None, Default::default())
                .unwrap_err();
            match err {
                AppError::Validation(fields) => assert_eq!(fields[0].field, "mediaId"),
                other => panic!("unexpected error for {media_id}: {other:?}"),
            }
            assert!(matches!(
                state.start_hls(media_id, "/srv/in.mkv", None, Default::default()),
                Err(AppError::Validation(_))
            ));
        }
        assert!(state.jobs.list().is_empty());
    }

    #[test]
    fn test_requires_runtime() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.general.data_dir = Some(dir.path().to_path_buf());

        assert!(matches!(AppState::new(config), Err(AppError::Init(_))));
    }
}
