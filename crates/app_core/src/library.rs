//! Library registry

use crate::engine::JobParams;
use crate::error::AppError;
use crate::jobs::{JobEvent, JobManager};
use api_proto::{FieldError, Job, JobKind, JobStatus, LibraryType};
use app_db::{LibraryFields, LibraryRecord, LibraryStore};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use uuid::Uuid;

const MAX_NAME_LEN: usize = 255;

/// A registered media library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Library {
    pub id: String,
    pub name: String,
    /// Normalized absolute path
    pub path: String,
    #[serde(rename = "type")]
    pub library_type: LibraryType,
    pub scan_automatically: bool,
    /// Media files found by the last completed scan
    pub item_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied library fields, validated before storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LibrarySpec {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub library_type: String,
    pub scan_automatically: bool,
}

/// Fields that passed validation
struct ValidSpec {
    name: String,
    path: String,
    library_type: LibraryType,
    scan_automatically: bool,
}

impl ValidSpec {
    fn fields(&self) -> LibraryFields<'_> {
        LibraryFields {
            name: &self.name,
            path: &self.path,
            library_type: self.library_type.as_str(),
            scan_automatically: self.scan_automatically,
        }
    }
}

/// Check every field and report all failures at once
fn validate(spec: &LibrarySpec) -> Result<ValidSpec, AppError> {
    let mut errors = Vec::new();

    let name = spec.name.trim();
    if name.is_empty() {
        errors.push(FieldError::new("name", "must not be empty"));
    } else if name.chars().count() > MAX_NAME_LEN {
        errors.push(FieldError::new(
            "name",
            format!("must be at most {} characters", MAX_NAME_LEN),
        ));
    }

    let raw_path = spec.path.trim();
    let path = app_fs::path::normalize(raw_path);
    if raw_path.is_empty() {
        errors.push(FieldError::new("path", "must not be empty"));
    } else if raw_path.contains('\0') {
        errors.push(FieldError::new("path", "must not contain NUL characters"));
    } else if !app_fs::path::is_absolute(&path) {
        errors.push(FieldError::new("path", "must be an absolute path"));
    }

    let library_type = match spec.library_type.parse::<LibraryType>() {
        Ok(library_type) => Some(library_type),
        Err(e) => {
            errors.push(FieldError::new("type", e.to_string()));
            None
        }
    };

    match library_type {
        Some(library_type) if errors.is_empty() => Ok(ValidSpec {
            name: name.to_string(),
            path,
            library_type,
            scan_automatically: spec.scan_automatically,
        }),
        _ => Err(AppError::Validation(errors)),
    }
}

fn to_library(record: LibraryRecord) -> Result<Library, AppError> {
    let library_type = record.library_type.parse::<LibraryType>().map_err(|e| {
        AppError::Database(format!("library {} is corrupt: {}", record.library_id, e))
    })?;

    Ok(Library {
        id: record.library_id,
        name: record.name,
        path: record.path,
        library_type,
        scan_automatically: record.scan_automatically,
        item_count: u64::try_from(record.item_count).unwrap_or(0),
        created_at: DateTime::from_timestamp(record.created_at, 0).unwrap_or_default(),
        updated_at: DateTime::from_timestamp(record.updated_at, 0).unwrap_or_default(),
    })
}

/// Library CRUD plus scan orchestration
#[derive(Clone)]
pub struct LibraryRegistry {
    store: LibraryStore,
    jobs: JobManager,
    /// Serializes delete against scan admission
    admission: Arc<Mutex<()>>,
}

impl LibraryRegistry {
    pub fn new(store: LibraryStore, jobs: JobManager) -> Self {
        Self {
            store,
            jobs,
            admission: Arc::new(Mutex::new(())),
        }
    }

    /// Register a library; starts a scan when `scan_automatically` is set
    ///
    /// A scan that cannot start does not undo the creation; it is logged and
    /// the library is returned.
    pub fn create(&self, spec: &LibrarySpec) -> Result<Library, AppError> {
        let valid = validate(spec)?;
        let id = Uuid::new_v4().to_string();
        let library = to_library(self.store.insert(&id, &valid.fields())?)?;

        tracing::info!(
            library_id = %library.id,
            name = %library.name,
            path = %library.path,
            "Library created"
        );

        if library.scan_automatically {
            if let Err(e) = self.trigger_scan(&library.id) {
                tracing::warn!(library_id = %library.id, "Initial scan not started: {}", e);
            }
        }

        Ok(library)
    }

    /// Replace every mutable field; the id is kept
    pub fn update(&self, library_id: &str, spec: &LibrarySpec) -> Result<Library, AppError> {
        let valid = validate(spec)?;
        let library = to_library(self.store.update(library_id, &valid.fields())?)?;
        tracing::info!(library_id = %library_id, "Library updated");
        Ok(library)
    }

    /// Remove a library that has no active job
    pub fn delete(&self, library_id: &str) -> Result<(), AppError> {
        let _admission = self.admission.lock();
        if self.jobs.has_active_subject(library_id) {
            return Err(AppError::Conflict(format!(
                "library {} has an active job; cancel it first",
                library_id
            )));
        }

        if !self.store.delete(library_id)? {
            return Err(AppError::NotFound(format!("library {}", library_id)));
        }

        tracing::info!(library_id = %library_id, "Library deleted");
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<Library>, AppError> {
        self.store.list()?.into_iter().map(to_library).collect()
    }

    pub fn get(&self, library_id: &str) -> Result<Library, AppError> {
        self.store
            .get(library_id)?
            .ok_or_else(|| AppError::NotFound(format!("library {}", library_id)))
            .and_then(to_library)
    }

    /// Start a scan job for the library
    pub fn trigger_scan(&self, library_id: &str) -> Result<Job, AppError> {
        let _admission = self.admission.lock();
        let library = self.get(library_id)?;
        self.jobs.start(
            JobKind::Scan,
            &library.id,
            JobParams::Scan {
                root: library.path,
                library_type: library.library_type,
            },
        )
    }

    /// Record the item count of a completed scan. Returns false when the job
    /// is not a completed scan or the library is gone.
    pub fn apply_scan_result(&self, job: &Job) -> Result<bool, AppError> {
        if job.kind != JobKind::Scan || job.status != JobStatus::Completed {
            return Ok(false);
        }
        let Some(items) = job.items_found else {
            return Ok(false);
        };

        let count = i64::try_from(items).unwrap_or(i64::MAX);
        let updated = self.store.set_item_count(&job.subject_id, count)?;
        if updated {
            tracing::info!(library_id = %job.subject_id, items, "Library item count updated");
        }
        Ok(updated)
    }

    /// Keep item counts in sync with finished scans
    pub fn spawn_scan_listener(&self) -> JoinHandle<()> {
        let registry = self.clone();
        let mut events = self.jobs.subscribe();

        self.jobs.runtime().spawn(async move {
            loop {
                match events.recv().await {
                    Ok(JobEvent { job }) => {
                        if job.kind != JobKind::Scan || job.status != JobStatus::Completed {
                            continue;
                        }
                        let worker = registry.clone();
                        let result =
                            tokio::task::spawn_blocking(move || worker.apply_scan_result(&job)).await;
                        match result {
                            Ok(Err(e)) => tracing::warn!("Failed to record scan result: {}", e),
                            Err(e) => tracing::warn!("Scan result task failed: {}", e),
                            Ok(Ok(_)) => {}
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Scan listener fell behind job events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobsConfig;
    use crate::testing::{wait_for_status, ManualEngine};
    use api_proto::ErrorCode;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        engine: Arc<ManualEngine>,
        jobs: JobManager,
        registry: LibraryRegistry,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let pool = app_db::init(dir.path()).unwrap();
        let engine = ManualEngine::new();
        let jobs = JobManager::builder()
            .config(JobsConfig {
                poll_interval_ms: 5,
                cancel_timeout_ms: 200,
                ..JobsConfig::default()
            })
            .engine(JobKind::Scan, engine.clone())
            .build()
            .unwrap();
        let registry = LibraryRegistry::new(LibraryStore::new(pool), jobs.clone());

        Fixture {
            _dir: dir,
            engine,
            jobs,
            registry,
        }
    }

    fn spec(name: &str, path: &str, library_type: &str) -> LibrarySpec {
        LibrarySpec {
            name: name.to_string(),
            path: path.to_string(),
            library_type: library_type.to_string(),
            scan_automatically: false,
        }
    }

    #[tokio::test]
    async fn test_create_normalizes_and_lists() {
        let f = fixture();
        let library = f
            .registry
            .create(&spec("  Movies ", "/srv//media/movies/", "movies"))
            .unwrap();

        assert_eq!(library.name, "Movies");
        assert_eq!(library.path, "/srv/media/movies");
        assert_eq!(library.library_type, LibraryType::Movies);
        assert_eq!(library.item_count, 0);

        let listed = f.registry.list().unwrap();
        assert_eq!(listed, vec![library.clone()]);
        assert_eq!(f.registry.get(&library.id).unwrap(), library);
    }

    #[tokio::test]
    async fn test_validation_reports_every_field() {
        let f = fixture();
        let err = f.registry.create(&spec("", "relative/path", "podcasts")).unwrap_err();

        match err {
            AppError::Validation(fields) => {
                let names: Vec<_> = fields.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(names, vec!["name", "path", "type"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(f.registry.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_replaces_fields_and_keeps_id() {
        let f = fixture();
        let library = f.registry.create(&spec("Shows", "/srv/tv", "series")).unwrap();

        let mut changed = spec("TV Shows", "/srv/media/tv", "series");
        changed.scan_automatically = true;
        let updated = f.registry.update(&library.id, &changed).unwrap();

        assert_eq!(updated.id, library.id);
        assert_eq!(updated.name, "TV Shows");
        assert!(updated.scan_automatically);

        let err = f.registry.update("missing", &changed).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let f = fixture();
        let err = f.registry.delete("missing").unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_blocked_while_scanning() {
        let f = fixture();
        let library = f.registry.create(&spec("Music", "/srv/music", "music")).unwrap();

        let job = f.registry.trigger_scan(&library.id).unwrap();
        wait_for_status(&f.jobs, &job.job_id, JobStatus::Processing).await;

        let err = f.registry.delete(&library.id).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(f.registry.get(&library.id).is_ok());

        f.jobs.cancel(&job.job_id).await.unwrap();
        f.registry.delete(&library.id).unwrap();
        assert!(matches!(
            f.registry.get(&library.id),
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_delete_and_scan_never_both_win() {
        let f = fixture();

        for round in 0..20 {
            let library = f
                .registry
                .create(&spec(&format!("Lib {round}"), "/srv/race", "movies"))
                .unwrap();
            let barrier = Arc::new(std::sync::Barrier::new(2));

            let scanner = {
                let registry = f.registry.clone();
                let barrier = barrier.clone();
                let id = library.id.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.trigger_scan(&id)
                })
            };
            let deleter = {
                let registry = f.registry.clone();
                let id = library.id.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.delete(&id)
                })
            };

            let scanned = scanner.join().unwrap();
            let deleted = deleter.join().unwrap();
            match (scanned, deleted) {
                (Ok(_), Err(AppError::Conflict(_))) => {
                    assert!(f.registry.get(&library.id).is_ok());
                }
                (Err(AppError::NotFound(_)), Ok(())) => {
                    assert!(!f.jobs.has_active_subject(&library.id));
                }
                other => panic!("round {round}: unexpected results {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_trigger_scan_conflicts_while_running() {
        let f = fixture();
        let library = f.registry.create(&spec("Photos", "/srv/photos", "photos")).unwrap();

        f.registry.trigger_scan(&library.id).unwrap();
        let err = f.registry.trigger_scan(&library.id).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = f.registry.trigger_scan("missing").unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_auto_scan_on_create_updates_item_count() {
        let f = fixture();
        let listener = f.registry.spawn_scan_listener();

        let mut auto = spec("Movies", "/srv/movies", "movies");
        auto.scan_automatically = true;
        let library = f.registry.create(&auto).unwrap();

        let job = f
            .jobs
            .active_for(JobKind::Scan, &library.id)
            .expect("scan should be running");
        wait_for_status(&f.jobs, &job.job_id, JobStatus::Processing).await;
        f.engine.complete(&job.job_id, Some(42));
        wait_for_status(&f.jobs, &job.job_id, JobStatus::Completed).await;

        let mut count = 0;
        for _ in 0..100 {
            count = f.registry.get(&library.id).unwrap().item_count;
            if count == 42 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(count, 42);
        listener.abort();
    }

    #[tokio::test]
    async fn test_apply_scan_result_ignores_other_jobs() {
        let f = fixture();
        let library = f.registry.create(&spec("Movies", "/srv/movies", "movies")).unwrap();

        let mut job = Job {
            job_id: "j".into(),
            kind: JobKind::Transcode,
            subject_id: library.id.clone(),
            status: JobStatus::Completed,
            progress: 100,
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
            output_path: None,
            error: None,
            items_found: Some(5),
        };
        assert!(!f.registry.apply_scan_result(&job).unwrap());

        job.kind = JobKind::Scan;
        assert!(f.registry.apply_scan_result(&job).unwrap());
        assert_eq!(f.registry.get(&library.id).unwrap().item_count, 5);
    }
}
