//! Library scan engine

use super::{EngineError, EngineHandle, EngineReport, JobParams, WorkEngine, WorkRequest};
use crate::config::ScannerConfig;
use api_proto::LibraryType;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use walkdir::WalkDir;

/// Shared state between a scan thread and the engine
#[derive(Default)]
struct ScanTask {
    progress: AtomicU8,
    stop: AtomicBool,
    outcome: Mutex<Option<EngineReport>>,
}

/// Walks a library root on a blocking thread and counts media files
///
/// Progress advances per top-level entry of the root, so a library laid out
/// as one folder per title reports evenly.
pub struct DirectoryScanEngine {
    scanner: ScannerConfig,
    tasks: DashMap<String, Arc<ScanTask>>,
}

impl DirectoryScanEngine {
    pub fn new(scanner: ScannerConfig) -> Self {
        Self {
            scanner,
            tasks: DashMap::new(),
        }
    }

    fn extensions(&self, library_type: LibraryType) -> HashSet<String> {
        self.scanner
            .extensions_for(library_type)
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .collect()
    }
}

impl Default for DirectoryScanEngine {
    fn default() -> Self {
        Self::new(ScannerConfig::default())
    }
}

fn unreadable(root: &str, error: io::Error) -> EngineError {
    match error.kind() {
        io::ErrorKind::PermissionDenied => match app_fs::FsError::from_io(error, root) {
            app_fs::FsError::PermissionDenied { path, hint } => {
                EngineError::PermissionDenied { path, hint }
            }
            other => EngineError::InputUnreadable {
                path: root.to_string(),
                reason: other.to_string(),
            },
        },
        io::ErrorKind::NotFound => EngineError::InputUnreadable {
            path: root.to_string(),
            reason: "library path does not exist".to_string(),
        },
        _ => EngineError::InputUnreadable {
            path: root.to_string(),
            reason: error.to_string(),
        },
    }
}

fn is_media(path: &Path, extensions: &HashSet<String>) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.contains(&ext.to_ascii_lowercase()))
        .unwrap_or(false)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|n| n.starts_with('.')).unwrap_or(false)
}

/// Body of the scan thread
fn run_scan(root: &Path, entries: Vec<PathBuf>, extensions: &HashSet<String>, task: &ScanTask) {
    let total = entries.len().max(1);
    let mut items: u64 = 0;
    let mut skipped: u64 = 0;

    for (index, entry) in entries.iter().enumerate() {
        if task.stop.load(Ordering::Relaxed) {
            let progress = task.progress.load(Ordering::Relaxed);
            *task.outcome.lock() = Some(EngineReport::cancelled(progress));
            return;
        }

        if entry.is_dir() {
            let walker = WalkDir::new(entry)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| !is_hidden(e.file_name()));

            for item in walker {
                match item {
                    Ok(item) if item.file_type().is_file() => {
                        if is_media(item.path(), extensions) {
                            items += 1;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        skipped += 1;
                        tracing::debug!("Skipping unreadable entry during scan: {}", e);
                    }
                }

                if task.stop.load(Ordering::Relaxed) {
                    break;
                }
            }
        } else if is_media(entry, extensions) {
            items += 1;
        }

        // 100 is reserved for completion
        let progress = (((index + 1) * 100) / total).min(99) as u8;
        task.progress.store(progress, Ordering::Relaxed);
    }

    if task.stop.load(Ordering::Relaxed) {
        let progress = task.progress.load(Ordering::Relaxed);
        *task.outcome.lock() = Some(EngineReport::cancelled(progress));
        return;
    }

    tracing::info!(
        root = %root.display(),
        items,
        skipped,
        "Library scan finished"
    );
    *task.outcome.lock() = Some(EngineReport::completed().with_items(items));
}

#[async_trait]
impl WorkEngine for DirectoryScanEngine {
    fn name(&self) -> &str {
        "directory-scan"
    }

    async fn begin(&self, request: &WorkRequest) -> Result<EngineHandle, EngineError> {
        let (root, library_type) = match &request.params {
            JobParams::Scan { root, library_type } => (root.clone(), *library_type),
            other => {
                return Err(EngineError::Unsupported(format!(
                    "{} work cannot run on the scan engine",
                    other.kind()
                )))
            }
        };

        // Fail fast on an unreadable root so the job records why
        let root_path = PathBuf::from(&root);
        let read_root = root_path.clone();
        let entries = tokio::task::spawn_blocking(move || -> io::Result<Vec<PathBuf>> {
            let metadata = std::fs::metadata(&read_root)?;
            if !metadata.is_dir() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "library path is not a directory",
                ));
            }

            let mut entries = Vec::new();
            for entry in std::fs::read_dir(&read_root)? {
                let entry = entry?;
                if !is_hidden(&entry.file_name()) {
                    entries.push(entry.path());
                }
            }
            entries.sort();
            Ok(entries)
        })
        .await
        .map_err(|e| EngineError::Crashed(format!("scan setup panicked: {}", e)))?
        .map_err(|e| unreadable(&root, e))?;

        let task = Arc::new(ScanTask::default());
        let handle = EngineHandle(request.job_id.clone());
        self.tasks.insert(handle.0.clone(), task.clone());

        let extensions = self.extensions(library_type);
        tracing::debug!(root = %root, entries = entries.len(), "Starting library scan");
        tokio::task::spawn_blocking(move || run_scan(&root_path, entries, &extensions, &task));

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
        match self.tasks.remove(&handle.0) {
            Some((_, task)) => {
                let finished = task.outcome.lock().is_some();
                task.stop.store(true, Ordering::Relaxed);
                Ok(!finished)
            }
            None => Ok(false),
        }
    }
}
