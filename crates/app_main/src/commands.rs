//! Command execution; every command prints one JSON `ApiResponse`

use crate::cli::{Commands, JobCommand, LibraryArgs, LibraryCommand};
use api_proto::{ApiResponse, JobKind, JobView};
use app_core::{AppError, AppState, CancelOutcome, LibrarySpec};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

fn to_json<T: Serialize>(value: T) -> Result<Value, AppError> {
    serde_json::to_value(value).map_err(|e| AppError::Io(e.into()))
}

impl From<LibraryArgs> for LibrarySpec {
    fn from(args: LibraryArgs) -> Self {
        LibrarySpec {
            name: args.name,
            path: args.path,
            library_type: args.library_type,
            scan_automatically: args.scan_automatically,
        }
    }
}

/// Follow a job until it ends, printing progress to stderr. The first
/// Ctrl-C requests cancellation.
async fn wait_for_job(state: &AppState, job_id: &str) -> Result<JobView, AppError> {
    let poll = Duration::from_millis(state.config.read().jobs.poll_interval_ms.max(50));
    let mut ticker = tokio::time::interval(poll);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut cancel_sent = false;
    let mut last_progress = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let view = state.jobs.view(job_id)?;
                if view.job.status.is_terminal() {
                    return Ok(view);
                }
                if last_progress != Some(view.job.progress) {
                    last_progress = Some(view.job.progress);
                    match view.estimated_remaining_secs {
                        Some(secs) => eprintln!(
                            "{} {}: {}% (about {}s left)",
                            view.job.kind, view.job.status, view.job.progress, secs
                        ),
                        None => eprintln!(
                            "{} {}: {}%",
                            view.job.kind, view.job.status, view.job.progress
                        ),
                    }
                }
            }
            _ = &mut ctrl_c, if !cancel_sent => {
                cancel_sent = true;
                eprintln!("Cancelling job {}...", job_id);
                if state.jobs.cancel(job_id).await? == CancelOutcome::Requested {
                    eprintln!("The engine has not confirmed yet; still waiting");
                }
            }
        }
    }
}

async fn library(state: &AppState, command: LibraryCommand) -> Result<Value, AppError> {
    match command {
        LibraryCommand::Add(args) => {
            let library = state.libraries.create(&args.into())?;
            if let Some(job) = state.jobs.active_for(JobKind::Scan, &library.id) {
                let scan = wait_for_job(state, &job.job_id).await?;
                let library = state.libraries.get(&library.id)?;
                return to_json(json!({ "library": library, "scan": scan }));
            }
            to_json(library)
        }
        LibraryCommand::List => to_json(state.libraries.list()?),
        LibraryCommand::Show { id } => to_json(state.libraries.get(&id)?),
        LibraryCommand::Edit { id, args } => to_json(state.libraries.update(&id, &args.into())?),
        LibraryCommand::Rm { id } => {
            state.libraries.delete(&id)?;
            to_json(json!({ "deleted": id }))
        }
        LibraryCommand::Scan { id } => {
            let job = state.libraries.trigger_scan(&id)?;
            let scan = wait_for_job(state, &job.job_id).await?;
            let library = state.libraries.get(&id)?;
            to_json(json!({ "library": library, "scan": scan }))
        }
    }
}

async fn job(state: &AppState, command: JobCommand) -> Result<Value, AppError> {
    let job = match command {
        JobCommand::Transcode {
            media_id,
            input,
            output,
            options,
        } => state.start_transcode(&media_id, &input, output.as_deref(), options.into())?,
        JobCommand::Hls {
            media_id,
            input,
            output_dir,
            options,
        } => state.start_hls(&media_id, &input, output_dir.as_deref(), options.into())?,
    };

    to_json(wait_for_job(state, &job.job_id).await?)
}

/// No usable location is a normal answer; `path` is then null
fn media_folder(path: Option<String>) -> Value {
    if path.is_none() {
        tracing::info!("No location accepted the default media folder");
    }
    json!({ "path": path })
}

async fn execute(state: &AppState, command: Commands) -> Result<Value, AppError> {
    match command {
        Commands::Roots => to_json(state.filesystem.list_roots()),
        Commands::Browse { path } => {
            let mut listing = state.filesystem.browse(&path)?;
            app_fs::sort_entries(&mut listing.contents);
            to_json(listing)
        }
        Commands::Mkdir { path } => {
            state.filesystem.create_directory(&path)?;
            to_json(json!({ "path": app_fs::path::normalize(&path) }))
        }
        Commands::MediaFolder => Ok(media_folder(state.default_media_folder())),
        Commands::Check { path } => to_json(state.permissions.check(&path)),
        Commands::Repair { path } => to_json(state.permissions.repair(&path)),
        Commands::Library(command) => library(state, command).await,
        Commands::Job(command) => job(state, command).await,
    }
}

/// Run one command against a fresh state. Returns whether it succeeded.
pub async fn run(state: AppState, command: Commands, pretty: bool) -> anyhow::Result<bool> {
    let result = execute(&state, command).await;
    if let Err(e) = &result {
        tracing::warn!(code = ?e.code(), "Command failed: {}", e);
        eprintln!("{}", e.user_message());
    }
    let success = result.is_ok();

    let response: ApiResponse<Value> = result.into();
    let output = if pretty {
        serde_json::to_string_pretty(&response)?
    } else {
        serde_json::to_string(&response)?
    };
    println!("{}", output);

    Ok(success)
}
