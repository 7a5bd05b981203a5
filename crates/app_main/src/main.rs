//! StreamVio - filesystem access and job orchestration
//!
//! Command-line entry point.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use std::process::ExitCode;

fn main() -> Result<ExitCode> {
    let args = Cli::parse();

    // Load configuration
    let config = match &args.config {
        Some(path) => app_core::AppConfig::load_from(path)?,
        None => app_core::AppConfig::load().unwrap_or_default(),
    };

    // Initialize logging and panic hook
    let log_dir = config.general.log_dir.clone().unwrap_or_else(app_log::log_dir);
    let _log_guard = app_log::init(Some(log_dir.clone()))?;

    if let Err(e) = app_log::cleanup_old_logs(&log_dir, config.general.log_retention_days) {
        tracing::warn!("Failed to cleanup old logs: {}", e);
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "StreamVio starting...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("streamvio-worker")
        .build()?;

    let success = runtime.block_on(async {
        let state = app_core::AppState::new(config)?;
        commands::run(state, args.command, args.pretty).await
    })?;

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
