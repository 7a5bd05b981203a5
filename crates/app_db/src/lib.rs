//! StreamVio Database Layer
//!
//! SQLite storage for library records. Job state is not persisted.

mod libraries;
mod pool;
mod schema;

pub use libraries::{LibraryFields, LibraryRecord, LibraryStore};
pub use pool::{init_pool, DbPool};
pub use schema::migrate;

use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Database errors
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Default database directory
pub fn db_dir() -> PathBuf {
    ProjectDirs::from("com", "StreamVio", "StreamVio")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// Open (and migrate) the database under `dir`
pub fn init(dir: &Path) -> Result<DbPool> {
    std::fs::create_dir_all(dir)?;

    let pool = init_pool(&dir.join("streamvio.db"))?;
    migrate(&pool)?;

    tracing::info!(dir = %dir.display(), "Database initialized");
    Ok(pool)
}
