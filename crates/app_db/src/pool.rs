//! SQLite connection pool

use crate::{DbError, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Initialize the SQLite connection pool
pub fn init_pool(path: &Path) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
        ",
        )?;
        Ok(())
    });

    // Library CRUD is low volume; a handful of connections covers
    // concurrent API requests plus the scan result listener
    Pool::builder()
        .max_size(4)
        .min_idle(Some(1))
        .build(manager)
        .map_err(|e| DbError::Pool(e.to_string()))
}
