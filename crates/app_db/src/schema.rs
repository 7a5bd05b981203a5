//! Database schema and migrations

use crate::{DbError, DbPool, Result};

const SCHEMA_VERSION: i32 = 1;

/// Run database migrations
pub fn migrate(pool: &DbPool) -> Result<()> {
    let conn = pool.get().map_err(|e| DbError::Pool(e.to_string()))?;

    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if current_version > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "database schema version {} is newer than supported version {}",
            current_version, SCHEMA_VERSION
        )));
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrating database"
        );

        if current_version < 1 {
            apply_v1(&conn)?;
        }

        conn.execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;
    }

    Ok(())
}

fn apply_v1(conn: &rusqlite::Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Media libraries registered by users
        CREATE TABLE IF NOT EXISTS libraries (
            library_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,

            -- Normalized absolute path (forward slashes)
            path TEXT NOT NULL,

            -- movies | series | music | photos
            library_type TEXT NOT NULL,

            scan_automatically INTEGER NOT NULL DEFAULT 0,

            -- Written by scan completion
            item_count INTEGER NOT NULL DEFAULT 0,

            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_libraries_name ON libraries(name COLLATE NOCASE);
        CREATE INDEX IF NOT EXISTS idx_libraries_path ON libraries(path);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::init_pool;
    use tempfile::NamedTempFile;

    #[test]
    fn test_migration() {
        let temp_file = NamedTempFile::new().unwrap();
        let pool = init_pool(temp_file.path()).unwrap();
        assert!(migrate(&pool).is_ok());

        let conn = pool.get().unwrap();
        let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_migration_is_repeatable() {
        let temp_file = NamedTempFile::new().unwrap();
        let pool = init_pool(temp_file.path()).unwrap();
        migrate(&pool).unwrap();
        assert!(migrate(&pool).is_ok());
    }
}
