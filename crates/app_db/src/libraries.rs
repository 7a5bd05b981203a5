//! Library record persistence

use crate::{DbError, DbPool, Result};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};

/// Library row in the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryRecord {
    pub library_id: String,
    pub name: String,
    pub path: String,
    pub library_type: String,
    pub scan_automatically: bool,
    pub item_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Editable library columns
#[derive(Debug, Clone)]
pub struct LibraryFields<'a> {
    pub name: &'a str,
    pub path: &'a str,
    pub library_type: &'a str,
    pub scan_automatically: bool,
}

const SELECT_COLUMNS: &str = "SELECT library_id, name, path, library_type, scan_automatically, item_count, created_at, updated_at FROM libraries";

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LibraryRecord> {
    Ok(LibraryRecord {
        library_id: row.get(0)?,
        name: row.get(1)?,
        path: row.get(2)?,
        library_type: row.get(3)?,
        scan_automatically: row.get(4)?,
        item_count: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Library table operations
#[derive(Clone)]
pub struct LibraryStore {
    pool: DbPool,
}

impl std::fmt::Debug for LibraryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryStore")
            .field("connections", &self.pool.state().connections)
            .finish()
    }
}

impl LibraryStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager>> {
        self.pool.get().map_err(|e| DbError::Pool(e.to_string()))
    }

    /// Insert a new library and return the stored row
    pub fn insert(&self, library_id: &str, fields: &LibraryFields<'_>) -> Result<LibraryRecord> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();

        conn.execute(
            r#"
            INSERT INTO libraries (library_id, name, path, library_type, scan_automatically, item_count, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)
            "#,
            rusqlite::params![
                library_id,
                fields.name,
                fields.path,
                fields.library_type,
                fields.scan_automatically,
                now,
            ],
        )?;

        Ok(LibraryRecord {
            library_id: library_id.to_string(),
            name: fields.name.to_string(),
            path: fields.path.to_string(),
            library_type: fields.library_type.to_string(),
            scan_automatically: fields.scan_automatically,
            item_count: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replace the editable columns of a library
    pub fn update(&self, library_id: &str, fields: &LibraryFields<'_>) -> Result<LibraryRecord> {
        let conn = self.conn()?;

        let rows = conn.execute(
            r#"
            UPDATE libraries
            SET name = ?2, path = ?3, library_type = ?4, scan_automatically = ?5,
                updated_at = strftime('%s', 'now')
            WHERE library_id = ?1
            "#,
            rusqlite::params![
                library_id,
                fields.name,
                fields.path,
                fields.library_type,
                fields.scan_automatically,
            ],
        )?;

        if rows == 0 {
            return Err(DbError::NotFound(format!("library {}", library_id)));
        }

        self.get(library_id)?
            .ok_or_else(|| DbError::NotFound(format!("library {}", library_id)))
    }

    /// Get a library by id
    pub fn get(&self, library_id: &str) -> Result<Option<LibraryRecord>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!("{} WHERE library_id = ?1", SELECT_COLUMNS))?;
        let record = stmt.query_row([library_id], map_row).optional()?;
        Ok(record)
    }

    /// All libraries ordered by name
    pub fn list(&self) -> Result<Vec<LibraryRecord>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY name COLLATE NOCASE, created_at",
            SELECT_COLUMNS
        ))?;
        let rows = stmt.query_map([], map_row)?;

        let mut libraries = Vec::new();
        for row in rows {
            libraries.push(row?);
        }

        Ok(libraries)
    }

    /// Delete a library; returns false when it did not exist
    pub fn delete(&self, library_id: &str) -> Result<bool> {
        let conn = self.conn()?;

        let rows = conn.execute("DELETE FROM libraries WHERE library_id = ?1", [library_id])?;
        Ok(rows > 0)
    }

    /// Record the number of items found by the latest scan
    pub fn set_item_count(&self, library_id: &str, item_count: i64) -> Result<bool> {
        let conn = self.conn()?;

        let rows = conn.execute(
            "UPDATE libraries SET item_count = ?2, updated_at = strftime('%s', 'now') WHERE library_id = ?1",
            rusqlite::params![library_id, item_count],
        )?;
        Ok(rows > 0)
    }
}
