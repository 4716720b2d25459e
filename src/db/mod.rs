// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! SQLite backed catalog store

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::catalog::{ArchiveRecord, CatalogStore, NewRecord, RecordId};
use crate::owner::Owner;
use crate::{ArquivistaError, Result};

const SELECT_ARCHIVES: &str =
    "SELECT id, owner, name, category, path, run_id, organized_at FROM archives";

/// Database manager for the catalog (thread-safe wrapper)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// Catalog-wide statistics
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DbStats {
    pub record_count: i64,
    pub owner_count: i64,
    pub category_count: i64,
}

impl Database {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ArquivistaError::LockPoisoned("catalog connection"))
    }

    /// Initialize database schema
    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS archives (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner TEXT NOT NULL,
                name TEXT NOT NULL,
                category TEXT NOT NULL,
                path TEXT NOT NULL,
                run_id TEXT NOT NULL,
                organized_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_archives_owner ON archives(owner, id);
        "#,
        )?;
        Ok(())
    }

    /// Look up a single record
    pub fn get(&self, id: RecordId) -> Result<Option<ArchiveRecord>> {
        let conn = self.lock_conn()?;
        let raw = conn
            .query_row(
                &format!("{SELECT_ARCHIVES} WHERE id = ?1"),
                params![id.0],
                RawRecord::from_row,
            )
            .optional()?;
        raw.map(RawRecord::into_record).transpose()
    }

    /// Get database statistics
    pub fn get_stats(&self) -> Result<DbStats> {
        let conn = self.lock_conn()?;
        let record_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM archives", [], |row| row.get(0))?;
        let owner_count: i64 =
            conn.query_row("SELECT COUNT(DISTINCT owner) FROM archives", [], |row| row.get(0))?;
        let category_count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT category) FROM archives",
            [],
            |row| row.get(0),
        )?;
        Ok(DbStats {
            record_count,
            owner_count,
            category_count,
        })
    }

    /// Path of the database file, `None` for in-memory databases
    pub fn file_path(&self) -> Result<Option<PathBuf>> {
        let conn = self.lock_conn()?;
        Ok(conn
            .path()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from))
    }
}

impl CatalogStore for Database {
    fn append(&self, record: &NewRecord) -> Result<RecordId> {
        let conn = self.lock_conn()?;
        let path = path_to_db(&record.path)?;
        let organized_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        conn.execute(
            r#"INSERT INTO archives (owner, name, category, path, run_id, organized_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                record.owner.as_str(),
                record.name,
                record.category,
                path,
                record.run_id.to_string(),
                organized_at,
            ],
        )?;
        let id = RecordId(conn.last_insert_rowid());

        debug!(record = %id, owner = %record.owner, name = %record.name, "Catalog record appended");
        Ok(id)
    }

    fn page(
        &self,
        owner: &Owner,
        after: Option<RecordId>,
        limit: usize,
    ) -> Result<Vec<ArchiveRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_ARCHIVES} WHERE owner = ?1 AND id > ?2 ORDER BY id ASC LIMIT ?3"
        ))?;

        let after = after.map_or(0, |id| id.0);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![owner.as_str(), after, limit], RawRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(RawRecord::into_record).collect()
    }

    fn latest_at(&self, owner: &Owner, path: &Path, name: &str) -> Result<Option<ArchiveRecord>> {
        let conn = self.lock_conn()?;
        let raw = conn
            .query_row(
                &format!(
                    "{SELECT_ARCHIVES} WHERE owner = ?1 AND path = ?2 AND name = ?3 ORDER BY id DESC LIMIT 1"
                ),
                params![owner.as_str(), path_to_db(path)?, name],
                RawRecord::from_row,
            )
            .optional()?;
        raw.map(RawRecord::into_record).transpose()
    }

    fn category_counts(&self, owner: &Owner) -> Result<Vec<(String, i64)>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT category, COUNT(*) AS cnt FROM archives
               WHERE owner = ?1 GROUP BY category ORDER BY cnt DESC, category ASC"#,
        )?;
        let stats = stmt
            .query_map(params![owner.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stats)
    }
}

/// Row as stored, before domain validation
struct RawRecord {
    id: i64,
    owner: String,
    name: String,
    category: String,
    path: String,
    run_id: String,
    organized_at: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner: row.get(1)?,
            name: row.get(2)?,
            category: row.get(3)?,
            path: row.get(4)?,
            run_id: row.get(5)?,
            organized_at: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<ArchiveRecord> {
        let owner = Owner::new(self.owner).map_err(|e| {
            ArquivistaError::InvalidData(format!("archives.owner of row {}: {}", self.id, e))
        })?;
        let run_id = Uuid::parse_str(&self.run_id).map_err(|_| {
            ArquivistaError::InvalidData(format!(
                "invalid run id `{}` in row {}",
                self.run_id, self.id
            ))
        })?;
        let organized_at = DateTime::parse_from_rfc3339(&self.organized_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| {
                ArquivistaError::InvalidData(format!(
                    "invalid timestamp `{}` in row {}",
                    self.organized_at, self.id
                ))
            })?;

        Ok(ArchiveRecord {
            id: RecordId(self.id),
            owner,
            name: self.name,
            category: self.category,
            path: PathBuf::from(self.path),
            run_id,
            organized_at,
        })
    }
}

fn path_to_db(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| {
        ArquivistaError::InvalidData(format!("path {:?} is not valid UTF-8", path))
    })
}
