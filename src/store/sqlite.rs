//! SQLite document store
//!
//! Each metric record is kept as a JSON document in the `metrics` table,
//! keyed by `(org, repository_name)`. Cache stats live in `cache_stats`.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::{CacheStats, KeyFilter, MetricKey, MetricStore};
use crate::error::StorageError;
use crate::metric::MetricRecord;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at a specific path
    pub fn open_at(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }

        let conn = Connection::open(&path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;

        info!("Metric database opened at {}", path.display());
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.initialize()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn initialize(&self) -> Result<(), StorageError> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS metrics (
                org TEXT NOT NULL,
                repository_name TEXT NOT NULL,
                document TEXT NOT NULL,
                as_of TEXT NOT NULL,
                PRIMARY KEY (org, repository_name)
            );

            CREATE TABLE IF NOT EXISTS cache_stats (
                org TEXT PRIMARY KEY,
                document TEXT NOT NULL
            );
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    fn write_cache_stats(&self, org: &str, stats: &CacheStats) -> Result<(), StorageError> {
        let document = serde_json::to_string(stats)?;
        self.conn()?.execute(
            r#"
            INSERT INTO cache_stats (org, document)
            VALUES (?1, ?2)
            ON CONFLICT(org) DO UPDATE SET document = ?2
            "#,
            params![org, document],
        )?;
        Ok(())
    }

    fn query_cache_stats(&self, org: &str) -> Result<Option<CacheStats>, StorageError> {
        let document: Option<String> = self
            .conn()?
            .query_row(
                "SELECT document FROM cache_stats WHERE org = ?1",
                params![org],
                |row| row.get(0),
            )
            .optional()?;

        document
            .map(|doc| serde_json::from_str(&doc))
            .transpose()
            .map_err(StorageError::from)
    }
}

impl MetricStore for SqliteStore {
    fn store(&self, record: &MetricRecord) -> Result<(), StorageError> {
        let document = serde_json::to_string(record)?;

        self.conn()?.execute(
            r#"
            INSERT INTO metrics (org, repository_name, document, as_of)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(org, repository_name) DO UPDATE SET
                document = ?3,
                as_of = ?4
            "#,
            params![
                record.org,
                record.repository_name,
                document,
                record.as_of.to_rfc3339(),
            ],
        )?;

        debug!(
            "Stored metric document for {}/{}",
            record.org, record.repository_name
        );
        Ok(())
    }

    fn read(&self, org: &str, name: &str) -> Result<Option<MetricRecord>, StorageError> {
        let document: Option<String> = self
            .conn()?
            .query_row(
                "SELECT document FROM metrics WHERE org = ?1 AND repository_name = ?2",
                params![org, name],
                |row| row.get(0),
            )
            .optional()?;

        match document {
            Some(doc) => Ok(Some(serde_json::from_str(&doc)?)),
            None => Ok(None),
        }
    }

    fn delete(&self, org: &str, name: &str) -> Result<(), StorageError> {
        let removed = self.conn()?.execute(
            "DELETE FROM metrics WHERE org = ?1 AND repository_name = ?2",
            params![org, name],
        )?;

        debug!("Deleted {} metric document(s) for {}/{}", removed, org, name);
        Ok(())
    }

    fn list_keys(&self, filter: &KeyFilter) -> Result<Vec<MetricKey>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT org, repository_name FROM metrics ORDER BY org, repository_name",
        )?;

        let keys = stmt
            .query_map([], |row| Ok(MetricKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(keys.into_iter().filter(|key| filter.matches(key)).collect())
    }

    fn store_cache_stats(&self, org: &str, stats: &CacheStats) {
        let stats = CacheStats {
            org: org.to_string(),
            ..stats.clone()
        };
        if let Err(e) = self.write_cache_stats(org, &stats) {
            warn!("Problem writing cache statistics for org {}: {}", org, e);
        }
    }

    fn read_cache_stats(&self, org: &str) -> Option<CacheStats> {
        match self.query_cache_stats(org) {
            Ok(stats) => stats,
            Err(e) => {
                warn!(
                    "Problem reading cache statistics for org {}, treating as not found: {}",
                    org, e
                );
                None
            }
        }
    }
}
