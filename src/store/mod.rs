//! Metric storage contract and its backends.
//!
//! - [`file::FileStore`]: one JSON file per repository under a data directory
//! - [`sqlite::SqliteStore`]: JSON documents in an embedded SQLite database

pub mod file;
pub mod sqlite;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{StorageBackend, StorageConfig};
use crate::error::StorageError;
use crate::metric::MetricRecord;

pub use file::FileStore;
pub use sqlite::SqliteStore;

/// Key of a stored metric record
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricKey {
    pub org: String,
    pub name: String,
}

impl MetricKey {
    pub fn new(org: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            name: name.into(),
        }
    }
}

/// Per-organization run bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    #[serde(default)]
    pub org: String,
    /// Watermark for the next "changed since" listing
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Filters for [`MetricStore::list_keys`]; absent filters match everything
#[derive(Debug, Clone, Default)]
pub struct KeyFilter {
    pub org: Option<Regex>,
    pub name: Option<Regex>,
}

impl KeyFilter {
    /// Filter matching exactly one organization
    pub fn exact_org(org: &str) -> Result<Self, StorageError> {
        Ok(Self {
            org: Some(Regex::new(&format!("^{}$", regex::escape(org)))?),
            name: None,
        })
    }

    pub fn matches(&self, key: &MetricKey) -> bool {
        self.org.as_ref().map_or(true, |re| re.is_match(&key.org))
            && self.name.as_ref().map_or(true, |re| re.is_match(&key.name))
    }
}

/// Storage contract consumed by the sync manager
pub trait MetricStore: Send + Sync {
    /// Insert or replace the record keyed by its org and repository name
    fn store(&self, record: &MetricRecord) -> Result<(), StorageError>;

    fn read(&self, org: &str, name: &str) -> Result<Option<MetricRecord>, StorageError>;

    /// Remove a record; removing an absent key succeeds
    fn delete(&self, org: &str, name: &str) -> Result<(), StorageError>;

    fn list_keys(&self, filter: &KeyFilter) -> Result<Vec<MetricKey>, StorageError>;

    /// Best-effort write; failures are logged by the backend, never returned
    fn store_cache_stats(&self, org: &str, stats: &CacheStats);

    /// Any read failure is logged and reported as absent
    fn read_cache_stats(&self, org: &str) -> Option<CacheStats>;
}

/// Open the backend selected by configuration
pub fn open_store(config: &StorageConfig) -> Result<Box<dyn MetricStore>, StorageError> {
    match config.backend {
        StorageBackend::File => Ok(Box::new(FileStore::new(&config.data_dir))),
        StorageBackend::Sqlite => Ok(Box::new(SqliteStore::open_at(&config.database_path)?)),
    }
}
