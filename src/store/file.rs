//! File-per-key metric store.
//!
//! Records live at `<data_dir>/org-<org>.repo-<name>.json` and run
//! bookkeeping at `<data_dir>/org-<org>.cache-stats.json`.

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

use super::{CacheStats, KeyFilter, MetricKey, MetricStore};
use crate::error::StorageError;
use crate::metric::MetricRecord;

static RECORD_FILE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^org-(.+?)\.repo-(.+)\.json$").expect("invalid regex"));

/// Stores each metric record as a JSON file
#[derive(Debug, Clone)]
pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn record_path(&self, org: &str, name: &str) -> PathBuf {
        self.data_dir
            .join(format!("org-{}.repo-{}.json", org, name))
    }

    fn cache_stats_path(&self, org: &str) -> PathBuf {
        self.data_dir.join(format!("org-{}.cache-stats.json", org))
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StorageError> {
        let data = serde_json::to_vec(value)?;

        std::fs::create_dir_all(&self.data_dir)
            .map_err(|e| StorageError::io(&self.data_dir, e))?;

        std::fs::write(path, data).map_err(|e| StorageError::io(path, e))
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, StorageError> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(path, e)),
        };

        Ok(Some(serde_json::from_slice(&data)?))
    }
}

impl MetricStore for FileStore {
    fn store(&self, record: &MetricRecord) -> Result<(), StorageError> {
        let path = self.record_path(&record.org, &record.repository_name);
        debug!(
            "Writing metric data for repository {} to file {}",
            record.repository_name,
            path.display()
        );
        self.write_json(&path, record)
    }

    fn read(&self, org: &str, name: &str) -> Result<Option<MetricRecord>, StorageError> {
        let path = self.record_path(org, name);
        debug!(
            "Reading metric data for repository {}/{} from file {}",
            org,
            name,
            path.display()
        );
        self.read_json(&path)
    }

    fn delete(&self, org: &str, name: &str) -> Result<(), StorageError> {
        let path = self.record_path(org, name);
        debug!(
            "Deleting metric data for repository {}/{} from file {}",
            org,
            name,
            path.display()
        );
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    fn list_keys(&self, filter: &KeyFilter) -> Result<Vec<MetricKey>, StorageError> {
        debug!("Listing repository metrics found in {}", self.data_dir.display());

        let entries = match std::fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            // Nothing has been written yet
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.data_dir, e)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&self.data_dir, e))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };

            let Some(captures) = RECORD_FILE_REGEX.captures(file_name) else {
                debug!("Filtered file: {}", file_name);
                continue;
            };

            let key = MetricKey::new(&captures[1], &captures[2]);
            if filter.matches(&key) {
                keys.push(key);
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn store_cache_stats(&self, org: &str, stats: &CacheStats) {
        let path = self.cache_stats_path(org);
        debug!("Writing cache stats to file {}", path.display());

        let stats = CacheStats {
            org: org.to_string(),
            ..stats.clone()
        };
        if let Err(e) = self.write_json(&path, &stats) {
            warn!(
                "Problem writing cache statistics to file {}: {}",
                path.display(),
                e
            );
        }
    }

    fn read_cache_stats(&self, org: &str) -> Option<CacheStats> {
        let path = self.cache_stats_path(org);
        debug!("Reading cache stats from file {}", path.display());

        match self.read_json(&path) {
            Ok(stats) => stats,
            Err(e) => {
                warn!(
                    "Problem reading cache statistics from file {}, treating as not found: {}",
                    path.display(),
                    e
                );
                None
            }
        }
    }
}
