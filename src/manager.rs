//! Sync Manager - decides which repositories need fresh metrics, refreshes
//! them, and reconciles the store against repositories that disappeared.
//!
//! Repositories are processed one at a time in listing order. Any collector
//! or storage error aborts the run before bookkeeping is written, so the next
//! run starts from the previous watermark.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::collector::{RepositoryCollector, RepositoryIdentity};
use crate::error::SyncError;
use crate::metric::{derive_metric, MetricRecord};
use crate::store::{CacheStats, KeyFilter, MetricStore};

/// Flags for an organization run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Refresh every candidate, ignoring stored as-of timestamps
    pub force_metric_update: bool,
    /// Ignore the watermark and delete records of repositories no longer listed
    pub force_all_repo_eval: bool,
}

/// Outcome of a completed organization run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub candidates: usize,
    pub refreshed: usize,
    pub skipped: usize,
    pub deleted: usize,
    /// Instant the run began; written back as the next watermark
    pub started_at: DateTime<Utc>,
}

pub struct SyncManager {
    collector: RepositoryCollector,
    store: Arc<dyn MetricStore>,
}

impl SyncManager {
    pub fn new(collector: RepositoryCollector, store: Arc<dyn MetricStore>) -> Self {
        Self { collector, store }
    }

    pub fn store(&self) -> &Arc<dyn MetricStore> {
        &self.store
    }

    /// Refresh metrics for every changed repository of an organization
    pub async fn sync_organization(
        &self,
        org: &str,
        options: RunOptions,
    ) -> Result<RunSummary, SyncError> {
        let started_at = Utc::now();
        info!("Starting metric update for org {}", org);

        let watermark = if options.force_all_repo_eval {
            info!("Evaluating all repositories for org {}", org);
            None
        } else {
            self.store
                .read_cache_stats(org)
                .and_then(|stats| stats.updated_at)
        };

        let candidates = self.collector.list_repositories(org, watermark).await?;
        info!("Found {} candidate repositories for org {}", candidates.len(), org);

        let mut active: HashSet<String> = HashSet::new();
        let mut refreshed = 0;
        let mut skipped = 0;

        for identity in &candidates {
            if options.force_all_repo_eval {
                active.insert(identity.name.clone());
            }

            if !options.force_metric_update && self.is_current(identity) {
                debug!("Metrics for {} are current, skipping", identity.full_name());
                skipped += 1;
                continue;
            }

            self.refresh(org, &identity.name).await?;
            refreshed += 1;
        }

        let deleted = if options.force_all_repo_eval {
            self.reconcile(org, &active)?
        } else {
            0
        };

        self.store.store_cache_stats(
            org,
            &CacheStats {
                org: org.to_string(),
                updated_at: Some(started_at),
            },
        );

        let summary = RunSummary {
            candidates: candidates.len(),
            refreshed,
            skipped,
            deleted,
            started_at,
        };
        info!(
            "Metric update for org {} complete: {} refreshed, {} skipped, {} deleted",
            org, summary.refreshed, summary.skipped, summary.deleted
        );
        Ok(summary)
    }

    /// Refresh metrics for exactly one repository; no watermark or reconciliation
    pub async fn sync_repository(&self, org: &str, name: &str) -> Result<MetricRecord, SyncError> {
        info!("Updating metrics for repository {}/{}", org, name);
        self.refresh(org, name).await
    }

    async fn refresh(&self, org: &str, name: &str) -> Result<MetricRecord, SyncError> {
        let detail = self.collector.get_repository_detail(org, name).await?;
        let record = derive_metric(&detail, Utc::now());
        self.store.store(&record)?;
        debug!("Stored metrics for {}", detail.identity.full_name());
        Ok(record)
    }

    /// True only when a stored record exists and was computed after the last change
    fn is_current(&self, identity: &RepositoryIdentity) -> bool {
        let Some(last_changed) = identity.last_changed else {
            return false;
        };

        match self.store.read(&identity.org, &identity.name) {
            Ok(Some(record)) => last_changed < record.as_of,
            Ok(None) => false,
            Err(e) => {
                warn!(
                    "Unable to read stored metrics for {}, refreshing: {}",
                    identity.full_name(),
                    e
                );
                false
            }
        }
    }

    /// Delete stored records of the organization whose repository was not listed
    fn reconcile(&self, org: &str, active: &HashSet<String>) -> Result<usize, SyncError> {
        let stored = self.store.list_keys(&KeyFilter::exact_org(org)?)?;

        let mut deleted = 0;
        for key in stored.iter().filter(|key| !active.contains(&key.name)) {
            info!("Deleting metrics for inactive repository {}/{}", key.org, key.name);
            self.store.delete(&key.org, &key.name)?;
            deleted += 1;
        }
        Ok(deleted)
    }
}
