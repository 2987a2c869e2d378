//! repometrics - Incremental repository metric harvester
//!
//! Harvests repository metadata from the GitHub API into per-repository
//! metric records, refreshing only what changed since the last run.
//!
//! ## Modules
//!
//! - [`github`]: GitHub API access and authentication
//! - [`collector`]: paginated listings, watermark merge and detail fan-out
//! - [`metric`]: metric records and their derivation
//! - [`store`]: storage contract with file and SQLite backends
//! - [`manager`]: per-organization sync runs and reconciliation
//! - [`config`]: configuration management and parsing

pub mod collector;
pub mod config;
pub mod error;
pub mod github;
pub mod manager;
pub mod metric;
pub mod store;

pub use collector::{RepositoryCollector, RepositoryDetail, RepositoryIdentity};
pub use config::Config;
pub use error::{CollectError, StorageError, SyncError};
pub use github::{GitHubApi, RepoApi};
pub use manager::{RunOptions, RunSummary, SyncManager};
pub use metric::{derive_metric, MetricRecord};
pub use store::{CacheStats, KeyFilter, MetricKey, MetricStore};
