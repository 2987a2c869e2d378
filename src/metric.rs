//! Metric records and their derivation from collected repository detail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::collector::RepositoryDetail;
use crate::github::PullRequest;

/// Persisted metrics for one repository, keyed by `(org, repository_name)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    pub id: i64,
    pub org: String,
    pub repository_name: String,
    pub portfolio: String,
    pub product: String,
    pub team: String,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub pushed: Option<DateTime<Utc>>,
    pub default_branch: String,
    pub squashable: bool,
    pub rebaseable: bool,
    pub protected: bool,
    pub branch_count: usize,
    pub release_count: usize,
    pub commit_count: i64,
    pub code_byte_count: i64,
    #[serde(default)]
    pub languages: BTreeMap<String, i64>,
    #[serde(default)]
    pub pull_requests: Vec<PullRequestMetric>,
    pub build: BuildMetric,
    pub code_quality: CodeQualityMetric,
    /// When this record was computed
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestMetric {
    pub number: i64,
    pub status: String,
    pub created_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub minutes_open: f64,
}

/// Build statistics. Placeholder values until a build collector exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildMetric {
    pub builds_today_count: u32,
    pub builds_week_count: u32,
    pub builds_month_count: u32,
    pub avg_build_minutes_last_month: f32,
}

impl BuildMetric {
    pub fn placeholder() -> Self {
        Self {
            builds_today_count: 10,
            builds_week_count: 25,
            builds_month_count: 200,
            avg_build_minutes_last_month: 2.5,
        }
    }
}

/// Code quality statistics. Placeholder values until a quality collector exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeQualityMetric {
    pub blocker_count: u32,
    pub critical_count: u32,
    pub major_count: u32,
    pub issue_count: u32,
    pub test_count: u32,
    pub test_error_count: u32,
    pub test_fail_count: u32,
    pub test_coverage_pct: f32,
}

impl CodeQualityMetric {
    pub fn placeholder() -> Self {
        Self {
            blocker_count: 0,
            critical_count: 0,
            major_count: 0,
            issue_count: 4,
            test_count: 25,
            test_error_count: 0,
            test_fail_count: 0,
            test_coverage_pct: 83.4,
        }
    }
}

/// Derive the metric record for a repository as of `now`
pub fn derive_metric(detail: &RepositoryDetail, now: DateTime<Utc>) -> MetricRecord {
    debug!("Extracting metric data for {}", detail.identity.full_name());

    let repo = &detail.repository;
    let default_branch = repo.default_branch.clone().unwrap_or_default();

    MetricRecord {
        id: detail.identity.id,
        org: detail.identity.org.clone(),
        repository_name: detail.identity.name.clone(),
        portfolio: parse_topic(&detail.topics, "portfolio-"),
        product: parse_topic(&detail.topics, "product-"),
        team: parse_topic(&detail.topics, "team-"),
        created: repo.created_at,
        updated: repo.updated_at,
        pushed: repo.pushed_at,
        protected: default_branch_protected(detail, &default_branch),
        default_branch,
        squashable: repo.allow_squash_merge.unwrap_or(false),
        rebaseable: repo.allow_rebase_merge.unwrap_or(false),
        branch_count: detail.branches.len(),
        release_count: detail.releases.len(),
        commit_count: detail.contributors.iter().map(|c| c.contributions).sum(),
        code_byte_count: detail.languages.values().sum(),
        languages: detail.languages.clone(),
        pull_requests: detail
            .pull_requests
            .iter()
            .map(|pr| pull_request_metric(pr, now))
            .collect(),
        build: BuildMetric::placeholder(),
        code_quality: CodeQualityMetric::placeholder(),
        as_of: now,
    }
}

/// Suffix of the first topic carrying `prefix`, or an empty string
fn parse_topic(topics: &[String], prefix: &str) -> String {
    topics
        .iter()
        .find_map(|topic| topic.strip_prefix(prefix))
        .unwrap_or_default()
        .to_string()
}

fn default_branch_protected(detail: &RepositoryDetail, default_branch: &str) -> bool {
    detail
        .branches
        .iter()
        .find(|branch| branch.name == default_branch)
        .and_then(|branch| branch.protected)
        .unwrap_or(false)
}

fn pull_request_metric(pr: &PullRequest, now: DateTime<Utc>) -> PullRequestMetric {
    let finished = pr.merged_at.or(pr.closed_at).unwrap_or(now);
    let minutes_open = pr
        .created_at
        .map(|created| (finished - created).num_seconds() as f64 / 60.0)
        .unwrap_or(0.0);

    PullRequestMetric {
        number: pr.number,
        status: pr.state.clone().unwrap_or_default(),
        created_at: pr.created_at,
        closed_at: pr.closed_at,
        merged_at: pr.merged_at,
        minutes_open,
    }
}
