//! Remote collector - turns the paginated GitHub listings into repository
//! identities and per-repository detail bundles.
//!
//! Organization listings can only be sorted by one of created, updated or
//! pushed. A "changed since" listing is approximated by walking all three
//! sort orders newest-first, stopping each walk at the watermark, and
//! merging the results by repository id.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::CollectError;
use crate::github::{
    Branch, Contributor, PullRequest, Release, RemoteRepository, RepoApi, RepoSort, PER_PAGE,
};

/// Page cap for the organization repository listing
pub const MAX_ORG_PAGES: u32 = 1000;

/// Page cap for per-repository listings (branches, releases, pull requests, contributors)
pub const MAX_REPO_PAGES: u32 = 10;

/// Minimal identity of a repository produced by listing calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryIdentity {
    pub id: i64,
    pub org: String,
    pub name: String,
    /// Most recent of the created, pushed and updated timestamps
    pub last_changed: Option<DateTime<Utc>>,
}

impl RepositoryIdentity {
    pub fn from_remote(org: &str, repo: &RemoteRepository) -> Self {
        Self {
            id: repo.id,
            org: org.to_string(),
            name: repo.name.clone(),
            last_changed: last_changed(repo),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.org, self.name)
    }
}

/// Everything collected for one repository in a single detail fetch
#[derive(Debug, Clone)]
pub struct RepositoryDetail {
    pub identity: RepositoryIdentity,
    pub repository: RemoteRepository,
    pub topics: Vec<String>,
    pub branches: Vec<Branch>,
    pub releases: Vec<Release>,
    pub pull_requests: Vec<PullRequest>,
    pub languages: BTreeMap<String, i64>,
    pub contributors: Vec<Contributor>,
}

/// The latest of a repository's created, pushed and updated timestamps
pub fn last_changed(repo: &RemoteRepository) -> Option<DateTime<Utc>> {
    [repo.created_at, repo.pushed_at, repo.updated_at]
        .into_iter()
        .flatten()
        .max()
}

/// Append the entries of `additions` whose id is not already present.
///
/// Earlier entries always win; a later duplicate never replaces them.
pub fn merge_by_id(
    mut merged: Vec<RepositoryIdentity>,
    additions: Vec<RepositoryIdentity>,
) -> Vec<RepositoryIdentity> {
    let mut seen: HashSet<i64> = merged.iter().map(|r| r.id).collect();
    for identity in additions {
        if seen.insert(identity.id) {
            merged.push(identity);
        }
    }
    merged
}

/// Fetch pages until a short page arrives or `stop_at` matches an item.
///
/// The matching item and everything after it are dropped. When page
/// `max_pages` comes back full one more page is requested; the listing
/// only fails if that page still has items.
async fn collect_pages<T, F, Fut, S>(
    listing: &str,
    max_pages: u32,
    mut fetch: F,
    mut stop_at: S,
) -> Result<Vec<T>, CollectError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Vec<T>, CollectError>>,
    S: FnMut(&T) -> bool,
{
    let mut items = Vec::new();
    let mut page = 1u32;

    loop {
        debug!("Collecting {}, page number = {}", listing, page);
        let batch = fetch(page).await?;

        if page > max_pages {
            if batch.is_empty() {
                break;
            }
            warn!("{} listing exceeded {} pages", listing, max_pages);
            return Err(CollectError::SafetyLimitExceeded {
                listing: listing.to_string(),
                limit: max_pages,
            });
        }

        let count = batch.len();
        for item in batch {
            if stop_at(&item) {
                return Ok(items);
            }
            items.push(item);
        }

        if count < PER_PAGE as usize {
            break;
        }
        page += 1;
    }

    Ok(items)
}

/// Collects repository listings and details through a [`RepoApi`]
pub struct RepositoryCollector {
    api: Arc<dyn RepoApi>,
}

impl RepositoryCollector {
    pub fn new(api: Arc<dyn RepoApi>) -> Self {
        Self { api }
    }

    /// List the repositories of an organization, optionally only those changed after a watermark
    pub async fn list_repositories(
        &self,
        org: &str,
        changed_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<RepositoryIdentity>, CollectError> {
        let Some(watermark) = changed_after else {
            info!("Collecting all repositories for org {}", org);
            return self.list_by_sort(org, RepoSort::Created, None).await;
        };

        let mut merged = Vec::new();
        for sort in [RepoSort::Updated, RepoSort::Pushed, RepoSort::Created] {
            info!(
                "Collecting repositories for org {} {} after {}",
                org,
                sort.as_str(),
                watermark
            );
            let found = self.list_by_sort(org, sort, Some(watermark)).await?;
            merged = merge_by_id(merged, found);
        }

        info!(
            "Found {} repositories changed after {} for org {}",
            merged.len(),
            watermark,
            org
        );
        Ok(merged)
    }

    /// Walk one sort order newest-first, stopping at the first item older than the watermark
    async fn list_by_sort(
        &self,
        org: &str,
        sort: RepoSort,
        changed_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<RepositoryIdentity>, CollectError> {
        let repos = collect_pages(
            &format!("repositories for org {} sorted by {}", org, sort.as_str()),
            MAX_ORG_PAGES,
            |page| self.api.list_org_repos(org, sort, page),
            |repo: &RemoteRepository| match (changed_after, sort.timestamp(repo)) {
                (Some(watermark), Some(ts)) if ts < watermark => {
                    debug!(
                        "Repository {} {} at {}, before watermark; stopping",
                        repo.name,
                        sort.as_str(),
                        ts
                    );
                    true
                }
                _ => false,
            },
        )
        .await?;

        Ok(repos
            .iter()
            .map(|repo| RepositoryIdentity::from_remote(org, repo))
            .collect())
    }

    /// Fetch the base repository and all of its facets concurrently.
    ///
    /// The first failing request fails the whole call and the remaining
    /// requests are dropped.
    pub async fn get_repository_detail(
        &self,
        org: &str,
        name: &str,
    ) -> Result<RepositoryDetail, CollectError> {
        debug!("Collecting repository detail for {}/{}", org, name);

        let (repository, branches, releases, pull_requests, languages, topics, contributors) = tokio::try_join!(
            self.api.get_repo(org, name),
            self.get_branches(org, name),
            self.get_releases(org, name),
            self.get_pull_requests(org, name),
            self.api.list_languages(org, name),
            self.api.list_topics(org, name),
            self.get_contributors(org, name),
        )?;

        debug!(
            "Collected {}/{}: {} branches, {} releases, {} pull requests",
            org,
            name,
            branches.len(),
            releases.len(),
            pull_requests.len()
        );

        // Keyed by the requested name so stored records line up with listing results
        let identity = RepositoryIdentity {
            id: repository.id,
            org: org.to_string(),
            name: name.to_string(),
            last_changed: last_changed(&repository),
        };

        Ok(RepositoryDetail {
            identity,
            repository,
            topics,
            branches,
            releases,
            pull_requests,
            languages,
            contributors,
        })
    }

    pub async fn get_branches(&self, org: &str, name: &str) -> Result<Vec<Branch>, CollectError> {
        collect_pages(
            &format!("branches for {}/{}", org, name),
            MAX_REPO_PAGES,
            |page| self.api.list_branches(org, name, page),
            |_| false,
        )
        .await
    }

    pub async fn get_releases(&self, org: &str, name: &str) -> Result<Vec<Release>, CollectError> {
        collect_pages(
            &format!("releases for {}/{}", org, name),
            MAX_REPO_PAGES,
            |page| self.api.list_releases(org, name, page),
            |_| false,
        )
        .await
    }

    pub async fn get_pull_requests(
        &self,
        org: &str,
        name: &str,
    ) -> Result<Vec<PullRequest>, CollectError> {
        collect_pages(
            &format!("pull requests for {}/{}", org, name),
            MAX_REPO_PAGES,
            |page| self.api.list_pull_requests(org, name, page),
            |_| false,
        )
        .await
    }

    pub async fn get_contributors(
        &self,
        org: &str,
        name: &str,
    ) -> Result<Vec<Contributor>, CollectError> {
        collect_pages(
            &format!("contributors for {}/{}", org, name),
            MAX_REPO_PAGES,
            |page| self.api.list_contributors(org, name, page),
            |_| false,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use quickcheck_macros::quickcheck;

    fn identity(id: i64, name: &str) -> RepositoryIdentity {
        RepositoryIdentity {
            id,
            org: "acme".to_string(),
            name: name.to_string(),
            last_changed: None,
        }
    }

    #[test]
    fn test_last_changed_picks_latest() {
        let t1 = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        let t3 = Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap();

        let repo = RemoteRepository {
            created_at: Some(t1),
            pushed_at: Some(t2),
            updated_at: Some(t3),
            ..Default::default()
        };
        assert_eq!(last_changed(&repo), Some(t2));

        let partial = RemoteRepository {
            created_at: Some(t1),
            ..Default::default()
        };
        assert_eq!(last_changed(&partial), Some(t1));

        assert_eq!(last_changed(&RemoteRepository::default()), None);
    }

    #[test]
    fn test_merge_keeps_first_seen() {
        let updated = vec![identity(1, "first"), identity(2, "second")];
        let pushed = vec![identity(2, "second-renamed"), identity(3, "third")];
        let created = vec![identity(3, "third-renamed"), identity(1, "x"), identity(4, "fourth")];

        let merged = merge_by_id(merge_by_id(updated, pushed), created);
        let names: Vec<&str> = merged.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third", "fourth"]);
    }

    async fn pages_of(total: usize, max_pages: u32) -> Result<Vec<usize>, CollectError> {
        let items: Vec<usize> = (0..total).collect();
        collect_pages(
            "numbers",
            max_pages,
            |page| {
                let per_page = PER_PAGE as usize;
                let batch = items
                    .iter()
                    .skip((page as usize - 1) * per_page)
                    .take(per_page)
                    .copied()
                    .collect();
                async move { Ok::<_, CollectError>(batch) }
            },
            |_| false,
        )
        .await
    }

    #[tokio::test]
    async fn test_collect_pages_full_last_page_within_cap() {
        let items = pages_of(1000, MAX_REPO_PAGES).await.unwrap();
        assert_eq!(items.len(), 1000);

        let items = pages_of(200, 2).await.unwrap();
        assert_eq!(items.len(), 200);
    }

    #[tokio::test]
    async fn test_collect_pages_beyond_cap_fails() {
        let result = pages_of(1001, MAX_REPO_PAGES).await;
        assert!(matches!(
            result,
            Err(CollectError::SafetyLimitExceeded { limit: MAX_REPO_PAGES, .. })
        ));
    }

    #[tokio::test]
    async fn test_collect_pages_stops_at_predicate() {
        let items: Vec<u32> = (0..250).collect();
        let mut requested = Vec::new();
        let collected = collect_pages(
            "numbers",
            MAX_REPO_PAGES,
            |page| {
                requested.push(page);
                let batch: Vec<u32> = items
                    .iter()
                    .skip((page as usize - 1) * 100)
                    .take(100)
                    .copied()
                    .collect();
                async move { Ok::<_, CollectError>(batch) }
            },
            |n| *n == 150,
        )
        .await
        .unwrap();

        assert_eq!(collected.len(), 150);
        assert_eq!(requested, vec![1, 2]);
    }

    #[quickcheck]
    fn prop_merge_contains_each_id_once(a: Vec<u8>, b: Vec<u8>, c: Vec<u8>) -> bool {
        let to_ids = |ids: &[u8], tag: &str| -> Vec<RepositoryIdentity> {
            let mut seen = HashSet::new();
            ids.iter()
                .filter(|id| seen.insert(**id))
                .map(|id| identity(*id as i64, tag))
                .collect()
        };

        let merged = merge_by_id(
            merge_by_id(to_ids(&a, "updated"), to_ids(&b, "pushed")),
            to_ids(&c, "created"),
        );

        let expected: HashSet<i64> = a.iter().chain(&b).chain(&c).map(|id| *id as i64).collect();
        let ids: Vec<i64> = merged.iter().map(|r| r.id).collect();
        let unique: HashSet<i64> = ids.iter().copied().collect();

        let precedence_holds = merged.iter().all(|r| {
            let id = r.id as u8;
            let expected_tag = if a.contains(&id) {
                "updated"
            } else if b.contains(&id) {
                "pushed"
            } else {
                "created"
            };
            r.name == expected_tag
        });

        ids.len() == unique.len() && unique == expected && precedence_holds
    }
}
