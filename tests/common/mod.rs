//! Common test utilities and helpers for repometrics tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use repometrics::github::{
    Branch, Contributor, PullRequest, Release, RemoteRepository, RepoApi, RepoSort, PER_PAGE,
};
use repometrics::CollectError;

pub fn ts(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

/// Mock repository served by [`FakeApi`]
#[derive(Debug, Clone, Default)]
pub struct MockRepository {
    pub remote: RemoteRepository,
    pub topics: Vec<String>,
    pub branches: Vec<Branch>,
    pub releases: Vec<Release>,
    pub pull_requests: Vec<PullRequest>,
    pub languages: BTreeMap<String, i64>,
    pub contributors: Vec<Contributor>,
}

impl MockRepository {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            remote: RemoteRepository {
                id,
                name: name.to_string(),
                default_branch: Some("main".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Set created, pushed and updated to the same instant
    pub fn changed_at(mut self, at: DateTime<Utc>) -> Self {
        self.remote.created_at = Some(at);
        self.remote.pushed_at = Some(at);
        self.remote.updated_at = Some(at);
        self
    }

    pub fn timestamps(
        mut self,
        created: Option<DateTime<Utc>>,
        pushed: Option<DateTime<Utc>>,
        updated: Option<DateTime<Utc>>,
    ) -> Self {
        self.remote.created_at = created;
        self.remote.pushed_at = pushed;
        self.remote.updated_at = updated;
        self
    }

    pub fn default_branch(mut self, name: &str) -> Self {
        self.remote.default_branch = Some(name.to_string());
        self
    }

    pub fn branch(mut self, name: &str, protected: bool) -> Self {
        self.branches.push(Branch {
            name: name.to_string(),
            protected: Some(protected),
        });
        self
    }

    pub fn many_branches(mut self, count: usize) -> Self {
        self.branches = (0..count)
            .map(|i| Branch {
                name: format!("feature-{}", i),
                protected: Some(false),
            })
            .collect();
        self
    }

    pub fn release(mut self, tag: &str) -> Self {
        self.releases.push(Release {
            id: self.releases.len() as i64 + 1,
            tag_name: Some(tag.to_string()),
            name: None,
        });
        self
    }

    pub fn topic(mut self, topic: &str) -> Self {
        self.topics.push(topic.to_string());
        self
    }

    pub fn language(mut self, name: &str, bytes: i64) -> Self {
        self.languages.insert(name.to_string(), bytes);
        self
    }

    pub fn contributor(mut self, login: &str, contributions: i64) -> Self {
        self.contributors.push(Contributor {
            login: Some(login.to_string()),
            contributions,
        });
        self
    }
}

#[derive(Default)]
struct FakeState {
    repos: Vec<MockRepository>,
    org_page_requests: Vec<(RepoSort, u32)>,
    detail_requests: Vec<String>,
    failing: HashSet<String>,
    fail_listing: bool,
    endless_org_listing: bool,
}

/// In-memory [`RepoApi`] that paginates like the hosting API
#[derive(Clone, Default)]
pub struct FakeApi {
    state: Arc<Mutex<FakeState>>,
}

impl FakeApi {
    pub fn new(repos: Vec<MockRepository>) -> Self {
        let api = Self::default();
        api.state.lock().unwrap().repos = repos;
        api
    }

    pub fn set_repos(&self, repos: Vec<MockRepository>) {
        self.state.lock().unwrap().repos = repos;
    }

    /// Make every detail request for `name` fail
    pub fn fail_repo(&self, name: &str) {
        self.state.lock().unwrap().failing.insert(name.to_string());
    }

    pub fn fail_listing(&self) {
        self.state.lock().unwrap().fail_listing = true;
    }

    /// Serve full pages of the organization listing forever
    pub fn endless_org_listing(&self) {
        self.state.lock().unwrap().endless_org_listing = true;
    }

    pub fn org_page_requests(&self) -> Vec<(RepoSort, u32)> {
        self.state.lock().unwrap().org_page_requests.clone()
    }

    /// Names passed to `get_repo`, in call order
    pub fn detail_requests(&self) -> Vec<String> {
        self.state.lock().unwrap().detail_requests.clone()
    }

    pub fn clear_requests(&self) {
        let mut state = self.state.lock().unwrap();
        state.org_page_requests.clear();
        state.detail_requests.clear();
    }

    fn find(&self, repo: &str) -> Result<MockRepository, CollectError> {
        let state = self.state.lock().unwrap();
        if state.failing.contains(repo) {
            return Err(CollectError::remote(format!("injected failure for {}", repo)));
        }
        state
            .repos
            .iter()
            .find(|r| r.remote.name == repo)
            .cloned()
            .ok_or_else(|| CollectError::remote(format!("GET /repos/acme/{} returned 404", repo)))
    }
}

fn page_of<T: Clone>(items: &[T], page: u32) -> Vec<T> {
    let per_page = PER_PAGE as usize;
    items
        .iter()
        .skip((page as usize - 1) * per_page)
        .take(per_page)
        .cloned()
        .collect()
}

#[async_trait]
impl RepoApi for FakeApi {
    async fn list_org_repos(
        &self,
        _org: &str,
        sort: RepoSort,
        page: u32,
    ) -> Result<Vec<RemoteRepository>, CollectError> {
        let mut state = self.state.lock().unwrap();
        state.org_page_requests.push((sort, page));

        if state.fail_listing {
            return Err(CollectError::remote("injected listing failure"));
        }

        if state.endless_org_listing {
            return Ok((0..PER_PAGE as i64)
                .map(|i| RemoteRepository {
                    id: page as i64 * 1000 + i,
                    name: format!("repo-{}-{}", page, i),
                    ..Default::default()
                })
                .collect());
        }

        let mut repos: Vec<RemoteRepository> =
            state.repos.iter().map(|r| r.remote.clone()).collect();
        // Newest first; repositories without the sort timestamp go last
        repos.sort_by(|a, b| sort.timestamp(b).cmp(&sort.timestamp(a)));

        Ok(page_of(&repos, page))
    }

    async fn get_repo(&self, _org: &str, repo: &str) -> Result<RemoteRepository, CollectError> {
        self.state
            .lock()
            .unwrap()
            .detail_requests
            .push(repo.to_string());
        Ok(self.find(repo)?.remote)
    }

    async fn list_branches(
        &self,
        _org: &str,
        repo: &str,
        page: u32,
    ) -> Result<Vec<Branch>, CollectError> {
        Ok(page_of(&self.find(repo)?.branches, page))
    }

    async fn list_releases(
        &self,
        _org: &str,
        repo: &str,
        page: u32,
    ) -> Result<Vec<Release>, CollectError> {
        Ok(page_of(&self.find(repo)?.releases, page))
    }

    async fn list_pull_requests(
        &self,
        _org: &str,
        repo: &str,
        page: u32,
    ) -> Result<Vec<PullRequest>, CollectError> {
        Ok(page_of(&self.find(repo)?.pull_requests, page))
    }

    async fn list_contributors(
        &self,
        _org: &str,
        repo: &str,
        page: u32,
    ) -> Result<Vec<Contributor>, CollectError> {
        Ok(page_of(&self.find(repo)?.contributors, page))
    }

    async fn list_languages(
        &self,
        _org: &str,
        repo: &str,
    ) -> Result<BTreeMap<String, i64>, CollectError> {
        Ok(self.find(repo)?.languages)
    }

    async fn list_topics(&self, _org: &str, repo: &str) -> Result<Vec<String>, CollectError> {
        Ok(self.find(repo)?.topics)
    }
}
