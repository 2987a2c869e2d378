use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octocrab::Octocrab;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::process::Command;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::CollectError;

/// Fixed page size for every paginated listing
pub const PER_PAGE: u8 = 100;

/// Repository as returned by the org listing and the repository read
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteRepository {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pushed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub allow_squash_merge: Option<bool>,
    #[serde(default)]
    pub allow_rebase_merge: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Branch {
    pub name: String,
    #[serde(default)]
    pub protected: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Release {
    pub id: i64,
    #[serde(default)]
    pub tag_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullRequest {
    pub id: i64,
    pub number: i64,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Contributor {
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub contributions: i64,
}

#[derive(Debug, Deserialize)]
struct Topics {
    #[serde(default)]
    names: Vec<String>,
}

/// Sort keys supported by the organization repository listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoSort {
    Created,
    Updated,
    Pushed,
}

impl RepoSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoSort::Created => "created",
            RepoSort::Updated => "updated",
            RepoSort::Pushed => "pushed",
        }
    }

    /// The repository timestamp this sort key orders by
    pub fn timestamp(&self, repo: &RemoteRepository) -> Option<DateTime<Utc>> {
        match self {
            RepoSort::Created => repo.created_at,
            RepoSort::Updated => repo.updated_at,
            RepoSort::Pushed => repo.pushed_at,
        }
    }
}

/// Page-level access to the hosting API.
///
/// Every list method returns a single page of at most [`PER_PAGE`] items;
/// pagination policy lives in the collector.
#[async_trait]
pub trait RepoApi: Send + Sync {
    async fn list_org_repos(
        &self,
        org: &str,
        sort: RepoSort,
        page: u32,
    ) -> Result<Vec<RemoteRepository>, CollectError>;

    async fn get_repo(&self, org: &str, repo: &str) -> Result<RemoteRepository, CollectError>;

    async fn list_branches(&self, org: &str, repo: &str, page: u32)
        -> Result<Vec<Branch>, CollectError>;

    async fn list_releases(&self, org: &str, repo: &str, page: u32)
        -> Result<Vec<Release>, CollectError>;

    async fn list_pull_requests(
        &self,
        org: &str,
        repo: &str,
        page: u32,
    ) -> Result<Vec<PullRequest>, CollectError>;

    async fn list_contributors(
        &self,
        org: &str,
        repo: &str,
        page: u32,
    ) -> Result<Vec<Contributor>, CollectError>;

    async fn list_languages(&self, org: &str, repo: &str)
        -> Result<BTreeMap<String, i64>, CollectError>;

    async fn list_topics(&self, org: &str, repo: &str) -> Result<Vec<String>, CollectError>;
}

/// GitHub authentication strategies
#[derive(Debug, Clone)]
pub enum AuthStrategy {
    /// Use GitHub CLI authentication
    GitHubCLI,
    /// Use environment variable token
    EnvironmentToken,
}

#[derive(Debug, Default, Serialize)]
struct PageParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    sort: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    direction: Option<&'static str>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<&'static str>,
    per_page: u8,
    page: u32,
}

impl PageParams {
    fn page(page: u32) -> Self {
        Self {
            per_page: PER_PAGE,
            page,
            ..Default::default()
        }
    }
}

/// Octocrab-backed implementation of [`RepoApi`]
pub struct GitHubApi {
    client: Octocrab,
}

impl GitHubApi {
    /// Create a client for the configured API endpoint with automatic authentication
    pub fn new(config: &Config) -> Result<Self> {
        let (auth_strategy, token) = Self::detect_authentication(config)?;

        info!("Using authentication strategy: {:?}", auth_strategy);

        Self::with_token(&config.github.api_url, Some(token))
    }

    /// Create a client for an explicit base URL and optional token
    pub fn with_token(base_url: &str, token: Option<String>) -> Result<Self> {
        let mut builder = Octocrab::builder()
            .base_uri(base_url)
            .with_context(|| format!("Invalid GitHub API base URL: {}", base_url))?;

        if let Some(token) = token {
            builder = builder.personal_token(token);
        }

        let client = builder.build().context("Failed to create GitHub client")?;

        debug!("GitHub client created for {}", base_url);
        Ok(Self { client })
    }

    /// Detect and obtain GitHub authentication
    fn detect_authentication(config: &Config) -> Result<(AuthStrategy, String)> {
        match config.github.auth_method.as_str() {
            "auto" => {
                // Environment token first, then GitHub CLI
                if let Ok(token) = Self::try_environment_token() {
                    Ok((AuthStrategy::EnvironmentToken, token))
                } else if let Ok(token) = Self::try_github_cli() {
                    Ok((AuthStrategy::GitHubCLI, token))
                } else {
                    Err(anyhow!(
                        "No GitHub authentication found. Please either:\n\
                         1. Set GITHUB_AUTH_TOKEN (or GITHUB_TOKEN) environment variable\n\
                         2. Install and authenticate GitHub CLI: gh auth login"
                    ))
                }
            }
            "gh_cli" => {
                let token = Self::try_github_cli()
                    .context("GitHub CLI authentication failed. Run: gh auth login")?;
                Ok((AuthStrategy::GitHubCLI, token))
            }
            "token" => {
                let token = Self::try_environment_token()
                    .context("GITHUB_AUTH_TOKEN environment variable not found or invalid")?;
                Ok((AuthStrategy::EnvironmentToken, token))
            }
            other => Err(anyhow!("Unknown auth method: {}", other)),
        }
    }

    /// Try to get token from GitHub CLI
    fn try_github_cli() -> Result<String> {
        debug!("Attempting GitHub CLI authentication");

        if !Self::is_command_available("gh") {
            return Err(anyhow!("GitHub CLI (gh) is not installed"));
        }

        let token_output = Command::new("gh")
            .args(["auth", "token"])
            .output()
            .context("Failed to get GitHub CLI token")?;

        if !token_output.status.success() {
            return Err(anyhow!(
                "Failed to retrieve token from GitHub CLI: {}",
                String::from_utf8_lossy(&token_output.stderr)
            ));
        }

        let token = String::from_utf8(token_output.stdout)
            .context("GitHub CLI token is not valid UTF-8")?
            .trim()
            .to_string();

        if token.is_empty() {
            return Err(anyhow!("GitHub CLI returned empty token"));
        }

        debug!("Successfully obtained token from GitHub CLI");
        Ok(token)
    }

    /// Try to get token from environment variables
    fn try_environment_token() -> Result<String> {
        debug!("Attempting environment variable authentication");

        let token = env::var("GITHUB_AUTH_TOKEN")
            .or_else(|_| env::var("GITHUB_TOKEN"))
            .context("Neither GITHUB_AUTH_TOKEN nor GITHUB_TOKEN is set")?;

        if token.is_empty() {
            return Err(anyhow!("GitHub token environment variable is empty"));
        }

        if !token.starts_with("ghp_")
            && !token.starts_with("gho_")
            && !token.starts_with("ghs_")
            && !token.starts_with("github_pat_")
        {
            warn!("GitHub token doesn't look like a valid GitHub token");
        }

        Ok(token)
    }

    /// Check if a command is available in PATH
    fn is_command_available(command: &str) -> bool {
        Command::new("which")
            .arg(command)
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        route: &str,
        params: Option<&PageParams>,
    ) -> Result<T, CollectError> {
        debug!("GET {} {:?}", route, params);
        self.client
            .get(route, params)
            .await
            .map_err(|e| CollectError::api(format!("GET {}", route), e))
    }
}

#[async_trait]
impl RepoApi for GitHubApi {
    async fn list_org_repos(
        &self,
        org: &str,
        sort: RepoSort,
        page: u32,
    ) -> Result<Vec<RemoteRepository>, CollectError> {
        let params = PageParams {
            sort: Some(sort.as_str()),
            direction: Some("desc"),
            kind: Some("all"),
            ..PageParams::page(page)
        };
        self.get_json(&format!("/orgs/{}/repos", org), Some(&params))
            .await
    }

    async fn get_repo(&self, org: &str, repo: &str) -> Result<RemoteRepository, CollectError> {
        self.get_json(&format!("/repos/{}/{}", org, repo), None).await
    }

    async fn list_branches(
        &self,
        org: &str,
        repo: &str,
        page: u32,
    ) -> Result<Vec<Branch>, CollectError> {
        self.get_json(
            &format!("/repos/{}/{}/branches", org, repo),
            Some(&PageParams::page(page)),
        )
        .await
    }

    async fn list_releases(
        &self,
        org: &str,
        repo: &str,
        page: u32,
    ) -> Result<Vec<Release>, CollectError> {
        self.get_json(
            &format!("/repos/{}/{}/releases", org, repo),
            Some(&PageParams::page(page)),
        )
        .await
    }

    async fn list_pull_requests(
        &self,
        org: &str,
        repo: &str,
        page: u32,
    ) -> Result<Vec<PullRequest>, CollectError> {
        let params = PageParams {
            state: Some("all"),
            ..PageParams::page(page)
        };
        self.get_json(&format!("/repos/{}/{}/pulls", org, repo), Some(&params))
            .await
    }

    async fn list_contributors(
        &self,
        org: &str,
        repo: &str,
        page: u32,
    ) -> Result<Vec<Contributor>, CollectError> {
        // Empty repositories answer 204 with no body, which the typed getter can't decode
        let route = format!(
            "/repos/{}/{}/contributors?per_page={}&page={}",
            org, repo, PER_PAGE, page
        );
        debug!("GET {}", route);
        let response = self
            .client
            ._get(&route)
            .await
            .map_err(|e| CollectError::api(format!("GET {}", route), e))?;

        let status = response.status();
        if status.as_u16() == 204 {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(CollectError::remote(format!(
                "GET {} returned status {}",
                route, status
            )));
        }

        let body = self
            .client
            .body_to_string(response)
            .await
            .map_err(|e| CollectError::api(format!("GET {}", route), e))?;

        serde_json::from_str(&body)
            .map_err(|e| CollectError::remote(format!("Failed to decode {}: {}", route, e)))
    }

    async fn list_languages(
        &self,
        org: &str,
        repo: &str,
    ) -> Result<BTreeMap<String, i64>, CollectError> {
        self.get_json(&format!("/repos/{}/{}/languages", org, repo), None)
            .await
    }

    async fn list_topics(&self, org: &str, repo: &str) -> Result<Vec<String>, CollectError> {
        let topics: Topics = self
            .get_json(&format!("/repos/{}/{}/topics", org, repo), None)
            .await?;
        Ok(topics.names)
    }
}
