//! GitHub repository lookups for graph nodes.

use crate::registry::Enricher;
use crate::types::{MetadataRecord, Result};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// `owner/repo` from a GitHub URL in any of the usual npm spellings.
pub fn github_slug(url: &str) -> Option<String> {
    let re = regex::Regex::new(r"github\.com[:/](?P<user>[^/]+)/(?P<repo>[^/.]+)").ok()?;
    let caps = re.captures(url)?;
    Some(format!("{}/{}", &caps["user"], &caps["repo"]))
}

#[derive(Deserialize)]
struct RepoResponse {
    full_name: Option<String>,
    html_url: Option<String>,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count: u64,
}

#[derive(Debug, Deserialize, Serialize)]
struct Contributor {
    login: Option<String>,
    html_url: Option<String>,
    avatar_url: Option<String>,
    contributions: Option<u64>,
}

#[derive(Serialize)]
struct RepoSummary {
    name: Option<String>,
    html_url: Option<String>,
    stars: u64,
    forks: u64,
    contributors: Vec<Contributor>,
}

/// Adds a `repo` summary (stars, forks, contributors) for packages hosted on GitHub.
pub struct GithubClient {
    client: Client,
    api_url: String,
    rate_limiter: Arc<RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>>,
}

impl GithubClient {
    /// An optional `token` raises GitHub's anonymous rate limit.
    pub fn new(timeout_secs: u64, rate_limit: u32, token: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| crate::types::AuditError::ConfigError(format!("GitHub token: {}", e)))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("depsquat/0.1")
            .default_headers(headers)
            .build()?;

        let quota = Quota::per_second(NonZeroU32::new(rate_limit).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            api_url: DEFAULT_GITHUB_API_URL.to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.rate_limiter.until_ready().await;
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    async fn summary(&self, slug: &str) -> Result<RepoSummary> {
        let repo_url = format!("{}/repos/{}", self.api_url, slug);
        let repo: RepoResponse = self.get(&repo_url).await?;

        let contributors = match self
            .get::<Vec<Value>>(&format!("{}/contributors", repo_url))
            .await
        {
            // Entries that are not objects are skipped.
            Ok(items) => items
                .into_iter()
                .filter(Value::is_object)
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
            Err(e) => {
                warn!("Contributor lookup failed for {}: {}", slug, e);
                Vec::new()
            }
        };

        Ok(RepoSummary {
            name: repo.full_name,
            html_url: repo.html_url,
            stars: repo.stargazers_count,
            forks: repo.forks_count,
            contributors,
        })
    }
}

#[async_trait]
impl Enricher for GithubClient {
    fn name(&self) -> &'static str {
        "GitHub"
    }

    async fn enrich(&self, record: &MetadataRecord) -> BTreeMap<String, Value> {
        let Some(slug) = record.repository_url.as_deref().and_then(github_slug) else {
            return BTreeMap::new();
        };

        let summary = match self.summary(&slug).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("GitHub lookup failed for {}: {}", slug, e);
                return BTreeMap::new();
            }
        };
        debug!("{}: {} stars", slug, summary.stars);

        match serde_json::to_value(summary) {
            Ok(value) => BTreeMap::from([("repo".to_string(), value)]),
            Err(_) => BTreeMap::new(),
        }
    }
}
