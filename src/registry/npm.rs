//! npm registry client.

use crate::registry::RegistryGateway;
use crate::types::{AuditError, FetchOutcome, MetadataRecord, RegistryConfig, Result};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use url::Url;

/// Default endpoint listing every document in the registry.
pub const DEFAULT_REPLICA_URL: &str = "https://replicate.npmjs.com/registry/_all_docs";

/// Largest page the search endpoint will return.
pub const MAX_SEARCH_SIZE: usize = 250;

/// Full package document ("packument") as served by `GET {registry}/{name}`.
///
/// Every field is loosely typed: old packages carry all sorts of shapes and a
/// surprising field must not make the whole document unreadable.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Packument {
    #[serde(rename = "dist-tags")]
    dist_tags: Value,
    versions: Value,
    time: Value,
    maintainers: Value,
    readme: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VersionManifest {
    dependencies: Value,
    description: Value,
    keywords: Value,
    repository: Value,
    dist: Value,
    maintainers: Value,
}

/// npm registry API response for text search.
#[derive(Debug, Deserialize)]
struct NpmSearchResponse {
    objects: Vec<NpmSearchObject>,
}

#[derive(Debug, Deserialize)]
struct NpmSearchObject {
    package: NpmSearchPackage,
}

#[derive(Debug, Deserialize)]
struct NpmSearchPackage {
    name: String,
}

/// One page of the replication `_all_docs` listing.
#[derive(Debug, Deserialize)]
struct AllDocsPage {
    rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
struct AllDocsRow {
    id: String,
    key: String,
}

/// Gateway to an npm-compatible registry.
pub struct NpmRegistry {
    client: Client,
    rate_limiter: Arc<RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>>,
    registry_url: String,
    replica_url: String,
}

impl NpmRegistry {
    /// Create a new registry client.
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let registry_url = Url::parse(&config.registry_url)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(&config.user_agent)
            .http1_only()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        let quota = Quota::per_second(NonZeroU32::new(config.rate_limit).unwrap_or(NonZeroU32::MIN));
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        Ok(Self {
            client,
            rate_limiter,
            registry_url: registry_url.as_str().trim_end_matches('/').to_string(),
            replica_url: DEFAULT_REPLICA_URL.to_string(),
        })
    }

    /// Use a different `_all_docs` endpoint for [`NpmRegistry::list_all_names`].
    pub fn with_replica_url(mut self, replica_url: &str) -> Result<Self> {
        Url::parse(replica_url)?;
        self.replica_url = replica_url.to_string();
        Ok(self)
    }

    fn package_url(&self, name: &str) -> String {
        format!("{}/{}", self.registry_url, urlencoding::encode(name))
    }

    /// Fetch and decode the metadata document for one package.
    async fn fetch_packument(&self, name: &str) -> FetchOutcome {
        self.rate_limiter.until_ready().await;

        let url = self.package_url(name);
        trace!("Fetching npm metadata: {}", url);

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => return transient(name, &e),
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("Package NOT FOUND: {}", name);
            return FetchOutcome::NotFound;
        }
        if !status.is_success() {
            warn!("Registry returned HTTP {} for {}", status, name);
            return FetchOutcome::TransientError {
                cause: format!("HTTP {}", status),
            };
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return transient(name, &e),
        };

        match serde_json::from_slice::<Packument>(&body) {
            Ok(packument) => {
                debug!("Package exists: {}", name);
                FetchOutcome::Found(packument.into_record(name))
            }
            Err(e) => {
                warn!("Failed to parse npm response for {}: {}", name, e);
                FetchOutcome::Malformed {
                    cause: e.to_string(),
                }
            }
        }
    }

    /// Names returned by the registry's text search, at most `size` of them.
    pub async fn search(&self, text: &str, size: usize) -> Result<Vec<String>> {
        self.rate_limiter.until_ready().await;

        let size = size.clamp(1, MAX_SEARCH_SIZE);
        let url = format!(
            "{}/-/v1/search?text={}&size={}",
            self.registry_url,
            urlencoding::encode(text),
            size
        );
        trace!("Searching npm: {}", url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(AuditError::RegistryError(format!(
                "search for '{}' returned HTTP {}",
                text,
                response.status()
            )));
        }

        let results: NpmSearchResponse = response.json().await?;
        let names: Vec<String> = results.objects.into_iter().map(|o| o.package.name).collect();
        debug!("Search '{}' returned {} names", text, names.len());
        Ok(names)
    }

    /// Every package name in the registry, paged through the replication
    /// `_all_docs` endpoint.
    ///
    /// Pages after the first start at the last key already seen, so their first
    /// row must repeat that key and is skipped.
    pub async fn list_all_names(&self, page_size: usize) -> Result<Vec<String>> {
        let page_size = page_size.max(2);
        let mut names = Vec::new();

        let mut rows = self.fetch_all_docs_page(page_size, None).await?.rows;
        loop {
            let Some(last_key) = rows.last().map(|r| r.key.clone()) else {
                break;
            };
            let skip = usize::from(!names.is_empty());
            names.extend(rows.into_iter().skip(skip).map(|r| r.id));
            info!("Total package names fetched: {}", names.len());

            rows = self
                .fetch_all_docs_page(page_size, Some(&last_key))
                .await?
                .rows;

            match rows.first() {
                Some(first) if first.key != last_key => {
                    return Err(AuditError::RegistryError(format!(
                        "expected page to start at {} but got {}",
                        last_key, first.key
                    )));
                }
                Some(_) if rows.len() > 1 => continue,
                _ => break,
            }
        }

        Ok(names)
    }

    async fn fetch_all_docs_page(
        &self,
        limit: usize,
        start_key: Option<&str>,
    ) -> Result<AllDocsPage> {
        self.rate_limiter.until_ready().await;

        let mut request = self
            .client
            .get(&self.replica_url)
            .header("npm-replication-opt-in", "true")
            .query(&[("limit", limit.to_string())]);
        if let Some(key) = start_key {
            request = request.query(&[("startkey", serde_json::to_string(key)?)]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(AuditError::RegistryError(format!(
                "name listing returned HTTP {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl RegistryGateway for NpmRegistry {
    async fn fetch(&self, name: &str) -> FetchOutcome {
        self.fetch_packument(name).await
    }
}

fn transient(name: &str, error: &reqwest::Error) -> FetchOutcome {
    let cause = if error.is_timeout() {
        format!("timeout: {}", error)
    } else {
        error.to_string()
    };
    warn!("Registry request for {} failed: {}", name, cause);
    FetchOutcome::TransientError { cause }
}

impl Packument {
    fn into_record(self, name: &str) -> MetadataRecord {
        let latest_version = self.dist_tags.get("latest").and_then(as_string);
        let latest = latest_version
            .as_deref()
            .and_then(|v| self.versions.get(v))
            .and_then(|manifest| VersionManifest::deserialize(manifest).ok())
            .unwrap_or_default();

        let mut maintainers = people(&self.maintainers);
        if maintainers.is_empty() {
            maintainers = people(&latest.maintainers);
        }

        let readme = self.readme.as_ref().and_then(Value::as_str);

        MetadataRecord {
            name: name.to_string(),
            dependencies: dependencies(&latest.dependencies),
            created: self.time.get("created").and_then(as_string),
            modified: self.time.get("modified").and_then(as_string),
            maintainers,
            version_count: self.versions.as_object().map_or(0, |v| v.len()),
            description: as_string(&latest.description),
            keywords: keywords(&latest.keywords),
            repository_url: repository_url(&latest.repository),
            unpacked_size: latest.dist.get("unpackedSize").and_then(Value::as_u64),
            has_readme: self.readme.is_some(),
            readme_length: readme.map_or(0, |r| r.chars().count()),
            latest_version,
        }
    }
}

fn as_string(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

fn dependencies(value: &Value) -> BTreeMap<String, String> {
    let Some(deps) = value.as_object() else {
        return BTreeMap::new();
    };
    deps.iter()
        .map(|(name, range)| {
            let range = range.as_str().map_or_else(|| range.to_string(), str::to_string);
            (name.clone(), range)
        })
        .collect()
}

/// Maintainer names from either `[{name, email}]` or `["name <email>"]`.
fn people(value: &Value) -> Vec<String> {
    let Some(list) = value.as_array() else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|person| match person {
            Value::Object(obj) => obj.get("name").and_then(as_string),
            Value::String(s) => s.split('<').next().map(|n| n.trim().to_string()),
            _ => None,
        })
        .filter(|n| !n.is_empty())
        .collect()
}

fn keywords(value: &Value) -> Vec<String> {
    match value {
        Value::Array(list) => list.iter().filter_map(as_string).collect(),
        Value::String(s) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn repository_url(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj.get("url").and_then(as_string),
        _ => None,
    }
    .filter(|url| !url.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn registry_for(server: &MockServer) -> NpmRegistry {
        let config = RegistryConfig {
            registry_url: server.uri(),
            rate_limit: 1000,
            ..Default::default()
        };
        NpmRegistry::new(&config).unwrap()
    }

    fn express_packument() -> Value {
        json!({
            "name": "express",
            "dist-tags": { "latest": "4.18.2" },
            "time": { "created": "2010-12-29T19:38:25.450Z", "modified": "2024-01-01T00:00:00.000Z" },
            "maintainers": [{ "name": "dougwilson", "email": "d@example.com" }],
            "readme": "# express",
            "versions": {
                "4.18.1": { "dependencies": { "old-dep": "1.0.0" } },
                "4.18.2": {
                    "description": "Fast, unopinionated, minimalist web framework",
                    "keywords": ["web", "framework"],
                    "repository": { "type": "git", "url": "git+https://github.com/expressjs/express.git" },
                    "dist": { "unpackedSize": 220000 },
                    "dependencies": { "accepts": "~1.3.8", "body-parser": "1.20.1" }
                }
            }
        })
    }

    #[tokio::test]
    async fn test_found_package_uses_latest_version() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/express"))
            .respond_with(ResponseTemplate::new(200).set_body_json(express_packument()))
            .mount(&server)
            .await;

        let outcome = registry_for(&server).fetch("express").await;
        let record = outcome.record().expect("express should be found");

        assert_eq!(record.latest_version.as_deref(), Some("4.18.2"));
        assert_eq!(
            record.dependency_names().cloned().collect::<Vec<_>>(),
            vec!["accepts".to_string(), "body-parser".to_string()]
        );
        assert_eq!(record.version_count, 2);
        assert_eq!(record.maintainers, vec!["dougwilson".to_string()]);
        assert_eq!(record.keywords, vec!["web".to_string(), "framework".to_string()]);
        assert_eq!(
            record.repository_url.as_deref(),
            Some("git+https://github.com/expressjs/express.git")
        );
        assert_eq!(record.unpacked_size, Some(220000));
        assert_eq!(record.created.as_deref(), Some("2010-12-29T19:38:25.450Z"));
        assert!(record.has_readme);
        assert_eq!(record.readme_length, 9);
    }

    #[tokio::test]
    async fn test_missing_fields_are_not_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bare"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "bare" })))
            .mount(&server)
            .await;

        let outcome = registry_for(&server).fetch("bare").await;
        let record = outcome.record().expect("bare should be found");
        assert_eq!(record.latest_version, None);
        assert!(record.dependencies.is_empty());
        assert!(!record.has_readme);
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/garbage"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let registry = registry_for(&server);
        assert_eq!(registry.fetch("missing").await, FetchOutcome::NotFound);
        assert!(matches!(
            registry.fetch("limited").await,
            FetchOutcome::TransientError { cause } if cause.contains("429")
        ));
        assert!(matches!(
            registry.fetch("garbage").await,
            FetchOutcome::Malformed { .. }
        ));
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let config = RegistryConfig {
            registry_url: server.uri(),
            timeout_secs: 1,
            rate_limit: 1000,
            ..Default::default()
        };
        let registry = NpmRegistry::new(&config).unwrap();

        assert!(matches!(
            registry.fetch("slow").await,
            FetchOutcome::TransientError { cause } if cause.starts_with("timeout")
        ));
    }

    #[tokio::test]
    async fn test_search_returns_names() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/-/v1/search"))
            .and(query_param("text", "lodash"))
            .and(query_param("size", "250"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "objects": [
                    { "package": { "name": "lodash" } },
                    { "package": { "name": "lodahs" } }
                ]
            })))
            .mount(&server)
            .await;

        let names = registry_for(&server).search("lodash", 1000).await.unwrap();
        assert_eq!(names, vec!["lodash".to_string(), "lodahs".to_string()]);
    }

    #[tokio::test]
    async fn test_list_all_names_pages_by_start_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_all_docs"))
            .and(query_param_is_missing("startkey"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "rows": [
                    { "id": "a", "key": "a", "value": {} },
                    { "id": "b", "key": "b", "value": {} }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_all_docs"))
            .and(query_param("startkey", "\"b\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "rows": [
                    { "id": "b", "key": "b", "value": {} },
                    { "id": "c", "key": "c", "value": {} }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_all_docs"))
            .and(query_param("startkey", "\"c\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "rows": [{ "id": "c", "key": "c", "value": {} }]
            })))
            .mount(&server)
            .await;

        let registry = registry_for(&server)
            .with_replica_url(&format!("{}/_all_docs", server.uri()))
            .unwrap();
        let names = registry.list_all_names(2).await.unwrap();

        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_scoped_package_url_is_encoded() {
        let registry = NpmRegistry::new(&RegistryConfig::default()).unwrap();
        assert_eq!(
            registry.package_url("@babel/core"),
            "https://registry.npmjs.org/%40babel%2Fcore"
        );
    }

    #[test]
    fn test_people_accepts_both_shapes() {
        let value = json!([{ "name": "alice" }, "bob <bob@example.com>", 7]);
        assert_eq!(people(&value), vec!["alice".to_string(), "bob".to_string()]);
    }
}
