//! OSV.dev vulnerability lookups for graph nodes.

use crate::registry::Enricher;
use crate::types::{MetadataRecord, Result};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_OSV_URL: &str = "https://api.osv.dev/v1/query";

#[derive(Serialize)]
struct OsvQuery<'a> {
    package: OsvPackage<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'a str>,
}

#[derive(Serialize)]
struct OsvPackage<'a> {
    name: &'a str,
    ecosystem: &'static str,
}

#[derive(Deserialize, Default)]
struct OsvResponse {
    #[serde(default)]
    vulns: Vec<OsvVuln>,
}

#[derive(Deserialize)]
struct OsvVuln {
    id: String,
    summary: Option<String>,
}

/// Queries OSV for known vulnerabilities of a package's latest version.
pub struct OsvClient {
    client: Client,
    endpoint: String,
    rate_limiter: Arc<RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>>,
}

impl OsvClient {
    pub fn new(timeout_secs: u64, rate_limit: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        let quota = Quota::per_second(NonZeroU32::new(rate_limit).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            endpoint: DEFAULT_OSV_URL.to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    async fn query(&self, name: &str, version: Option<&str>) -> Result<Vec<OsvVuln>> {
        self.rate_limiter.until_ready().await;

        let query = OsvQuery {
            package: OsvPackage {
                name,
                ecosystem: "npm",
            },
            version,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&query)
            .send()
            .await?
            .error_for_status()?;

        let body: OsvResponse = response.json().await?;
        Ok(body.vulns)
    }
}

#[async_trait]
impl Enricher for OsvClient {
    fn name(&self) -> &'static str {
        "OSV.dev"
    }

    async fn enrich(&self, record: &MetadataRecord) -> BTreeMap<String, Value> {
        let vulns = match self
            .query(&record.name, record.latest_version.as_deref())
            .await
        {
            Ok(vulns) => vulns,
            Err(e) => {
                warn!("OSV lookup failed for {}: {}", record.name, e);
                return BTreeMap::new();
            }
        };

        debug!("{} known vulnerabilities for {}", vulns.len(), record.name);

        let mut fields = BTreeMap::new();
        fields.insert("vulnerability_count".to_string(), json!(vulns.len()));
        fields.insert(
            "vulnerabilities".to_string(),
            Value::Array(
                vulns
                    .into_iter()
                    .map(|v| json!({ "id": v.id, "summary": v.summary }))
                    .collect(),
            ),
        );
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record(name: &str, version: &str) -> MetadataRecord {
        MetadataRecord {
            name: name.to_string(),
            latest_version: Some(version.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_enrich_reports_vulnerabilities() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/query"))
            .and(body_partial_json(json!({
                "package": { "name": "minimist", "ecosystem": "npm" },
                "version": "1.2.0"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "vulns": [{ "id": "GHSA-xvch-5gv4-984h", "summary": "Prototype Pollution" }]
            })))
            .mount(&server)
            .await;

        let client = OsvClient::new(5, 100)
            .unwrap()
            .with_endpoint(&format!("{}/v1/query", server.uri()));
        let fields = client.enrich(&record("minimist", "1.2.0")).await;

        assert_eq!(fields["vulnerability_count"], json!(1));
        assert_eq!(fields["vulnerabilities"][0]["id"], "GHSA-xvch-5gv4-984h");
    }

    #[tokio::test]
    async fn test_clean_package_reports_zero() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let client = OsvClient::new(5, 100).unwrap().with_endpoint(&server.uri());
        let fields = client.enrich(&record("left-pad", "1.3.0")).await;

        assert_eq!(fields["vulnerability_count"], json!(0));
    }

    #[tokio::test]
    async fn test_failure_adds_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = OsvClient::new(5, 100).unwrap().with_endpoint(&server.uri());
        assert!(client.enrich(&record("anything", "1.0.0")).await.is_empty());
    }
}
