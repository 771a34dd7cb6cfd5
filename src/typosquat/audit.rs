//! Candidate discovery and metadata audit.

use crate::registry::github::github_slug;
use crate::registry::{FetchCache, NpmRegistry};
use crate::typosquat::matcher::SimilarityMatcher;
use crate::types::{FetchOutcome, PackageName, TyposquatCandidate};
use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Risk-relevant facts about one registry package.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditFeatures {
    pub name: PackageName,
    pub latest_version: Option<String>,
    pub created: Option<String>,
    pub modified: Option<String>,
    pub num_versions: usize,
    pub num_maintainers: usize,
    pub maintainers: Vec<String>,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub has_readme: bool,
    pub readme_length: usize,
    pub dependencies_count: usize,
    pub dist_size: Option<u64>,
    pub repository: Option<String>,
    /// `owner/repo` when the repository is hosted on GitHub.
    pub github_repo: Option<String>,
}

/// Audit result for one name: its features, or why there are none.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AuditEntry {
    Features(AuditFeatures),
    Error { name: PackageName, error: String },
}

impl AuditEntry {
    pub fn name(&self) -> &str {
        match self {
            AuditEntry::Features(features) => &features.name,
            AuditEntry::Error { name, .. } => name,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, AuditEntry::Error { .. })
    }
}

/// Derive the audit record for `name` from its fetch outcome.
pub fn extract_audit_features(name: &str, outcome: &FetchOutcome) -> AuditEntry {
    let FetchOutcome::Found(record) = outcome else {
        return AuditEntry::Error {
            name: name.to_string(),
            error: outcome.error_message().unwrap_or_default(),
        };
    };

    AuditEntry::Features(AuditFeatures {
        name: name.to_string(),
        latest_version: record.latest_version.clone(),
        created: record.created.clone(),
        modified: record.modified.clone(),
        num_versions: record.version_count,
        num_maintainers: record.maintainers.len(),
        maintainers: record.maintainers.clone(),
        description: record.description.clone(),
        keywords: record.keywords.clone(),
        has_readme: record.has_readme,
        readme_length: record.readme_length,
        dependencies_count: record.dependencies.len(),
        dist_size: record.unpacked_size,
        github_repo: record.repository_url.as_deref().and_then(github_slug),
        repository: record.repository_url.clone(),
    })
}

/// Outcome of a typosquat audit run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TyposquatReport {
    /// Trusted name to the candidates found for it. Names without candidates
    /// are omitted.
    pub candidates: BTreeMap<PackageName, Vec<TyposquatCandidate>>,
    /// Candidate name to its audit record.
    pub audit: BTreeMap<PackageName, AuditEntry>,
}

impl TyposquatReport {
    pub fn candidate_count(&self) -> usize {
        self.candidates.values().map(Vec::len).sum()
    }
}

/// Finds typosquat candidates of trusted names and audits them.
pub struct TyposquatAuditor {
    cache: FetchCache,
    matcher: SimilarityMatcher,
    concurrency: usize,
}

impl TyposquatAuditor {
    pub fn new(cache: FetchCache, matcher: SimilarityMatcher, concurrency: usize) -> Self {
        Self {
            cache,
            matcher,
            concurrency: concurrency.max(1),
        }
    }

    /// Match every trusted name against a local candidate universe.
    pub fn scan(
        &self,
        trusted: &[PackageName],
        universe: &[PackageName],
    ) -> BTreeMap<PackageName, Vec<TyposquatCandidate>> {
        let mut found = BTreeMap::new();
        for name in trusted {
            let matches = self
                .matcher
                .find_candidates(name, universe.iter().map(String::as_str));
            if !matches.is_empty() {
                found.insert(name.clone(), matches);
            }
        }
        info!(
            "Found {} potential typosquats",
            found.values().map(Vec::len).sum::<usize>()
        );
        found
    }

    /// Match every trusted name against the registry's search results for it.
    ///
    /// A failed search leaves that trusted name without candidates.
    pub async fn scan_by_search(
        &self,
        trusted: &[PackageName],
        registry: &NpmRegistry,
        size: usize,
    ) -> BTreeMap<PackageName, Vec<TyposquatCandidate>> {
        let mut found = BTreeMap::new();
        for name in trusted {
            let universe = match registry.search(name, size).await {
                Ok(universe) => universe,
                Err(e) => {
                    warn!("Search for {} failed: {}", name, e);
                    continue;
                }
            };
            let matches = self
                .matcher
                .find_candidates(name, universe.iter().map(String::as_str));
            if !matches.is_empty() {
                found.insert(name.clone(), matches);
            }
        }
        found
    }

    /// Resolve each name through the fetch cache and extract its audit record.
    ///
    /// `progress` advances once per audited name.
    pub async fn audit(
        &self,
        names: BTreeSet<PackageName>,
        progress: Option<&ProgressBar>,
    ) -> BTreeMap<PackageName, AuditEntry> {
        info!("Auditing {} potential typosquat packages", names.len());
        if let Some(pb) = progress {
            pb.set_length(names.len() as u64);
        }
        let cache = &self.cache;

        stream::iter(names)
            .map(|name| async move {
                let outcome = cache.resolve(&name).await;
                debug!("Audited {}", name);
                let entry = extract_audit_features(&name, &outcome);
                (name, entry)
            })
            .buffer_unordered(self.concurrency)
            .inspect(|_| {
                if let Some(pb) = progress {
                    pb.inc(1);
                }
            })
            .collect()
            .await
    }

    /// Audit every candidate in `candidates`, deduplicated across trusted names.
    pub async fn report(
        &self,
        candidates: BTreeMap<PackageName, Vec<TyposquatCandidate>>,
        progress: Option<&ProgressBar>,
    ) -> TyposquatReport {
        let names: BTreeSet<PackageName> = candidates
            .values()
            .flatten()
            .map(|c| c.name.clone())
            .collect();
        let audit = self.audit(names, progress).await;
        TyposquatReport { candidates, audit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::stub::StubRegistry;
    use crate::singleflight::CachePolicy;
    use crate::types::MetadataRecord;
    use std::sync::Arc;

    fn auditor(stub: &Arc<StubRegistry>) -> TyposquatAuditor {
        TyposquatAuditor::new(
            FetchCache::new(stub.clone(), CachePolicy::Unbounded),
            SimilarityMatcher::default(),
            4,
        )
    }

    fn names(list: &[&str]) -> Vec<PackageName> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_extract_features_from_record() {
        let record = MetadataRecord {
            name: "expres".to_string(),
            latest_version: Some("0.0.1".to_string()),
            maintainers: vec!["mallory".to_string()],
            version_count: 1,
            dependencies: BTreeMap::from([("evil".to_string(), "*".to_string())]),
            repository_url: Some("https://github.com/mallory/expres".to_string()),
            ..Default::default()
        };

        let AuditEntry::Features(features) =
            extract_audit_features("expres", &FetchOutcome::Found(record))
        else {
            panic!("expected features");
        };

        assert_eq!(features.num_maintainers, 1);
        assert_eq!(features.dependencies_count, 1);
        assert_eq!(features.github_repo.as_deref(), Some("mallory/expres"));
    }

    #[test]
    fn test_extract_features_error_marker() {
        let entry = extract_audit_features("gone", &FetchOutcome::NotFound);
        assert!(entry.is_error());
        assert_eq!(entry.name(), "gone");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["error"], "Package not found");
    }

    #[tokio::test]
    async fn test_scan_and_report() {
        let stub = Arc::new(
            StubRegistry::new()
                .with_package("expres", &[])
                .with_package("lodahs", &["expres"]),
        );
        let auditor = auditor(&stub);
        let universe = names(&["express", "expres", "lodash", "lodahs", "lodash-es", "loadsh2"]);

        let candidates = auditor.scan(&names(&["express", "lodash", "react"]), &universe);
        assert_eq!(candidates.keys().cloned().collect::<Vec<_>>(), names(&["express", "lodash"]));

        let progress = ProgressBar::hidden();
        let report = auditor.report(candidates, Some(&progress)).await;

        assert_eq!(report.candidate_count(), 2);
        assert_eq!(progress.position(), 2);
        assert_eq!(progress.length(), Some(2));
        assert!(matches!(report.audit["expres"], AuditEntry::Features(_)));
        assert!(matches!(report.audit["lodahs"], AuditEntry::Features(_)));
        assert_eq!(stub.total_calls(), 2);
    }

    #[tokio::test]
    async fn test_shared_candidates_audited_once() {
        let stub = Arc::new(StubRegistry::new());
        let auditor = auditor(&stub);

        let candidates = BTreeMap::from([
            (
                "abcd".to_string(),
                vec![TyposquatCandidate { name: "abce".to_string(), edit_distance: 1 }],
            ),
            (
                "abcf".to_string(),
                vec![TyposquatCandidate { name: "abce".to_string(), edit_distance: 1 }],
            ),
        ]);

        let report = auditor.report(candidates, None).await;

        assert_eq!(report.audit.len(), 1);
        assert!(report.audit["abce"].is_error());
        assert_eq!(stub.calls("abce"), 1);
    }
}
