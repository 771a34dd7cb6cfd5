//! Core types and errors for the supply-chain auditor.

use crate::singleflight::CachePolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Fatal errors. Per-package failures are [`FetchOutcome`] values, not errors.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid seed list: {0}")]
    InvalidSeeds(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Registry error: {0}")]
    RegistryError(String),
}

pub type Result<T> = std::result::Result<T, AuditError>;

/// Registry package name, e.g. `lodash` or `@scope/name`. Compared exactly.
pub type PackageName = String;

/// Metadata of a package as published in the registry.
///
/// Only the latest version's manifest is consulted. Every field may be absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetadataRecord {
    pub name: PackageName,
    pub latest_version: Option<String>,
    /// Dependencies of the latest version, name to version range.
    pub dependencies: BTreeMap<PackageName, String>,
    pub created: Option<String>,
    pub modified: Option<String>,
    pub maintainers: Vec<String>,
    pub version_count: usize,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub repository_url: Option<String>,
    pub unpacked_size: Option<u64>,
    pub has_readme: bool,
    pub readme_length: usize,
}

impl MetadataRecord {
    /// Dependency names in declaration order.
    pub fn dependency_names(&self) -> impl Iterator<Item = &PackageName> {
        self.dependencies.keys()
    }
}

/// Result of resolving a package name against the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchOutcome {
    /// Registry returned a usable metadata document.
    Found(MetadataRecord),
    /// Registry has no such package.
    NotFound,
    /// Timeout, connection failure, rate limiting or unexpected status.
    TransientError { cause: String },
    /// Registry answered, but the body was not a metadata document.
    Malformed { cause: String },
}

impl FetchOutcome {
    pub fn record(&self) -> Option<&MetadataRecord> {
        match self {
            FetchOutcome::Found(record) => Some(record),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, FetchOutcome::Found(_))
    }

    /// Human-readable failure description, `None` for found packages.
    pub fn error_message(&self) -> Option<String> {
        match self {
            FetchOutcome::Found(_) => None,
            FetchOutcome::NotFound => Some("Package not found".to_string()),
            FetchOutcome::TransientError { cause } => Some(cause.clone()),
            FetchOutcome::Malformed { cause } => Some(format!("Malformed metadata: {}", cause)),
        }
    }
}

/// A package discovered by a bounded-depth crawl.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNode {
    pub id: PackageName,
    /// Depth of the queue entry that first claimed this package. With several
    /// workers a longer path can win the claim, so this may exceed the
    /// shortest distance from the seed.
    pub depth: usize,
    /// Number of direct dependencies.
    pub degree: usize,
    pub outcome: FetchOutcome,
    /// Opaque fields merged in by enrichers.
    #[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
    pub enrichment: BTreeMap<String, serde_json::Value>,
}

/// Directed "depends on" edge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct GraphEdge {
    pub from: PackageName,
    pub to: PackageName,
}

/// Output of a bounded-depth crawl.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DependencyGraph {
    pub root: PackageName,
    pub max_depth: usize,
    /// Sorted by `(depth, id)`.
    pub nodes: Vec<GraphNode>,
    /// Discovery order. Not deduplicated.
    pub edges: Vec<GraphEdge>,
}

impl DependencyGraph {
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn failed_nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter().filter(|n| !n.outcome.is_found())
    }
}

/// Metadata entry of a closure run: the record, or an error marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetadataEntry {
    Record(MetadataRecord),
    Error { error: String },
}

impl From<&FetchOutcome> for MetadataEntry {
    fn from(outcome: &FetchOutcome) -> Self {
        match outcome {
            FetchOutcome::Found(record) => MetadataEntry::Record(record.clone()),
            other => MetadataEntry::Error {
                error: other.error_message().unwrap_or_default(),
            },
        }
    }
}

/// Full transitive closure of one or more seeds.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DependencyClosure {
    pub roots_analyzed: Vec<PackageName>,
    /// Package to its direct dependencies. Failed packages map to an empty list.
    #[serde(rename = "dependency_graph")]
    pub forward_graph: BTreeMap<PackageName, Vec<PackageName>>,
    /// Package to the packages that depend on it.
    #[serde(rename = "reverse_dependencies")]
    pub reverse_graph: BTreeMap<PackageName, Vec<PackageName>>,
    /// Every package dispatched for fetch, in visit order.
    pub visited: Vec<PackageName>,
    pub metadata: BTreeMap<PackageName, MetadataEntry>,
}

/// A registry name judged to be a plausible typosquat of a trusted name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TyposquatCandidate {
    pub name: PackageName,
    pub edit_distance: usize,
}

/// Configuration for registry access.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub registry_url: String,
    pub timeout_secs: u64,
    /// Requests per second.
    pub rate_limit: u32,
    pub user_agent: String,
    pub cache_policy: CachePolicy,
}

pub const DEFAULT_REGISTRY_URL: &str = "https://registry.npmjs.org";

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            timeout_secs: 10,
            rate_limit: 20,
            user_agent: "depsquat/0.1".to_string(),
            cache_policy: CachePolicy::Unbounded,
        }
    }
}
