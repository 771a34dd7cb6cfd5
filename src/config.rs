//! Command-line configuration and input loading.

use crate::singleflight::CachePolicy;
use crate::types::{AuditError, PackageName, RegistryConfig, Result, DEFAULT_REGISTRY_URL};
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// npm supply-chain auditor: dependency graphs and typosquat detection.
#[derive(Parser, Debug, Clone)]
#[command(name = "depsquat")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode: only show failures and findings
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    #[command(flatten)]
    pub registry: RegistryOptions,
}

/// Registry access options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct RegistryOptions {
    /// Registry base URL
    #[arg(long, env = "DEPSQUAT_REGISTRY", default_value = DEFAULT_REGISTRY_URL, global = true)]
    pub registry: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "10", global = true)]
    pub timeout: u64,

    /// Rate limit (requests per second)
    #[arg(long, default_value = "20", global = true)]
    pub rate_limit: u32,

    /// Maximum cached entries per cache (unbounded when unset)
    #[arg(long, global = true)]
    pub cache_capacity: Option<usize>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Build the dependency graph of packages up to a depth
    Graph(GraphConfig),
    /// Compute the full transitive closure of a seed list
    Closure(ClosureConfig),
    /// Find and audit names that look like misspellings of trusted packages
    Typosquat(TyposquatConfig),
    /// Download every package name in the registry
    Names(NamesConfig),
}

/// Configuration for the graph command.
#[derive(Parser, Debug, Clone)]
pub struct GraphConfig {
    /// Package name(s) to crawl
    #[arg(required = true)]
    pub packages: Vec<String>,

    /// Maximum dependency depth (the seed is depth 0)
    #[arg(long, default_value = "2")]
    pub depth: usize,

    /// Maximum concurrent registry fetches per crawl
    #[arg(long, default_value = "10")]
    pub concurrency: usize,

    /// Attach known vulnerabilities from OSV to every node
    #[arg(long)]
    pub vulns: bool,

    /// Attach GitHub repository stats to every node hosted on GitHub
    #[arg(long)]
    pub github: bool,

    /// GitHub API token (optional, raises the rate limit)
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Output file path (defaults to stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Configuration for the closure command.
#[derive(Parser, Debug, Clone)]
pub struct ClosureConfig {
    /// Seed package name(s)
    #[arg(required_unless_present = "file")]
    pub seeds: Vec<String>,

    /// File with seeds: JSON object (keys), JSON array, or one name per line
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Output file path (defaults to stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Configuration for the typosquat command.
#[derive(Parser, Debug, Clone)]
pub struct TyposquatConfig {
    /// Trusted package name(s)
    #[arg(required = true)]
    pub trusted: Vec<String>,

    /// Candidate universe, one name per line (defaults to registry search)
    #[arg(short, long)]
    pub universe: Option<PathBuf>,

    /// Registry search results per trusted name
    #[arg(long, default_value = "250")]
    pub search_size: usize,

    /// Skip the character-set overlap check
    #[arg(long)]
    pub lenient: bool,

    /// Maximum concurrent metadata fetches during the audit
    #[arg(long, default_value = "10")]
    pub concurrency: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Output file path (defaults to stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Configuration for the names command.
#[derive(Parser, Debug, Clone)]
pub struct NamesConfig {
    /// Output file, one name per line
    #[arg(short, long)]
    pub output: PathBuf,

    /// Rows requested per page
    #[arg(long, default_value = "10000")]
    pub page_size: usize,

    /// Replication endpoint
    #[arg(long)]
    pub replica: Option<String>,
}

impl Config {
    /// Get registry configuration from the global options.
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            registry_url: self.registry.registry.clone(),
            timeout_secs: self.registry.timeout,
            rate_limit: self.registry.rate_limit,
            cache_policy: self.cache_policy(),
            ..Default::default()
        }
    }

    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy::from_capacity(self.registry.cache_capacity)
    }
}

impl ClosureConfig {
    /// Seeds from arguments and the seed file, deduplicated in first-seen order.
    ///
    /// An unreadable or unparseable file, or an empty result, is an error.
    pub fn load_seeds(&self) -> Result<Vec<PackageName>> {
        let mut seeds = self.seeds.clone();
        if let Some(ref path) = self.file {
            seeds.extend(load_seed_file(path)?);
        }

        let mut seen = BTreeSet::new();
        seeds.retain(|s| seen.insert(s.clone()));

        if seeds.is_empty() {
            return Err(AuditError::InvalidSeeds("no seed packages given".to_string()));
        }
        Ok(seeds)
    }
}

/// Read seeds from a JSON object (its keys), a JSON array of strings, or plain text.
pub fn load_seed_file(path: &Path) -> Result<Vec<PackageName>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AuditError::InvalidSeeds(format!("{}: {}", path.display(), e)))?;
    let trimmed = content.trim_start();

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        let value: serde_json::Value = serde_json::from_str(trimmed)
            .map_err(|e| AuditError::InvalidSeeds(format!("{}: {}", path.display(), e)))?;
        return match value {
            serde_json::Value::Object(map) => Ok(map.keys().cloned().collect()),
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    serde_json::Value::String(name) => Ok(name),
                    other => Err(AuditError::InvalidSeeds(format!(
                        "{}: expected a package name, got {}",
                        path.display(),
                        other
                    ))),
                })
                .collect(),
            other => Err(AuditError::InvalidSeeds(format!(
                "{}: unsupported seed document {}",
                path.display(),
                other
            ))),
        };
    }

    Ok(parse_name_lines(&content))
}

/// Read a candidate universe, one name per line.
pub fn load_universe(path: &Path) -> Result<Vec<PackageName>> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_name_lines(&content))
}

fn parse_name_lines(content: &str) -> Vec<PackageName> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
