//! depsquat - npm supply-chain auditor.
//!
//! This library provides tools for auditing registry packages by:
//! - Crawling a package's dependency graph with bounded concurrency
//! - Computing the full dependency closure of a seed list, with reverse edges
//! - Deduplicating identical in-flight registry fetches and graph requests
//! - Flagging names that look like misspellings of trusted packages
//!
//! # Example
//!
//! ```no_run
//! use depsquat::registry::{FetchCache, NpmRegistry};
//! use depsquat::{GraphCrawler, RegistryConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RegistryConfig::default();
//!     let registry = Arc::new(NpmRegistry::new(&config).unwrap());
//!     let crawler = GraphCrawler::new(FetchCache::new(registry, config.cache_policy));
//!     let graph = crawler.build_graph("express", 2, 10).await;
//!     println!("{} packages, {} edges", graph.nodes.len(), graph.edges.len());
//! }
//! ```

pub mod config;
pub mod crawler;
pub mod registry;
pub mod report;
pub mod service;
pub mod singleflight;
pub mod typosquat;
pub mod types;

pub use config::{ClosureConfig, Commands, Config, GraphConfig, NamesConfig, TyposquatConfig};
pub use crawler::{ClosureCrawler, GraphCrawler};
pub use service::GraphService;
pub use singleflight::{CachePolicy, SingleFlight};
pub use typosquat::{is_typosquat, MatchMode, SimilarityMatcher, TyposquatAuditor};
pub use types::{
    AuditError, DependencyClosure, DependencyGraph, FetchOutcome, GraphEdge, GraphNode,
    MetadataRecord, PackageName, RegistryConfig, Result, TyposquatCandidate,
};
