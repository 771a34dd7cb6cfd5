//! Request-serving surface over the crawler.
//!
//! [`GraphService::get_or_compute`] memoizes bounded-depth graphs by
//! `(package, depth)`. Concurrent requests for the same key join one crawl.

use crate::crawler::GraphCrawler;
use crate::singleflight::{CachePolicy, SingleFlight};
use crate::types::{DependencyGraph, PackageName};
use std::sync::Arc;
use tracing::debug;

/// Memoized graph queries.
pub struct GraphService {
    crawler: GraphCrawler,
    concurrency: usize,
    results: SingleFlight<(PackageName, usize), Arc<DependencyGraph>>,
}

impl GraphService {
    pub fn new(crawler: GraphCrawler, concurrency: usize, policy: CachePolicy) -> Self {
        Self {
            crawler,
            concurrency,
            results: SingleFlight::new(policy),
        }
    }

    /// Dependency graph of `package` to `depth` hops, crawled at most once per
    /// key for as long as the result is retained.
    pub async fn get_or_compute(&self, package: &str, depth: usize) -> Arc<DependencyGraph> {
        let key = (package.to_string(), depth);
        if let Some(graph) = self.results.get(&key) {
            debug!("Serving cached graph for {}@{}", package, depth);
            return graph;
        }

        self.results
            .get_or_compute(key, || async {
                Arc::new(
                    self.crawler
                        .build_graph(package, depth, self.concurrency)
                        .await,
                )
            })
            .await
    }

    /// Number of crawls actually started.
    pub fn crawls(&self) -> u64 {
        self.results.computations()
    }

    pub fn crawler(&self) -> &GraphCrawler {
        &self.crawler
    }

    pub fn clear(&self) {
        self.results.clear();
    }
}
