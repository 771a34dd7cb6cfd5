//! Exhaustive multi-seed dependency closure.

use crate::crawler::reverse::build_reverse_index;
use crate::registry::FetchCache;
use crate::types::{DependencyClosure, MetadataEntry, PackageName};
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;
use tracing::{debug, info};

/// Depth-first crawler that follows dependencies until nothing new is reachable.
///
/// All seeds share one visited set, so overlapping trees are fetched once.
/// Traversal uses an explicit stack and visits names in the same order as a
/// recursive pre-order descent would: each new name is expanded before its
/// siblings, children in declaration order.
pub struct ClosureCrawler {
    cache: FetchCache,
}

impl ClosureCrawler {
    pub fn new(cache: FetchCache) -> Self {
        Self { cache }
    }

    /// Compute the closure of `seeds`.
    ///
    /// A package that cannot be resolved is recorded with no dependencies and
    /// an error entry in `metadata`; the crawl carries on past it.
    pub async fn build_closure(&self, seeds: &[PackageName]) -> DependencyClosure {
        let start = Instant::now();
        let mut visited: HashSet<PackageName> = HashSet::new();
        let mut visit_order = Vec::new();
        let mut forward_graph = BTreeMap::new();
        let mut metadata = BTreeMap::new();

        for seed in seeds {
            let mut stack = vec![seed.clone()];

            while let Some(name) = stack.pop() {
                if !visited.insert(name.clone()) {
                    continue;
                }
                visit_order.push(name.clone());

                let outcome = self.cache.resolve(&name).await;
                let deps: Vec<PackageName> = outcome
                    .record()
                    .map(|r| r.dependency_names().cloned().collect())
                    .unwrap_or_default();

                if let Some(error) = outcome.error_message() {
                    debug!("{} recorded without dependencies: {}", name, error);
                }

                stack.extend(
                    deps.iter()
                        .rev()
                        .filter(|dep| !visited.contains(*dep))
                        .cloned(),
                );

                metadata.insert(name.clone(), MetadataEntry::from(&outcome));
                forward_graph.insert(name, deps);
            }

            debug!("Closure after {}: {} packages", seed, visit_order.len());
        }

        let reverse_graph = build_reverse_index(&forward_graph);

        info!(
            "Closure of {} roots: {} packages in {:.2}s",
            seeds.len(),
            visit_order.len(),
            start.elapsed().as_secs_f64()
        );

        DependencyClosure {
            roots_analyzed: seeds.to_vec(),
            forward_graph,
            reverse_graph,
            visited: visit_order,
            metadata,
        }
    }
}
