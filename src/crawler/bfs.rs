//! Depth-bounded breadth-first crawler.
//!
//! A shared FIFO frontier is drained by a fixed pool of workers running
//! cooperatively on the current task. The pool size caps the number of
//! registry requests in flight no matter how wide the frontier grows.
//!
//! Shutdown is gated by an outstanding-work counter: an item counts from the
//! moment it is enqueued until its worker has finished with it (including
//! enqueueing its children). Workers park on a [`Notify`] while the queue is
//! empty and exit once the counter reaches zero. A worker is never stopped
//! mid-fetch.

use crate::registry::{Enricher, FetchCache};
use crate::types::{DependencyGraph, FetchOutcome, GraphEdge, GraphNode, PackageName};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, trace};

#[derive(Debug)]
struct WorkItem {
    name: PackageName,
    depth: usize,
}

/// Shared state of one crawl.
struct Frontier {
    max_depth: usize,
    queue: Mutex<VecDeque<WorkItem>>,
    visited: Mutex<HashSet<PackageName>>,
    nodes: Mutex<Vec<GraphNode>>,
    edges: Mutex<Vec<GraphEdge>>,
    outstanding: AtomicUsize,
    changed: Notify,
}

impl Frontier {
    fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            queue: Mutex::new(VecDeque::new()),
            visited: Mutex::new(HashSet::new()),
            nodes: Mutex::new(Vec::new()),
            edges: Mutex::new(Vec::new()),
            outstanding: AtomicUsize::new(0),
            changed: Notify::new(),
        }
    }

    async fn enqueue_all(&self, names: Vec<PackageName>, depth: usize) {
        if names.is_empty() {
            return;
        }
        self.outstanding.fetch_add(names.len(), Ordering::SeqCst);
        self.queue
            .lock()
            .await
            .extend(names.into_iter().map(|name| WorkItem { name, depth }));
        self.changed.notify_waiters();
    }

    fn finish_one(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    fn is_drained(&self) -> bool {
        self.outstanding.load(Ordering::SeqCst) == 0
    }
}

/// Breadth-first crawler over the registry's dependency relation.
#[derive(Clone)]
pub struct GraphCrawler {
    cache: FetchCache,
    enrichers: Vec<Arc<dyn Enricher>>,
}

impl GraphCrawler {
    pub fn new(cache: FetchCache) -> Self {
        Self {
            cache,
            enrichers: Vec::new(),
        }
    }

    /// Merge `enricher`'s fields onto every resolved node.
    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enrichers.push(enricher);
        self
    }

    pub fn cache(&self) -> &FetchCache {
        &self.cache
    }

    /// Crawl from `seed` up to and including `max_depth` hops, with at most
    /// `concurrency` registry requests outstanding.
    ///
    /// Nodes at `max_depth` are included, but their dependencies are only
    /// recorded as edges and never fetched. A seed that cannot be resolved
    /// yields a single node carrying the failure.
    pub async fn build_graph(
        &self,
        seed: &str,
        max_depth: usize,
        concurrency: usize,
    ) -> DependencyGraph {
        let start = Instant::now();
        let concurrency = concurrency.max(1);
        let frontier = Frontier::new(max_depth);
        frontier.enqueue_all(vec![seed.to_string()], 0).await;

        let workers = (0..concurrency).map(|id| self.worker(id, &frontier));
        futures::future::join_all(workers).await;

        let Frontier { nodes, edges, .. } = frontier;
        let mut nodes = nodes.into_inner();
        let edges = edges.into_inner();
        nodes.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.id.cmp(&b.id)));

        info!(
            "Crawled {} to depth {}: {} nodes, {} edges in {:.2}s",
            seed,
            max_depth,
            nodes.len(),
            edges.len(),
            start.elapsed().as_secs_f64()
        );

        DependencyGraph {
            root: seed.to_string(),
            max_depth,
            nodes,
            edges,
        }
    }

    async fn worker(&self, id: usize, frontier: &Frontier) {
        loop {
            // Registered before looking at the queue, so a notification sent
            // between the check and the await below still wakes us.
            let changed = frontier.changed.notified();

            let item = frontier.queue.lock().await.pop_front();
            match item {
                Some(item) => {
                    self.process(frontier, item).await;
                    frontier.finish_one();
                }
                None if frontier.is_drained() => {
                    trace!("Worker {} stopping", id);
                    return;
                }
                None => changed.await,
            }
        }
    }

    async fn process(&self, frontier: &Frontier, item: WorkItem) {
        let WorkItem { name, depth } = item;

        // Claimed before the fetch so racing queue entries for the same name
        // are discarded.
        if !frontier.visited.lock().await.insert(name.clone()) {
            trace!("Already visited {}", name);
            return;
        }

        let outcome = self.cache.resolve(&name).await;

        let mut degree = 0;
        let mut enrichment = BTreeMap::new();
        match &outcome {
            FetchOutcome::Found(record) => {
                degree = record.dependencies.len();

                let edges: Vec<GraphEdge> = record
                    .dependency_names()
                    .map(|dep| GraphEdge {
                        from: name.clone(),
                        to: dep.clone(),
                    })
                    .collect();

                let next: Vec<PackageName> = if depth < frontier.max_depth {
                    let visited = frontier.visited.lock().await;
                    record
                        .dependency_names()
                        .filter(|dep| !visited.contains(*dep))
                        .cloned()
                        .collect()
                } else {
                    Vec::new()
                };

                frontier.edges.lock().await.extend(edges);
                frontier.enqueue_all(next, depth + 1).await;

                for enricher in &self.enrichers {
                    trace!("Enriching {} with {}", name, enricher.name());
                    enrichment.extend(enricher.enrich(record).await);
                }
            }
            failed => {
                debug!("{} is a leaf: {:?}", name, failed);
            }
        }

        frontier.nodes.lock().await.push(GraphNode {
            id: name,
            depth,
            degree,
            outcome,
            enrichment,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::stub::StubRegistry;
    use crate::singleflight::CachePolicy;
    use crate::types::MetadataRecord;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn crawler(stub: &Arc<StubRegistry>) -> GraphCrawler {
        GraphCrawler::new(FetchCache::new(stub.clone(), CachePolicy::Unbounded))
    }

    fn ids(graph: &DependencyGraph) -> Vec<&str> {
        graph.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_cycle_is_visited_once() {
        let stub = Arc::new(
            StubRegistry::new()
                .with_package("a", &["b"])
                .with_package("b", &["a"]),
        );

        let graph = crawler(&stub).build_graph("a", 10, 4).await;

        assert_eq!(ids(&graph), vec!["a", "b"]);
        assert_eq!(stub.calls("a"), 1);
        assert_eq!(stub.calls("b"), 1);
        assert_eq!(graph.edges.len(), 2);
    }

    #[tokio::test]
    async fn test_depth_bound_is_inclusive() {
        let stub = Arc::new(
            StubRegistry::new()
                .with_package("a", &["b"])
                .with_package("b", &["c"])
                .with_package("c", &["d"])
                .with_package("d", &[]),
        );

        let graph = crawler(&stub).build_graph("a", 2, 2).await;

        assert_eq!(ids(&graph), vec!["a", "b", "c"]);
        assert!(graph.nodes.iter().all(|n| n.depth <= 2));
        assert_eq!(graph.node("c").unwrap().depth, 2);
        assert_eq!(graph.node("c").unwrap().degree, 1);
        assert_eq!(stub.calls("d"), 0);
        assert!(graph.edges.contains(&GraphEdge {
            from: "c".into(),
            to: "d".into()
        }));
    }

    #[tokio::test]
    async fn test_depth_zero_fetches_only_the_seed() {
        let stub = Arc::new(StubRegistry::new().with_package("a", &["b", "c"]));

        let graph = crawler(&stub).build_graph("a", 0, 4).await;

        assert_eq!(ids(&graph), vec!["a"]);
        assert_eq!(graph.edges.len(), 2);
        assert_eq!(stub.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_diamond_fetches_shared_dependency_once() {
        let stub = Arc::new(
            StubRegistry::new()
                .with_package("a", &["b", "c"])
                .with_package("b", &["d"])
                .with_package("c", &["d"])
                .with_package("d", &[])
                .with_latency(Duration::from_millis(10)),
        );

        let graph = crawler(&stub).build_graph("a", 5, 4).await;

        assert_eq!(ids(&graph), vec!["a", "b", "c", "d"]);
        assert_eq!(graph.node("d").unwrap().depth, 2);
        assert_eq!(stub.calls("d"), 1);
        assert_eq!(graph.edges.len(), 4);
    }

    #[tokio::test]
    async fn test_unreachable_seed_yields_single_failed_node() {
        let stub = Arc::new(StubRegistry::new());

        let graph = crawler(&stub).build_graph("ghost", 3, 4).await;

        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.nodes[0].outcome, FetchOutcome::NotFound);
        assert_eq!(graph.nodes[0].degree, 0);
        assert!(graph.edges.is_empty());
    }

    #[tokio::test]
    async fn test_failed_dependency_is_a_leaf() {
        let stub = Arc::new(
            StubRegistry::new()
                .with_package("app", &["flaky", "ok"])
                .with_package("ok", &[])
                .with_failure("flaky"),
        );

        let graph = crawler(&stub).build_graph("app", 3, 2).await;

        let flaky = graph.node("flaky").unwrap();
        assert!(matches!(flaky.outcome, FetchOutcome::TransientError { .. }));
        assert_eq!(flaky.depth, 1);
        assert_eq!(graph.failed_nodes().count(), 1);
        assert!(graph.edges.iter().all(|e| e.from != "flaky"));
        assert_eq!(stub.calls("flaky"), 1);
    }

    #[tokio::test]
    async fn test_concurrency_caps_outstanding_fetches() {
        let leaves: Vec<String> = (0..40).map(|i| format!("leaf-{}", i)).collect();
        let leaf_refs: Vec<&str> = leaves.iter().map(String::as_str).collect();
        let mut stub = StubRegistry::new()
            .with_package("root", &leaf_refs)
            .with_latency(Duration::from_millis(5));
        for leaf in &leaf_refs {
            stub = stub.with_package(leaf, &[]);
        }
        let stub = Arc::new(stub);

        let graph = crawler(&stub).build_graph("root", 1, 3).await;

        assert_eq!(graph.nodes.len(), 41);
        assert!(stub.peak_in_flight() <= 3);
        assert!(stub.peak_in_flight() > 1);
        assert_eq!(stub.total_calls(), 41);
    }

    struct Tagger;

    #[async_trait]
    impl Enricher for Tagger {
        fn name(&self) -> &'static str {
            "tagger"
        }

        async fn enrich(&self, record: &MetadataRecord) -> BTreeMap<String, Value> {
            BTreeMap::from([("tag".to_string(), json!(record.name.to_uppercase()))])
        }
    }

    #[tokio::test]
    async fn test_enrichers_only_touch_found_nodes() {
        let stub = Arc::new(StubRegistry::new().with_package("a", &["missing"]));

        let graph = crawler(&stub)
            .with_enricher(Arc::new(Tagger))
            .build_graph("a", 1, 1)
            .await;

        assert_eq!(graph.node("a").unwrap().enrichment["tag"], json!("A"));
        assert!(graph.node("missing").unwrap().enrichment.is_empty());
    }
}
