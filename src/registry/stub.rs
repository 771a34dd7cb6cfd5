//! In-memory registry used by tests.

use crate::registry::RegistryGateway;
use crate::types::{FetchOutcome, MetadataRecord};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Registry with fixed contents and per-name call counters.
///
/// Unknown names resolve to `NotFound`.
#[derive(Default)]
pub struct StubRegistry {
    packages: HashMap<String, Vec<String>>,
    failing: HashSet<String>,
    latency: Option<Duration>,
    calls: DashMap<String, usize>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl StubRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(mut self, name: &str, deps: &[&str]) -> Self {
        self.packages.insert(
            name.to_string(),
            deps.iter().map(|d| d.to_string()).collect(),
        );
        self
    }

    /// Make `name` resolve to a transient error.
    pub fn with_failure(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self, name: &str) -> usize {
        self.calls.get(name).map(|c| *c).unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|entry| *entry.value()).sum()
    }

    /// Highest number of simultaneously outstanding fetches seen.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryGateway for StubRegistry {
    async fn fetch(&self, name: &str) -> FetchOutcome {
        *self.calls.entry(name.to_string()).or_insert(0) += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(name) {
            return FetchOutcome::TransientError {
                cause: "connection reset".to_string(),
            };
        }

        match self.packages.get(name) {
            Some(deps) => FetchOutcome::Found(MetadataRecord {
                name: name.to_string(),
                latest_version: Some("1.0.0".to_string()),
                dependencies: deps
                    .iter()
                    .map(|d| (d.clone(), "^1.0.0".to_string()))
                    .collect(),
                version_count: 1,
                ..Default::default()
            }),
            None => FetchOutcome::NotFound,
        }
    }
}
