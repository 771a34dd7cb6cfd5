//! In-memory caching layer for registry lookups.

use crate::registry::RegistryGateway;
use crate::singleflight::{CachePolicy, SingleFlight};
use crate::types::FetchOutcome;
use std::sync::Arc;
use tracing::trace;

/// Memoizes [`RegistryGateway`] calls by package name.
///
/// Failures are cached like successes, so a dead name is asked about once.
/// Call [`FetchCache::forget`] or [`FetchCache::clear`] to retry.
#[derive(Clone)]
pub struct FetchCache {
    gateway: Arc<dyn RegistryGateway>,
    entries: Arc<SingleFlight<String, FetchOutcome>>,
}

impl FetchCache {
    pub fn new(gateway: Arc<dyn RegistryGateway>, policy: CachePolicy) -> Self {
        Self {
            gateway,
            entries: Arc::new(SingleFlight::new(policy)),
        }
    }

    /// Resolve a package name. Concurrent calls for the same unresolved name
    /// share one gateway call.
    pub async fn resolve(&self, name: &str) -> FetchOutcome {
        if let Some(cached) = self.entries.get(&name.to_string()) {
            trace!("Cache hit for {}", name);
            return cached;
        }

        self.entries
            .get_or_compute(name.to_string(), || self.gateway.fetch(name))
            .await
    }

    pub fn forget(&self, name: &str) {
        self.entries.invalidate(&name.to_string());
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of gateway calls issued through this cache.
    pub fn gateway_calls(&self) -> u64 {
        self.entries.computations()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
