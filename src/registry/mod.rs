//! Registry access.
//!
//! The crawlers only ever talk to a [`RegistryGateway`]. Calls go through a
//! [`FetchCache`] so each package name is resolved at most once per cache.

mod cache;
pub mod github;
pub mod npm;
pub mod osv;

#[cfg(test)]
pub(crate) mod stub;

pub use cache::FetchCache;
pub use github::GithubClient;
pub use npm::NpmRegistry;
pub use osv::OsvClient;

use crate::types::{FetchOutcome, MetadataRecord};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// Single-call lookup of a package's metadata.
///
/// Implementations never fail: every failure is reported as a
/// [`FetchOutcome`] variant.
#[async_trait]
pub trait RegistryGateway: Send + Sync {
    async fn fetch(&self, name: &str) -> FetchOutcome;
}

/// Adds opaque extra fields to a resolved graph node.
#[async_trait]
pub trait Enricher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fields to merge onto the node. An empty map means nothing to add.
    async fn enrich(&self, record: &MetadataRecord) -> BTreeMap<String, Value>;
}
