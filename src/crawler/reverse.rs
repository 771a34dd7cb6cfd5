//! Reverse dependency index.

use crate::types::{GraphEdge, PackageName};
use std::collections::BTreeMap;

/// Invert a forward dependency map: every `(parent, child)` pair appends
/// `parent` to `reverse[child]`.
pub fn build_reverse_index(
    forward: &BTreeMap<PackageName, Vec<PackageName>>,
) -> BTreeMap<PackageName, Vec<PackageName>> {
    invert(forward.iter().flat_map(|(parent, children)| {
        children
            .iter()
            .map(move |child| (parent.as_str(), child.as_str()))
    }))
}

/// Same as [`build_reverse_index`], from an edge list. Duplicate edges yield
/// duplicate parents.
pub fn reverse_edges(edges: &[GraphEdge]) -> BTreeMap<PackageName, Vec<PackageName>> {
    invert(edges.iter().map(|e| (e.from.as_str(), e.to.as_str())))
}

fn invert<'a>(
    pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> BTreeMap<PackageName, Vec<PackageName>> {
    let mut reverse: BTreeMap<PackageName, Vec<PackageName>> = BTreeMap::new();
    for (parent, child) in pairs {
        reverse
            .entry(child.to_string())
            .or_default()
            .push(parent.to_string());
    }
    reverse
}
