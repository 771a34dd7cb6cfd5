//! Dependency graph crawlers.
//!
//! - [`GraphCrawler`]: breadth-first, depth-bounded, concurrent (interactive queries)
//! - [`ClosureCrawler`]: depth-first, exhaustive, multi-seed (batch audits)
//! - [`reverse`]: "who depends on me" index built from forward edges

pub mod bfs;
pub mod closure;
pub mod reverse;

pub use bfs::GraphCrawler;
pub use closure::ClosureCrawler;
pub use reverse::{build_reverse_index, reverse_edges};
