//! Typosquat detection.
//!
//! This module handles:
//! - Deciding whether a registry name is a plausible misspelling of a trusted one
//! - Collecting candidates from a name list or from registry search
//! - Auditing each candidate's registry metadata

pub mod audit;
pub mod matcher;

pub use audit::{extract_audit_features, AuditEntry, AuditFeatures, TyposquatAuditor, TyposquatReport};
pub use matcher::{is_typosquat, MatchMode, SimilarityMatcher};
