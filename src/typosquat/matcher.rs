//! Name-similarity rules for typosquat candidacy.
//!
//! Rules, applied in order; the first failing rule rejects the candidate:
//!
//! 1. identical names are not typosquats of each other
//! 2. both names are lower-cased for every later comparison
//! 3. names under an excluded organisational scope are ignored
//! 4. candidates containing `-` or `/` are compound or scoped names, not misspellings
//! 5. lengths (in code points) differ by at most one
//! 6. Levenshtein distance is 1 or 2
//! 7. strict mode only: at least 70% of the trusted name's distinct characters
//!    appear in the candidate

use crate::types::TyposquatCandidate;
use std::collections::HashSet;
use tracing::debug;

/// Scopes whose members routinely differ by a character or two from each other.
pub const EXCLUDED_PREFIXES: &[&str] = &["@types/", "@nestjs/", "@nx/", "@vitejs/", "@angular/"];

/// Minimum share of the trusted name's character set found in the candidate.
pub const MIN_CHARSET_OVERLAP: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// All seven rules.
    #[default]
    Strict,
    /// Rules 1 to 6, no character-overlap check.
    Lenient,
}

/// Applies the typosquat rules pairwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimilarityMatcher {
    mode: MatchMode,
}

/// A trusted name prepared once for comparison against many candidates.
struct Prepared {
    original: String,
    lower: String,
    len: usize,
    charset: HashSet<char>,
    excluded: bool,
}

impl Prepared {
    fn new(trusted: &str) -> Self {
        let lower = trusted.to_lowercase();
        Self {
            original: trusted.to_string(),
            len: lower.chars().count(),
            charset: lower.chars().collect(),
            excluded: has_excluded_prefix(&lower),
            lower,
        }
    }
}

impl SimilarityMatcher {
    pub fn new(mode: MatchMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Whether `candidate` looks like a typosquat of `trusted`.
    pub fn is_typosquat(&self, trusted: &str, candidate: &str) -> bool {
        self.edit_distance(trusted, candidate).is_some()
    }

    /// Edit distance between the names if `candidate` passes every rule.
    pub fn edit_distance(&self, trusted: &str, candidate: &str) -> Option<usize> {
        self.check(&Prepared::new(trusted), candidate)
    }

    /// Every name in `universe` that passes the rules against `trusted`, sorted
    /// by edit distance then name, without duplicates.
    pub fn find_candidates<'a, I>(&self, trusted: &str, universe: I) -> Vec<TyposquatCandidate>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let prepared = Prepared::new(trusted);
        let mut found: Vec<TyposquatCandidate> = universe
            .into_iter()
            .filter_map(|candidate| {
                self.check(&prepared, candidate)
                    .map(|edit_distance| TyposquatCandidate {
                        name: candidate.to_string(),
                        edit_distance,
                    })
            })
            .collect();

        found.sort_by(|a, b| {
            a.edit_distance
                .cmp(&b.edit_distance)
                .then_with(|| a.name.cmp(&b.name))
        });
        found.dedup();

        debug!("{} typosquat candidates for {}", found.len(), trusted);
        found
    }

    fn check(&self, trusted: &Prepared, candidate: &str) -> Option<usize> {
        if candidate == trusted.original {
            return None;
        }

        let candidate = candidate.to_lowercase();

        if trusted.excluded || has_excluded_prefix(&candidate) {
            return None;
        }

        if candidate.contains('-') || candidate.contains('/') {
            return None;
        }

        if trusted.len.abs_diff(candidate.chars().count()) > 1 {
            return None;
        }

        let distance = strsim::levenshtein(&trusted.lower, &candidate);
        if !(1..=2).contains(&distance) {
            return None;
        }

        if self.mode == MatchMode::Strict
            && charset_overlap(&trusted.charset, &candidate) < MIN_CHARSET_OVERLAP
        {
            return None;
        }

        Some(distance)
    }
}

/// Strict-mode shorthand for [`SimilarityMatcher::is_typosquat`].
pub fn is_typosquat(trusted: &str, candidate: &str) -> bool {
    SimilarityMatcher::default().is_typosquat(trusted, candidate)
}

fn has_excluded_prefix(name: &str) -> bool {
    EXCLUDED_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

/// `|chars(trusted) ∩ chars(candidate)| / max(|chars(trusted)|, 1)`
fn charset_overlap(trusted: &HashSet<char>, candidate: &str) -> f64 {
    let candidate: HashSet<char> = candidate.chars().collect();
    let shared = trusted.intersection(&candidate).count();
    shared as f64 / trusted.len().max(1) as f64
}
