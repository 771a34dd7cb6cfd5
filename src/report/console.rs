//! Colored console output for audit results.

use crate::crawler::reverse_edges;
use crate::typosquat::{AuditEntry, TyposquatReport};
use crate::types::{DependencyClosure, DependencyGraph, FetchOutcome};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

/// How many most-depended-upon packages to list.
const TOP_DEPENDENTS: usize = 5;

/// Console output handler with colors and formatting.
pub struct ConsoleOutput {
    verbose: bool,
    json_mode: bool,
    quiet: bool,
}

impl ConsoleOutput {
    /// Create a new console output handler.
    pub fn new(verbose: bool, json_mode: bool, quiet: bool) -> Self {
        Self {
            verbose,
            json_mode,
            quiet,
        }
    }

    /// Print a "starting" line for `subject`.
    pub fn print_start(&self, action: &str, subject: &str) {
        if self.json_mode || self.quiet {
            return;
        }

        println!("{} {}: {}", "[*]".bright_blue(), action, subject.bright_white());
    }

    /// Print progress (only in verbose mode).
    pub fn print_progress(&self, message: &str) {
        if self.json_mode || !self.verbose {
            return;
        }

        println!("{} {}", "[.]".dimmed(), message.dimmed());
    }

    /// Print info message.
    pub fn print_info(&self, message: &str) {
        if self.json_mode || self.quiet {
            return;
        }

        println!("{} {}", "[*]".bright_blue(), message);
    }

    /// Print a bounded-depth graph summary.
    pub fn print_graph(&self, graph: &DependencyGraph) {
        if self.json_mode {
            return;
        }

        let failed: Vec<_> = graph.failed_nodes().collect();
        if self.quiet && failed.is_empty() {
            return;
        }

        println!();
        println!(
            "{} {} (depth {})",
            "===".bright_cyan(),
            graph.root.bright_white().bold(),
            graph.max_depth
        );
        println!("    |-- Packages: {}", graph.nodes.len());
        println!("    |-- Edges:    {}", graph.edges.len());

        let vulnerable: usize = graph
            .nodes
            .iter()
            .filter(|n| {
                n.enrichment
                    .get("vulnerability_count")
                    .and_then(|v| v.as_u64())
                    .is_some_and(|count| count > 0)
            })
            .count();
        if vulnerable > 0 {
            println!(
                "    |-- {}",
                format!("Packages with known vulnerabilities: {}", vulnerable)
                    .red()
                    .bold()
            );
        }

        let reverse = reverse_edges(&graph.edges);
        let mut dependents: Vec<(&String, usize)> =
            reverse.iter().map(|(name, parents)| (name, parents.len())).collect();
        dependents.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        if self.verbose && !dependents.is_empty() {
            println!("    |-- Most depended upon:");
            for (name, count) in dependents.iter().take(TOP_DEPENDENTS) {
                println!("    |     {} ({})", name, count);
            }
        }

        if failed.is_empty() {
            println!("    +-- {}", "All packages resolved.".green());
        } else {
            println!("    +-- {}", format!("Unresolved: {}", failed.len()).yellow());
            for node in failed {
                println!(
                    "          {} [{}]",
                    node.id,
                    format_outcome(&node.outcome)
                );
            }
        }
    }

    /// Print a closure run summary.
    pub fn print_closure(&self, closure: &DependencyClosure) {
        if self.json_mode {
            return;
        }

        let errors = closure
            .metadata
            .values()
            .filter(|entry| matches!(entry, crate::types::MetadataEntry::Error { .. }))
            .count();
        if self.quiet && errors == 0 {
            return;
        }

        println!();
        println!("{}", "=== Closure Summary ===".bright_cyan());
        println!("  Roots:     {}", closure.roots_analyzed.len());
        println!("  Packages:  {}", closure.visited.len());
        println!(
            "  Edges:     {}",
            closure.forward_graph.values().map(Vec::len).sum::<usize>()
        );
        if errors > 0 {
            println!("  {}", format!("Unresolved: {}", errors).yellow());
        }
        println!();
    }

    /// Print typosquat findings.
    pub fn print_typosquats(&self, report: &TyposquatReport) {
        if self.json_mode {
            return;
        }

        for (trusted, candidates) in &report.candidates {
            println!();
            println!(
                "{} {} [{} candidates]",
                "===".bright_cyan(),
                trusted.bright_white().bold(),
                candidates.len()
            );

            for candidate in candidates {
                let detail = match report.audit.get(&candidate.name) {
                    Some(AuditEntry::Features(f)) => format!(
                        "v{} | {} maintainers | {} versions",
                        f.latest_version.as_deref().unwrap_or("?"),
                        f.num_maintainers,
                        f.num_versions
                    )
                    .normal(),
                    Some(AuditEntry::Error { error, .. }) => error.dimmed(),
                    None => "not audited".dimmed(),
                };
                println!(
                    "    |-- {} (distance {}) {}",
                    candidate.name.yellow().bold(),
                    candidate.edit_distance,
                    detail
                );
            }
        }

        let count = report.candidate_count();
        println!();
        if count > 0 {
            println!(
                "  {}",
                format!("POTENTIAL TYPOSQUATS FOUND: {}", count).red().bold()
            );
        } else {
            println!("  {}", "No typosquat candidates found.".green());
        }
        println!();
    }

    /// Create a progress bar.
    pub fn create_progress_bar(&self, total: u64, message: &str) -> Option<ProgressBar> {
        if self.json_mode || self.quiet {
            return None;
        }

        let pb = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(message.to_string());
        Some(pb)
    }

    /// Create a spinner for work of unknown size.
    pub fn create_spinner(&self, message: &str) -> Option<ProgressBar> {
        if self.json_mode || self.quiet {
            return None;
        }

        let pb = ProgressBar::new_spinner();
        pb.enable_steady_tick(std::time::Duration::from_millis(120));
        pb.set_message(message.to_string());
        Some(pb)
    }
}

/// Format a fetch outcome with color.
fn format_outcome(outcome: &FetchOutcome) -> colored::ColoredString {
    match outcome {
        FetchOutcome::Found(_) => "found".green(),
        FetchOutcome::NotFound => "NOT FOUND".red().bold(),
        FetchOutcome::TransientError { cause } => format!("error: {}", cause).yellow(),
        FetchOutcome::Malformed { cause } => format!("malformed: {}", cause).yellow(),
    }
}

impl Default for ConsoleOutput {
    fn default() -> Self {
        Self::new(false, false, false)
    }
}
