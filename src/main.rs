//! depsquat - npm supply-chain auditor.
//!
//! CLI entry point.

use clap::Parser;
use depsquat::config::load_universe;
use depsquat::registry::{FetchCache, GithubClient, NpmRegistry, OsvClient};
use depsquat::report::{write_json, write_names, ConsoleOutput};
use depsquat::{
    ClosureConfig, ClosureCrawler, Commands, Config, DependencyGraph, GraphConfig, GraphCrawler,
    GraphService, MatchMode, NamesConfig, SimilarityMatcher, TyposquatAuditor, TyposquatConfig,
};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    // Set up logging
    let filter = if config.verbose {
        EnvFilter::new("depsquat=debug,info")
    } else {
        EnvFilter::new("depsquat=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match config.command.clone() {
        Commands::Graph(graph_config) => run_graph(graph_config, &config).await,
        Commands::Closure(closure_config) => run_closure(closure_config, &config).await,
        Commands::Typosquat(typosquat_config) => run_typosquat(typosquat_config, &config).await,
        Commands::Names(names_config) => run_names(names_config, &config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => code,
    }
}

fn build_registry(config: &Config) -> Result<Arc<NpmRegistry>, ExitCode> {
    match NpmRegistry::new(&config.registry_config()) {
        Ok(registry) => Ok(Arc::new(registry)),
        Err(e) => {
            error!("Failed to create registry client: {}", e);
            Err(ExitCode::FAILURE)
        }
    }
}

fn emit<T: serde::Serialize>(
    value: &T,
    json: bool,
    output: Option<&std::path::Path>,
) -> Result<(), ExitCode> {
    if !json && output.is_none() {
        return Ok(());
    }
    write_json(value, output).map_err(|e| {
        error!("Failed to write output: {}", e);
        ExitCode::FAILURE
    })
}

async fn run_graph(graph_config: GraphConfig, config: &Config) -> Result<(), ExitCode> {
    let console = ConsoleOutput::new(config.verbose, graph_config.json, config.quiet);
    let registry = build_registry(config)?;

    let mut crawler = GraphCrawler::new(FetchCache::new(registry, config.cache_policy()));
    if graph_config.vulns {
        match OsvClient::new(config.registry.timeout, config.registry.rate_limit) {
            Ok(osv) => crawler = crawler.with_enricher(Arc::new(osv)),
            Err(e) => {
                error!("Failed to create OSV client: {}", e);
                return Err(ExitCode::FAILURE);
            }
        }
    }
    if graph_config.github {
        let token = graph_config.github_token.as_deref();
        match GithubClient::new(config.registry.timeout, config.registry.rate_limit, token) {
            Ok(github) => crawler = crawler.with_enricher(Arc::new(github)),
            Err(e) => {
                error!("Failed to create GitHub client: {}", e);
                return Err(ExitCode::FAILURE);
            }
        }
    }
    let service = GraphService::new(crawler, graph_config.concurrency, config.cache_policy());

    if !graph_config.json {
        print_banner();
    }
    console.print_start("Crawling", &graph_config.packages.join(", "));

    let graphs = join_all(
        graph_config
            .packages
            .iter()
            .map(|package| service.get_or_compute(package, graph_config.depth)),
    )
    .await;

    for graph in &graphs {
        console.print_graph(graph);
    }
    console.print_progress(&format!(
        "{} crawls, {} registry fetches, {} packages cached",
        service.crawls(),
        service.crawler().cache().gateway_calls(),
        service.crawler().cache().len()
    ));

    let graphs: BTreeMap<&str, &DependencyGraph> = graphs
        .iter()
        .map(|graph| (graph.root.as_str(), graph.as_ref()))
        .collect();
    emit(&graphs, graph_config.json, graph_config.output.as_deref())
}

async fn run_closure(closure_config: ClosureConfig, config: &Config) -> Result<(), ExitCode> {
    let seeds = match closure_config.load_seeds() {
        Ok(seeds) => seeds,
        Err(e) => {
            error!("Failed to load seeds: {}", e);
            return Err(ExitCode::FAILURE);
        }
    };

    let console = ConsoleOutput::new(config.verbose, closure_config.json, config.quiet);
    let registry = build_registry(config)?;
    let crawler = ClosureCrawler::new(FetchCache::new(registry, config.cache_policy()));

    if !closure_config.json {
        print_banner();
    }
    console.print_start("Computing closure of", &format!("{} seeds", seeds.len()));

    let spinner = console.create_spinner("Resolving dependencies");
    let closure = crawler.build_closure(&seeds).await;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    console.print_closure(&closure);
    emit(&closure, closure_config.json, closure_config.output.as_deref())
}

async fn run_typosquat(typosquat_config: TyposquatConfig, config: &Config) -> Result<(), ExitCode> {
    let console = ConsoleOutput::new(config.verbose, typosquat_config.json, config.quiet);
    let registry = build_registry(config)?;

    let mode = if typosquat_config.lenient {
        MatchMode::Lenient
    } else {
        MatchMode::Strict
    };
    let auditor = TyposquatAuditor::new(
        FetchCache::new(registry.clone(), config.cache_policy()),
        SimilarityMatcher::new(mode),
        typosquat_config.concurrency,
    );

    if !typosquat_config.json {
        print_banner();
    }
    console.print_start("Checking", &typosquat_config.trusted.join(", "));

    let candidates = match typosquat_config.universe {
        Some(ref path) => match load_universe(path) {
            Ok(universe) => {
                console.print_info(&format!("Loaded {} candidate names", universe.len()));
                auditor.scan(&typosquat_config.trusted, &universe)
            }
            Err(e) => {
                error!("Failed to load universe: {}", e);
                return Err(ExitCode::FAILURE);
            }
        },
        None => {
            auditor
                .scan_by_search(
                    &typosquat_config.trusted,
                    &registry,
                    typosquat_config.search_size,
                )
                .await
        }
    };

    let pb = console.create_progress_bar(0, "Auditing candidates");
    let report = auditor.report(candidates, pb.as_ref()).await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    console.print_typosquats(&report);
    emit(&report, typosquat_config.json, typosquat_config.output.as_deref())
}

async fn run_names(names_config: NamesConfig, config: &Config) -> Result<(), ExitCode> {
    let console = ConsoleOutput::new(config.verbose, false, config.quiet);
    let mut registry = match NpmRegistry::new(&config.registry_config()) {
        Ok(registry) => registry,
        Err(e) => {
            error!("Failed to create registry client: {}", e);
            return Err(ExitCode::FAILURE);
        }
    };
    if let Some(ref replica) = names_config.replica {
        registry = match registry.with_replica_url(replica) {
            Ok(registry) => registry,
            Err(e) => {
                error!("Invalid replica URL: {}", e);
                return Err(ExitCode::FAILURE);
            }
        };
    }

    let spinner = console.create_spinner("Listing registry names");
    let names = registry.list_all_names(names_config.page_size).await;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    let names = match names {
        Ok(names) => names,
        Err(e) => {
            error!("Failed to list registry names: {}", e);
            return Err(ExitCode::FAILURE);
        }
    };

    if let Err(e) = write_names(&names, &names_config.output) {
        error!("Failed to write names: {}", e);
        return Err(ExitCode::FAILURE);
    }
    console.print_info(&format!("{} names written", names.len()));
    Ok(())
}

fn print_banner() {
    println!();
    println!("\x1b[36m╔══════════════════════════════════════════════════════════════╗\x1b[0m");
    println!("\x1b[36m║                    DEPSQUAT v0.1.0                           ║\x1b[0m");
    println!("\x1b[36m║           npm Supply-Chain Auditor                           ║\x1b[0m");
    println!("\x1b[36m╚══════════════════════════════════════════════════════════════╝\x1b[0m");
    println!();
}
