//! reviewgraph - pull-request approval graph for GitHub repositories
//!
//! Main entry point for the reviewgraph CLI.

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use reviewgraph::config::ReviewGraphConfig;
use reviewgraph::github::{GitHubClient, PullRequestApi};
use reviewgraph::graph::TimeWindow;
use reviewgraph::pipeline::Pipeline;
use reviewgraph::server::GraphServer;
use reviewgraph::shutdown::{Shutdown, ShutdownTrigger};
use reviewgraph::{ReviewGraphError, Result};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// reviewgraph - who approves whose pull requests, ranked by PageRank
#[derive(Parser, Debug)]
#[command(name = "reviewgraph")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/reviewgraph/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Cache location, overrides the config file
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Fetch new merged pull requests into the cache
    Sync {
        /// Repository owner
        #[arg(short, long)]
        owner: String,

        /// Repository name
        #[arg(short, long)]
        repo: String,
    },

    /// Build the force-graph document for a repository
    Graph {
        #[arg(short, long)]
        owner: String,

        #[arg(short, long)]
        repo: String,

        /// Earliest creation time (RFC 3339, default: epoch)
        #[arg(long)]
        start: Option<String>,

        /// Latest creation time (RFC 3339, default: now)
        #[arg(long)]
        end: Option<String>,

        /// Output file
        #[arg(long, default_value = "force-graph.json")]
        output: PathBuf,

        /// Use cached data only
        #[arg(long)]
        no_sync: bool,

        /// Number of contributors to log as the leaderboard
        #[arg(long, default_value = "5")]
        top: usize,
    },

    /// Run the HTTP Query Service
    Serve {
        /// Listen address, overrides the config file
        #[arg(long)]
        addr: Option<String>,

        /// Answer from the cache without syncing
        #[arg(long)]
        no_sync: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    // Stage timings and the leaderboard are logged at info
    let default_filter = match cli.command {
        Commands::Serve { .. } | Commands::Graph { .. } => "info",
        _ => "warn",
    };
    if let Err(e) = reviewgraph::logging::init_with_default(default_filter) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Init { force } = cli.command {
        return handle_init_command(cli.config, force);
    }

    let mut config = match cli.config {
        Some(ref path) => ReviewGraphConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ReviewGraphConfig::load_default().context("Failed to load default config")?,
    };
    if let Some(cache_dir) = cli.cache_dir {
        config.cache.path = cache_dir;
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(run_command(cli.command, config))
}

async fn run_command(command: Commands, config: ReviewGraphConfig) -> Result<()> {
    let (trigger, shutdown) = Shutdown::new();
    spawn_signal_handler(trigger);

    match command {
        Commands::Init { .. } => Ok(()),

        Commands::Sync { owner, repo } => {
            let pipeline = build_pipeline(&config, true)?.with_shutdown(shutdown);
            let report = pipeline.sync(&owner, &repo).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }

        Commands::Graph {
            owner,
            repo,
            start,
            end,
            output,
            no_sync,
            top,
        } => {
            let window = TimeWindow::from_bounds(
                parse_time("--start", start.as_deref())?,
                parse_time("--end", end.as_deref())?,
            );
            let pipeline = build_pipeline(&config, !no_sync)?.with_shutdown(shutdown);
            let graph = pipeline.run(&owner, &repo, &window, !no_sync).await?;

            for (rank, node) in graph.top_ranked(top).iter().enumerate() {
                tracing::info!(
                    rank = rank + 1,
                    login = %node.id,
                    score = node.raw_score,
                    "Top contributor"
                );
            }

            let json = serde_json::to_string(&graph)?;
            std::fs::write(&output, json)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!(
                "Wrote {} ({} contributors, {} links)",
                output.display(),
                graph.nodes.len(),
                graph.links.len()
            );
            Ok(())
        }

        Commands::Serve { addr, no_sync } => {
            let sync = config.server.sync_on_request && !no_sync;
            let pipeline = build_pipeline(&config, sync)?.with_shutdown(shutdown.clone());
            let addr = addr.unwrap_or_else(|| config.server.addr.clone());
            GraphServer::new(pipeline, sync).run(&addr, shutdown).await
        }
    }
}

fn build_pipeline(config: &ReviewGraphConfig, with_client: bool) -> Result<Pipeline> {
    let api: Option<Arc<dyn PullRequestApi>> = if with_client {
        let client = GitHubClient::new(&config.github)?;
        if !client.is_authenticated() {
            tracing::warn!(
                token_env = %config.github.token_env,
                "No GitHub token set, unauthenticated requests are heavily rate limited"
            );
        }
        Some(Arc::new(client))
    } else {
        None
    };

    Ok(Pipeline::new(
        api,
        config.cache.clone(),
        config.sync.to_sync_config(),
    ))
}

fn parse_time(flag: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|v| {
            DateTime::parse_from_rfc3339(v)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| ReviewGraphError::Config(format!("Invalid {} '{}': {}", flag, v, e)))
        })
        .transpose()
}

fn handle_init_command(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = config_path.unwrap_or_else(ReviewGraphConfig::default_path);

    if path.exists() && !force {
        println!("Configuration already exists at {}", path.display());
        println!("Use --force to overwrite it.");
        return Ok(());
    }

    ReviewGraphConfig::default()
        .save(&path)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;
    println!("Created configuration at {}", path.display());
    Ok(())
}

/// Trigger shutdown on SIGINT or SIGTERM
fn spawn_signal_handler(trigger: ShutdownTrigger) {
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Received shutdown signal");
        trigger.trigger();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Failed to set up signal handlers");
            std::future::pending::<()>().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
