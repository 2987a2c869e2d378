use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repometrics::config::StorageBackend;
use repometrics::store::open_store;
use repometrics::{Config, GitHubApi, RepositoryCollector, RunOptions, SyncManager};

#[derive(Parser)]
#[command(name = "repometrics")]
#[command(about = "Incremental repository metric harvester")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect repository metrics for an organization or a single repository
    UpdateMetrics {
        /// Organization to collect (defaults to github.default_org)
        #[arg(long)]
        org: Option<String>,

        /// Update only this repository
        #[arg(long)]
        repo: Option<String>,

        /// Refresh every repository even if stored metrics are current (implies --force-eval-all)
        #[arg(long)]
        force_update: bool,

        /// Ignore the last run time and remove metrics of repositories that no longer exist
        #[arg(long)]
        force_eval_all: bool,

        /// Storage backend override
        #[arg(long, value_enum)]
        backend: Option<StorageBackend>,

        /// Data directory override for the file backend
        #[arg(long)]
        data_dir: Option<String>,

        /// GitHub API base URL override
        #[arg(long)]
        base_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config)?;

    init_logging(cli.verbose, &config.logging.level)?;
    info!("Starting repometrics v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::UpdateMetrics {
            org,
            repo,
            force_update,
            force_eval_all,
            backend,
            data_dir,
            base_url,
        } => {
            let mut config = config;
            if let Some(backend) = backend {
                config.storage.backend = backend;
            }
            if let Some(data_dir) = data_dir {
                config.storage.data_dir = data_dir;
            }
            if let Some(base_url) = base_url {
                config.github.api_url = base_url;
            }
            config.expand_paths()?;

            let options = RunOptions {
                force_metric_update: force_update,
                force_all_repo_eval: force_eval_all || force_update,
            };
            cmd_update_metrics(org, repo, options, &config).await
        }
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool, level: &str) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<std::path::PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(&path),
        None => Config::load_or_default(),
    }
}

async fn cmd_update_metrics(
    org: Option<String>,
    repo: Option<String>,
    options: RunOptions,
    config: &Config,
) -> Result<()> {
    let org = org
        .or_else(|| config.github.default_org.clone())
        .ok_or_else(|| anyhow!("No organization given. Use --org or set github.default_org"))?;

    let api = GitHubApi::new(config)?;
    let collector = RepositoryCollector::new(Arc::new(api));
    let store = open_store(&config.storage).context("Failed to open metric storage")?;
    let manager = SyncManager::new(collector, Arc::from(store));

    if let Some(repo) = repo {
        let record = manager
            .sync_repository(&org, &repo)
            .await
            .with_context(|| format!("Failed to update metrics for {}/{}", org, repo))?;

        println!("Updated metrics for {}/{}", record.org, record.repository_name);
        println!("   Branches: {}", record.branch_count);
        println!("   Releases: {}", record.release_count);
        println!("   Pull requests: {}", record.pull_requests.len());
        return Ok(());
    }

    let summary = manager
        .sync_organization(&org, options)
        .await
        .with_context(|| format!("Failed to update metrics for org {}", org))?;

    println!("Metric update complete for {}", org);
    println!("   Candidates: {}", summary.candidates);
    println!("   Refreshed: {}", summary.refreshed);
    println!("   Skipped (current): {}", summary.skipped);
    println!("   Deleted: {}", summary.deleted);
    println!("   Started at: {}", summary.started_at.to_rfc3339());

    Ok(())
}
