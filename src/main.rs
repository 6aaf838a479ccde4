use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use shopfeed::config::{Config, Environment};
use shopfeed::mapping::{CategoryTable, Platform, ProductOverrides};
use shopfeed::orchestrator::RunContext;

#[derive(Parser, Debug)]
#[command(
    name = "shopfeed",
    about = "Publishes Google Shopping and Meta catalog feeds from a Shopify store"
)]
struct Args {
    /// Platform and settings file
    #[arg(long, value_name = "FILE", default_value = "config/feeds.toml")]
    config: PathBuf,

    /// Model substring → category table, re-read on every run
    #[arg(long, value_name = "FILE", default_value = "config/categories.toml")]
    categories: PathBuf,

    /// Overrides `output_dir` from the config file
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Read the catalog from a SQLite snapshot instead of the live API
    #[arg(long, value_name = "FILE")]
    snapshot: Option<PathBuf>,

    /// Only publish this platform (google, meta)
    #[arg(long, value_name = "NAME")]
    platform: Option<Platform>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            let chain = format!("{e:#}");
            tracing::error!(error = %chain, "Feed run aborted");
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<bool> {
    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config: {}", args.config.display()))?;
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }

    if let Some(platform) = args.platform {
        let enabled = config.enabled_platforms(Some(platform));
        if enabled.is_empty() {
            anyhow::bail!("Platform '{platform}' is not enabled in {}", args.config.display());
        }
    }

    // Credentials are checked before anything touches the network
    let env = Environment::from_env(args.snapshot.is_none())
        .context("Invalid environment")?;

    let categories = CategoryTable::load(&args.categories).with_context(|| {
        format!("Failed to load category table: {}", args.categories.display())
    })?;

    let overrides = match &config.product_mappings {
        Some(path) => ProductOverrides::load(path).with_context(|| {
            format!("Failed to load product mappings: {}", path.display())
        })?,
        None => ProductOverrides::default(),
    };

    let source = RunContext::source_for(&config, &env, args.snapshot)
        .context("Failed to set up catalog source")?;
    let context = RunContext::new(config, &env, categories, source).with_overrides(overrides);

    let metrics = context.run(args.platform).await?;
    Ok(metrics.success)
}
