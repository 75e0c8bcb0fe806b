//! Harbinger command-line preloader
//!
//! Runs a list of pages through the preload engine and reports what was
//! fetched, skipped or failed.
//!
//! ## Usage
//!
//! ```bash
//! # Preload two pages at low priority
//! harbinger https://example.com/about https://example.com/blog
//!
//! # Same-origin only, with one page requested at high priority
//! harbinger --current https://example.com/ --high https://example.com/pricing \
//!     https://example.com/about
//!
//! # Settings from a file
//! harbinger --config preload.toml --log-level debug https://example.com/docs
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use url::Url;

use harbinger::{
    MemoryCache, Preload, PreloadConfig, PreloadCoordinator, PreloadOptions, TracingHooks,
};
use harbinger_http::{HttpConfig, HttpFetcher};

#[derive(Parser, Debug)]
#[command(name = "harbinger")]
#[command(author = "Daemoniorum LLC")]
#[command(version)]
#[command(about = "Preload pages through the harbinger engine", long_about = None)]
struct Args {
    /// Pages to preload at low priority
    urls: Vec<String>,

    /// Pages to preload at high priority
    #[arg(long = "high")]
    high: Vec<String>,

    /// Page currently displayed; restricts preloading to its origin
    #[arg(long)]
    current: Option<String>,

    /// Maximum concurrent preloads (overrides the config file)
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Request timeout in milliseconds
    #[arg(long, default_value = "10000")]
    timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str())),
        )
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let mut config = match &args.config {
        Some(path) => PreloadConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => PreloadConfig::default(),
    };
    if let Some(limit) = args.concurrency {
        config.concurrency_limit = limit;
    }

    let http = HttpConfig {
        timeout_ms: args.timeout_ms,
        ..HttpConfig::default()
    };
    let fetcher = HttpFetcher::new(http).context("Failed to build HTTP client")?;

    let mut builder = PreloadCoordinator::builder(config)
        .cache(Arc::new(MemoryCache::new()))
        .fetcher(Arc::new(fetcher))
        .hooks(Arc::new(TracingHooks));
    if let Some(current) = &args.current {
        let origin = Url::parse(current).with_context(|| format!("Invalid URL: {}", current))?;
        builder = builder.origin(origin).current(current.as_str());
    }
    let coordinator = builder.build().context("Invalid configuration")?;

    info!(
        "Preloading {} pages ({} high priority, limit {})",
        args.urls.len() + args.high.len(),
        args.high.len(),
        coordinator.config().concurrency_limit
    );

    let requests: Vec<(String, Preload)> = args
        .urls
        .iter()
        .map(|url| (url, PreloadOptions::low()))
        .chain(args.high.iter().map(|url| (url, PreloadOptions::high())))
        .map(|(url, options)| (url.clone(), coordinator.schedule(url.as_str(), options)))
        .collect();

    let mut failed = 0;
    for (url, preload) in requests {
        let skipped = preload.skip_reason();
        match preload.resolve().await {
            Ok(Some(page)) => println!("ok      {} ({} bytes)", url, page.len()),
            Ok(None) => println!("skipped {} ({:?})", url, skipped),
            Err(e) => {
                failed += 1;
                println!("failed  {} ({})", url, e);
            }
        }
    }

    let stats = coordinator.stats();
    info!(
        "Done: {} dispatched, {} promoted, {} failed",
        stats.queue.dispatched, stats.queue.promoted, failed
    );

    if failed > 0 {
        anyhow::bail!("{} preloads failed", failed);
    }
    Ok(())
}
