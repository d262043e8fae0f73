//! Tasknorm Pipeline runner
//!
//! Reads one batch of pulse lines (from a file argument or stdin), runs
//! it through the normalization pipeline, and writes the results to the
//! destination index. A deferral exits non-zero so the surrounding
//! scheduler knows to re-run the batch.

use anyhow::{Context, Result};
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tasknorm_client::{HgResolver, HttpSink, IndexClient, QueueClient, RetryPolicy};
use tasknorm_pipeline::config::Config;
use tasknorm_pipeline::process::Pipeline;
use tasknorm_pipeline::resources::Resources;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tasknorm_pipeline=info,tasknorm_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Tasknorm Pipeline");

    let config = load_config()?;
    info!(
        "Loaded configuration: queue={}, index={}, hg={}",
        config.queue_base_url, config.index_base_url, config.hg_base_url
    );

    let retry = RetryPolicy {
        times: config.retry_times,
        sleep: config.retry_sleep,
    };
    let resources = Resources {
        queue: Arc::new(QueueClient::with_retry(config.queue_base_url.clone(), retry)),
        index: Arc::new(IndexClient::new(config.index_base_url.clone())),
        hg: Arc::new(HgResolver::new(config.hg_base_url.clone())),
        sink: Arc::new(HttpSink::new(config.index_base_url.clone())),
        log_parser: None,
        usage_parser: None,
    };

    let lines = read_lines()?;
    info!("Read {} lines", lines.len());

    // Finish the current line, then stop, on the first interrupt
    let please_stop = Arc::new(AtomicBool::new(false));
    let stop_flag = please_stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current line");
            stop_flag.store(true, Ordering::Relaxed);
        }
    });

    let mut pipeline = Pipeline::new(resources, config.source_key.clone());
    match pipeline.process_batch(&lines, &please_stop).await {
        Ok(keys) => {
            info!("Batch complete: {} records written", keys.len());
            Ok(())
        }
        Err(e) => {
            error!("Batch failed: {}", e);
            Err(e.into())
        }
    }
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(_) => {
            info!("Failed to load config from environment, using defaults");
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

/// Pulse lines from the file named on the command line, or stdin
fn read_lines() -> Result<Vec<String>> {
    let body = match std::env::args().nth(1) {
        Some(path) => {
            std::fs::read_to_string(&path).with_context(|| format!("could not read {path}"))?
        }
        None => {
            let mut body = String::new();
            std::io::stdin()
                .read_to_string(&mut body)
                .context("could not read stdin")?;
            body
        }
    };
    Ok(body.lines().map(str::to_string).collect())
}
