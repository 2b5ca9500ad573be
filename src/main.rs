mod cli;
mod config;
mod discover;
mod filter;
mod format;
mod kubernetes;
mod merge;
mod types;

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use cli::Cli;
use config::{load_config, print_info};
use discover::DiscoveryOptions;
use filter::SourceFilter;
use format::LineFormatter;
use kubernetes::{KubeDiscovery, LogStreamOptions};
use types::POD_STREAM_CAPACITY;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Diagnostics go to stderr so stdout stays a clean log stream.
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli.config)?;
    let source_filter = SourceFilter::new(cli.name.clone(), cli.tags.clone(), cli.tags_any.clone());

    if cli.info {
        print_info(&config, &source_filter);
        return Ok(());
    }

    // A broken global template would break every source; fail the run now.
    if let Some(template) = &config.template {
        LineFormatter::new(template, &config.templates).context("compiling global template")?;
    }

    let since_time = cli
        .since_time
        .as_deref()
        .map(|s| chrono::DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&chrono::Utc)))
        .transpose()
        .context("parsing --since-time")?;

    let discovery = Arc::new(KubeDiscovery::connect(cli.kubeconfig.as_deref()).await?);

    let options = DiscoveryOptions {
        workers: cli.workers,
        follow: cli.follow,
        refresh_interval: Duration::from_secs(cli.refresh_seconds),
        log_options: LogStreamOptions {
            follow: cli.follow,
            tail_lines: cli.tail,
            since_seconds: cli.since,
            since_time,
        },
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                cancel.cancel();
            }
        });
    }

    let (intake_tx, intake_rx) = mpsc::channel(POD_STREAM_CAPACITY);
    let (out_tx, mut out_rx) = mpsc::channel(POD_STREAM_CAPACITY);

    discover::spawn_discovery(
        discovery,
        Arc::new(config),
        &source_filter,
        options,
        intake_tx,
        cancel.clone(),
    );

    let sorted = cli.sort;
    let merge_task = tokio::spawn(async move {
        if sorted {
            merge::aggregate_ordered(intake_rx, out_tx).await;
        } else {
            merge::aggregate_unordered(intake_rx, out_tx).await;
        }
    });

    while let Some(record) = out_rx.recv().await {
        println!("{}", record.message);
    }
    merge_task.await?;
    debug!("log stream complete");

    Ok(())
}
