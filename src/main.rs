mod cli;
mod output;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use cli::{Cli, Commands};
use colored::Colorize;
use output::UploadProgress;
use snapwire::streaming::SessionEvent;
use snapwire::upload::{guess_content_type, RefreshListener, SelectedFile, UploadPipeline};
use snapwire::Config;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

/// Wakes the CLI once the server-side listing has changed.
#[derive(Default)]
struct BatchRefresh {
    notify: Notify,
}

#[async_trait]
impl RefreshListener for BatchRefresh {
    async fn refresh(&self) {
        tracing::debug!("Media listing refreshed");
        self.notify.notify_one();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter())),
        )
        .with_target(false)
        .init();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Upload {
            files,
            content_type,
            connect_timeout,
        } => {
            upload(
                &config,
                files,
                content_type,
                Duration::from_secs(connect_timeout),
            )
            .await
        }
    }
}

async fn upload(
    config: &Config,
    paths: Vec<PathBuf>,
    content_type: Option<String>,
    connect_timeout: Duration,
) -> Result<()> {
    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        let mime = content_type
            .clone()
            .unwrap_or_else(|| guess_content_type(path).to_string());
        let file = SelectedFile::from_path(path, mime)
            .await
            .with_context(|| format!("Cannot read {}", path.display()))?;
        files.push(file);
    }

    let refresh = Arc::new(BatchRefresh::default());
    let pipeline = UploadPipeline::start(config, refresh.clone())
        .context("Failed to start upload pipeline")?;
    let session = pipeline.session().clone();

    let report = session.stage(files).await;
    if let Some(warning) = report.warning() {
        eprintln!("{} {}", "warning:".yellow().bold(), warning);
    }
    if report.duplicates > 0 {
        eprintln!(
            "{} skipped {} duplicate file(s)",
            "note:".cyan().bold(),
            report.duplicates
        );
    }
    if session.is_empty().await {
        pipeline.shutdown().await;
        bail!("Nothing to upload");
    }

    println!("Connecting to {}", config.server_url().bold());
    match tokio::time::timeout(connect_timeout, pipeline.wait_connected()).await {
        Ok(result) => result.context("Connection failed")?,
        Err(_) => {
            pipeline.shutdown().await;
            bail!(
                "Could not reach {} within {}s",
                config.server_url(),
                connect_timeout.as_secs()
            );
        }
    }

    let mut progress = UploadProgress::new(&session.snapshot().await);
    let mut events = pipeline.subscribe();

    let sending = {
        let session = session.clone();
        tokio::spawn(async move { session.start().await })
    };

    let mut finished = false;
    let mut uploaded = 0;
    let mut interrupted = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::BatchFinished { files }) => {
                    uploaded = files;
                    finished = true;
                    break;
                }
                Ok(event) => {
                    progress.apply(&event);
                    if progress.stuck() {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => tracing::warn!("Display skipped {} update(s)", n),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                interrupted = true;
                break;
            }
        }
    }

    if finished {
        // the refresh listener runs right after the batch clears
        refresh.notify.notified().await;
    } else {
        progress.abandon();
    }

    if let Err(e) = sending.await {
        tracing::error!("Send task failed: {}", e);
    }
    pipeline.shutdown().await;

    if finished {
        println!("{} Uploaded {} file(s)", "✓".green().bold(), uploaded);
        Ok(())
    } else if interrupted {
        bail!("Interrupted");
    } else {
        bail!("{} file(s) failed to upload", progress.failed());
    }
}
