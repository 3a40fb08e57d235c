/// # repo-analyst CLI
///
/// Command parsing and orchestration glue. All pipeline logic lives in
/// [`repo-analyst-core`]; this module wires configuration, the GitHub client
/// and a corpus sink together and hands control to the core.
///
/// ## Subcommands
/// - `serve`: runs the HTTP trigger surface backed by the worker pool.
///   Ctrl-C stops accepting requests and drains queued jobs before exit.
/// - `analyse`: runs one ingestion job in the foreground and exits non-zero
///   when it fails.
///
/// [`repo-analyst-core`]: ../../repo_analyst_core/
use crate::load_config::{credential_resolver_from_env, load_config, AppConfig};
use crate::server::{self, AppState};
use crate::sink::{FileCorpusSink, LoggingCorpusSink};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use repo_analyst_core::contract::{CorpusSink, CredentialResolver, RepositoryHost};
use repo_analyst_core::coordinates::RepositoryCoordinates;
use repo_analyst_core::github::GitHubClient;
use repo_analyst_core::job::{IngestionPipeline, JobId};
use repo_analyst_core::queue::JobQueue;
use std::path::PathBuf;
use std::sync::Arc;

/// CLI for repo-analyst: ingest GitHub repositories into a single corpus.
#[derive(Parser)]
#[clap(
    name = "repo-analyst",
    version,
    about = "Ingest GitHub repositories into a single text corpus for analysis"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the analysis trigger and browse endpoints over HTTP
    Serve {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Address to listen on; overrides `server.bind`
        #[clap(long)]
        bind: Option<String>,
    },
    /// Run one ingestion job in the foreground
    Analyse {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// User whose credential is used
        #[clap(long)]
        user: String,
        /// Repository as `owner/name`
        repository: String,
        /// Write the corpus to this file instead of only logging a summary
        #[clap(long)]
        output: Option<PathBuf>,
    },
}

struct Wiring {
    host: Arc<dyn RepositoryHost>,
    credentials: Arc<dyn CredentialResolver>,
}

fn wire(config: &AppConfig) -> Result<Wiring> {
    let client =
        GitHubClient::new(&config.pipeline.github).context("Failed to build GitHub client")?;
    Ok(Wiring {
        host: Arc::new(client),
        credentials: Arc::new(credential_resolver_from_env(&config.credentials)),
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C; shutting down");
    }
    tracing::info!("Shutdown requested");
}

async fn serve(config: AppConfig, bind: Option<String>) -> Result<()> {
    let Wiring { host, credentials } = wire(&config)?;
    let pipeline = Arc::new(IngestionPipeline::from_config(
        host.clone(),
        credentials.clone(),
        Arc::new(LoggingCorpusSink),
        &config.pipeline,
    ));
    let (queue, pool) = JobQueue::start(pipeline, &config.pipeline.queue);

    let bind = bind.unwrap_or(config.server.bind);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;

    let state = AppState {
        queue,
        host,
        credentials,
    };
    server::serve(listener, state, shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("Draining queued jobs");
    pool.join().await;
    Ok(())
}

async fn analyse(
    config: AppConfig,
    user: String,
    repository: String,
    output: Option<PathBuf>,
) -> Result<()> {
    let repository = RepositoryCoordinates::parse(&repository)?;
    let Wiring { host, credentials } = wire(&config)?;
    let sink: Arc<dyn CorpusSink> = match output {
        Some(path) => Arc::new(FileCorpusSink::new(path)),
        None => Arc::new(LoggingCorpusSink),
    };
    let pipeline = IngestionPipeline::from_config(host, credentials, sink, &config.pipeline);

    let outcome = pipeline.run(JobId::new(), &user, &repository).await;
    tracing::info!(command = "analyse", repo = %repository, %outcome, "Job finished");
    if outcome.is_completed() {
        Ok(())
    } else {
        anyhow::bail!("Analysis of {repository} ended in {outcome}")
    }
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Serve { config, bind } => {
            let config = load_config(config)?;
            tracing::info!(command = "serve", "Starting HTTP trigger");
            serve(config, bind).await
        }
        Commands::Analyse {
            config,
            user,
            repository,
            output,
        } => {
            let config = load_config(config)?;
            tracing::info!(command = "analyse", repo = %repository, "Starting analysis");
            analyse(config, user, repository, output).await
        }
    }
}
