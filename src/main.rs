//! # Storage Integrator
//!
//! A service that validates object-storage connection parameters and
//! credentials (S3, Azure Storage, GCS) and republishes them to connected
//! consumer applications.
//!
//! ## Overview
//!
//! The integrator holds no data plane of its own. It:
//!
//! 1. **Reads operator configuration** - a YAML option file per deployment
//! 2. **Resolves the referenced secret** - fresh on every cycle, so rotation
//!    and revocation take effect immediately
//! 3. **Validates and assembles** - provider-specific rules, all violations
//!    reported at once
//! 4. **Publishes** - full-bag replacement into every connected consumer's
//!    relation data, skipping writes whose content is unchanged
//!
//! ## Commands
//!
//! - `run` - observation loop: poll the model files, re-dispatch on change
//!   and on a periodic tick, serve metrics and probes over HTTP
//! - `dispatch` - run a single cycle and print the resulting status
//! - `connection-info` - print the assembled payload with credential values
//!   masked

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sha2::{Digest, Sha256};
use tracing::{error, info};

use storage_integrator::backend::{FileConfigSource, FileRelationStore, FileSecretStore};
use storage_integrator::reconciler::DispatchError;
use storage_integrator::server::{start_server, ServerState};
use storage_integrator::{constants, metrics, ProviderKind, Reconciler, StatusVerdict, Trigger};

#[derive(Debug, Parser)]
#[command(name = "storage-integrator", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Watch the model files and republish on every change
    Run(RunArgs),
    /// Run a single dispatch cycle and print the resulting status
    Dispatch(ModelArgs),
    /// Print the assembled connection parameters with credentials masked
    ConnectionInfo(ModelArgs),
}

#[derive(Debug, Args)]
struct ModelArgs {
    /// Object-storage provider this integrator fronts (s3, azure, gcs)
    #[arg(long)]
    provider: ProviderKind,

    /// YAML file holding the operator configuration options
    #[arg(long, value_name = "FILE")]
    config: PathBuf,

    /// Directory of secret content files, one `<id>.yaml` per secret
    #[arg(long, value_name = "DIR")]
    secrets_dir: PathBuf,

    /// Directory of relation records, one `relation-<id>.json` per consumer
    #[arg(long, value_name = "DIR")]
    relations_dir: PathBuf,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Port for the metrics and probe HTTP server
    #[arg(long, default_value_t = constants::DEFAULT_METRICS_PORT)]
    metrics_port: u16,

    /// Seconds between observation-loop polls
    #[arg(long, default_value_t = constants::DEFAULT_POLL_INTERVAL_SECS)]
    poll_interval_secs: u64,
}

fn build_reconciler(model: &ModelArgs) -> Reconciler {
    Reconciler::new(
        model.provider,
        Arc::new(FileConfigSource::new(&model.config)),
        Arc::new(FileSecretStore::new(&model.secrets_dir)),
        Arc::new(FileRelationStore::new(&model.relations_dir)),
    )
}

/// Digests of the three model inputs, compared between polls to synthesize
/// the trigger kind for the next dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct ModelFingerprint {
    config: [u8; 32],
    secrets: [u8; 32],
    relations: [u8; 32],
}

async fn hash_file(path: &Path) -> [u8; 32] {
    let mut hasher = Sha256::new();
    if let Ok(contents) = tokio::fs::read(path).await {
        hasher.update(&contents);
    }
    hasher.finalize().into()
}

/// Digest of a directory's file names and contents, in sorted order.
async fn hash_dir(dir: &Path, contents_too: bool) -> [u8; 32] {
    let mut names = Vec::new();
    if let Ok(mut entries) = tokio::fs::read_dir(dir).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            names.push(entry.path());
        }
    }
    names.sort();

    let mut hasher = Sha256::new();
    for path in names {
        hasher.update(path.to_string_lossy().as_bytes());
        if contents_too {
            if let Ok(contents) = tokio::fs::read(&path).await {
                hasher.update(&contents);
            }
        }
    }
    hasher.finalize().into()
}

async fn fingerprint(model: &ModelArgs) -> ModelFingerprint {
    ModelFingerprint {
        config: hash_file(&model.config).await,
        secrets: hash_dir(&model.secrets_dir, true).await,
        // Names only: our own bag writes must not read back as a consumer
        // change.
        relations: hash_dir(&model.relations_dir, false).await,
    }
}

fn synthesize_trigger(last: Option<&ModelFingerprint>, current: &ModelFingerprint) -> Trigger {
    match last {
        // First pass after startup: treat everything as new.
        None => Trigger::ConfigChanged,
        Some(prev) if prev.config != current.config => Trigger::ConfigChanged,
        Some(prev) if prev.secrets != current.secrets => Trigger::SecretChanged,
        Some(prev) if prev.relations != current.relations => Trigger::RelationJoined,
        Some(_) => Trigger::Tick,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    info!("Starting storage integrator ({})", args.model.provider);

    metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::new());
    let server_port = args.metrics_port;
    let server_state_clone = Arc::clone(&server_state);
    tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    let reconciler = build_reconciler(&args.model);
    let poll = Duration::from_secs(
        args.poll_interval_secs
            .max(constants::MIN_POLL_INTERVAL_SECS),
    );

    let mut last: Option<ModelFingerprint> = None;
    loop {
        let current = fingerprint(&args.model).await;
        let trigger = synthesize_trigger(last.as_ref(), &current);
        let verdict = reconciler.dispatch(trigger).await;
        server_state.record(&verdict);
        last = Some(current);

        tokio::select! {
            () = tokio::time::sleep(poll) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    Ok(())
}

async fn dispatch_once(model: ModelArgs) -> Result<ExitCode> {
    let reconciler = build_reconciler(&model);
    let verdict = reconciler.dispatch(Trigger::Tick).await;
    println!("{verdict}");
    match verdict {
        StatusVerdict::Blocked(_) => Ok(ExitCode::FAILURE),
        _ => Ok(ExitCode::SUCCESS),
    }
}

async fn connection_info(model: ModelArgs) -> Result<ExitCode> {
    let reconciler = build_reconciler(&model);
    match reconciler.connection_info().await {
        Ok(payload) => {
            let rendered = serde_yaml::to_string(&payload.masked())
                .context("failed to render connection info")?;
            print!("{rendered}");
            Ok(ExitCode::SUCCESS)
        }
        Err(DispatchError::CredentialsNotSet) => {
            eprintln!("credentials are not set!");
            Ok(ExitCode::FAILURE)
        }
        Err(err) => {
            eprintln!("{err}");
            Ok(ExitCode::FAILURE)
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storage_integrator=info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => {
            run(args).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Dispatch(model) => dispatch_once(model).await,
        Command::ConnectionInfo(model) => connection_info(model).await,
    }
}
