//! Binary entry point.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use secret_populator::cli::{Cli, Commands, PopulateArgs, SourceKind};
use secret_populator::extsecrets::{ClusterSource, DefinitionSource, FilesystemSource};
use secret_populator::populate::{DefinitionState, Options};
use secret_populator::store::RuntimeStoreFactory;

use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    // Required for rustls 0.23+ when no default provider is set via features.
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "secret_populator=info".into()),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        built = env!("BUILD_DATETIME"),
        git = env!("BUILD_GIT_HASH"),
        "starting secret populator"
    );

    let cli = Cli::parse();
    match cli.command {
        Commands::Populate(args) => populate(args).await,
    }
}

async fn populate(args: PopulateArgs) -> Result<()> {
    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client; ensure kubeconfig is configured")?;

    let source: Arc<dyn DefinitionSource> = match args.source {
        SourceKind::Cluster => Arc::new(ClusterSource::new(client.clone())),
        SourceKind::Filesystem => {
            let dir = args
                .dir
                .clone()
                .context("--dir is required with --source filesystem")?;
            Arc::new(FilesystemSource::new(dir))
        }
    };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight writes");
            signal_cancel.cancel();
        }
    });

    let options = Options {
        source,
        factory: Arc::new(RuntimeStoreFactory::new(client, None)),
        namespace: args.namespace.clone(),
        boot_secret_namespace: args.boot_secret_namespace.clone(),
        schema_file: args.schema_file(),
        no_wait: args.no_wait,
        backoff: args.retry_policy(),
        cancel,
    };

    let report = options.run().await.context("populate run failed")?;

    for outcome in &report.outcomes {
        match outcome.state {
            DefinitionState::Written => {
                info!(definition = %outcome.name, written = outcome.written, attempts = outcome.attempts, "written")
            }
            DefinitionState::Skipped => {
                info!(definition = %outcome.name, reason = outcome.reason.as_deref().unwrap_or("up to date"), "skipped")
            }
            DefinitionState::Failed => {
                error!(definition = %outcome.name, reason = outcome.reason.as_deref().unwrap_or("unknown"), "failed")
            }
        }
    }

    let failed = report.failures().count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} definitions failed", report.outcomes.len());
    }
    info!(
        definitions = report.outcomes.len(),
        written = report.written(),
        "populate run complete"
    );
    Ok(())
}
