//! # Scan Orchestrator CLI
//!
//! Runs the scan pipeline of a single source archive against a configured
//! FOSSology instance and follows it until it settles.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use scan_orchestrator::client::{FossologyApi, FossologyProcessHandler, FossologyRestClient};
use scan_orchestrator::config::{ConfigManager, OrchestratorConfig};
use scan_orchestrator::database::{
    InMemoryAttachmentRepository, InMemorySnapshotStore, SharedSnapshotStore,
};
use scan_orchestrator::logging::init_structured_logging;
use scan_orchestrator::orchestration::{ProcessOrchestrator, StatusVerdict};

#[derive(Parser)]
#[command(name = "scan-orchestrator")]
#[command(about = "Scan release source archives through FOSSology")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration directory (default: ./config)
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,

    /// Environment override (default: $SCAN_ORCHESTRATOR_ENV or development)
    #[arg(short, long, global = true)]
    environment: Option<String>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the scanning service is reachable with the configured token
    CheckConnection,

    /// Print the effective configuration with secrets masked
    ShowConfig,

    /// Scan an archive and wait for the report
    Run {
        /// Resource id the archive belongs to
        #[arg(long)]
        resource: String,

        /// Source archive to upload
        #[arg(long)]
        archive: PathBuf,

        /// Invalidate an earlier process of the resource first
        #[arg(long)]
        force_outdated: bool,

        /// Upload description passed to the scanning service
        #[arg(long)]
        note: Option<String>,

        /// Seconds between status checks
        #[arg(long, default_value_t = 30)]
        poll_seconds: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let manager = match cli.environment.as_deref() {
        Some(environment) => {
            ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), environment)
        }
        None => ConfigManager::load_from_directory(cli.config_dir.clone()),
    }
    .context("failed to load configuration")?;

    let mut logging = manager.config().logging.clone();
    match cli.verbose {
        0 => {}
        1 => logging.level = "debug".to_string(),
        _ => logging.level = "trace".to_string(),
    }
    init_structured_logging(&logging, manager.environment());

    let exit_code = match cli.command {
        Commands::CheckConnection => check_connection(manager.config()).await?,
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
            0
        }
        Commands::Run {
            resource,
            archive,
            force_outdated,
            note,
            poll_seconds,
        } => {
            run(
                manager.config(),
                &resource,
                &archive,
                force_outdated,
                note,
                Duration::from_secs(poll_seconds.max(1)),
            )
            .await?
        }
    };

    process::exit(exit_code);
}

async fn check_connection(config: &OrchestratorConfig) -> anyhow::Result<i32> {
    let api = FossologyRestClient::new(config.tool.clone())?;
    if api.check_connection().await? {
        println!("✅ Connected to {}", api.base_url());
        Ok(0)
    } else {
        println!("❌ Scanning service at {} rejected the request", api.base_url());
        Ok(1)
    }
}

#[cfg(feature = "postgres")]
async fn snapshot_store(config: &OrchestratorConfig) -> anyhow::Result<SharedSnapshotStore> {
    use scan_orchestrator::database::PgSnapshotStore;

    if config.database.url.is_none() {
        return Ok(Arc::new(InMemorySnapshotStore::new()));
    }

    let store = PgSnapshotStore::connect(&config.database).await?;
    store.ensure_schema().await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn snapshot_store(config: &OrchestratorConfig) -> anyhow::Result<SharedSnapshotStore> {
    if config.database.url.is_some() {
        warn!("Database url configured but PostgreSQL support is disabled, using in-memory snapshots");
    }
    Ok(Arc::new(InMemorySnapshotStore::new()))
}

async fn run(
    config: &OrchestratorConfig,
    resource_id: &str,
    archive: &Path,
    force_outdated: bool,
    note: Option<String>,
    poll_interval: Duration,
) -> anyhow::Result<i32> {
    if !config.tool.is_configured() {
        warn!("Scanning service base url or access token not configured");
    }

    let store = snapshot_store(config).await?;
    let attachments = Arc::new(InMemoryAttachmentRepository::new());
    attachments
        .add_source_file(resource_id, archive)
        .await
        .with_context(|| format!("failed to read {}", archive.display()))?;

    let api = Arc::new(FossologyRestClient::new(config.tool.clone())?);
    let handler = Arc::new(
        FossologyProcessHandler::new(api, Arc::clone(&store), attachments.clone())
            .with_report_download(config.tool.report_download_enabled),
    );
    let orchestrator = ProcessOrchestrator::from_config(config, handler, store, attachments);

    let outcome = orchestrator
        .run_process(resource_id, force_outdated, note)
        .await?;
    println!("Trigger: {outcome}");
    if !outcome.is_accepted() {
        return Ok(2);
    }

    loop {
        tokio::time::sleep(poll_interval).await;

        let report = orchestrator.check_status(resource_id).await?;
        info!(resource_id = %resource_id, verdict = %report.verdict, "Status");
        if !report.verdict.is_settled() {
            continue;
        }

        if let Some(snapshot) = &report.snapshot {
            println!("{}", serde_json::to_string_pretty(snapshot)?);
        }
        println!("Status: {}", report.verdict);
        return Ok(if report.verdict == StatusVerdict::Success {
            0
        } else {
            1
        });
    }
}
