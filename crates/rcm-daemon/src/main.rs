//! rcm-daemon entry point.
//!
//! Thin by design: parses the CLI, loads the layered config, wires the
//! concrete `LocalFsFetcher`/`Acker` into a `PipelineStage` and hands
//! the whole thing to the `Orchestrator`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rcm_audit::AuditSink;
use rcm_config::IngestConfig;
use rcm_orchestrator::Orchestrator;
use rcm_pipeline::PipelineStage;
use rcm_source::{Acker, DocumentFetcher, LocalFsFetcher, LogAcker, NoopAcker};
use tracing::info;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "rcm-daemon")]
#[command(about = "Claims/remittance ingestion pipeline", long_about = None)]
struct Cli {
    /// Layered config YAML paths, in merge order (base -> env -> local).
    #[arg(long = "config", global = true)]
    config_paths: Vec<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply embedded SQL migrations and exit.
    Migrate,
    /// Report DB connectivity and schema presence.
    Status,
    /// Start the fetcher and drain the ingestion queue until the
    /// fetcher's channel closes.
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    let path_refs: Vec<&str> = cli.config_paths.iter().map(|s| s.as_str()).collect();
    let (config, config_hash) = rcm_config::load_ingest_config(&path_refs)?;

    match cli.cmd {
        Commands::Migrate => {
            let pool = rcm_db::connect(&config.database_url).await?;
            rcm_db::migrate(&pool).await?;
            println!("migrations_applied=true");
        }
        Commands::Status => {
            let pool = rcm_db::connect(&config.database_url).await?;
            let s = rcm_db::status(&pool).await?;
            println!("db_ok={} has_claim_table={}", s.ok, s.has_claim_table);
        }
        Commands::Run => {
            run(config, &config_hash).await?;
        }
    }

    Ok(())
}

async fn run(config: IngestConfig, config_hash: &str) -> Result<()> {
    let pool = rcm_db::connect(&config.database_url).await.context("connecting to Postgres")?;
    rcm_db::migrate(&pool).await.context("applying migrations")?;

    let fetcher: Arc<dyn DocumentFetcher> = Arc::new(LocalFsFetcher::new(
        Path::new(&config.source.inbox_dir).to_path_buf(),
        Duration::from_millis(config.source.poll_interval_ms),
    ));
    let acker: Arc<dyn Acker> = if config.source.ack_enabled {
        Arc::new(LogAcker)
    } else {
        Arc::new(NoopAcker)
    };

    let queue = config.queue.clone();
    let stage = Arc::new(PipelineStage::new(pool.clone(), config, acker));
    let audit = AuditSink::new(pool);

    let orchestrator = Orchestrator::new(queue, fetcher, stage, audit);

    let run_id = Uuid::new_v4();
    info!(%run_id, config_hash, "starting ingestion run");
    let stats = orchestrator.run(run_id, config_hash).await?;
    info!(
        files_claimed = stats.files_claimed,
        files_ok = stats.files_ok,
        files_failed = stats.files_failed,
        "ingestion run complete"
    );
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}
