//! chronicle-enrich: operator CLI for knowledge-graph enrichment runs.
//!
//! Usage:
//!   chronicle-enrich run --kind event
//!   chronicle-enrich run --kind person --criterion missing-rel:MEMBER_OF_DYNASTY --workers 3
//!   chronicle-enrich resume
//!   chronicle-enrich reset
//!   chronicle-enrich preview --kind person "Ada Lovelace"
//!   chronicle-enrich enrich --kind event "Battle of Hastings"
//!   chronicle-enrich check-continents
//!   chronicle-enrich fix-continents
//!
//! Ctrl-C during `run` or `resume` finishes the in-flight batch, saves the
//! checkpoint and exits; `resume` continues from there.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chronicle_core::{CheckpointStore, Criterion, EntityKind, RunEvent, RunFilter};
use chronicle_db::{Database, PoolConfig};
use chronicle_jobs::{
    ContinentRepairer, ControllerConfig, EnrichmentConfig, EntityEnricher, FileCheckpointStore,
    RunController, WorkerPool,
};
use chronicle_wikidata::WikidataResolver;

/// Scope under which the database checkpoint is stored.
const CHECKPOINT_SCOPE: &str = "default";

#[derive(Parser)]
#[command(name = "chronicle-enrich")]
#[command(author, version, about = "Enrich chronicle's knowledge graph from Wikidata")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a fresh run from offset 0
    Run {
        /// Entity kind to enrich (person or event)
        #[arg(short, long, default_value = "person")]
        kind: EntityKind,

        /// Candidate filter: all, unenriched, missing-rel:<REL>, missing-attr:<column>
        /// (default depends on kind)
        #[arg(short, long)]
        criterion: Option<Criterion>,

        /// Candidates per batch (default: ENRICH_BATCH_SIZE)
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Concurrent workers (default: ENRICH_WORKERS)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Pause between batches in milliseconds (default: ENRICH_BATCH_DELAY_MS)
        #[arg(short, long)]
        delay_ms: Option<u64>,
    },

    /// Continue the checkpointed run
    Resume,

    /// Clear the checkpoint
    Reset,

    /// Show what enriching one entity would write, without writing
    Preview {
        #[arg(short, long, default_value = "person")]
        kind: EntityKind,

        /// Display name of the entity (case-insensitive)
        name: String,
    },

    /// Enrich one entity by name
    Enrich {
        #[arg(short, long, default_value = "person")]
        kind: EntityKind,

        /// Display name of the entity (case-insensitive)
        name: String,
    },

    /// List countries linked to more than one continent
    CheckContinents,

    /// Re-place every country on the continent Wikidata lists for it
    FixContinents,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = init_tracing();

    let config = EnrichmentConfig::from_env();
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let db = Database::connect_with_config(&database_url, PoolConfig::from_env())
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.context("Failed to run migrations")?;
    db.health_check().await.context("Database health check failed")?;

    let graph = Arc::new(db.graph.clone());
    let resolver = Arc::new(WikidataResolver::from_env()?);
    let enricher = Arc::new(EntityEnricher::new(graph.clone(), resolver.clone()));

    let checkpoints: Arc<dyn CheckpointStore> = match &config.checkpoint_path {
        Some(path) => {
            info!(path = %path.display(), "Using checkpoint file");
            Arc::new(FileCheckpointStore::new(path))
        }
        None => Arc::new(db.checkpoints(CHECKPOINT_SCOPE)),
    };

    match &cli.command {
        Commands::Preview { kind, name } => {
            let preview = enricher.preview_by_name(*kind, name).await?;
            println!("{}", serde_json::to_string_pretty(&preview)?);
            return Ok(());
        }
        Commands::Enrich { kind, name } => {
            let result = enricher.enrich_by_name(*kind, name).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(());
        }
        Commands::Reset => {
            checkpoints.clear().await?;
            info!("Checkpoint cleared");
            return Ok(());
        }
        Commands::CheckContinents => {
            let duplicates = ContinentRepairer::new(graph.clone(), resolver.clone())
                .check_duplicates()
                .await?;
            let body = serde_json::json!({
                "total_duplicates": duplicates.len(),
                "duplicates": duplicates,
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
            return Ok(());
        }
        Commands::FixContinents => {
            let report = ContinentRepairer::new(graph.clone(), resolver.clone())
                .repair()
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }
        Commands::Run { .. } | Commands::Resume => {}
    }

    let controller = RunController::new(
        graph,
        WorkerPool::from_config(enricher, &config),
        checkpoints,
        ControllerConfig::from(&config),
    );
    let mut events = controller.events();

    match cli.command {
        Commands::Run {
            kind,
            criterion,
            batch_size,
            workers,
            delay_ms,
        } => {
            let filter = match criterion {
                Some(criterion) => RunFilter::new(kind, criterion),
                None => RunFilter::default_for(kind),
            };
            let mut plan = config.plan(filter);
            if let Some(size) = batch_size {
                plan = plan.with_batch_size(size);
            }
            if let Some(workers) = workers {
                plan = plan.with_workers(workers);
            }
            if let Some(ms) = delay_ms {
                plan = plan.with_batch_delay_ms(ms);
            }
            controller.start(plan).await?;
        }
        _ => {
            controller.resume().await?;
        }
    }

    let mut stopping = false;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c(), if !stopping => {
                if let Err(e) = signal {
                    warn!(error = %e, "Could not listen for Ctrl-C");
                }
                info!("Stopping after the in-flight batch");
                controller.stop().await;
                stopping = true;
            }
            event = events.recv() => match event {
                Ok(envelope) => {
                    report(&envelope.payload);
                    if envelope.payload.is_terminal() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Progress output fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    controller.wait().await?;
    let progress = controller.progress().await;
    println!("{}", serde_json::to_string_pretty(&progress)?);
    Ok(())
}

fn report(event: &RunEvent) {
    match event {
        RunEvent::BatchCompleted {
            offset,
            processed,
            succeeded,
            failed,
            ..
        } => {
            println!(
                "offset {:>7}  processed {:>7}  ok {:>7}  failed {:>7}",
                offset, processed, succeeded, failed
            );
        }
        RunEvent::Aborted { error, .. } => eprintln!("Run aborted: {}", error),
        _ => {}
    }
}

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables file logging)
///   RUST_LOG    - standard env filter (default: "chronicle=info", which
///                 covers every chronicle_* target)
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "chronicle=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let path = std::path::Path::new(path);
        let file_dir = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("chronicle-enrich.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(non_blocking),
                )
                .init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stderr)"),
        "Logging initialized"
    );
    guard
}
