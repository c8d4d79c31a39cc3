use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inflow_config::{MetadataBackend, ServiceConfig, RECORDS_COLLECTION, WORK_COLLECTION};
use inflow_core::gate::{FirestoreGate, FirestoreGateConfig, MemoryGate, MetadataGate};
use inflow_core::notify::{Notifier, NotifierStrategy, SlackNotifier};
use inflow_core::store::{GcsStore, MemoryObjectStore, ObjectStore};
use inflow_core::{sweep, FolderWatchService};
use inflow_server::handlers;

#[derive(Parser)]
#[command(
    name = "inflow-server",
    about = "Folder upload-completion notifier for bucket pipelines",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the push-event HTTP server (the default).
    Serve,
    /// Replay analytics rows for completed folders in a time window.
    Backfill {
        /// Window start, RFC 3339 or YYYY-MM-DD.
        #[arg(long)]
        start: String,
        /// Exclusive window end, RFC 3339 or YYYY-MM-DD.
        #[arg(long)]
        end: Option<String>,
        /// Max folder records scanned.
        #[arg(long, default_value_t = 1000)]
        limit: usize,
        /// Report what would be appended without writing.
        #[arg(long)]
        dry_run: bool,
    },
    /// Run the reconciliation path for a single folder and exit.
    Reconcile {
        #[arg(long)]
        folder: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = ServiceConfig::load_from_env().context("loading configuration")?;
    let service = build_service(&config).context("building service")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(service, &config).await,
        Command::Backfill {
            start,
            end,
            limit,
            dry_run,
        } => {
            let start = parse_time(&start).context("parsing --start")?;
            let end = end
                .as_deref()
                .map(parse_time)
                .transpose()
                .context("parsing --end")?;
            let appended = service
                .backfill_analytics(start, end, limit, dry_run)
                .await?;
            info!(appended, dry_run, "backfill finished");
            Ok(())
        }
        Command::Reconcile { folder } => {
            let completed = service.reconcile_folder(&folder).await?;
            info!(folder, completed, "reconcile finished");
            Ok(())
        }
    }
}

fn build_service(config: &ServiceConfig) -> anyhow::Result<Arc<FolderWatchService>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("building http client")?;

    let (gate, store): (Arc<dyn MetadataGate>, Arc<dyn ObjectStore>) = match config.backend {
        MetadataBackend::Memory => {
            warn!("memory backend selected, folder state will not survive restarts");
            (
                Arc::new(MemoryGate::new(config.watch.allow_reactivation)),
                Arc::new(MemoryObjectStore::new()),
            )
        }
        MetadataBackend::Gcp => (
            Arc::new(FirestoreGate::new(
                client.clone(),
                FirestoreGateConfig {
                    project_id: config.project_id.clone(),
                    records_collection: RECORDS_COLLECTION.to_string(),
                    work_collection: WORK_COLLECTION.to_string(),
                    auth_token: None,
                    base_url: None,
                    allow_reactivation: config.watch.allow_reactivation,
                },
            )),
            Arc::new(GcsStore::new(client.clone(), None)),
        ),
    };

    let strategy = config.notifier_strategy();
    match &strategy {
        NotifierStrategy::Bot { channel, .. } => {
            info!(channel, "notifications via bot with message edits");
        }
        NotifierStrategy::Webhook { .. } => {
            info!("notifications via webhook, final updates post separately");
        }
        NotifierStrategy::Disabled => {
            warn!("no notification mechanism configured, logging only");
        }
    }
    let notifier: Arc<dyn Notifier> = Arc::new(SlackNotifier::new(
        client,
        strategy,
        &config.watch.incoming_bucket,
    ));

    Ok(FolderWatchService::new(
        config.watch.clone(),
        gate,
        store,
        notifier,
    ))
}

async fn serve(service: Arc<FolderWatchService>, config: &ServiceConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    if config.disable_sweep {
        info!("reconciliation sweep disabled");
    } else {
        tokio::spawn(sweep::run_periodic(service.clone(), shutdown.clone()));
    }

    let app = handlers::router(handlers::AppState { service });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, prefixes = ?config.watch.monitored_prefixes, "inflow server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for shutdown signal");
                return;
            }
            info!("shutdown signal received");
            shutdown.cancel();
        })
        .await
        .context("server error")?;
    Ok(())
}

fn parse_time(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("invalid time {raw:?}, expected RFC 3339 or YYYY-MM-DD"))?;
    Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)))
}
