use anyhow::Result;
use clap::Parser;
use kioskflow::{config, db, drive::DriveClient, jobs};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Enqueue one round of sync jobs, drain the queue, and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/kioskflow.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let drive = DriveClient::from_config(&cfg)?;
    let storage_base = cfg.drive.storage_public_base.clone();

    if args.once {
        let enqueued = jobs::enqueue_due_sync_jobs(&pool).await?;
        let processed = jobs::drain_queue(&pool, &drive, &storage_base).await?;
        info!(enqueued, processed, "one-shot run finished");
        return Ok(());
    }

    // Job worker: polls pending rows sequentially.
    let worker_pool = pool.clone();
    let worker_drive = drive.clone();
    let worker_storage_base = storage_base.clone();
    let poll_sleep = Duration::from_millis(cfg.app.poll_interval_ms);
    tokio::spawn(async move {
        loop {
            match jobs::process_next_job(&worker_pool, &worker_drive, &worker_storage_base).await {
                Ok(processed) => {
                    if !processed {
                        tokio::time::sleep(poll_sleep).await;
                    }
                }
                Err(err) => {
                    error!(?err, "job worker error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    // Scheduler tick: enqueue sync jobs for every mapped kiosk. All state
    // lives in the database between ticks.
    info!("starting reconcile scheduler");
    let mut tick = tokio::time::interval(Duration::from_secs(cfg.app.reconcile_interval_secs));
    loop {
        tick.tick().await;
        if let Err(err) = jobs::enqueue_due_sync_jobs(&pool).await {
            error!(?err, "failed to enqueue sync jobs");
        }
    }
}
