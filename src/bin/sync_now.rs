//! Manual "sync now" trigger: enqueue sync jobs for every mapped kiosk and
//! drain the queue once.

use anyhow::Result;
use clap::Parser;
use kioskflow::{config, db, drive::DriveClient, jobs};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(about = "Enqueue and run sync jobs for all mapped kiosks")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
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
    let enqueued = jobs::enqueue_due_sync_jobs(&pool).await?;
    let processed = jobs::drain_queue(&pool, &drive, &cfg.drive.storage_public_base).await?;
    println!("enqueued {} sync jobs, processed {} jobs", enqueued, processed);
    Ok(())
}
