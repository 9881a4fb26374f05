//! Operator tool: print the commission split decision for a payment without
//! touching the payment processor.

use anyhow::Result;
use clap::Parser;
use kioskflow::{config, db, split};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(about = "Preview the commission split for a payment")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Payment amount in the smallest currency unit (e.g. cents)
    #[arg(long)]
    amount: i64,

    /// Kiosk ids covered by the payment
    #[arg(long = "kiosk", required = true)]
    kiosks: Vec<String>,
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

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/kioskflow.db", cfg.app.data_dir));
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let decision = split::determine(
        &pool,
        args.amount,
        &args.kiosks,
        cfg.payments.default_commission_rate,
        &BTreeMap::new(),
    )
    .await?;

    match decision {
        split::SplitDecision::Split(cfg) => {
            println!("{}", serde_json::to_string_pretty(&cfg.transfer_params())?);
        }
        split::SplitDecision::NoSplit(reason) => {
            println!("no split: {}", reason);
        }
    }
    Ok(())
}
