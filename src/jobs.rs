//! Persistent job worker.
//!
//! Jobs are rows in the `jobs` table, claimed oldest-first and processed
//! strictly sequentially. A failure marks that row `failed` and the worker
//! moves on; nothing is batched or aborted collectively.

use crate::db::{self, Pool};
use crate::drive::{self, AssetSource, DriveService};
use crate::model::{Job, JobKind};
use crate::reconcile::{self, ReconcileOutcome};
use anyhow::{anyhow, Result};
use tracing::{info, instrument, warn};

/// Claim and run the next pending job. Returns whether a job was picked up.
#[instrument(skip_all)]
pub async fn process_next_job(
    pool: &Pool,
    drive: &dyn DriveService,
    storage_public_base: &str,
) -> Result<bool> {
    let Some(job) = db::next_pending_job(pool).await? else {
        return Ok(false);
    };
    if !db::mark_job_in_progress(pool, &job.id).await? {
        // Cancelled (or claimed elsewhere) between select and claim.
        return Ok(true);
    }

    match job.kind {
        JobKind::Upload => match run_upload_job(pool, drive, &job, storage_public_base).await {
            Ok(()) => {
                db::complete_upload_job(pool, &job.id).await?;
                info!(job_id = %job.id, "upload job completed");
            }
            Err(err) => {
                warn!(?err, job_id = %job.id, "upload job failed");
                db::fail_job(pool, &job.id, &format!("{:#}", err)).await?;
            }
        },
        JobKind::Sync => match run_sync_job(pool, drive, &job).await {
            Ok(outcome) => {
                db::complete_sync_job(
                    pool,
                    &job.id,
                    outcome.files_synced,
                    outcome.files_archived,
                    outcome.files_activated,
                )
                .await?;
                info!(job_id = %job.id, synced = outcome.files_synced, "sync job completed");
            }
            Err(err) => {
                warn!(?err, job_id = %job.id, "sync job failed");
                db::fail_job(pool, &job.id, &format!("{:#}", err)).await?;
            }
        },
    }
    Ok(true)
}

async fn run_upload_job(
    pool: &Pool,
    drive: &dyn DriveService,
    job: &Job,
    storage_public_base: &str,
) -> Result<()> {
    let asset_id = job
        .asset_id
        .as_deref()
        .ok_or_else(|| anyhow!("upload job has no asset id"))?;
    let folder_id = job
        .folder_id
        .as_deref()
        .ok_or_else(|| anyhow!("upload job has no destination folder"))?;
    let asset = db::get_asset(pool, asset_id)
        .await?
        .ok_or_else(|| anyhow!("asset {} not found", asset_id))?;

    let source = drive::resolve_asset_source(&asset, storage_public_base)
        .ok_or_else(|| anyhow!("asset {} has no resolvable content source", asset.id))?;
    let bytes = match source {
        AssetSource::Url(url) => drive.download(&url).await?,
        AssetSource::Inline(bytes) => bytes,
    };

    let mime = drive::mime_type_for(&asset.file_name);
    let file_id = drive
        .upload_file(&asset.file_name, mime, bytes, folder_id)
        .await?;
    db::set_asset_drive_file_id(pool, &asset.id, &file_id).await?;
    Ok(())
}

async fn run_sync_job(
    pool: &Pool,
    drive: &dyn DriveService,
    job: &Job,
) -> Result<ReconcileOutcome> {
    let kiosk_id = job
        .kiosk_id
        .as_deref()
        .ok_or_else(|| anyhow!("sync job has no kiosk id"))?;
    let Some(mapping) = db::folder_mapping(pool, kiosk_id).await? else {
        // Configuration gap, not a job failure: nothing to reconcile yet.
        warn!(kiosk_id, "no folder mapping for kiosk; skipping sync");
        return Ok(ReconcileOutcome::default());
    };
    reconcile::reconcile_kiosk(pool, drive, &mapping).await
}

/// Enqueue a sync job for every mapped kiosk that does not already have one
/// queued or running. Invoked by the scheduler tick and the manual trigger;
/// stands in for the platform cron job.
#[instrument(skip_all)]
pub async fn enqueue_due_sync_jobs(pool: &Pool) -> Result<usize> {
    let mappings = db::all_folder_mappings(pool).await?;
    let mut enqueued = 0;
    for mapping in &mappings {
        if db::has_open_sync_job(pool, &mapping.kiosk_id).await? {
            continue;
        }
        db::enqueue_sync_job(pool, &mapping.kiosk_id).await?;
        enqueued += 1;
    }
    if enqueued > 0 {
        info!(enqueued, "enqueued sync jobs");
    }
    Ok(enqueued)
}

/// Drain the queue until no pending job remains.
pub async fn drain_queue(
    pool: &Pool,
    drive: &dyn DriveService,
    storage_public_base: &str,
) -> Result<usize> {
    let mut processed = 0;
    while process_next_job(pool, drive, storage_public_base).await? {
        processed += 1;
    }
    Ok(processed)
}
