use crate::model::{
    AssetStatus, Campaign, CampaignStatus, FolderMapping, HostAssignment, HostProfile, Job,
    JobKind, JobStatus, MediaAsset,
};
use anyhow::{anyhow, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;
use uuid::Uuid;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the
/// parent directory exists. Leaves in-memory URLs untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn placeholders(n: usize) -> String {
    let mut s = String::new();
    for i in 0..n {
        if i > 0 {
            s.push_str(", ");
        }
        s.push('?');
    }
    s
}

/// Active host↔kiosk assignments for the given kiosks.
#[instrument(skip_all)]
pub async fn active_assignments_for_kiosks(
    pool: &Pool,
    kiosk_ids: &[String],
) -> Result<Vec<HostAssignment>> {
    if kiosk_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT kiosk_id, host_id, commission_rate FROM host_kiosk_assignments \
         WHERE status = 'active' AND kiosk_id IN ({})",
        placeholders(kiosk_ids.len())
    );
    let mut query = sqlx::query(&sql);
    for id in kiosk_ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(|row| HostAssignment {
            kiosk_id: row.get("kiosk_id"),
            host_id: row.get("host_id"),
            commission_rate: row.try_get::<Option<f64>, _>("commission_rate").ok().flatten(),
        })
        .collect())
}

#[instrument(skip_all)]
pub async fn host_profiles(pool: &Pool, host_ids: &[String]) -> Result<Vec<HostProfile>> {
    if host_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT id, stripe_account_id, stripe_connect_enabled FROM host_profiles \
         WHERE id IN ({})",
        placeholders(host_ids.len())
    );
    let mut query = sqlx::query(&sql);
    for id in host_ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(|row| HostProfile {
            id: row.get("id"),
            stripe_account_id: row
                .try_get::<Option<String>, _>("stripe_account_id")
                .ok()
                .flatten(),
            stripe_connect_enabled: row.get::<i64, _>("stripe_connect_enabled") != 0,
        })
        .collect())
}

fn campaign_from_row(row: &SqliteRow) -> Result<Campaign> {
    let id: String = row.get("id");
    let status_str: String = row.get("status");
    let status = CampaignStatus::parse(&status_str)
        .ok_or_else(|| anyhow!("campaign {} has unknown status {}", id, status_str))?;
    let selected_raw: String = row.get("selected_kiosk_ids");
    let selected_kiosk_ids: Vec<String> = serde_json::from_str(&selected_raw).unwrap_or_default();
    Ok(Campaign {
        id,
        name: row.get("name"),
        status,
        end_date: row.try_get("end_date").ok(),
        selected_kiosk_ids,
    })
}

/// Campaigns whose kiosk selection includes `kiosk_id`. The selection is a
/// JSON array column; the LIKE filter narrows candidates and the parsed array
/// gives the exact answer.
#[instrument(skip_all)]
pub async fn campaigns_for_kiosk(pool: &Pool, kiosk_id: &str) -> Result<Vec<Campaign>> {
    let pattern = format!("%\"{}\"%", kiosk_id);
    let rows = sqlx::query(
        "SELECT id, name, status, end_date, selected_kiosk_ids FROM campaigns \
         WHERE selected_kiosk_ids LIKE ? ORDER BY created_at ASC",
    )
    .bind(pattern)
    .fetch_all(pool)
    .await?;

    let mut campaigns = Vec::new();
    for row in &rows {
        let campaign = campaign_from_row(row)?;
        if campaign.selected_kiosk_ids.iter().any(|id| id == kiosk_id) {
            campaigns.push(campaign);
        }
    }
    Ok(campaigns)
}

fn asset_from_row(row: &SqliteRow) -> Result<MediaAsset> {
    let id: String = row.get("id");
    let status_str: String = row.get("status");
    let status = AssetStatus::parse(&status_str)
        .ok_or_else(|| anyhow!("asset {} has unknown status {}", id, status_str))?;
    let metadata = row
        .try_get::<Option<String>, _>("metadata")
        .ok()
        .flatten()
        .and_then(|raw| serde_json::from_str(&raw).ok());
    Ok(MediaAsset {
        id,
        campaign_id: row.get("campaign_id"),
        status,
        file_name: row.get("file_name"),
        file_url: row.try_get::<Option<String>, _>("file_url").ok().flatten(),
        file_path: row.try_get::<Option<String>, _>("file_path").ok().flatten(),
        metadata,
        drive_file_id: row
            .try_get::<Option<String>, _>("drive_file_id")
            .ok()
            .flatten(),
    })
}

#[instrument(skip_all)]
pub async fn approved_assets_for_campaigns(
    pool: &Pool,
    campaign_ids: &[String],
) -> Result<Vec<MediaAsset>> {
    if campaign_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT id, campaign_id, status, file_name, file_url, file_path, metadata, drive_file_id \
         FROM media_assets WHERE status = 'approved' AND campaign_id IN ({}) \
         ORDER BY created_at ASC",
        placeholders(campaign_ids.len())
    );
    let mut query = sqlx::query(&sql);
    for id in campaign_ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;
    rows.iter().map(asset_from_row).collect()
}

#[instrument(skip_all)]
pub async fn get_asset(pool: &Pool, asset_id: &str) -> Result<Option<MediaAsset>> {
    let row = sqlx::query(
        "SELECT id, campaign_id, status, file_name, file_url, file_path, metadata, drive_file_id \
         FROM media_assets WHERE id = ?",
    )
    .bind(asset_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(asset_from_row).transpose()
}

/// Persist the remote file id after first upload. Set once: an existing id is
/// left untouched.
#[instrument(skip_all)]
pub async fn set_asset_drive_file_id(pool: &Pool, asset_id: &str, file_id: &str) -> Result<()> {
    sqlx::query("UPDATE media_assets SET drive_file_id = ? WHERE id = ? AND drive_file_id IS NULL")
        .bind(file_id)
        .bind(asset_id)
        .execute(pool)
        .await?;
    Ok(())
}

fn mapping_from_row(row: &SqliteRow) -> FolderMapping {
    FolderMapping {
        id: row.get("id"),
        kiosk_id: row.get("kiosk_id"),
        drive_config_id: row.get("drive_config_id"),
        active_folder_id: row.get("active_folder_id"),
        archive_folder_id: row.get("archive_folder_id"),
    }
}

#[instrument(skip_all)]
pub async fn folder_mapping(pool: &Pool, kiosk_id: &str) -> Result<Option<FolderMapping>> {
    let row = sqlx::query(
        "SELECT id, kiosk_id, drive_config_id, active_folder_id, archive_folder_id \
         FROM kiosk_folder_mappings WHERE kiosk_id = ?",
    )
    .bind(kiosk_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(mapping_from_row))
}

#[instrument(skip_all)]
pub async fn all_folder_mappings(pool: &Pool) -> Result<Vec<FolderMapping>> {
    let rows = sqlx::query(
        "SELECT id, kiosk_id, drive_config_id, active_folder_id, archive_folder_id \
         FROM kiosk_folder_mappings ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(mapping_from_row).collect())
}

#[instrument(skip_all)]
pub async fn insert_folder_mapping(
    pool: &Pool,
    kiosk_id: &str,
    drive_config_id: &str,
    active_folder_id: &str,
    archive_folder_id: &str,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO kiosk_folder_mappings \
         (id, kiosk_id, drive_config_id, active_folder_id, archive_folder_id) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(kiosk_id)
    .bind(drive_config_id)
    .bind(active_folder_id)
    .bind(archive_folder_id)
    .execute(pool)
    .await?;
    Ok(id)
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let id: String = row.get("id");
    let kind_str: String = row.get("kind");
    let kind = JobKind::parse(&kind_str)
        .ok_or_else(|| anyhow!("job {} has unknown kind {}", id, kind_str))?;
    let status_str: String = row.get("status");
    let status = JobStatus::parse(&status_str)
        .ok_or_else(|| anyhow!("job {} has unknown status {}", id, status_str))?;
    Ok(Job {
        id,
        kind,
        status,
        kiosk_id: row.try_get::<Option<String>, _>("kiosk_id").ok().flatten(),
        asset_id: row.try_get::<Option<String>, _>("asset_id").ok().flatten(),
        folder_id: row.try_get::<Option<String>, _>("folder_id").ok().flatten(),
        retry_of: row.try_get::<Option<String>, _>("retry_of").ok().flatten(),
        files_synced: row.get("files_synced"),
        files_archived: row.get("files_archived"),
        files_activated: row.get("files_activated"),
        error_message: row
            .try_get::<Option<String>, _>("error_message")
            .ok()
            .flatten(),
        created_at: row.get("created_at"),
    })
}

const JOB_COLUMNS: &str = "id, kind, status, kiosk_id, asset_id, folder_id, retry_of, \
     files_synced, files_archived, files_activated, error_message, created_at";

#[instrument(skip_all)]
pub async fn enqueue_upload_job(pool: &Pool, asset_id: &str, folder_id: &str) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO jobs (id, kind, status, asset_id, folder_id) VALUES (?, 'upload', 'pending', ?, ?)")
        .bind(&id)
        .bind(asset_id)
        .bind(folder_id)
        .execute(pool)
        .await?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn enqueue_sync_job(pool: &Pool, kiosk_id: &str) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO jobs (id, kind, status, kiosk_id) VALUES (?, 'sync', 'pending', ?)")
        .bind(&id)
        .bind(kiosk_id)
        .execute(pool)
        .await?;
    Ok(id)
}

/// Whether a sync job for this kiosk is already queued or running. Used to
/// avoid piling up duplicate work on every scheduler tick.
#[instrument(skip_all)]
pub async fn has_open_sync_job(pool: &Pool, kiosk_id: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM jobs WHERE kind = 'sync' AND kiosk_id = ? \
         AND status IN ('pending', 'in_progress')",
    )
    .bind(kiosk_id)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

#[instrument(skip_all)]
pub async fn get_job(pool: &Pool, job_id: &str) -> Result<Option<Job>> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?");
    let row = sqlx::query(&sql).bind(job_id).fetch_optional(pool).await?;
    row.as_ref().map(job_from_row).transpose()
}

/// Oldest pending job, creation order.
#[instrument(skip_all)]
pub async fn next_pending_job(pool: &Pool) -> Result<Option<Job>> {
    let sql = format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'pending' \
         ORDER BY created_at ASC, id ASC LIMIT 1"
    );
    let row = sqlx::query(&sql).fetch_optional(pool).await?;
    row.as_ref().map(job_from_row).transpose()
}

/// Claim a pending job. The status guard makes the claim a no-op when the row
/// was cancelled (or grabbed) in the meantime.
#[instrument(skip_all)]
pub async fn mark_job_in_progress(pool: &Pool, job_id: &str) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE jobs SET status = 'in_progress', started_at = CURRENT_TIMESTAMP \
         WHERE id = ? AND status = 'pending'",
    )
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn complete_sync_job(
    pool: &Pool,
    job_id: &str,
    files_synced: i64,
    files_archived: i64,
    files_activated: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE jobs SET status = 'completed', files_synced = ?, files_archived = ?, \
         files_activated = ?, completed_at = CURRENT_TIMESTAMP \
         WHERE id = ? AND status = 'in_progress'",
    )
    .bind(files_synced)
    .bind(files_archived)
    .bind(files_activated)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn complete_upload_job(pool: &Pool, job_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE jobs SET status = 'completed', files_synced = 1, \
         completed_at = CURRENT_TIMESTAMP WHERE id = ? AND status = 'in_progress'",
    )
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn fail_job(pool: &Pool, job_id: &str, message: &str) -> Result<()> {
    sqlx::query(
        "UPDATE jobs SET status = 'failed', error_message = ?, \
         completed_at = CURRENT_TIMESTAMP WHERE id = ? AND status = 'in_progress'",
    )
    .bind(message)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Cancel a job from the admin surface. Allowed while pending or in progress;
/// cancelling an in-progress job only flips the row, the in-flight remote
/// call is not aborted.
#[instrument(skip_all)]
pub async fn cancel_job(pool: &Pool, job_id: &str) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE jobs SET status = 'cancelled', completed_at = CURRENT_TIMESTAMP \
         WHERE id = ? AND status IN ('pending', 'in_progress')",
    )
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Retry a failed job by inserting a fresh pending row that references the
/// failed predecessor. Terminal rows themselves are never mutated back.
#[instrument(skip_all)]
pub async fn retry_job(pool: &Pool, job_id: &str) -> Result<String> {
    let prior = get_job(pool, job_id)
        .await?
        .ok_or_else(|| anyhow!("job {} not found", job_id))?;
    if prior.status != JobStatus::Failed {
        return Err(anyhow!(
            "job {} is {}, only failed jobs can be retried",
            job_id,
            prior.status.as_str()
        ));
    }
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO jobs (id, kind, status, kiosk_id, asset_id, folder_id, retry_of) \
         VALUES (?, ?, 'pending', ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(prior.kind.as_str())
    .bind(&prior.kiosk_id)
    .bind(&prior.asset_id)
    .bind(&prior.folder_id)
    .bind(&prior.id)
    .execute(pool)
    .await?;
    Ok(id)
}
