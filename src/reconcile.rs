//! Drive folder lifecycle reconciler.
//!
//! An approved asset belongs in the kiosk's active folder while its campaign
//! is running (`active`/`pending`) and in the archive folder once the
//! campaign is `completed`/`paused`. Moves are issued unconditionally; the
//! remote reparent is absolute, so repeating a move is harmless.

use crate::db::{self, Pool};
use crate::drive::DriveService;
use crate::model::{FolderMapping, MediaAsset};
use anyhow::Result;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub files_synced: i64,
    pub files_archived: i64,
    pub files_activated: i64,
}

/// Bring one kiosk's folders in line with its campaigns' statuses. A failed
/// or unresolvable move is logged and skipped; it never aborts the pass.
#[instrument(skip_all, fields(kiosk_id = %mapping.kiosk_id))]
pub async fn reconcile_kiosk(
    pool: &Pool,
    drive: &dyn DriveService,
    mapping: &FolderMapping,
) -> Result<ReconcileOutcome> {
    let campaigns = db::campaigns_for_kiosk(pool, &mapping.kiosk_id).await?;

    let current_ids: Vec<String> = campaigns
        .iter()
        .filter(|c| c.status.is_current())
        .map(|c| c.id.clone())
        .collect();
    let expired_ids: Vec<String> = campaigns
        .iter()
        .filter(|c| c.status.is_expired())
        .map(|c| c.id.clone())
        .collect();

    let current_assets = db::approved_assets_for_campaigns(pool, &current_ids).await?;
    let expired_assets = db::approved_assets_for_campaigns(pool, &expired_ids).await?;

    let mut outcome = ReconcileOutcome::default();

    for asset in &current_assets {
        if move_asset(
            drive,
            asset,
            &mapping.archive_folder_id,
            &mapping.active_folder_id,
        )
        .await
        {
            outcome.files_activated += 1;
            outcome.files_synced += 1;
        }
    }

    for asset in &expired_assets {
        if move_asset(
            drive,
            asset,
            &mapping.active_folder_id,
            &mapping.archive_folder_id,
        )
        .await
        {
            outcome.files_archived += 1;
            outcome.files_synced += 1;
        }
    }

    info!(
        synced = outcome.files_synced,
        archived = outcome.files_archived,
        activated = outcome.files_activated,
        "reconciled kiosk folders"
    );
    Ok(outcome)
}

/// Issue one reparent. Returns whether the move counted.
async fn move_asset(
    drive: &dyn DriveService,
    asset: &MediaAsset,
    from_folder: &str,
    to_folder: &str,
) -> bool {
    let Some(file_id) = asset.drive_file_id.as_deref() else {
        // Never uploaded; nothing to move.
        warn!(asset_id = %asset.id, file = %asset.file_name, "asset has no drive file id; skipping");
        return false;
    };
    match drive.move_file(file_id, from_folder, to_folder).await {
        Ok(()) => true,
        Err(err) => {
            warn!(?err, asset_id = %asset.id, file = %asset.file_name, "failed to move asset");
            false
        }
    }
}

/// Admin operation: provision the active/archive folder pair for a kiosk and
/// persist the mapping the reconciler consumes.
#[instrument(skip_all, fields(kiosk_id = kiosk_id))]
pub async fn provision_kiosk_folders(
    pool: &Pool,
    drive: &dyn DriveService,
    kiosk_id: &str,
    kiosk_name: &str,
    drive_config_id: &str,
    parent_folder_id: &str,
) -> Result<FolderMapping> {
    let active_folder_id = drive
        .create_folder(&format!("{} - Active", kiosk_name), parent_folder_id)
        .await?;
    let archive_folder_id = drive
        .create_folder(&format!("{} - Archive", kiosk_name), parent_folder_id)
        .await?;
    let id = db::insert_folder_mapping(
        pool,
        kiosk_id,
        drive_config_id,
        &active_folder_id,
        &archive_folder_id,
    )
    .await?;
    Ok(FolderMapping {
        id,
        kiosk_id: kiosk_id.to_string(),
        drive_config_id: drive_config_id.to_string(),
        active_folder_id,
        archive_folder_id,
    })
}
