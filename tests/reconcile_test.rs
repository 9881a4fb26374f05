use anyhow::{anyhow, Result};
use async_trait::async_trait;
use kioskflow::db;
use kioskflow::drive::{DriveFile, DriveService};
use kioskflow::jobs::{enqueue_due_sync_jobs, process_next_job};
use kioskflow::model::{FolderMapping, JobStatus};
use kioskflow::reconcile::{provision_kiosk_folders, reconcile_kiosk};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MoveCall {
    file_id: String,
    from: String,
    to: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct UploadCall {
    name: String,
    mime: String,
    parent: String,
    size: usize,
}

#[derive(Clone, Default)]
struct RecordingDrive {
    move_responses: Arc<Mutex<VecDeque<Result<()>>>>,
    moves: Arc<Mutex<Vec<MoveCall>>>,
    uploads: Arc<Mutex<Vec<UploadCall>>>,
    folders: Arc<Mutex<Vec<String>>>,
    downloads: Arc<Mutex<Vec<String>>>,
}

impl RecordingDrive {
    fn with_move_responses(responses: Vec<Result<()>>) -> Self {
        Self {
            move_responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    async fn moves(&self) -> Vec<MoveCall> {
        self.moves.lock().await.clone()
    }

    async fn uploads(&self) -> Vec<UploadCall> {
        self.uploads.lock().await.clone()
    }
}

#[async_trait]
impl DriveService for RecordingDrive {
    async fn list_children(&self, _folder_id: &str) -> Result<Vec<DriveFile>> {
        Ok(Vec::new())
    }

    async fn create_folder(&self, name: &str, _parent_id: &str) -> Result<String> {
        let mut folders = self.folders.lock().await;
        folders.push(name.to_string());
        Ok(format!("folder-{}", folders.len()))
    }

    async fn upload_file(
        &self,
        name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
        parent_id: &str,
    ) -> Result<String> {
        let mut uploads = self.uploads.lock().await;
        uploads.push(UploadCall {
            name: name.to_string(),
            mime: mime_type.to_string(),
            parent: parent_id.to_string(),
            size: bytes.len(),
        });
        Ok(format!("gd-upload-{}", uploads.len()))
    }

    async fn move_file(&self, file_id: &str, from_parent: &str, to_parent: &str) -> Result<()> {
        self.moves.lock().await.push(MoveCall {
            file_id: file_id.to_string(),
            from: from_parent.to_string(),
            to: to_parent.to_string(),
        });
        self.move_responses
            .lock()
            .await
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        self.downloads.lock().await.push(url.to_string());
        Ok(b"downloaded-bytes".to_vec())
    }
}

fn mapping(kiosk_id: &str) -> FolderMapping {
    FolderMapping {
        id: "m1".into(),
        kiosk_id: kiosk_id.into(),
        drive_config_id: "cfg1".into(),
        active_folder_id: "folder-active".into(),
        archive_folder_id: "folder-archive".into(),
    }
}

async fn seed_campaign(pool: &sqlx::SqlitePool, id: &str, status: &str, kiosks: &[&str]) {
    let selection = serde_json::to_string(kiosks).unwrap();
    sqlx::query("INSERT INTO campaigns (id, name, status, selected_kiosk_ids) VALUES (?, ?, ?, ?)")
        .bind(id)
        .bind(format!("Campaign {}", id))
        .bind(status)
        .bind(selection)
        .execute(pool)
        .await
        .unwrap();
}

async fn seed_asset(
    pool: &sqlx::SqlitePool,
    id: &str,
    campaign_id: &str,
    status: &str,
    drive_file_id: Option<&str>,
) {
    sqlx::query(
        "INSERT INTO media_assets (id, campaign_id, status, file_name, drive_file_id) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(campaign_id)
    .bind(status)
    .bind(format!("{}.jpg", id))
    .bind(drive_file_id)
    .execute(pool)
    .await
    .unwrap();
}

async fn seed_mapping(pool: &sqlx::SqlitePool, kiosk_id: &str) {
    sqlx::query(
        "INSERT INTO kiosk_folder_mappings \
         (id, kiosk_id, drive_config_id, active_folder_id, archive_folder_id) \
         VALUES (?, ?, 'cfg1', 'folder-active', 'folder-archive')",
    )
    .bind(format!("map-{}", kiosk_id))
    .bind(kiosk_id)
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn completed_campaign_archives_its_asset() {
    let pool = setup_pool().await;
    let drive = RecordingDrive::default();

    seed_campaign(&pool, "c1", "completed", &["k1"]).await;
    seed_asset(&pool, "a1", "c1", "approved", Some("gd-a1")).await;

    let outcome = reconcile_kiosk(&pool, &drive, &mapping("k1")).await.unwrap();
    assert_eq!(outcome.files_archived, 1);
    assert_eq!(outcome.files_activated, 0);
    assert_eq!(outcome.files_synced, 1);

    let moves = drive.moves().await;
    assert_eq!(
        moves,
        vec![MoveCall {
            file_id: "gd-a1".into(),
            from: "folder-active".into(),
            to: "folder-archive".into(),
        }]
    );
}

#[tokio::test]
async fn active_campaign_activates_its_asset() {
    let pool = setup_pool().await;
    let drive = RecordingDrive::default();

    seed_campaign(&pool, "c1", "active", &["k1"]).await;
    seed_asset(&pool, "a1", "c1", "approved", Some("gd-a1")).await;

    let outcome = reconcile_kiosk(&pool, &drive, &mapping("k1")).await.unwrap();
    assert_eq!(outcome.files_activated, 1);
    assert_eq!(outcome.files_archived, 0);

    let moves = drive.moves().await;
    assert_eq!(moves[0].from, "folder-archive");
    assert_eq!(moves[0].to, "folder-active");
}

#[tokio::test]
async fn reconcile_is_idempotent() {
    let pool = setup_pool().await;
    let drive = RecordingDrive::default();

    seed_campaign(&pool, "c1", "active", &["k1"]).await;
    seed_asset(&pool, "a1", "c1", "approved", Some("gd-a1")).await;

    let first = reconcile_kiosk(&pool, &drive, &mapping("k1")).await.unwrap();
    let second = reconcile_kiosk(&pool, &drive, &mapping("k1")).await.unwrap();
    assert_eq!(first, second);

    // Both passes issue the identical absolute reparent.
    let moves = drive.moves().await;
    assert_eq!(moves.len(), 2);
    assert_eq!(moves[0], moves[1]);
}

#[tokio::test]
async fn asset_without_drive_file_id_is_skipped() {
    let pool = setup_pool().await;
    let drive = RecordingDrive::default();

    seed_campaign(&pool, "c1", "completed", &["k1"]).await;
    seed_asset(&pool, "a1", "c1", "approved", None).await;
    seed_asset(&pool, "a2", "c1", "approved", Some("gd-a2")).await;

    let outcome = reconcile_kiosk(&pool, &drive, &mapping("k1")).await.unwrap();
    assert_eq!(outcome.files_synced, 1);
    assert_eq!(outcome.files_archived, 1);

    let moves = drive.moves().await;
    assert_eq!(moves.len(), 1);
    assert_eq!(moves[0].file_id, "gd-a2");
}

#[tokio::test]
async fn non_approved_assets_are_ignored() {
    let pool = setup_pool().await;
    let drive = RecordingDrive::default();

    seed_campaign(&pool, "c1", "active", &["k1"]).await;
    seed_asset(&pool, "a1", "c1", "pending", Some("gd-a1")).await;
    seed_asset(&pool, "a2", "c1", "rejected", Some("gd-a2")).await;

    let outcome = reconcile_kiosk(&pool, &drive, &mapping("k1")).await.unwrap();
    assert_eq!(outcome.files_synced, 0);
    assert!(drive.moves().await.is_empty());
}

#[tokio::test]
async fn failed_move_does_not_abort_the_pass() {
    let pool = setup_pool().await;
    let drive =
        RecordingDrive::with_move_responses(vec![Err(anyhow!("rate limited")), Ok(())]);

    seed_campaign(&pool, "c1", "completed", &["k1"]).await;
    seed_asset(&pool, "a1", "c1", "approved", Some("gd-a1")).await;
    seed_asset(&pool, "a2", "c1", "approved", Some("gd-a2")).await;

    let outcome = reconcile_kiosk(&pool, &drive, &mapping("k1")).await.unwrap();
    assert_eq!(outcome.files_archived, 1);
    assert_eq!(drive.moves().await.len(), 2);
}

#[tokio::test]
async fn sync_job_records_counts() {
    let pool = setup_pool().await;
    let drive = RecordingDrive::default();

    seed_mapping(&pool, "k1").await;
    seed_campaign(&pool, "c1", "completed", &["k1"]).await;
    seed_asset(&pool, "a1", "c1", "approved", Some("gd-a1")).await;

    let job_id = db::enqueue_sync_job(&pool, "k1").await.unwrap();
    let processed = process_next_job(&pool, &drive, "").await.unwrap();
    assert!(processed);

    let job = db::get_job(&pool, &job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.files_archived, 1);
    assert_eq!(job.files_synced, 1);

    // queue drained
    assert!(!process_next_job(&pool, &drive, "").await.unwrap());
}

#[tokio::test]
async fn sync_job_without_mapping_is_a_noop() {
    let pool = setup_pool().await;
    let drive = RecordingDrive::default();

    let job_id = db::enqueue_sync_job(&pool, "unmapped").await.unwrap();
    assert!(process_next_job(&pool, &drive, "").await.unwrap());

    let job = db::get_job(&pool, &job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.files_synced, 0);
    assert!(drive.moves().await.is_empty());
}

#[tokio::test]
async fn upload_job_uploads_and_persists_file_id() {
    let pool = setup_pool().await;
    let drive = RecordingDrive::default();

    seed_campaign(&pool, "c1", "active", &["k1"]).await;
    sqlx::query(
        "INSERT INTO media_assets (id, campaign_id, status, file_name, file_url) \
         VALUES ('a1', 'c1', 'approved', 'creative.png', 'https://cdn.example/creative.png')",
    )
    .execute(&pool)
    .await
    .unwrap();

    let job_id = db::enqueue_upload_job(&pool, "a1", "folder-active").await.unwrap();
    assert!(process_next_job(&pool, &drive, "").await.unwrap());

    let job = db::get_job(&pool, &job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let asset = db::get_asset(&pool, "a1").await.unwrap().unwrap();
    assert_eq!(asset.drive_file_id.as_deref(), Some("gd-upload-1"));

    let uploads = drive.uploads().await;
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].name, "creative.png");
    assert_eq!(uploads[0].mime, "image/png");
    assert_eq!(uploads[0].parent, "folder-active");
    assert_eq!(uploads[0].size, b"downloaded-bytes".len());
}

#[tokio::test]
async fn upload_job_without_source_fails_in_isolation() {
    let pool = setup_pool().await;
    let drive = RecordingDrive::default();

    seed_campaign(&pool, "c1", "active", &["k1"]).await;
    // no file_url, no file_path, no metadata: nothing to fetch
    seed_asset(&pool, "a1", "c1", "approved", None).await;
    sqlx::query(
        "INSERT INTO media_assets (id, campaign_id, status, file_name, file_url) \
         VALUES ('a2', 'c1', 'approved', 'ok.jpg', 'https://cdn.example/ok.jpg')",
    )
    .execute(&pool)
    .await
    .unwrap();

    let bad_job = db::enqueue_upload_job(&pool, "a1", "folder-active").await.unwrap();
    let good_job = db::enqueue_upload_job(&pool, "a2", "folder-active").await.unwrap();

    assert!(process_next_job(&pool, &drive, "").await.unwrap());
    assert!(process_next_job(&pool, &drive, "").await.unwrap());

    let bad = db::get_job(&pool, &bad_job).await.unwrap().unwrap();
    assert_eq!(bad.status, JobStatus::Failed);
    assert!(bad
        .error_message
        .as_deref()
        .unwrap()
        .contains("no resolvable content source"));

    let good = db::get_job(&pool, &good_job).await.unwrap().unwrap();
    assert_eq!(good.status, JobStatus::Completed);
}

#[tokio::test]
async fn scheduler_tick_skips_kiosks_with_open_jobs() {
    let pool = setup_pool().await;

    seed_mapping(&pool, "k1").await;
    seed_mapping(&pool, "k2").await;

    let first = enqueue_due_sync_jobs(&pool).await.unwrap();
    assert_eq!(first, 2);

    // nothing new while the first round is still pending
    let second = enqueue_due_sync_jobs(&pool).await.unwrap();
    assert_eq!(second, 0);
}

#[tokio::test]
async fn provision_creates_folder_pair_and_mapping() {
    let pool = setup_pool().await;
    let drive = RecordingDrive::default();

    let mapping = provision_kiosk_folders(&pool, &drive, "k1", "Mall Kiosk", "cfg1", "root")
        .await
        .unwrap();
    assert_eq!(mapping.active_folder_id, "folder-1");
    assert_eq!(mapping.archive_folder_id, "folder-2");

    let folders = drive.folders.lock().await.clone();
    assert_eq!(
        folders,
        vec!["Mall Kiosk - Active".to_string(), "Mall Kiosk - Archive".to_string()]
    );

    let stored = db::folder_mapping(&pool, "k1").await.unwrap().unwrap();
    assert_eq!(stored.active_folder_id, "folder-1");
    assert_eq!(stored.archive_folder_id, "folder-2");
}

#[tokio::test]
async fn retried_job_runs_as_a_fresh_row() {
    let pool = setup_pool().await;
    let drive = RecordingDrive::default();

    // An upload job for a missing asset fails its row.
    let job_id = db::enqueue_upload_job(&pool, "missing-asset", "folder-active")
        .await
        .unwrap();
    assert!(process_next_job(&pool, &drive, "").await.unwrap());
    let failed = db::get_job(&pool, &job_id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);

    let retry_id = db::retry_job(&pool, &job_id).await.unwrap();
    let retry = db::get_job(&pool, &retry_id).await.unwrap().unwrap();
    assert_eq!(retry.status, JobStatus::Pending);
    assert_eq!(retry.retry_of.as_deref(), Some(job_id.as_str()));
    assert_eq!(retry.asset_id.as_deref(), Some("missing-asset"));

    // The original row stays failed.
    let original = db::get_job(&pool, &job_id).await.unwrap().unwrap();
    assert_eq!(original.status, JobStatus::Failed);
}
