use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Campaign status as written by the external scheduler. Consumed read-only:
/// `active`/`pending` campaigns keep their creative in the active folder,
/// `completed`/`paused` campaigns retire it to the archive folder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CampaignStatus {
    Draft,
    Pending,
    Active,
    Paused,
    Completed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Pending => "pending",
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(CampaignStatus::Draft),
            "pending" => Some(CampaignStatus::Pending),
            "active" => Some(CampaignStatus::Active),
            "paused" => Some(CampaignStatus::Paused),
            "completed" => Some(CampaignStatus::Completed),
            _ => None,
        }
    }

    /// Creative should be displayed: belongs in the active folder.
    pub fn is_current(&self) -> bool {
        matches!(self, CampaignStatus::Active | CampaignStatus::Pending)
    }

    /// Creative is retired: belongs in the archive folder.
    pub fn is_expired(&self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Paused)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AssetStatus {
    Pending,
    Approved,
    Rejected,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Pending => "pending",
            AssetStatus::Approved => "approved",
            AssetStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AssetStatus::Pending),
            "approved" => Some(AssetStatus::Approved),
            "rejected" => Some(AssetStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobKind {
    Upload,
    Sync,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Upload => "upload",
            JobKind::Sync => "sync",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upload" => Some(JobKind::Upload),
            "sync" => Some(JobKind::Sync),
            _ => None,
        }
    }
}

/// Closed job workflow. Terminal rows are never resurrected; a retry is a
/// fresh `pending` row pointing at its predecessor via `retry_of`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "in_progress" => Some(JobStatus::InProgress),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Allowed-transition table. Cancellation is permitted while in progress,
    /// but it only flips the row; the in-flight remote call is not aborted.
    pub fn can_transition(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Pending, InProgress)
                | (Pending, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Cancelled)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kiosk {
    pub id: String,
    pub name: String,
    pub location: Option<String>,
    pub host_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Active host↔kiosk link. `commission_rate` is a percentage; callers clamp
/// it to [0,100] and fall back to the platform default when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostAssignment {
    pub kiosk_id: String,
    pub host_id: String,
    pub commission_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostProfile {
    pub id: String,
    pub stripe_account_id: Option<String>,
    pub stripe_connect_enabled: bool,
}

impl HostProfile {
    /// A host can receive a split only with a connected account present and
    /// the connect flag enabled.
    pub fn is_payable(&self) -> bool {
        self.stripe_connect_enabled
            && self
                .stripe_account_id
                .as_deref()
                .is_some_and(|id| !id.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub status: CampaignStatus,
    pub end_date: Option<DateTime<Utc>>,
    pub selected_kiosk_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAsset {
    pub id: String,
    pub campaign_id: String,
    pub status: AssetStatus,
    pub file_name: String,
    pub file_url: Option<String>,
    pub file_path: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub drive_file_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderMapping {
    pub id: String,
    pub kiosk_id: String,
    pub drive_config_id: String,
    pub active_folder_id: String,
    pub archive_folder_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub kiosk_id: Option<String>,
    pub asset_id: Option<String>,
    pub folder_id: Option<String>,
    pub retry_of: Option<String>,
    pub files_synced: i64,
    pub files_archived: i64,
    pub files_activated: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}
