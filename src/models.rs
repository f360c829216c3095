//! Domain entities shared across the db, storage, queue, tag and search
//! modules. Persistence-agnostic: these are the Rust shapes the `db` module
//! hydrates rows into, not the row types themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ImageId = i64;
pub type EndpointId = i64;
pub type TagId = i64;
pub type UserId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: ImageId,
    pub file_hash: String,
    pub file_type: String,
    pub file_size_mb: f64,
    pub width: i32,
    pub height: i32,
    pub description: String,
    pub embedding: Option<Vec<f32>>,
    pub original_url: Option<String>,
    pub uploaded_by: Option<UserId>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Image {
    /// Deterministic resolution class for this image's longest side.
    pub fn resolution_class(&self) -> &'static str {
        resolution_class_for(self.width.max(self.height))
    }
}

pub fn resolution_class_for(longest_side: i32) -> &'static str {
    match longest_side {
        l if l >= 7680 => "8K",
        l if l >= 3840 => "4K",
        l if l >= 2560 => "2K",
        l if l >= 1920 => "1080p",
        l if l >= 1280 => "720p",
        _ => "SD",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    Local,
    S3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointRole {
    Primary,
    Mirror,
    Backup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEndpoint {
    pub id: EndpointId,
    pub name: String,
    pub provider: StorageProvider,
    pub endpoint_url: Option<String>,
    pub region: String,
    pub bucket_name: String,
    pub path_style: bool,
    pub path_prefix: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub public_url_prefix: Option<String>,
    pub role: EndpointRole,
    pub is_enabled: bool,
    pub is_default_upload: bool,
    pub auto_sync_enabled: bool,
    pub sync_from_endpoint_id: Option<EndpointId>,
    pub read_priority: i32,
    pub read_weight: i32,
    pub is_healthy: bool,
    pub last_health_check: Option<DateTime<Utc>>,
    pub health_check_error: Option<String>,
}

impl StorageEndpoint {
    /// The built-in local endpoint; may never be deleted.
    pub const LOCAL_ID: EndpointId = 1;

    pub fn has_credentials(&self) -> bool {
        self.access_key_id.is_some() && self.secret_access_key.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageLocation {
    pub id: i64,
    pub image_id: ImageId,
    pub endpoint_id: EndpointId,
    pub object_key: String,
    pub is_primary: bool,
    pub sync_status: SyncStatus,
    pub sync_error: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagSource {
    System,
    Ai,
    User,
}

impl TagSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagSource::System => "system",
            TagSource::Ai => "ai",
            TagSource::User => "user",
        }
    }
}

impl std::str::FromStr for TagSource {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(TagSource::System),
            "ai" => Ok(TagSource::Ai),
            "user" => Ok(TagSource::User),
            _ => Err(()),
        }
    }
}

/// Tag hierarchy tier. 0 = category, 1 = resolution, 2 = normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagLevel(pub i16);

impl TagLevel {
    pub const CATEGORY: TagLevel = TagLevel(0);
    pub const RESOLUTION: TagLevel = TagLevel(1);
    pub const NORMAL: TagLevel = TagLevel(2);
}

/// The fixed resolution vocabulary, in display order.
pub const RESOLUTION_NAMES: [&str; 6] = ["8K", "4K", "2K", "1080p", "720p", "SD"];

/// Default category id, applied when no category is supplied on ingest.
pub const UNCLASSIFIED_CATEGORY_ID: TagId = 10;
pub const UNCLASSIFIED_CATEGORY_NAME: &str = "unclassified";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    pub level: TagLevel,
    pub source: TagSource,
    pub description: Option<String>,
    pub sort_order: i32,
    pub usage_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTag {
    pub image_id: ImageId,
    pub tag_id: TagId,
    pub source: TagSource,
    pub added_by: Option<UserId>,
    pub sort_order: i32,
    pub added_at: DateTime<Utc>,
}

/// A tag association paired with its resolved name, as returned to callers
/// that need to display or diff associations without a second round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTagView {
    pub tag_id: TagId,
    pub name: String,
    pub level: TagLevel,
    pub source: TagSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    AnalyzeImage,
    RebuildVector,
    StorageSync,
    StorageDelete,
    StorageUnlink,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::AnalyzeImage => "analyze_image",
            TaskType::RebuildVector => "rebuild_vector",
            TaskType::StorageSync => "storage_sync",
            TaskType::StorageDelete => "storage_delete",
            TaskType::StorageUnlink => "storage_unlink",
        }
    }

    /// Task types for which at most one pending/processing row per
    /// `image_id` may exist at a time.
    pub fn is_per_image_exclusive(&self) -> bool {
        matches!(self, TaskType::AnalyzeImage | TaskType::RebuildVector)
    }
}

impl std::str::FromStr for TaskType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analyze_image" => Ok(TaskType::AnalyzeImage),
            "rebuild_vector" => Ok(TaskType::RebuildVector),
            "storage_sync" => Ok(TaskType::StorageSync),
            "storage_delete" => Ok(TaskType::StorageDelete),
            "storage_unlink" => Ok(TaskType::StorageUnlink),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: uuid::Uuid,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
