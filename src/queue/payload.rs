//! Typed task payloads. The `tasks` row keeps `payload`/`result` as JSON
//! (see `db::tasks`), but every producer and consumer in this crate goes
//! through one of these structs rather than touching `serde_json::Value`
//! fields by name.

use crate::models::{EndpointId, ImageId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeImagePayload {
    pub image_id: ImageId,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildVectorPayload {
    pub image_id: ImageId,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSyncPayload {
    pub source_endpoint_id: EndpointId,
    pub target_endpoint_id: EndpointId,
    /// `None` means "every image currently on the source endpoint".
    pub image_ids: Option<Vec<ImageId>>,
    pub force_overwrite: bool,
    pub batch_index: u32,
    pub total_batches: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageUnlinkPayload {
    pub endpoint_id: EndpointId,
    pub delete_files: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageDeletePayload {
    pub endpoint_id: EndpointId,
}

/// Serialization helper: every payload struct round-trips through
/// `serde_json::Value` the same way, so callers don't repeat
/// `serde_json::to_value(...).unwrap()` at each call site.
pub fn to_json<T: Serialize>(payload: &T) -> serde_json::Value {
    serde_json::to_value(payload).expect("task payload is always representable as JSON")
}

pub fn from_json<T: for<'de> Deserialize<'de>>(
    value: &serde_json::Value,
) -> Result<T, serde_json::Error> {
    serde_json::from_value(value.clone())
}
