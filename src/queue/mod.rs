//! Persistent job queue: atomic claim, worker pool, recovery of stuck
//! tasks, per-image deduplication and the `analyze_image`/`rebuild_vector`
//! task bodies. The claim/recovery SQL itself lives in `db::tasks`; this
//! module is the dispatch loop and task bodies built on top of it.

mod analyze;
pub mod payload;
mod worker;

pub use worker::{QueueContext, QueueHandle};

use crate::db::DbError;
use crate::embedding::EmbeddingError;
use crate::models::{ImageId, TaskType};
use crate::storage::StorageError;
use crate::vision::VisionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("vision adapter error: {0}")]
    Vision(#[from] VisionError),

    #[error("embedding adapter error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("image {0} not found")]
    ImageNotFound(ImageId),

    #[error("no readable bytes for image {0}: all endpoints and original_url exhausted")]
    BytesUnavailable(ImageId),

    #[error("malformed task payload: {0}")]
    BadPayload(#[from] serde_json::Error),

    #[error("{0:?} is not dispatched by the queue worker pool")]
    UnsupportedTaskType(TaskType),
}

/// Task types the fixed worker pool claims. `storage_sync` / `storage_unlink`
/// / `storage_delete` run through `background` instead — they are started
/// directly by the admin surface, not polled for.
pub const QUEUE_TASK_TYPES: [TaskType; 2] = [TaskType::AnalyzeImage, TaskType::RebuildVector];
