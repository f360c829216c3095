//! Worker pool: claims tasks one at a time per worker, dispatches by
//! type, never lets a task body's error escape to the caller.
//! `QueueHandle` is the admin-facing surface (`start`,
//! `stop`, `enqueue_analyze`, `clear_pending`, ...).

use super::{QUEUE_TASK_TYPES, QueueError, payload};
use crate::config::AppConfig;
use crate::db::Database;
use crate::embedding::EmbeddingAdapter;
use crate::models::{ImageId, TaskStatus, TaskType};
use crate::storage::StorageRegistry;
use crate::vision::VisionAdapter;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Everything a worker needs to dispatch a task body. Constructed once at
/// startup; collaborators are passed in, not looked up through a global.
pub struct QueueContext {
    pub db: Arc<Database>,
    pub storage: Arc<StorageRegistry>,
    pub vision: Arc<dyn VisionAdapter>,
    pub embedding: Arc<dyn EmbeddingAdapter>,
    pub http: reqwest::Client,
    pub config: Arc<AppConfig>,
}

/// Admin-facing queue surface: start/stop the worker pool, enqueue work,
/// clear/retry. Cloning is cheap; every clone shares the same pool state.
#[derive(Clone)]
pub struct QueueHandle {
    ctx: Arc<QueueContext>,
    running: Arc<AtomicBool>,
    workers: Arc<std::sync::Mutex<Vec<JoinHandle<()>>>>,
}

impl QueueHandle {
    pub fn new(ctx: QueueContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            running: Arc::new(AtomicBool::new(false)),
            workers: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Resets stuck `processing` rows and spawns `queue_max_workers`
    /// worker loops. Idempotent: calling `start` while already running is
    /// a no-op.
    pub async fn start(&self) -> Result<u64, QueueError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(0);
        }

        let reset = self
            .ctx
            .db
            .reset_stuck_tasks(&QUEUE_TASK_TYPES, self.ctx.config.stuck_task_minutes)
            .await?;
        if reset > 0 {
            tracing::info!(count = reset, "reset stuck tasks to pending on startup");
        }

        let mut guard = self.workers.lock().unwrap();
        for worker_id in 0..self.ctx.config.queue_max_workers {
            let ctx = self.ctx.clone();
            let running = self.running.clone();
            guard.push(tokio::spawn(worker_loop(worker_id, ctx, running)));
        }
        Ok(reset)
    }

    /// Signals every worker to stop after its current claim attempt and
    /// waits for them to exit.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handles: Vec<_> = {
            let mut guard = self.workers.lock().unwrap();
            guard.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Enqueues `analyze_image` tasks for each id in `image_ids`, skipping
    /// ids that already have a pending/processing row. Returns the count
    /// actually added.
    pub async fn enqueue_analyze(
        &self,
        image_ids: &[ImageId],
        callback_url: Option<&str>,
    ) -> Result<usize, QueueError> {
        let mut added = 0usize;
        for &image_id in image_ids {
            if self
                .ctx
                .db
                .has_pending_for_image(image_id, &QUEUE_TASK_TYPES)
                .await?
            {
                continue;
            }
            let p = payload::AnalyzeImagePayload {
                image_id,
                callback_url: callback_url.map(str::to_string),
            };
            self.ctx
                .db
                .create_task(TaskType::AnalyzeImage, &payload::to_json(&p))
                .await?;
            added += 1;
        }
        Ok(added)
    }

    pub async fn enqueue_rebuild_vector(&self, image_id: ImageId) -> Result<bool, QueueError> {
        if self
            .ctx
            .db
            .has_pending_for_image(image_id, &QUEUE_TASK_TYPES)
            .await?
        {
            return Ok(false);
        }
        let p = payload::RebuildVectorPayload {
            image_id,
            callback_url: None,
        };
        self.ctx
            .db
            .create_task(TaskType::RebuildVector, &payload::to_json(&p))
            .await?;
        Ok(true)
    }

    pub async fn clear_pending(&self) -> Result<u64, QueueError> {
        Ok(self.ctx.db.delete_by_status(TaskStatus::Pending).await?)
    }

    pub async fn clear_completed(&self) -> Result<u64, QueueError> {
        let a = self.ctx.db.delete_by_status(TaskStatus::Completed).await?;
        let b = self.ctx.db.delete_by_status(TaskStatus::Failed).await?;
        Ok(a + b)
    }

    /// Resets a failed task back to `pending` so a worker retries it.
    pub async fn retry(&self, id: Uuid) -> Result<bool, QueueError> {
        let Some(task) = self.ctx.db.get_task(id).await? else {
            return Ok(false);
        };
        if task.status != TaskStatus::Failed {
            return Ok(false);
        }
        self.ctx
            .db
            .update_status(id, TaskStatus::Pending, None, None)
            .await?;
        Ok(true)
    }

    pub async fn status(&self) -> Result<Vec<(TaskType, i64, i64, i64, i64, i64)>, QueueError> {
        Ok(self.ctx.db.get_stats_by_type(&QUEUE_TASK_TYPES).await?)
    }

    pub fn context(&self) -> Arc<QueueContext> {
        self.ctx.clone()
    }
}

async fn worker_loop(worker_id: usize, ctx: Arc<QueueContext>, running: Arc<AtomicBool>) {
    tracing::info!(worker_id, "queue worker started");
    while running.load(Ordering::SeqCst) {
        match ctx.db.claim_next_task(&QUEUE_TASK_TYPES).await {
            Ok(Some(task)) => {
                let task_id = task.id;
                let task_type = task.task_type;
                let result = super::analyze::dispatch(&ctx, &task).await;
                match result {
                    Ok(result_json) => {
                        if let Err(e) = ctx
                            .db
                            .update_status(task_id, TaskStatus::Completed, Some(&result_json), None)
                            .await
                        {
                            tracing::error!(%task_id, error = %e, "failed to persist task completion");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(%task_id, ?task_type, error = %e, "task failed");
                        if let Err(e) = ctx
                            .db
                            .update_status(task_id, TaskStatus::Failed, None, Some(&e.to_string()))
                            .await
                        {
                            tracing::error!(%task_id, error = %e, "failed to persist task failure");
                        }
                    }
                }
                tokio::time::sleep(ctx.config.queue_batch_interval).await;
            }
            Ok(None) => {
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            }
            Err(e) => {
                tracing::error!(worker_id, error = %e, "claim failed");
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            }
        }
    }
    tracing::info!(worker_id, "queue worker stopped");
}
