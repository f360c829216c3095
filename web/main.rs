//! HTTP transport binary. Thin orchestration over `imgtag_core`: builds
//! the shared collaborators (`Database`, `StorageRegistry`, vision/
//! embedding adapters, `QueueHandle`) once at startup, starts the queue
//! worker pool, and mounts the route table. No business logic lives in
//! this crate — every handler in `image`/`tag`/`admin` delegates straight
//! into `imgtag_core`.

mod admin;
mod error;
mod image;
mod tag;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::Router;
use imgtag_core::config::AppConfig;
use imgtag_core::db::{Database, Pool};
use imgtag_core::queue::{QueueContext, QueueHandle};
use imgtag_core::storage::StorageRegistry;
use imgtag_core::{embedding, vision};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub storage: Arc<StorageRegistry>,
    pub queue: QueueHandle,
    pub embedding: Arc<dyn embedding::EmbeddingAdapter>,
    pub http: reqwest::Client,
    pub config: Arc<AppConfig>,
}

impl AppState {
    async fn build(config: AppConfig) -> Self {
        let pool = Pool::connect(&config.database_url)
            .await
            .expect("failed to connect to DATABASE_URL");
        let db = Database::new(pool);
        db.migrate().await.expect("migrations failed");
        let db = Arc::new(db);

        let storage = Arc::new(StorageRegistry::new(config.storage_base_dir.clone()));
        let embedding_adapter = embedding::adapter_from_config(&config);
        let vision_adapter = vision::adapter_from_config(&config);
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.callback_timeout_seconds))
            .build()
            .expect("http client always buildable with a plain timeout");
        let config = Arc::new(config);

        let queue = QueueHandle::new(QueueContext {
            db: db.clone(),
            storage: storage.clone(),
            vision: vision_adapter,
            embedding: embedding_adapter.clone(),
            http: http.clone(),
            config: config.clone(),
        });

        Self {
            db,
            storage,
            queue,
            embedding: embedding_adapter,
            http,
            config,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env();
    let port = config.port;
    let body_limit = config.body_limit;

    let state = AppState::build(config).await;
    let reset = state.queue.start().await.expect("queue start should not fail against a migrated db");
    if reset > 0 {
        tracing::info!(count = reset, "recovered stuck tasks on startup");
    }

    let app = Router::new()
        .route("/images", get(image::get_images).post(image::post_image))
        .route(
            "/images/{id}",
            get(image::get_image).delete(image::delete_image).put(image::put_image),
        )
        .route("/images/{id}/tags", put(image::put_tags))
        .route("/data/{bucket}/{*object_key}", get(image::serve_file))
        .route("/tags", get(tag::get_tags))
        .route("/tags/resolve", post(tag::resolve_tag))
        .route("/tags/suggest", get(tag::suggest_tags))
        .route("/tags/batch_add", post(tag::batch_add_tags))
        .route("/tags/batch_replace", post(tag::batch_replace_tags))
        .route("/tags/refresh_counts", put(tag::refresh_usage_counts))
        .route("/endpoints", get(admin::list_endpoints).post(admin::create_endpoint))
        .route(
            "/endpoints/{id}",
            put(admin::update_endpoint).delete(admin::delete_endpoint),
        )
        .route("/endpoints/{id}/set_default_upload", post(admin::set_default_upload))
        .route("/endpoints/{id}/test_connection", post(admin::test_connection))
        .route("/endpoints/{id}/deletion_impact", get(admin::deletion_impact))
        .route("/storage_tasks/sync", post(admin::start_sync))
        .route("/storage_tasks/unlink", post(admin::start_unlink))
        .route("/storage_tasks/hard_delete", post(admin::start_hard_delete))
        .route("/storage_tasks/{id}", get(admin::get_task_progress))
        .route("/storage_tasks/{id}/cancel", post(admin::cancel_task))
        .route("/queue/status", get(admin::queue_status))
        .route("/queue/start", post(admin::queue_start))
        .route("/queue/stop", post(admin::queue_stop))
        .route("/queue/clear_pending", post(admin::queue_clear_pending))
        .route("/queue/clear_completed", post(admin::queue_clear_completed))
        .route("/queue/retry/{id}", post(admin::queue_retry))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await.expect("failed to bind address");
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await.expect("server crashed");
}
