//! Process configuration: `dotenvy::dotenv()` once, then `std::env::var`
//! with defaults for everything not set.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub body_limit: usize,
    /// Root directory `local`-provider endpoints resolve their bucket
    /// directories under.
    pub storage_base_dir: PathBuf,

    pub queue_max_workers: usize,
    pub queue_batch_interval: Duration,
    pub stuck_task_minutes: i64,

    pub embedding_mode: EmbeddingMode,
    pub embedding_dimensions: usize,
    pub embedding_timeout_seconds: u64,
    pub embedding_api_url: Option<String>,
    pub embedding_api_key: Option<String>,

    pub vision_max_image_size_kb: u64,
    pub vision_allowed_extensions: Vec<String>,
    pub vision_convert_gif: bool,
    pub vision_timeout_seconds: u64,
    pub vision_endpoint_url: Option<String>,
    pub vision_api_key: Option<String>,
    pub callback_timeout_seconds: u64,

    pub image_url_priority: UrlPriority,
    pub allow_register: bool,

    pub storage_batch_concurrency: usize,
    pub storage_sync_batch_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingMode {
    Local,
    Api,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlPriority {
    Auto,
    Local,
    Cdn,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        AppConfig {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL is required"),
            port: env_or("PORT", 3000),
            body_limit: env_or("BODY_LIMIT", 20 * 1024 * 1024),
            storage_base_dir: env::var("STORAGE_BASE_DIR")
                .unwrap_or_else(|_| "./data".to_string())
                .into(),

            queue_max_workers: env_or::<usize>("QUEUE_MAX_WORKERS", 2).clamp(1, 10),
            queue_batch_interval: Duration::from_secs(env_or("QUEUE_BATCH_INTERVAL", 1)),
            stuck_task_minutes: env_or("STUCK_TASK_MINUTES", 10),

            embedding_mode: match env::var("EMBEDDING_MODE").as_deref() {
                Ok("api") => EmbeddingMode::Api,
                _ => EmbeddingMode::Local,
            },
            embedding_dimensions: env_or("EMBEDDING_DIMENSIONS", 768),
            embedding_timeout_seconds: env_or("EMBEDDING_TIMEOUT_SECONDS", 30),
            embedding_api_url: env::var("EMBEDDING_API_URL").ok(),
            embedding_api_key: env::var("EMBEDDING_API_KEY").ok(),

            vision_max_image_size_kb: env_or("VISION_MAX_IMAGE_SIZE", 2048),
            vision_allowed_extensions: env::var("VISION_ALLOWED_EXTENSIONS")
                .unwrap_or_else(|_| "jpg,jpeg,png,webp,gif".to_string())
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .collect(),
            vision_convert_gif: env_or("VISION_CONVERT_GIF", true),
            vision_timeout_seconds: env_or("VISION_TIMEOUT_SECONDS", 60),
            vision_endpoint_url: env::var("VISION_ENDPOINT_URL").ok(),
            vision_api_key: env::var("VISION_API_KEY").ok(),
            callback_timeout_seconds: env_or("CALLBACK_TIMEOUT_SECONDS", 30),

            image_url_priority: match env::var("IMAGE_URL_PRIORITY").as_deref() {
                Ok("local") => UrlPriority::Local,
                Ok("cdn") => UrlPriority::Cdn,
                _ => UrlPriority::Auto,
            },
            allow_register: env_or("ALLOW_REGISTER", true),

            storage_batch_concurrency: env_or("STORAGE_BATCH_CONCURRENCY", 4),
            storage_sync_batch_size: env_or("STORAGE_SYNC_BATCH_SIZE", 500),
        }
    }
}
