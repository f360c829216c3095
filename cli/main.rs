//! Operator CLI binary: a thin `clap` front over `imgtag_core`, mirroring
//! how `web/main.rs` builds the same collaborators for the HTTP transport.
//! No business logic lives here — every subcommand delegates straight into
//! `ingest`/`search`/`queue`/`background`.

use clap::{Parser, Subcommand};
use imgtag_core::config::AppConfig;
use imgtag_core::db::{Database, Pool};
use imgtag_core::ingest::{self, IngestRequest};
use imgtag_core::models::EndpointId;
use imgtag_core::queue::{QueueContext, QueueHandle};
use imgtag_core::search::{self, SearchRequest};
use imgtag_core::storage::StorageRegistry;
use imgtag_core::{embedding, vision};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "imgtag")]
#[command(about = "Image archive ingestion and search CLI", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ingests a local file into the archive.
    Archive {
        #[arg(help = "Path to image file")]
        path: PathBuf,

        #[arg(short, long, help = "Tags (space separated)")]
        tags: Option<String>,

        #[arg(short, long, help = "Image source URL")]
        source: Option<String>,

        #[arg(short, long, help = "Upload endpoint id, defaults to the configured default-upload endpoint")]
        endpoint: Option<EndpointId>,

        #[arg(long, help = "Skip enqueuing the vision/embedding analyze task")]
        no_analyze: bool,
    },

    /// Runs a text/tag search against the archive.
    Search {
        #[arg(help = "Free-text query")]
        text: Option<String>,

        #[arg(short, long, help = "Comma-separated tag names, all required")]
        tags: Option<String>,

        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },

    /// Starts the background analyze/embed worker pool and blocks until Ctrl-C.
    Worker,

    /// Widens or narrows the `images.embedding` column to a new vector
    /// dimension, zeroing existing vectors, and rebuilds the ivfflat index.
    /// Postgres only; existing embeddings are lost and must be regenerated
    /// with a `rebuild_vector` sweep afterward.
    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    ResizeVector {
        #[arg(help = "New embedding dimension (512, 768, 1024, or 1536)")]
        dimensions: usize,
    },
}

async fn build_state(config: AppConfig) -> (Arc<Database>, Arc<StorageRegistry>, QueueHandle) {
    let pool = Pool::connect(&config.database_url)
        .await
        .expect("failed to connect to DATABASE_URL");
    let db = Database::new(pool);
    db.migrate().await.expect("migrations failed");
    let db = Arc::new(db);

    let storage = Arc::new(StorageRegistry::new(config.storage_base_dir.clone()));
    let vision_adapter = vision::adapter_from_config(&config);
    let embedding_adapter = embedding::adapter_from_config(&config);
    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.callback_timeout_seconds))
        .build()
        .expect("http client always buildable with a plain timeout");
    let config = Arc::new(config);

    let queue = QueueHandle::new(QueueContext {
        db: db.clone(),
        storage: storage.clone(),
        vision: vision_adapter,
        embedding: embedding_adapter,
        http,
        config,
    });

    (db, storage, queue)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env();
    let (db, storage, queue) = build_state(config).await;

    match cli.command {
        Commands::Archive { path, tags, source, endpoint, no_analyze } => {
            let bytes = tokio::fs::read(&path).await.expect("failed to read image bytes");

            let req = IngestRequest {
                bytes,
                original_url: source,
                endpoint_id: endpoint,
                category_id: None,
                tags: tags.unwrap_or_default().split_whitespace().map(String::from).collect(),
                description: None,
                is_public: true,
                uploaded_by: None,
                auto_analyze: !no_analyze,
            };

            let outcome = ingest::ingest(&db, &storage, &queue, req).await.expect("ingest failed");
            println!("archived image {} at {}", outcome.image.id, outcome.url);
            if outcome.analyze_enqueued {
                println!("analyze task enqueued");
            }
        }

        Commands::Search { text, tags, limit } => {
            let embedding_adapter = embedding::adapter_from_config(&AppConfig::from_env());
            let req = SearchRequest {
                text,
                tags: tags
                    .unwrap_or_default()
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                limit,
                ..SearchRequest::default()
            };

            let result = search::search(&db, embedding_adapter.as_ref(), &req)
                .await
                .expect("search failed");
            println!("{} hits (total {})", result.hits.len(), result.total);
            for hit in result.hits {
                println!(
                    "  #{} {} [{}]",
                    hit.image.id,
                    hit.image.description,
                    hit.tags.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", ")
                );
            }
        }

        Commands::Worker => {
            let reset = queue.start().await.expect("queue start should not fail against a migrated db");
            if reset > 0 {
                tracing::info!(count = reset, "recovered stuck tasks on startup");
            }
            println!("worker pool running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
            queue.stop().await;
        }

        #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
        Commands::ResizeVector { dimensions } => {
            db.resize_embedding_dimension(dimensions)
                .await
                .expect("vector dimension resize failed");
            println!(
                "embedding column resized to vector({dimensions}); all existing embeddings are now \
                 zero-vectors and this process's connection pool must be restarted before further \
                 queries against images.embedding"
            );
        }
    }
}
