//! Shared test fixtures: an in-memory sqlite pool, migrated fresh per
//! test — the sqlite feature is what every non-vector test in this crate
//! runs against.

#![cfg(test)]

use crate::db::{Database, Pool};

pub async fn get_db() -> Database {
    let pool = Pool::connect(":memory:").await.expect("in-memory sqlite always connects");
    let db = Database::new(pool);
    db.migrate().await.expect("fresh schema always migrates");
    db
}

pub async fn insert_test_image(db: &Database, width: i32, height: i32) -> crate::models::ImageId {
    db.insert_image(&crate::db::NewImage {
        file_hash: format!("{:032x}", rand::random::<u128>()),
        file_type: "jpg".to_string(),
        file_size_mb: 1.0,
        width,
        height,
        original_url: None,
        uploaded_by: None,
        is_public: true,
    })
    .await
    .expect("insert_image always succeeds against a fresh schema")
}
