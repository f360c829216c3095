//! Update-image orchestrator: patches description, tag set, category, and
//! visibility on an existing image, enqueuing a `rebuild_vector` task
//! whenever description or tags actually change, since the embedding is
//! derived from exactly those two fields.

use crate::db::{Database, DbError};
use crate::models::{ImageId, TagId, TagSource, UserId};
use crate::queue::{QueueError, QueueHandle};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("image {0} not found")]
    NotFound(ImageId),
}

#[derive(Debug, Default, Clone)]
pub struct ImagePatch {
    pub description: Option<String>,
    pub tag_ids: Option<Vec<TagId>>,
    pub category_id: Option<TagId>,
    pub is_public: Option<bool>,
}

pub struct UpdateOutcome {
    pub rebuild_enqueued: bool,
}

pub async fn update_image(
    db: &Database,
    queue: &QueueHandle,
    image_id: ImageId,
    patch: ImagePatch,
    actor: Option<UserId>,
) -> Result<UpdateOutcome, UpdateError> {
    db.get_image(image_id).await?.ok_or(UpdateError::NotFound(image_id))?;

    let mut semantic_change = false;

    if let Some(description) = &patch.description {
        db.update_description(image_id, description).await?;
        semantic_change = true;
    }

    if let Some(tag_ids) = &patch.tag_ids {
        crate::tags::set_image_tags_by_ids(db, image_id, tag_ids, TagSource::User, actor).await?;
        semantic_change = true;
    }

    if patch.category_id.is_some() {
        crate::tags::assign_category_tag(db, image_id, patch.category_id).await?;
    }

    if let Some(is_public) = patch.is_public {
        db.update_is_public(image_id, is_public).await?;
    }

    let rebuild_enqueued = if semantic_change {
        queue.enqueue_rebuild_vector(image_id).await?
    } else {
        false
    };

    Ok(UpdateOutcome { rebuild_enqueued })
}
