//! `analyze_image` / `rebuild_vector` task bodies: fetch bytes, optionally
//! call vision, always re-embed, persist, fire the callback.

use super::payload;
use super::worker::QueueContext;
use super::QueueError;
use crate::models::{ImageId, Task, TagLevel, TagSource, TaskType};
use crate::vision::preprocess_for_vision;

/// Routes a claimed task to its body and returns the JSON blob to store
/// in `tasks.result` on success.
pub async fn dispatch(ctx: &QueueContext, task: &Task) -> Result<serde_json::Value, QueueError> {
    match task.task_type {
        TaskType::AnalyzeImage => {
            let p: payload::AnalyzeImagePayload = payload::from_json(&task.payload)?;
            run_analyze_image(ctx, p.image_id, p.callback_url.as_deref()).await
        }
        TaskType::RebuildVector => {
            let p: payload::RebuildVectorPayload = payload::from_json(&task.payload)?;
            run_rebuild_vector(ctx, p.image_id, p.callback_url.as_deref()).await
        }
        other => Err(QueueError::UnsupportedTaskType(other)),
    }
}

/// If the image already carries both a description and
/// non-empty normal tags, the vision call is skipped entirely and only
/// the embedding is (re)generated — this is what lets user-supplied
/// metadata and the `rebuild_vector` path share one embedding step.
/// Otherwise bytes are fetched and the vision adapter runs, unless the
/// extension is disallowed, in which case the task still completes
/// (embedding computed from whatever description/tags exist, typically
/// empty) rather than failing.
async fn run_analyze_image(
    ctx: &QueueContext,
    image_id: ImageId,
    callback_url: Option<&str>,
) -> Result<serde_json::Value, QueueError> {
    let image = ctx
        .db
        .get_image(image_id)
        .await?
        .ok_or(QueueError::ImageNotFound(image_id))?;

    let existing_tags = ctx.db.get_tags_for_image(image_id).await?;
    let has_normal_tags = existing_tags.iter().any(|t| t.level == TagLevel::NORMAL);
    let already_described = !image.description.is_empty() && has_normal_tags;

    let mut vision_ran = false;

    if !already_described {
        let ext = image.file_type.to_lowercase();
        if ctx.config.vision_allowed_extensions.iter().any(|e| e == &ext) {
            let bytes = fetch_bytes(ctx, &image).await?;
            let (processed, mime) = preprocess_for_vision(&bytes, &ctx.config)?;
            let category_id = existing_tags
                .iter()
                .find(|t| t.level == TagLevel::CATEGORY)
                .map(|t| t.tag_id);
            let result = ctx.vision.analyze(&processed, mime, category_id).await?;
            vision_ran = true;

            if !result.description.is_empty() {
                ctx.db.update_description(image_id, &result.description).await?;
            }

            if !result.tags.is_empty() {
                let mut tag_ids = Vec::with_capacity(result.tags.len());
                for name in &result.tags {
                    let tag = ctx.db.resolve_tag(name, TagSource::Ai).await?;
                    tag_ids.push(tag.id);
                }
                ctx.db.remove_ai_normal_tags(image_id).await?;
                for tag_id in &tag_ids {
                    ctx.db
                        .add_image_tag(image_id, *tag_id, TagSource::Ai, None)
                        .await?;
                }
            }
        } else {
            tracing::debug!(image_id, extension = %ext, "skipping vision call: extension not allowed");
        }
    }

    let (description, tag_names) = current_description_and_tags(ctx, image_id).await?;
    let embedding = ctx.embedding.embed_description_tags(&description, &tag_names).await?;
    ctx.db.update_embedding(image_id, &embedding).await?;

    if let Some(url) = callback_url {
        send_callback(ctx, url, image_id, &tag_names).await;
    }

    Ok(serde_json::json!({
        "image_id": image_id,
        "vision_ran": vision_ran,
        "embedded": true,
    }))
}

/// Never calls the vision adapter or touches tags — regenerates the
/// embedding from whatever description/tags the image currently has.
async fn run_rebuild_vector(
    ctx: &QueueContext,
    image_id: ImageId,
    callback_url: Option<&str>,
) -> Result<serde_json::Value, QueueError> {
    ctx.db
        .get_image(image_id)
        .await?
        .ok_or(QueueError::ImageNotFound(image_id))?;

    let (description, tag_names) = current_description_and_tags(ctx, image_id).await?;
    let embedding = ctx.embedding.embed_description_tags(&description, &tag_names).await?;
    ctx.db.update_embedding(image_id, &embedding).await?;

    if let Some(url) = callback_url {
        send_callback(ctx, url, image_id, &tag_names).await;
    }

    Ok(serde_json::json!({
        "image_id": image_id,
        "vision_ran": false,
        "embedded": true,
    }))
}

async fn current_description_and_tags(
    ctx: &QueueContext,
    image_id: ImageId,
) -> Result<(String, Vec<String>), QueueError> {
    let image = ctx
        .db
        .get_image(image_id)
        .await?
        .ok_or(QueueError::ImageNotFound(image_id))?;
    let tag_names = ctx
        .db
        .get_tags_for_image(image_id)
        .await?
        .into_iter()
        .map(|t| t.name)
        .collect();
    Ok((image.description, tag_names))
}

/// Tries the primary location first, then any other location, then
/// `original_url` as a last resort — mirrors the original worker's
/// fallback chain so a single missing mirror never fails the task.
async fn fetch_bytes(
    ctx: &QueueContext,
    image: &crate::models::Image,
) -> Result<Vec<u8>, QueueError> {
    let locations = ctx.db.get_locations_by_image(image.id).await?;
    let endpoints = ctx.db.list_enabled_healthy_endpoints().await?;

    let ordered = locations
        .iter()
        .filter(|l| l.is_primary)
        .chain(locations.iter().filter(|l| !l.is_primary));

    for location in ordered {
        let Some(endpoint) = endpoints.iter().find(|e| e.id == location.endpoint_id) else {
            continue;
        };
        if let Ok(bytes) = ctx.storage.download(endpoint, &location.object_key).await {
            return Ok(bytes);
        }
    }

    if let Some(url) = &image.original_url {
        if let Ok(resp) = ctx.http.get(url).send().await {
            if let Ok(bytes) = resp.bytes().await {
                return Ok(bytes.to_vec());
            }
        }
    }

    Err(QueueError::BytesUnavailable(image.id))
}

/// Fire-and-forget POST; callback delivery failures are logged, never
/// propagated — the task has already succeeded by this point. Payload
/// includes the merged final tag list.
async fn send_callback(ctx: &QueueContext, url: &str, image_id: ImageId, tag_names: &[String]) {
    let body = serde_json::json!({
        "image_id": image_id,
        "status": "completed",
        "tags": tag_names,
    });
    match ctx
        .http
        .post(url)
        .timeout(std::time::Duration::from_secs(ctx.config.callback_timeout_seconds))
        .json(&body)
        .send()
        .await
    {
        Ok(resp) if !resp.status().is_success() => {
            tracing::warn!(%url, status = %resp.status(), "analyze callback returned non-success");
        }
        Err(e) => {
            tracing::warn!(%url, error = %e, "analyze callback failed");
        }
        _ => {}
    }
}
