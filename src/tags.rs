//! Tag service layer: the two tag-diff strategies (`set_image_tags` by
//! name, `set_image_tags_by_ids` by id) built on top of `db::tags`'
//! primitives, using a flat diff-by-`HashSet` pattern.

use crate::db::{Database, DbError};
use crate::models::{resolution_class_for, Image, ImageId, TagId, TagSource, UserId};
use crate::models::{UNCLASSIFIED_CATEGORY_ID, UNCLASSIFIED_CATEGORY_NAME};
use std::collections::HashSet;

/// Resolves `max(width, height)` to its resolution tag and assigns it,
/// replacing any resolution tag the image previously had (an image has
/// at most one — levels are mutually exclusive within level 1 by the
/// fixed vocabulary, but nothing in `image_tags` enforces that, so the
/// caller does).
pub async fn assign_resolution_tag(db: &Database, image: &Image) -> Result<(), DbError> {
    let name = resolution_class_for(image.width.max(image.height));
    let tag = db
        .get_tag_by_name(name)
        .await?
        .ok_or_else(|| DbError::Invariant(format!("resolution tag {name} missing from seed data")))?;

    for existing in db.get_resolutions().await? {
        if existing.id != tag.id {
            db.remove_image_tag(image.id, existing.id).await?;
        }
    }
    db.add_image_tag(image.id, tag.id, TagSource::System, None).await?;
    Ok(())
}

/// Assigns `category_id` (or the "unclassified" default when `None`),
/// replacing any category tag the image previously had.
pub async fn assign_category_tag(
    db: &Database,
    image_id: ImageId,
    category_id: Option<TagId>,
) -> Result<(), DbError> {
    let resolved = match category_id {
        Some(id) => id,
        None => db
            .get_tag_by_name(UNCLASSIFIED_CATEGORY_NAME)
            .await?
            .map(|t| t.id)
            .unwrap_or(UNCLASSIFIED_CATEGORY_ID),
    };

    for existing in db.get_categories().await? {
        if existing.id != resolved {
            db.remove_image_tag(image_id, existing.id).await?;
        }
    }
    db.add_image_tag(image_id, resolved, TagSource::System, None).await?;
    Ok(())
}

/// Name-based diff (`set_image_tags`): preserves associations whose tag
/// id is unchanged (keeping their original source), adds new names with
/// `source`, and on removal deletes only level-2/`source=ai` rows — so a
/// re-run after an AI pass never clobbers user- or system-entered tags.
pub async fn set_image_tags(
    db: &Database,
    image_id: ImageId,
    names: &[String],
    source: TagSource,
) -> Result<(), DbError> {
    let existing = db.get_tags_for_image(image_id).await?;
    let existing_names: HashSet<&str> = existing.iter().map(|t| t.name.as_str()).collect();

    let to_add: Vec<&String> = names.iter().filter(|n| !existing_names.contains(n.as_str())).collect();

    db.remove_ai_normal_tags(image_id).await?;

    let desired: HashSet<&str> = names.iter().map(String::as_str).collect();
    for tag in &existing {
        if desired.contains(tag.name.as_str()) {
            db.add_image_tag(image_id, tag.tag_id, tag.source, None).await?;
        }
    }
    for name in to_add {
        let tag = db.resolve_tag(name, source).await?;
        db.add_image_tag(image_id, tag.id, source, None).await?;
    }
    Ok(())
}

/// Id-based diff (`set_image_tags_by_ids`): minimum diff by id, and on
/// removal deletes every level-2 association regardless of source — a
/// deliberately wider removal scope than `set_image_tags` (see DESIGN.md).
pub async fn set_image_tags_by_ids(
    db: &Database,
    image_id: ImageId,
    tag_ids: &[TagId],
    source: TagSource,
    added_by: Option<UserId>,
) -> Result<(), DbError> {
    db.remove_all_normal_tags(image_id).await?;
    for &tag_id in tag_ids {
        db.add_image_tag(image_id, tag_id, source, added_by).await?;
    }
    Ok(())
}

/// Bulk name-based tag attach across many images in O(1) SQL statements,
/// resolving/creating each name once up front. `owner_id` restricts the
/// write to images that user owns; filtering happens in SQL via
/// `batch_add_tags_to_images`, never in application code.
pub async fn batch_add_tags_to_images(
    db: &Database,
    image_ids: &[ImageId],
    names: &[String],
    source: TagSource,
    owner_id: Option<UserId>,
) -> Result<u64, DbError> {
    let image_ids = filter_owned(db, image_ids, owner_id).await?;
    if image_ids.is_empty() || names.is_empty() {
        return Ok(0);
    }

    let mut tag_ids = Vec::with_capacity(names.len());
    for name in names {
        tag_ids.push(db.resolve_tag(name, source).await?.id);
    }

    db.batch_add_tags_to_images(&image_ids, &tag_ids, source, owner_id)
        .await
}

/// Bulk name-based tag replace across many images: wipes each image's
/// level-2 associations, then attaches `names` to all of them at once.
pub async fn batch_replace_tags_for_images(
    db: &Database,
    image_ids: &[ImageId],
    names: &[String],
    source: TagSource,
    owner_id: Option<UserId>,
) -> Result<(), DbError> {
    let image_ids = filter_owned(db, image_ids, owner_id).await?;
    if image_ids.is_empty() {
        return Ok(());
    }

    let mut tag_ids = Vec::with_capacity(names.len());
    for name in names {
        tag_ids.push(db.resolve_tag(name, source).await?.id);
    }

    db.batch_replace_tags_for_images(&image_ids, &tag_ids, source, owner_id)
        .await
}

/// When `owner_id` is set, restricts `image_ids` to images that user
/// actually owns — batch operations never trust the caller's id list.
async fn filter_owned(
    db: &Database,
    image_ids: &[ImageId],
    owner_id: Option<UserId>,
) -> Result<Vec<ImageId>, DbError> {
    let Some(owner_id) = owner_id else {
        return Ok(image_ids.to_vec());
    };

    let images = db.get_images_by_ids(image_ids).await?;
    Ok(images
        .into_iter()
        .filter(|i| i.uploaded_by == Some(owner_id))
        .map(|i| i.id)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{get_db, insert_test_image};

    #[tokio::test]
    async fn assigns_resolution_tag_from_dimensions() {
        let db = get_db().await;
        let image_id = insert_test_image(&db, 3840, 2160).await;
        let image = db.get_image(image_id).await.unwrap().unwrap();

        assign_resolution_tag(&db, &image).await.unwrap();

        let tags = db.get_tags_for_image(image_id).await.unwrap();
        assert!(tags.iter().any(|t| t.name == "4K"));
    }

    #[tokio::test]
    async fn assigns_unclassified_category_by_default() {
        let db = get_db().await;
        let image_id = insert_test_image(&db, 100, 100).await;

        assign_category_tag(&db, image_id, None).await.unwrap();

        let tags = db.get_tags_for_image(image_id).await.unwrap();
        assert!(tags.iter().any(|t| t.name == "unclassified"));
    }

    #[tokio::test]
    async fn name_based_diff_keeps_user_tags_across_ai_rerun() {
        let db = get_db().await;
        let image_id = insert_test_image(&db, 100, 100).await;

        set_image_tags(&db, image_id, &["favorite".to_string()], TagSource::User)
            .await
            .unwrap();
        set_image_tags(&db, image_id, &["cat".to_string(), "sofa".to_string()], TagSource::Ai)
            .await
            .unwrap();

        let names: HashSet<String> = db
            .get_tags_for_image(image_id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert!(names.contains("favorite"));
        assert!(names.contains("cat"));
        assert!(names.contains("sofa"));
    }

    #[tokio::test]
    async fn name_based_diff_drops_stale_ai_tags_not_reasserted() {
        let db = get_db().await;
        let image_id = insert_test_image(&db, 100, 100).await;

        set_image_tags(&db, image_id, &["cat".to_string()], TagSource::Ai).await.unwrap();
        set_image_tags(&db, image_id, &["dog".to_string()], TagSource::Ai).await.unwrap();

        let names: HashSet<String> = db
            .get_tags_for_image(image_id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert!(!names.contains("cat"));
        assert!(names.contains("dog"));
    }

    #[tokio::test]
    async fn id_based_diff_removes_all_normal_tags_regardless_of_source() {
        let db = get_db().await;
        let image_id = insert_test_image(&db, 100, 100).await;

        set_image_tags(&db, image_id, &["favorite".to_string()], TagSource::User)
            .await
            .unwrap();
        let replacement = db.resolve_tag("landscape", TagSource::User).await.unwrap();

        set_image_tags_by_ids(&db, image_id, &[replacement.id], TagSource::User, None)
            .await
            .unwrap();

        let names: HashSet<String> = db
            .get_tags_for_image(image_id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert!(!names.contains("favorite"));
        assert!(names.contains("landscape"));
    }
}
