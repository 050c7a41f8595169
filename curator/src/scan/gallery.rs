use std::path::Path;

use crate::{
    db::galleries,
    error::Result,
    hash,
    models::{Gallery, GalleryPartial, current_iso_timestamp},
    walker::{walk_zip_images, zip_file_path, zip_uses_compression},
};

use super::{ScanContext, file_mod_time, image};

/// Reconciles one zip gallery with the catalog, then scans or re-verifies
/// its contained images as needed.
pub async fn scan_gallery(ctx: &ScanContext, path: &Path) -> Result<()> {
    let path_str = path.to_string_lossy().to_string();

    let (existing, image_count) = {
        let mut conn = ctx.store.read().await?;
        let gallery = galleries::find_by_path(&mut conn, &path_str).await?;
        let count = match &gallery {
            Some(gallery) => galleries::count_images(&mut conn, gallery.id).await?,
            None => 0,
        };
        (gallery, count)
    };

    let mod_time = file_mod_time(path)?;
    let mut scan_images = false;

    let gallery = if let Some(mut gallery) = existing {
        if gallery.file_mod_time.is_none() {
            // the zip contents may also be incomplete from the partial scan
            scan_images = true;
            tracing::info!(path = %path.display(), "setting file modification time");

            let mut tx = ctx.store.begin().await?;
            galleries::update_partial(
                &mut tx,
                gallery.id,
                &GalleryPartial {
                    file_mod_time: Some(mod_time),
                    updated_at: Some(current_iso_timestamp()),
                    ..Default::default()
                },
            )
            .await?;
            let refreshed = galleries::find(&mut tx, gallery.id).await?;
            tx.commit().await?;
            gallery = refreshed.ok_or_else(|| sqlx::Error::RowNotFound)?;
        }

        if gallery.file_mod_time != Some(mod_time) {
            scan_images = true;
            tracing::info!(path = %path.display(), "has been updated, rescanning");

            let checksum = blocking_md5(path).await?;
            let mut tx = ctx.store.begin().await?;
            galleries::update_partial(
                &mut tx,
                gallery.id,
                &GalleryPartial {
                    checksum: Some(checksum),
                    file_mod_time: Some(mod_time),
                    updated_at: Some(current_iso_timestamp()),
                    ..Default::default()
                },
            )
            .await?;
            tx.commit().await?;
        }

        // an empty gallery means a previous scan never finished its contents
        scan_images = scan_images || image_count == 0;
        Some(gallery)
    } else {
        if path.is_dir() {
            return Ok(());
        }

        let checksum = blocking_md5(path).await?;

        let matched = {
            let mut conn = ctx.store.read().await?;
            galleries::find_by_checksum(&mut conn, &checksum).await?
        };

        if let Some(matched) = matched {
            let on_disk = matched
                .path
                .as_deref()
                .map(|p| Path::new(p).exists())
                .unwrap_or(false);
            if on_disk {
                tracing::info!(
                    path = %path.display(),
                    existing = %matched.path.as_deref().unwrap_or(""),
                    "already exists, duplicate"
                );
                Some(matched)
            } else {
                tracing::info!(path = %path.display(), "already exists, updating path");
                let mut tx = ctx.store.begin().await?;
                galleries::update_path(&mut tx, matched.id, &path_str, &current_iso_timestamp())
                    .await?;
                let refreshed = galleries::find(&mut tx, matched.id).await?;
                tx.commit().await?;
                refreshed
            }
        } else {
            // a zip with no qualifying images is never persisted
            let entries = walk_zip_images(path, &ctx.walker)?;
            if entries.is_empty() {
                return Ok(());
            }

            if let Ok(true) = zip_uses_compression(path) {
                tracing::warn!(path = %path.display(), "using above store (0) level compression");
            }

            tracing::info!(path = %path.display(), "doesn't exist, creating new gallery");
            let now = current_iso_timestamp();
            let mut tx = ctx.store.begin().await?;
            let created = galleries::create(
                &mut tx,
                &Gallery {
                    id: 0,
                    path: Some(path_str.clone()),
                    checksum,
                    zip: true,
                    title: None,
                    rating: None,
                    organized: false,
                    file_mod_time: Some(mod_time),
                    created_at: now.clone(),
                    updated_at: now,
                },
            )
            .await?;
            tx.commit().await?;
            scan_images = true;
            Some(created)
        }
    };

    if let Some(gallery) = gallery {
        if scan_images {
            scan_zip_images(ctx, path, &gallery).await;
        } else {
            regenerate_zip_thumbnails(ctx, &gallery).await;
        }
    }

    Ok(())
}

/// Scans every image entry of the archive sequentially, associating each
/// with the gallery. Individual entry failures are logged and skipped.
async fn scan_zip_images(ctx: &ScanContext, zip_path: &Path, gallery: &Gallery) {
    let entries = match walk_zip_images(zip_path, &ctx.walker) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(
                path = %zip_path.display(),
                error = %err,
                "failed to scan zip file images"
            );
            return;
        }
    };

    for entry_name in entries {
        let image_path = zip_file_path(zip_path, &entry_name);
        if let Err(err) = image::scan_image(ctx, &image_path, Some(gallery)).await {
            tracing::error!(path = %image_path, error = %err, "error scanning zip image");
        }
    }
}

/// Thumbnails may have been deleted out from under an unchanged gallery.
async fn regenerate_zip_thumbnails(ctx: &ScanContext, gallery: &Gallery) {
    let images = {
        let mut conn = match ctx.store.read().await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!(error = %err, "failed to find gallery images");
                return;
            }
        };
        let ids = match galleries::image_ids(&mut conn, gallery.id).await {
            Ok(ids) => ids,
            Err(err) => {
                tracing::warn!(error = %err, "failed to find gallery images");
                return;
            }
        };
        let mut found = Vec::new();
        for id in ids {
            match crate::db::images::find(&mut conn, id).await {
                Ok(Some(image)) => found.push(image),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "failed to find gallery images");
                    return;
                }
            }
        }
        found
    };

    for record in images {
        if let Err(err) = image::generate_thumbnail(ctx, &record).await {
            tracing::error!(path = %record.path, error = %err, "error generating thumbnail");
        }
    }
}

async fn blocking_md5(path: &Path) -> Result<String> {
    tracing::info!(path = %path.display(), "calculating checksum");
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || hash::md5_from_file(&path)).await?
}
