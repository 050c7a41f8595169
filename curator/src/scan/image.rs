use std::{fs, io::Read, path::Path};

use crate::{
    db::{galleries, images},
    error::{Error, Result},
    hash,
    models::{Gallery, ImagePartial, ImageRecord, current_iso_timestamp},
    walker::{path_display_name, split_zip_path},
};

use super::{ScanContext, file_mod_time};

/// Reconciles one image with the catalog. The path may be a plain file or
/// a zip-internal composite path; `zip_gallery` is set when this scan was
/// dispatched from inside a gallery archive.
pub async fn scan_image(
    ctx: &ScanContext,
    path_str: &str,
    zip_gallery: Option<&Gallery>,
) -> Result<()> {
    let existing = {
        let mut conn = ctx.store.read().await?;
        images::find_by_path(&mut conn, path_str).await?
    };

    let mod_time = image_mod_time(path_str)?;

    let record = if let Some(mut image) = existing {
        if image.file_mod_time.is_none() {
            tracing::info!(path = %path_display_name(path_str), "setting file modification time");
            let mut tx = ctx.store.begin().await?;
            images::update_partial(
                &mut tx,
                image.id,
                &ImagePartial {
                    file_mod_time: Some(mod_time),
                    updated_at: Some(current_iso_timestamp()),
                    ..Default::default()
                },
            )
            .await?;
            let refreshed = images::find(&mut tx, image.id).await?;
            tx.commit().await?;
            image = refreshed.ok_or_else(|| sqlx::Error::RowNotFound)?;
        }

        if image.file_mod_time != Some(mod_time) {
            image = rescan_image(ctx, path_str, &image, mod_time).await?;
        }

        image
    } else {
        if Path::new(path_str).is_dir() {
            return Ok(());
        }

        tracing::info!(path = %path_display_name(path_str), "not found, calculating checksum");
        let source = read_image_source(ctx, path_str).await?;
        let checksum =
            hash::md5_from_reader(&source[..]).map_err(|err| Error::io(path_str, err))?;

        let matched = {
            let mut conn = ctx.store.read().await?;
            images::find_by_checksum(&mut conn, &checksum).await?
        };

        let image = if let Some(matched) = matched {
            if image_file_exists(&matched.path) {
                tracing::info!(
                    path = %path_display_name(path_str),
                    existing = %path_display_name(&matched.path),
                    "already exists, duplicate"
                );
                matched
            } else {
                tracing::info!(path = %path_display_name(path_str), "already exists, updating path");
                let mut tx = ctx.store.begin().await?;
                images::update_path(&mut tx, matched.id, path_str, &current_iso_timestamp())
                    .await?;
                let refreshed = images::find(&mut tx, matched.id).await?;
                tx.commit().await?;
                refreshed.ok_or_else(|| sqlx::Error::RowNotFound)?
            }
        } else {
            tracing::info!(path = %path_display_name(path_str), "doesn't exist, creating new image");
            let (width, height) = dimensions(path_str, &source)?;
            let now = current_iso_timestamp();
            let new_image = ImageRecord {
                id: 0,
                path: path_str.to_string(),
                checksum,
                title: None,
                rating: None,
                organized: false,
                width: Some(i64::from(width)),
                height: Some(i64::from(height)),
                size: Some(source.len() as i64),
                file_mod_time: Some(mod_time),
                created_at: now.clone(),
                updated_at: now,
            };
            let mut tx = ctx.store.begin().await?;
            let created = images::create(&mut tx, &new_image).await?;
            tx.commit().await?;
            created
        };

        if let Some(gallery) = zip_gallery {
            let mut tx = ctx.store.begin().await?;
            galleries::add_image(&mut tx, gallery.id, image.id).await?;
            tx.commit().await?;
        } else if ctx.settings.scan.create_galleries_from_folders {
            tracing::info!(path = %image.path, "associating image with folder gallery");
            associate_with_folder_gallery(ctx, path_str, image.id).await?;
        }

        image
    };

    generate_thumbnail(ctx, &record).await
}

async fn rescan_image(
    ctx: &ScanContext,
    path_str: &str,
    image: &ImageRecord,
    mod_time: i64,
) -> Result<ImageRecord> {
    tracing::info!(path = %path_display_name(path_str), "has been updated, rescanning");

    let old_checksum = image.checksum.clone();
    let source = read_image_source(ctx, path_str).await?;
    let checksum =
        hash::md5_from_reader(&source[..]).map_err(|err| Error::io(path_str, err))?;
    let (width, height) = dimensions(path_str, &source)?;

    let partial = ImagePartial {
        checksum: Some(checksum.clone()),
        width: Some(i64::from(width)),
        height: Some(i64::from(height)),
        size: Some(source.len() as i64),
        file_mod_time: Some(mod_time),
        updated_at: Some(current_iso_timestamp()),
        ..Default::default()
    };

    let mut tx = ctx.store.begin().await?;
    images::update_partial(&mut tx, image.id, &partial).await?;
    let updated = images::find(&mut tx, image.id).await?;
    tx.commit().await?;

    // the stale thumbnail is keyed by the old checksum
    if old_checksum != checksum {
        let old_thumb = ctx
            .paths
            .image_thumbnail(&old_checksum, crate::generate::DEFAULT_THUMBNAIL_WIDTH);
        if old_thumb.exists() {
            if let Err(err) = fs::remove_file(&old_thumb) {
                tracing::error!(error = %err, "error deleting thumbnail image");
            }
        }
    }

    updated.ok_or_else(|| sqlx::Error::RowNotFound.into())
}

/// Finds or creates the gallery for the image's containing directory,
/// keyed by a hash of the directory path rather than any file content.
async fn associate_with_folder_gallery(
    ctx: &ScanContext,
    path_str: &str,
    image_id: i64,
) -> Result<()> {
    let dir = Path::new(path_str)
        .parent()
        .map(|parent| parent.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut tx = ctx.store.begin().await?;
    let gallery = match galleries::find_by_path(&mut tx, &dir).await? {
        Some(gallery) => gallery,
        None => {
            tracing::info!(path = %dir, "creating gallery for folder");
            let now = current_iso_timestamp();
            galleries::create(
                &mut tx,
                &Gallery {
                    id: 0,
                    path: Some(dir.clone()),
                    checksum: hash::md5_from_str(&dir),
                    zip: false,
                    title: None,
                    rating: None,
                    organized: false,
                    file_mod_time: None,
                    created_at: now.clone(),
                    updated_at: now,
                },
            )
            .await?
        }
    };
    galleries::add_image(&mut tx, gallery.id, image_id).await?;
    tx.commit().await?;
    Ok(())
}

pub(super) async fn generate_thumbnail(ctx: &ScanContext, image: &ImageRecord) -> Result<()> {
    let thumb = ctx
        .paths
        .image_thumbnail(&image.checksum, crate::generate::DEFAULT_THUMBNAIL_WIDTH);
    if thumb.exists() {
        return Ok(());
    }

    let source = read_image_source(ctx, &image.path).await?;
    let generator = ctx.generator.clone();
    let checksum = image.checksum.clone();
    tokio::task::spawn_blocking(move || generator.ensure_image_thumbnail(&source, &checksum))
        .await??;
    Ok(())
}

/// Reads the full bytes of an image, whether a plain file or a zip entry.
async fn read_image_source(_ctx: &ScanContext, path_str: &str) -> Result<Vec<u8>> {
    let path_str = path_str.to_string();
    tokio::task::spawn_blocking(move || read_image_source_sync(&path_str)).await?
}

fn read_image_source_sync(path_str: &str) -> Result<Vec<u8>> {
    match split_zip_path(path_str) {
        Some((zip_path, entry_name)) => {
            let zip_path = Path::new(zip_path);
            let file = fs::File::open(zip_path).map_err(|err| Error::io(zip_path, err))?;
            let mut archive =
                zip::ZipArchive::new(file).map_err(|err| Error::zip(zip_path, err))?;
            let mut entry = archive
                .by_name(entry_name)
                .map_err(|err| Error::zip(zip_path, err))?;
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut bytes)
                .map_err(|err| Error::io(zip_path, err))?;
            Ok(bytes)
        }
        None => {
            let path = Path::new(path_str);
            fs::read(path).map_err(|err| Error::io(path, err))
        }
    }
}

fn dimensions(path_str: &str, bytes: &[u8]) -> Result<(u32, u32)> {
    crate::probe::image_dimensions_from_bytes(Path::new(path_str), bytes)
}

/// Mod time for an image path; zip entries use the archive's own mod time.
fn image_mod_time(path_str: &str) -> Result<i64> {
    match split_zip_path(path_str) {
        Some((zip_path, _)) => file_mod_time(Path::new(zip_path)),
        None => file_mod_time(Path::new(path_str)),
    }
}

fn image_file_exists(path_str: &str) -> bool {
    match split_zip_path(path_str) {
        Some((zip_path, entry_name)) => {
            let Ok(file) = fs::File::open(zip_path) else {
                return false;
            };
            let Ok(mut archive) = zip::ZipArchive::new(file) else {
                return false;
            };
            archive.by_name(entry_name).is_ok()
        }
        None => Path::new(path_str).exists(),
    }
}
