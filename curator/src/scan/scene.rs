use std::path::Path;

use crate::{
    db::scenes,
    error::{Error, Result},
    hash,
    models::{HashAlgorithm, Scene, ScenePartial, current_iso_timestamp},
    probe::VideoFileInfo,
};

use super::{ScanContext, file_mod_time};

/// Reconciles one video file with the catalog. Returns the created scene
/// when a new record was made, so the caller can fan out artifact
/// generation for it.
pub async fn scan_scene(ctx: &ScanContext, path: &Path) -> Result<Option<Scene>> {
    let path_str = path.to_string_lossy().to_string();

    let mut existing = {
        let mut conn = ctx.store.read().await?;
        scenes::find_by_path(&mut conn, &path_str).await?
    };

    let mod_time = file_mod_time(path)?;

    if let Some(mut scene) = existing.take() {
        // legacy records may predate mod-time tracking
        if scene.file_mod_time.is_none() {
            tracing::info!(path = %path.display(), "setting file modification time");
            let mut tx = ctx.store.begin().await?;
            scenes::update_partial(
                &mut tx,
                scene.id,
                &ScenePartial {
                    file_mod_time: Some(mod_time),
                    updated_at: Some(current_iso_timestamp()),
                    ..Default::default()
                },
            )
            .await?;
            let refreshed = scenes::find(&mut tx, scene.id).await?;
            tx.commit().await?;
            scene = refreshed.ok_or_else(|| sqlx::Error::RowNotFound)?;
        }

        let modified = scene.file_mod_time != Some(mod_time);
        if modified || scene.size.is_none() {
            let old_hash = scene
                .hash(ctx.settings.scan.video_hash_algorithm)
                .map(|h| h.to_string());
            scene = rescan_scene(ctx, path, &scene, mod_time).await?;
            let new_hash = scene
                .hash(ctx.settings.scan.video_hash_algorithm)
                .map(|h| h.to_string());

            if let (Some(old), Some(new)) = (old_hash, new_hash) {
                if old != new {
                    ctx.paths.migrate_hash(&old, &new)?;
                }
            }
        }

        if let Some(scene_hash) = scene.hash(ctx.settings.scan.video_hash_algorithm) {
            ensure_screenshots(ctx, path, scene_hash, scene.duration).await?;
        }

        backfill_format(ctx, path, &scene).await?;
        backfill_oshash(ctx, path, &scene).await?;
        backfill_checksum(ctx, path, &scene).await?;

        return Ok(None);
    }

    // walker output is files only, but guard against races
    if path.is_dir() {
        return Ok(None);
    }

    let info = probe(ctx, path).await?;

    tracing::info!(path = %path.display(), "not found, calculating oshash");
    let oshash = blocking_oshash(path).await?;

    let wants_md5 = ctx.settings.scan.video_hash_algorithm == HashAlgorithm::Md5
        || ctx.settings.scan.calculate_md5;
    let checksum = if wants_md5 {
        Some(blocking_md5(path).await?)
    } else {
        None
    };

    // the content may already be known under another path
    let matched = {
        let mut conn = ctx.store.read().await?;
        let mut found = None;
        if let Some(checksum) = &checksum {
            found = scenes::find_by_checksum(&mut conn, checksum).await?;
        }
        if found.is_none() {
            found = scenes::find_by_oshash(&mut conn, &oshash).await?;
        }
        found
    };

    let scene_hash = match ctx.settings.scan.video_hash_algorithm {
        HashAlgorithm::Md5 => checksum.clone().unwrap_or_else(|| oshash.clone()),
        HashAlgorithm::Oshash => oshash.clone(),
    };
    ensure_screenshots(ctx, path, &scene_hash, Some(info.duration)).await?;

    if let Some(matched) = matched {
        if Path::new(&matched.path).exists() {
            tracing::info!(
                path = %path.display(),
                existing = %matched.path,
                "already exists, duplicate"
            );
        } else {
            tracing::info!(path = %path.display(), "already exists, updating path");
            let mut tx = ctx.store.begin().await?;
            scenes::update_path(&mut tx, matched.id, &path_str, &current_iso_timestamp()).await?;
            tx.commit().await?;
        }
        return Ok(None);
    }

    tracing::info!(path = %path.display(), "doesn't exist, creating new scene");
    let now = current_iso_timestamp();
    let title = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string());

    let mut new_scene = Scene {
        id: 0,
        path: path_str,
        checksum,
        oshash: Some(oshash),
        title,
        details: None,
        date: None,
        rating: None,
        organized: false,
        studio_id: None,
        duration: Some(info.duration),
        video_codec: info.video_codec.clone(),
        audio_codec: info.audio_codec.clone(),
        format: info.format.clone(),
        width: Some(info.width),
        height: Some(info.height),
        framerate: Some(info.framerate),
        bitrate: Some(info.bitrate),
        size: Some(info.size.to_string()),
        file_mod_time: Some(mod_time),
        created_at: now.clone(),
        updated_at: now,
    };

    if ctx.settings.scan.use_file_metadata {
        new_scene.details = info.comment.clone();
        new_scene.date = info
            .creation_time
            .as_deref()
            .map(|ts| ts.chars().take(10).collect());
    }

    let mut tx = ctx.store.begin().await?;
    let created = scenes::create(&mut tx, &new_scene).await?;
    tx.commit().await?;

    Ok(Some(created))
}

/// Recomputes hashes and probe metadata for a changed file and persists
/// them in one partial update. Generated files keyed by the old hash are
/// left alone here; the caller migrates them if the hash moved.
async fn rescan_scene(
    ctx: &ScanContext,
    path: &Path,
    scene: &Scene,
    mod_time: i64,
) -> Result<Scene> {
    tracing::info!(path = %path.display(), "has been updated, rescanning");

    let oshash = blocking_oshash(path).await?;
    let checksum = if ctx.settings.scan.calculate_md5 {
        Some(blocking_md5(path).await?)
    } else {
        None
    };

    let info = probe(ctx, path).await?;

    let partial = ScenePartial {
        checksum,
        oshash: Some(oshash),
        duration: Some(info.duration),
        video_codec: info.video_codec.clone(),
        audio_codec: info.audio_codec.clone(),
        format: info.format.clone(),
        width: Some(info.width),
        height: Some(info.height),
        framerate: Some(info.framerate),
        bitrate: Some(info.bitrate),
        size: Some(info.size.to_string()),
        file_mod_time: Some(mod_time),
        updated_at: Some(current_iso_timestamp()),
        ..Default::default()
    };

    let mut tx = ctx.store.begin().await?;
    scenes::update_partial(&mut tx, scene.id, &partial).await?;
    let updated = scenes::find(&mut tx, scene.id).await?;
    tx.commit().await?;
    updated.ok_or_else(|| sqlx::Error::RowNotFound.into())
}

/// Probes once to persist the container format on records that predate
/// format tracking.
async fn backfill_format(ctx: &ScanContext, path: &Path, scene: &Scene) -> Result<()> {
    if scene.format.is_some() {
        return Ok(());
    }
    let info = probe(ctx, path).await?;
    let Some(format) = info.format else {
        return Ok(());
    };
    tracing::info!(path = %path.display(), format = %format, "adding container format");
    let mut tx = ctx.store.begin().await?;
    scenes::update_partial(
        &mut tx,
        scene.id,
        &ScenePartial {
            format: Some(format),
            updated_at: Some(current_iso_timestamp()),
            ..Default::default()
        },
    )
    .await?;
    tx.commit().await?;
    Ok(())
}

async fn backfill_oshash(ctx: &ScanContext, path: &Path, scene: &Scene) -> Result<()> {
    if scene.oshash.is_some() {
        return Ok(());
    }
    tracing::info!(path = %path.display(), "calculating oshash for existing file");
    let oshash = blocking_oshash(path).await?;

    let mut tx = ctx.store.begin().await?;
    if let Some(dupe) = scenes::find_by_oshash(&mut tx, &oshash).await? {
        if dupe.id != scene.id {
            return Err(Error::HashCollision {
                hash_kind: "oshash",
                path: path.to_string_lossy().to_string(),
                existing: dupe.path,
            });
        }
    }
    scenes::update_partial(
        &mut tx,
        scene.id,
        &ScenePartial {
            oshash: Some(oshash),
            updated_at: Some(current_iso_timestamp()),
            ..Default::default()
        },
    )
    .await?;
    tx.commit().await?;
    Ok(())
}

async fn backfill_checksum(ctx: &ScanContext, path: &Path, scene: &Scene) -> Result<()> {
    if !ctx.settings.scan.calculate_md5 || scene.checksum.is_some() {
        return Ok(());
    }
    let checksum = blocking_md5(path).await?;

    let mut tx = ctx.store.begin().await?;
    if let Some(dupe) = scenes::find_by_checksum(&mut tx, &checksum).await? {
        if dupe.id != scene.id {
            return Err(Error::HashCollision {
                hash_kind: "MD5",
                path: path.to_string_lossy().to_string(),
                existing: dupe.path,
            });
        }
    }
    scenes::update_partial(
        &mut tx,
        scene.id,
        &ScenePartial {
            checksum: Some(checksum),
            updated_at: Some(current_iso_timestamp()),
            ..Default::default()
        },
    )
    .await?;
    tx.commit().await?;
    Ok(())
}

async fn ensure_screenshots(
    ctx: &ScanContext,
    path: &Path,
    hash: &str,
    duration: Option<f64>,
) -> Result<()> {
    let duration = match duration {
        Some(duration) => duration,
        None => probe(ctx, path).await?.duration,
    };
    let generator = ctx.generator.clone();
    let path = path.to_path_buf();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || generator.ensure_screenshots(&path, &hash, duration))
        .await??;
    Ok(())
}

async fn probe(ctx: &ScanContext, path: &Path) -> Result<VideoFileInfo> {
    let media_probe = ctx.probe.clone();
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || media_probe.probe_video(&path)).await?
}

async fn blocking_oshash(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || hash::oshash_from_file(&path)).await?
}

async fn blocking_md5(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || hash::md5_from_file(&path)).await?
}
