pub mod gallery;
pub mod image;
pub mod scene;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::UNIX_EPOCH,
};

use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
    config::Settings,
    db::{Store, galleries, scenes},
    error::{Error, Result},
    generate::{ArtifactGenerator, GeneratedPaths},
    models::{Gallery, MediaKind, Scene},
    probe::MediaProbe,
    walker::FileWalker,
};

/// Shared context a scan task needs: the store, the (read-only) settings,
/// and the probing/generation collaborators behind their seams.
pub struct ScanContext {
    pub store: Store,
    pub settings: Arc<Settings>,
    pub walker: Arc<FileWalker>,
    pub probe: Arc<dyn MediaProbe>,
    pub generator: Arc<dyn ArtifactGenerator>,
    pub paths: GeneratedPaths,
}

pub struct Scanner {
    ctx: Arc<ScanContext>,
}

impl Scanner {
    pub fn new(
        store: Store,
        settings: Arc<Settings>,
        probe: Arc<dyn MediaProbe>,
        generator: Arc<dyn ArtifactGenerator>,
    ) -> Result<Self> {
        let walker = Arc::new(FileWalker::new(&settings)?);
        let paths = GeneratedPaths::new(settings.library.generated_path.clone());
        Ok(Self {
            ctx: Arc::new(ScanContext {
                store,
                settings,
                walker,
                probe,
                generator,
                paths,
            }),
        })
    }

    /// Walks every configured library root and reconciles each candidate,
    /// bounded by the configured parallelism. Per-candidate failures are
    /// logged and skipped; the batch always runs to completion.
    pub async fn run(&self) -> Result<()> {
        let parallelism = self.ctx.settings.parallel_tasks_with_auto_detection();
        tracing::info!(parallelism, "starting scan");

        let semaphore = Arc::new(Semaphore::new(parallelism));
        let mut tasks: JoinSet<()> = JoinSet::new();

        for root in &self.ctx.settings.library.paths {
            tracing::info!(path = %root.path.display(), "scanning library path");
            for candidate in self.ctx.walker.walk(root) {
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|err| Error::Worker(err.to_string()))?;
                let ctx = self.ctx.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    run_candidate(&ctx, candidate.path, candidate.kind).await;
                });
            }
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                tracing::error!(error = %err, "scan task panicked");
            }
        }

        self.associate_galleries().await;

        tracing::info!("scan complete");
        Ok(())
    }

    /// Post-scan pass pairing each unlinked gallery with the scene that
    /// shares its basename, when one exists.
    async fn associate_galleries(&self) {
        let orphans = {
            let mut conn = match self.ctx.store.read().await {
                Ok(conn) => conn,
                Err(err) => {
                    tracing::error!(error = %err, "error loading unassociated galleries");
                    return;
                }
            };
            match galleries::unassociated(&mut conn).await {
                Ok(orphans) => orphans,
                Err(err) => {
                    tracing::error!(error = %err, "error loading unassociated galleries");
                    return;
                }
            }
        };

        for gallery in orphans {
            if let Err(err) = associate_gallery(&self.ctx, &gallery).await {
                tracing::error!(
                    path = %gallery.path.as_deref().unwrap_or(""),
                    error = %err,
                    "error associating gallery"
                );
            }
        }
    }
}

async fn run_candidate(ctx: &ScanContext, path: PathBuf, kind: MediaKind) {
    let result = match kind {
        MediaKind::Scene => scan_scene_with_artifacts(ctx, &path).await,
        MediaKind::Image => image::scan_image(ctx, &path.to_string_lossy(), None).await,
        MediaKind::Gallery => gallery::scan_gallery(ctx, &path).await,
    };
    if let Err(err) = result {
        tracing::error!(path = %path.display(), error = %err, "error scanning file");
    }
}

/// Scans one scene; when a new record was created, fans out sprite and
/// preview generation on an inner pool of two and waits for both.
async fn scan_scene_with_artifacts(ctx: &ScanContext, path: &Path) -> Result<()> {
    let Some(created) = scene::scan_scene(ctx, path).await? else {
        return Ok(());
    };

    let Some(hash) = created
        .hash(ctx.settings.scan.video_hash_algorithm)
        .map(|h| h.to_string())
    else {
        return Ok(());
    };
    let duration = created.duration.unwrap_or(0.0);

    let inner = Arc::new(Semaphore::new(2));
    let mut subtasks: JoinSet<Result<()>> = JoinSet::new();

    if ctx.settings.generate.sprites {
        let permit = inner
            .clone()
            .acquire_owned()
            .await
            .map_err(|err| Error::Worker(err.to_string()))?;
        let generator = ctx.generator.clone();
        let video_path = path.to_path_buf();
        let hash = hash.clone();
        subtasks.spawn(async move {
            let _permit = permit;
            tokio::task::spawn_blocking(move || {
                generator.ensure_sprite(&video_path, &hash, duration)
            })
            .await?
        });
    }

    if ctx.settings.generate.previews {
        let permit = inner
            .clone()
            .acquire_owned()
            .await
            .map_err(|err| Error::Worker(err.to_string()))?;
        let generator = ctx.generator.clone();
        let video_path = path.to_path_buf();
        let hash = hash.clone();
        subtasks.spawn(async move {
            let _permit = permit;
            tokio::task::spawn_blocking(move || {
                generator.ensure_preview(&video_path, &hash, duration)
            })
            .await?
        });
    }

    while let Some(result) = subtasks.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!(path = %path.display(), error = %err, "error generating artifact");
            }
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "artifact task panicked");
            }
        }
    }

    Ok(())
}

async fn associate_gallery(ctx: &ScanContext, gallery: &Gallery) -> Result<()> {
    let Some(path) = gallery.path.as_deref().map(Path::new) else {
        return Ok(());
    };
    let Some(stem) = path.file_stem().map(|stem| stem.to_string_lossy().to_string()) else {
        return Ok(());
    };
    let parent = path.parent().unwrap_or_else(|| Path::new(""));

    let mut tx = ctx.store.begin().await?;

    let mut related: Option<Scene> = None;
    for ext in &ctx.settings.scan.video_extensions {
        let candidate = parent.join(format!("{stem}.{ext}"));
        let candidate_str = candidate.to_string_lossy().to_string();
        if let Some(scene) = scenes::find_by_path(&mut tx, &candidate_str).await? {
            related = Some(scene);
            break;
        }
    }

    if let Some(scene) = related {
        // a scene claimed by an earlier pass keeps its gallery
        if !galleries::gallery_ids_for_scene(&mut tx, scene.id)
            .await?
            .is_empty()
        {
            return Ok(());
        }
        tracing::info!(
            path = %path.display(),
            scene_id = scene.id,
            "associating gallery with scene"
        );
        galleries::associate_scene(&mut tx, scene.id, gallery.id).await?;
    }

    tx.commit().await?;
    Ok(())
}

/// On-disk modification time truncated to whole seconds, matching the
/// precision stored in the catalog.
pub fn file_mod_time(path: &Path) -> Result<i64> {
    let metadata = std::fs::metadata(path).map_err(|err| Error::io(path, err))?;
    let modified = metadata.modified().map_err(|err| Error::io(path, err))?;
    let seconds = modified
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or(0);
    Ok(seconds)
}

#[cfg(test)]
mod tests;
