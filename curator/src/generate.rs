use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use crate::{
    config::{GenerateConfig, ToolsConfig, parse_seconds_or_percent},
    error::{Error, Result},
};

pub const DEFAULT_THUMBNAIL_WIDTH: u32 = 640;
const SPRITE_COLS: u32 = 9;
const SPRITE_ROWS: u32 = 9;
const SPRITE_FRAMES: u32 = SPRITE_COLS * SPRITE_ROWS;
const SPRITE_CELL_WIDTH: u32 = 160;

/// Maps identity hashes to the on-disk locations of derived artifacts.
/// Every artifact file is named by the owning record's hash, which is what
/// makes hash migration a pure rename.
#[derive(Debug, Clone)]
pub struct GeneratedPaths {
    root: PathBuf,
}

impl GeneratedPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn screenshot(&self, hash: &str) -> PathBuf {
        self.root.join("screenshots").join(format!("{hash}.jpg"))
    }

    pub fn screenshot_thumb(&self, hash: &str) -> PathBuf {
        self.root
            .join("screenshots")
            .join(format!("{hash}.thumb.jpg"))
    }

    pub fn preview(&self, hash: &str) -> PathBuf {
        self.root.join("previews").join(format!("{hash}.mp4"))
    }

    pub fn image_preview(&self, hash: &str) -> PathBuf {
        self.root.join("previews").join(format!("{hash}.webm"))
    }

    pub fn sprite_image(&self, hash: &str) -> PathBuf {
        self.root.join("vtt").join(format!("{hash}_sprite.jpg"))
    }

    pub fn sprite_vtt(&self, hash: &str) -> PathBuf {
        self.root.join("vtt").join(format!("{hash}_thumbs.vtt"))
    }

    pub fn image_thumbnail(&self, checksum: &str, width: u32) -> PathBuf {
        self.root
            .join("thumbnails")
            .join(format!("{checksum}-{width}.jpg"))
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Renames every artifact keyed by `old_hash` to `new_hash`. Missing
    /// sources are skipped; an existing destination wins and the stale
    /// source is removed.
    pub fn migrate_hash(&self, old_hash: &str, new_hash: &str) -> Result<()> {
        let pairs = [
            (self.screenshot(old_hash), self.screenshot(new_hash)),
            (self.screenshot_thumb(old_hash), self.screenshot_thumb(new_hash)),
            (self.preview(old_hash), self.preview(new_hash)),
            (self.image_preview(old_hash), self.image_preview(new_hash)),
            (self.sprite_image(old_hash), self.sprite_image(new_hash)),
            (self.sprite_vtt(old_hash), self.sprite_vtt(new_hash)),
        ];

        for (old_path, new_path) in pairs {
            if !old_path.exists() {
                continue;
            }
            if new_path.exists() {
                fs::remove_file(&old_path).map_err(|err| Error::io(&old_path, err))?;
                continue;
            }
            tracing::debug!(
                from = %old_path.display(),
                to = %new_path.display(),
                "migrating generated file"
            );
            fs::rename(&old_path, &new_path).map_err(|err| Error::io(&old_path, err))?;
        }
        Ok(())
    }
}

/// Seam over the external encoding tool so the scan pipeline can be tested
/// without ffmpeg installed. Implementations must be skip-if-exists: a call
/// for an artifact already on disk is a no-op.
pub trait ArtifactGenerator: Send + Sync {
    fn ensure_screenshots(&self, video_path: &Path, hash: &str, duration: f64) -> Result<()>;
    fn ensure_sprite(&self, video_path: &Path, hash: &str, duration: f64) -> Result<()>;
    fn ensure_preview(&self, video_path: &Path, hash: &str, duration: f64) -> Result<()>;
    fn ensure_image_thumbnail(&self, image_bytes: &[u8], checksum: &str) -> Result<()>;
}

pub struct FfmpegGenerator {
    paths: GeneratedPaths,
    config: GenerateConfig,
    tools: ToolsConfig,
}

impl FfmpegGenerator {
    pub fn new(paths: GeneratedPaths, config: GenerateConfig, tools: ToolsConfig) -> Self {
        Self {
            paths,
            config,
            tools,
        }
    }

    fn run_ffmpeg(&self, video_path: &Path, args: &[String]) -> Result<()> {
        let output = Command::new(&self.tools.ffmpeg_path)
            .arg("-v")
            .arg("error")
            .arg("-y")
            .args(args)
            .output()
            .map_err(|err| Error::io(video_path, err))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::probe(
                video_path,
                format!("ffmpeg failed: {}", stderr.trim()),
            ));
        }
        Ok(())
    }

    fn screenshot_at(
        &self,
        video_path: &Path,
        output: &Path,
        at: f64,
        quality: u32,
        width: Option<u32>,
    ) -> Result<()> {
        ensure_parent(output)?;
        let mut args = vec![
            "-ss".to_string(),
            format!("{at:.3}"),
            "-i".to_string(),
            video_path.to_string_lossy().to_string(),
            "-frames:v".to_string(),
            "1".to_string(),
            "-q:v".to_string(),
            quality.to_string(),
        ];
        if let Some(width) = width {
            args.push("-vf".to_string());
            args.push(format!("scale={width}:-1"));
        }
        args.push(output.to_string_lossy().to_string());
        self.run_ffmpeg(video_path, &args)
    }

    /// Offsets into the video excluded from preview segments, resolved from
    /// the configured seconds-or-percentage strings.
    fn preview_bounds(&self, duration: f64) -> (f64, f64) {
        let start =
            parse_seconds_or_percent(&self.config.preview_exclude_start, duration).unwrap_or(0.0);
        let end =
            parse_seconds_or_percent(&self.config.preview_exclude_end, duration).unwrap_or(0.0);
        (start, end)
    }
}

impl ArtifactGenerator for FfmpegGenerator {
    /// Thumbnail and full-size screenshot, both taken at 20% of the
    /// duration. Each is generated independently if missing.
    fn ensure_screenshots(&self, video_path: &Path, hash: &str, duration: f64) -> Result<()> {
        let thumb_path = self.paths.screenshot_thumb(hash);
        let normal_path = self.paths.screenshot(hash);

        if thumb_path.exists() && normal_path.exists() {
            return Ok(());
        }

        let at = duration * 0.2;
        if !thumb_path.exists() {
            tracing::debug!(path = %video_path.display(), "creating thumbnail");
            self.screenshot_at(video_path, &thumb_path, at, 5, Some(320))?;
        }
        if !normal_path.exists() {
            tracing::debug!(path = %video_path.display(), "creating screenshot");
            self.screenshot_at(video_path, &normal_path, at, 2, None)?;
        }
        Ok(())
    }

    fn ensure_sprite(&self, video_path: &Path, hash: &str, duration: f64) -> Result<()> {
        if !self.config.sprites {
            return Ok(());
        }
        let sprite_path = self.paths.sprite_image(hash);
        let vtt_path = self.paths.sprite_vtt(hash);
        if sprite_path.exists() && vtt_path.exists() {
            return Ok(());
        }

        ensure_parent(&sprite_path)?;
        let step = duration / f64::from(SPRITE_FRAMES);
        let args = vec![
            "-i".to_string(),
            video_path.to_string_lossy().to_string(),
            "-vf".to_string(),
            format!(
                "fps=1/{step:.6},scale={SPRITE_CELL_WIDTH}:-1,tile={SPRITE_COLS}x{SPRITE_ROWS}"
            ),
            "-frames:v".to_string(),
            "1".to_string(),
            sprite_path.to_string_lossy().to_string(),
        ];
        self.run_ffmpeg(video_path, &args)?;

        let (sprite_w, sprite_h) =
            image::image_dimensions(&sprite_path).map_err(|err| Error::probe(&sprite_path, err.to_string()))?;
        let cell_w = sprite_w / SPRITE_COLS;
        let cell_h = sprite_h / SPRITE_ROWS;
        write_sprite_vtt(&vtt_path, &sprite_path, step, cell_w, cell_h)
    }

    /// Preview video stitched from evenly spaced segments, skipping the
    /// configured head and tail of the source. When image previews are
    /// enabled the mp4 is additionally transcoded into a silent webm.
    fn ensure_preview(&self, video_path: &Path, hash: &str, duration: f64) -> Result<()> {
        if !self.config.previews {
            return Ok(());
        }
        let preview_path = self.paths.preview(hash);
        if !preview_path.exists() {
            self.generate_preview_video(video_path, &preview_path, hash, duration)?;
        }

        if self.config.image_previews {
            let webm_path = self.paths.image_preview(hash);
            if !webm_path.exists() {
                tracing::debug!(path = %video_path.display(), "creating image preview");
                let args = vec![
                    "-i".to_string(),
                    preview_path.to_string_lossy().to_string(),
                    "-c:v".to_string(),
                    "libvpx-vp9".to_string(),
                    "-b:v".to_string(),
                    "0".to_string(),
                    "-crf".to_string(),
                    "30".to_string(),
                    "-an".to_string(),
                    webm_path.to_string_lossy().to_string(),
                ];
                self.run_ffmpeg(video_path, &args)?;
            }
        }
        Ok(())
    }

    fn ensure_image_thumbnail(&self, image_bytes: &[u8], checksum: &str) -> Result<()> {
        let thumb_path = self
            .paths
            .image_thumbnail(checksum, DEFAULT_THUMBNAIL_WIDTH);
        if thumb_path.exists() {
            return Ok(());
        }

        let image = image::load_from_memory(image_bytes)
            .map_err(|err| Error::probe(&thumb_path, err.to_string()))?;
        // sources already at or below thumbnail width are served directly
        if image.width() <= DEFAULT_THUMBNAIL_WIDTH {
            return Ok(());
        }
        ensure_parent(&thumb_path)?;
        let thumb = image.resize(
            DEFAULT_THUMBNAIL_WIDTH,
            u32::MAX,
            image::imageops::FilterType::Lanczos3,
        );
        thumb
            .to_rgb8()
            .save(&thumb_path)
            .map_err(|err| Error::probe(&thumb_path, err.to_string()))?;
        Ok(())
    }
}

impl FfmpegGenerator {
    fn generate_preview_video(
        &self,
        video_path: &Path,
        preview_path: &Path,
        hash: &str,
        duration: f64,
    ) -> Result<()> {
        ensure_parent(preview_path)?;

        let (exclude_start, exclude_end) = self.preview_bounds(duration);
        let usable = (duration - exclude_start - exclude_end).max(0.0);
        let segments = self.config.preview_segments.max(1);
        let segment_duration = self.config.preview_segment_duration;
        let step = usable / f64::from(segments);

        let temp_dir = self.paths.temp_dir().join(hash);
        fs::create_dir_all(&temp_dir).map_err(|err| Error::io(&temp_dir, err))?;

        let mut list = String::new();
        for index in 0..segments {
            let offset = exclude_start + f64::from(index) * step;
            let segment_path = temp_dir.join(format!("{index:03}.mp4"));
            let args = vec![
                "-ss".to_string(),
                format!("{offset:.3}"),
                "-i".to_string(),
                video_path.to_string_lossy().to_string(),
                "-t".to_string(),
                format!("{segment_duration:.3}"),
                "-an".to_string(),
                "-preset".to_string(),
                self.config.preview_preset.clone(),
                segment_path.to_string_lossy().to_string(),
            ];
            self.run_ffmpeg(video_path, &args)?;
            list.push_str(&format!("file '{}'\n", segment_path.display()));
        }

        let list_path = temp_dir.join("segments.txt");
        fs::write(&list_path, list).map_err(|err| Error::io(&list_path, err))?;

        let args = vec![
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            list_path.to_string_lossy().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            preview_path.to_string_lossy().to_string(),
        ];
        let result = self.run_ffmpeg(video_path, &args);
        let _ = fs::remove_dir_all(&temp_dir);
        result
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| Error::io(parent, err))?;
    }
    Ok(())
}

fn write_sprite_vtt(
    vtt_path: &Path,
    sprite_path: &Path,
    step: f64,
    cell_w: u32,
    cell_h: u32,
) -> Result<()> {
    let sprite_name = sprite_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut vtt = String::from("WEBVTT\n\n");
    for index in 0..SPRITE_FRAMES {
        let start = f64::from(index) * step;
        let end = f64::from(index + 1) * step;
        let x = (index % SPRITE_COLS) * cell_w;
        let y = (index / SPRITE_COLS) * cell_h;
        vtt.push_str(&format!(
            "{} --> {}\n{sprite_name}#xywh={x},{y},{cell_w},{cell_h}\n\n",
            vtt_timestamp(start),
            vtt_timestamp(end)
        ));
    }
    fs::write(vtt_path, vtt).map_err(|err| Error::io(vtt_path, err))
}

fn vtt_timestamp(seconds: f64) -> String {
    let total_millis = (seconds * 1000.0).round() as u64;
    let hours = total_millis / 3_600_000;
    let minutes = (total_millis % 3_600_000) / 60_000;
    let secs = (total_millis % 60_000) / 1000;
    let millis = total_millis % 1000;
    format!("{hours:02}:{minutes:02}:{secs:02}.{millis:03}")
}
