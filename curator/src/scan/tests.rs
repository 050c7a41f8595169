use std::{
    fs,
    io::Write,
    path::Path,
    sync::Arc,
};

use tempfile::TempDir;

use super::*;
use crate::{
    config::{
        DatabaseConfig, GenerateConfig, LibraryConfig, LibraryPath, ScanConfig, Settings,
        ToolsConfig,
    },
    db::{Store, galleries, images, scenes},
    error::Result,
    generate::{ArtifactGenerator, GeneratedPaths},
    probe::{MediaProbe, VideoFileInfo},
    walker::{FileWalker, zip_file_path},
};

struct StubProbe;

impl MediaProbe for StubProbe {
    fn probe_video(&self, _path: &Path) -> Result<VideoFileInfo> {
        Ok(VideoFileInfo {
            duration: 60.0,
            video_codec: Some("h264".to_string()),
            audio_codec: Some("aac".to_string()),
            format: Some("mp4".to_string()),
            width: 1920,
            height: 1080,
            framerate: 30.0,
            bitrate: 4_000_000,
            size: 1024,
            creation_time: None,
            comment: None,
        })
    }
}

/// Drops marker files at the real artifact paths instead of shelling out
/// to ffmpeg, keeping the skip-if-exists contract so idempotence and hash
/// migration are observable.
struct MarkerGenerator {
    paths: GeneratedPaths,
}

fn write_marker(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| crate::error::Error::io(parent, err))?;
    }
    fs::write(path, b"m").map_err(|err| crate::error::Error::io(path, err))
}

impl ArtifactGenerator for MarkerGenerator {
    fn ensure_screenshots(&self, _video_path: &Path, hash: &str, _duration: f64) -> Result<()> {
        write_marker(&self.paths.screenshot_thumb(hash))?;
        write_marker(&self.paths.screenshot(hash))
    }

    fn ensure_sprite(&self, _video_path: &Path, hash: &str, _duration: f64) -> Result<()> {
        write_marker(&self.paths.sprite_image(hash))?;
        write_marker(&self.paths.sprite_vtt(hash))
    }

    fn ensure_preview(&self, _video_path: &Path, hash: &str, _duration: f64) -> Result<()> {
        write_marker(&self.paths.preview(hash))
    }

    fn ensure_image_thumbnail(&self, _image_bytes: &[u8], checksum: &str) -> Result<()> {
        write_marker(
            &self
                .paths
                .image_thumbnail(checksum, crate::generate::DEFAULT_THUMBNAIL_WIDTH),
        )
    }
}

fn test_settings(root: &Path) -> Settings {
    Settings {
        library: LibraryConfig {
            paths: vec![LibraryPath {
                path: root.to_path_buf(),
                exclude_video: false,
                exclude_image: false,
            }],
            generated_path: root.join("generated"),
        },
        scan: ScanConfig {
            parallel_tasks: 1,
            ..Default::default()
        },
        generate: GenerateConfig::default(),
        database: DatabaseConfig {
            path: root.join("curator.sqlite"),
        },
        tools: ToolsConfig::default(),
    }
}

async fn fixture(root: &Path, mutate: impl FnOnce(&mut Settings)) -> ScanContext {
    let mut settings = test_settings(root);
    mutate(&mut settings);
    fs::create_dir_all(&settings.library.generated_path).unwrap();
    let settings = Arc::new(settings);
    let walker = Arc::new(FileWalker::new(&settings).unwrap());
    let paths = GeneratedPaths::new(settings.library.generated_path.clone());
    let generator = Arc::new(MarkerGenerator {
        paths: paths.clone(),
    });
    ScanContext {
        store: Store::open_in_memory().await.unwrap(),
        settings,
        walker,
        probe: Arc::new(StubProbe),
        generator,
        paths,
    }
}

fn write_video(path: &Path, content: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Backdates a file so a later rewrite is guaranteed to change its whole-
/// second modification time.
fn backdate(path: &Path) {
    let file = fs::File::options().write(true).open(path).unwrap();
    let earlier = std::time::SystemTime::now() - std::time::Duration::from_secs(30);
    file.set_modified(earlier).unwrap();
}

fn png_bytes(seed: u8) -> Vec<u8> {
    let mut img = ::image::RgbImage::new(4, 4);
    img.put_pixel(0, 0, ::image::Rgb([seed, 0, 0]));
    let mut bytes = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut bytes), ::image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

#[tokio::test]
async fn new_scene_is_cataloged_with_screenshots() {
    let dir = TempDir::new().unwrap();
    let ctx = fixture(dir.path(), |_| {}).await;
    let video = dir.path().join("a.mp4");
    write_video(&video, b"fake video content, long enough to hash");

    let created = scene::scan_scene(&ctx, &video).await.unwrap();
    let created = created.expect("new file should create a scene");

    assert_eq!(created.path, video.to_string_lossy());
    assert_eq!(created.title.as_deref(), Some("a"));
    assert_eq!(created.duration, Some(60.0));
    assert_eq!(created.format.as_deref(), Some("mp4"));
    let oshash = created.oshash.clone().expect("oshash should be set");
    assert!(created.checksum.is_none(), "md5 is off by default");
    assert!(created.file_mod_time.is_some());

    let mut conn = ctx.store.read().await.unwrap();
    let stored = scenes::find_by_oshash(&mut conn, &oshash).await.unwrap();
    assert_eq!(stored.map(|s| s.id), Some(created.id));

    assert!(ctx.paths.screenshot(&oshash).exists());
    assert!(ctx.paths.screenshot_thumb(&oshash).exists());
}

#[tokio::test]
async fn content_change_migrates_generated_artifacts() {
    let dir = TempDir::new().unwrap();
    let ctx = fixture(dir.path(), |_| {}).await;
    let video = dir.path().join("a.mp4");
    write_video(&video, b"original content, long enough to hash");
    backdate(&video);

    let created = scene::scan_scene(&ctx, &video).await.unwrap().unwrap();
    let old_hash = created.oshash.clone().unwrap();
    assert!(ctx.paths.screenshot(&old_hash).exists());

    write_video(&video, b"rewritten content, also long enough to hash");
    let result = scene::scan_scene(&ctx, &video).await.unwrap();
    assert!(result.is_none(), "a rescan never reports a new scene");

    let mut conn = ctx.store.read().await.unwrap();
    let updated = scenes::find(&mut conn, created.id).await.unwrap().unwrap();
    let new_hash = updated.oshash.unwrap();
    assert_ne!(new_hash, old_hash);
    // the screenshot followed the hash
    assert!(!ctx.paths.screenshot(&old_hash).exists());
    assert!(ctx.paths.screenshot(&new_hash).exists());
}

#[tokio::test]
async fn unchanged_scene_rescan_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let ctx = fixture(dir.path(), |_| {}).await;
    let video = dir.path().join("a.mp4");
    write_video(&video, b"fake video content, long enough to hash");

    let first = scene::scan_scene(&ctx, &video).await.unwrap().unwrap();
    let second = scene::scan_scene(&ctx, &video).await.unwrap();
    assert!(second.is_none());

    let mut conn = ctx.store.read().await.unwrap();
    let stored = scenes::find(&mut conn, first.id).await.unwrap().unwrap();
    assert_eq!(stored.updated_at, first.updated_at);
}

#[tokio::test]
async fn duplicate_content_under_second_path_is_not_recataloged() {
    let dir = TempDir::new().unwrap();
    let ctx = fixture(dir.path(), |_| {}).await;
    let content = b"fake video content, long enough to hash";
    let original = dir.path().join("a.mp4");
    let copy = dir.path().join("copy of a.mp4");
    write_video(&original, content);
    write_video(&copy, content);

    let created = scene::scan_scene(&ctx, &original).await.unwrap().unwrap();
    let dupe = scene::scan_scene(&ctx, &copy).await.unwrap();
    assert!(dupe.is_none());

    let mut conn = ctx.store.read().await.unwrap();
    let stored = scenes::find(&mut conn, created.id).await.unwrap().unwrap();
    assert_eq!(stored.path, original.to_string_lossy());
    let at_copy = scenes::find_by_path(&mut conn, &copy.to_string_lossy()).await.unwrap();
    assert!(at_copy.is_none());
}

#[tokio::test]
async fn moved_scene_keeps_its_record_under_the_new_path() {
    let dir = TempDir::new().unwrap();
    let ctx = fixture(dir.path(), |_| {}).await;
    let content = b"fake video content, long enough to hash";
    let old_path = dir.path().join("a.mp4");
    write_video(&old_path, content);

    let created = scene::scan_scene(&ctx, &old_path).await.unwrap().unwrap();

    let new_path = dir.path().join("renamed.mp4");
    fs::rename(&old_path, &new_path).unwrap();

    let result = scene::scan_scene(&ctx, &new_path).await.unwrap();
    assert!(result.is_none(), "a move is not a new scene");

    let mut conn = ctx.store.read().await.unwrap();
    let stored = scenes::find(&mut conn, created.id).await.unwrap().unwrap();
    assert_eq!(stored.path, new_path.to_string_lossy());
}

#[tokio::test]
async fn zip_gallery_scan_catalogs_its_entries() {
    let dir = TempDir::new().unwrap();
    let ctx = fixture(dir.path(), |_| {}).await;
    let zip_path = dir.path().join("album.zip");
    let first = png_bytes(1);
    let second = png_bytes(2);
    write_zip(
        &zip_path,
        &[("01.png", first.as_slice()), ("02.png", second.as_slice())],
    );

    gallery::scan_gallery(&ctx, &zip_path).await.unwrap();

    let mut conn = ctx.store.read().await.unwrap();
    let gallery = galleries::find_by_path(&mut conn, &zip_path.to_string_lossy())
        .await
        .unwrap()
        .expect("gallery should be created");
    assert!(gallery.zip);
    assert_eq!(galleries::count_images(&mut conn, gallery.id).await.unwrap(), 2);

    let entry_path = zip_file_path(&zip_path, "01.png");
    let entry = images::find_by_path(&mut conn, &entry_path)
        .await
        .unwrap()
        .expect("zip entry should be cataloged");
    assert_eq!(entry.width, Some(4));
    assert_eq!(entry.height, Some(4));
}

#[tokio::test]
async fn unchanged_gallery_regenerates_missing_thumbnails() {
    let dir = TempDir::new().unwrap();
    let ctx = fixture(dir.path(), |_| {}).await;
    let zip_path = dir.path().join("album.zip");
    let shot = png_bytes(9);
    write_zip(&zip_path, &[("01.png", shot.as_slice())]);

    gallery::scan_gallery(&ctx, &zip_path).await.unwrap();

    let entry_path = zip_file_path(&zip_path, "01.png");
    let checksum = {
        let mut conn = ctx.store.read().await.unwrap();
        images::find_by_path(&mut conn, &entry_path)
            .await
            .unwrap()
            .unwrap()
            .checksum
    };
    let thumb = ctx
        .paths
        .image_thumbnail(&checksum, crate::generate::DEFAULT_THUMBNAIL_WIDTH);
    assert!(thumb.exists());

    fs::remove_file(&thumb).unwrap();
    gallery::scan_gallery(&ctx, &zip_path).await.unwrap();
    assert!(thumb.exists(), "second pass restores the deleted thumbnail");
}

#[tokio::test]
async fn empty_zip_is_never_cataloged() {
    let dir = TempDir::new().unwrap();
    let ctx = fixture(dir.path(), |_| {}).await;
    let zip_path = dir.path().join("empty.zip");
    write_zip(&zip_path, &[("readme.txt", b"not an image")]);

    gallery::scan_gallery(&ctx, &zip_path).await.unwrap();

    let mut conn = ctx.store.read().await.unwrap();
    let gallery = galleries::find_by_path(&mut conn, &zip_path.to_string_lossy())
        .await
        .unwrap();
    assert!(gallery.is_none());
}

#[tokio::test]
async fn loose_images_group_into_a_folder_gallery() {
    let dir = TempDir::new().unwrap();
    let ctx = fixture(dir.path(), |settings| {
        settings.scan.create_galleries_from_folders = true;
    })
    .await;
    let folder = dir.path().join("holiday");
    let image_path = folder.join("beach.png");
    fs::create_dir_all(&folder).unwrap();
    fs::write(&image_path, png_bytes(3)).unwrap();

    image::scan_image(&ctx, &image_path.to_string_lossy(), None)
        .await
        .unwrap();

    let mut conn = ctx.store.read().await.unwrap();
    let gallery = galleries::find_by_path(&mut conn, &folder.to_string_lossy())
        .await
        .unwrap()
        .expect("folder gallery should be created");
    assert!(!gallery.zip);
    assert_eq!(galleries::count_images(&mut conn, gallery.id).await.unwrap(), 1);
}

#[tokio::test]
async fn a_claimed_scene_is_not_paired_with_a_second_gallery() {
    let dir = TempDir::new().unwrap();
    let ctx = fixture(dir.path(), |_| {}).await;
    let video = dir.path().join("show.mp4");
    write_video(&video, b"fake video content, long enough to hash");
    let scene = scene::scan_scene(&ctx, &video).await.unwrap().unwrap();

    let now = crate::models::current_iso_timestamp();
    let gallery_row = |path: &Path| crate::models::Gallery {
        id: 0,
        path: Some(path.to_string_lossy().to_string()),
        checksum: crate::hash::md5_from_str(&path.to_string_lossy()),
        zip: true,
        title: None,
        rating: None,
        organized: false,
        file_mod_time: None,
        created_at: now.clone(),
        updated_at: now.clone(),
    };

    let mut tx = ctx.store.begin().await.unwrap();
    let claimed = galleries::create(&mut tx, &gallery_row(&dir.path().join("older.zip")))
        .await
        .unwrap();
    galleries::associate_scene(&mut tx, scene.id, claimed.id)
        .await
        .unwrap();
    let rival = galleries::create(&mut tx, &gallery_row(&dir.path().join("show.zip")))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    associate_gallery(&ctx, &rival).await.unwrap();

    let mut conn = ctx.store.read().await.unwrap();
    let linked = galleries::gallery_ids_for_scene(&mut conn, scene.id)
        .await
        .unwrap();
    assert_eq!(linked, vec![claimed.id]);
}

#[tokio::test]
async fn scanner_pairs_galleries_with_their_scene_by_basename() {
    let dir = TempDir::new().unwrap();
    let library = dir.path().join("library");
    fs::create_dir_all(&library).unwrap();
    let video = library.join("show.mp4");
    write_video(&video, b"fake video content, long enough to hash");
    let zip_path = library.join("show.zip");
    let shot = png_bytes(4);
    write_zip(&zip_path, &[("frame.png", shot.as_slice())]);

    let settings = Arc::new(test_settings(&library));
    fs::create_dir_all(&settings.library.generated_path).unwrap();
    let store = Store::open_in_memory().await.unwrap();
    let generator = Arc::new(MarkerGenerator {
        paths: GeneratedPaths::new(settings.library.generated_path.clone()),
    });
    let scanner = Scanner::new(store.clone(), settings, Arc::new(StubProbe), generator).unwrap();

    scanner.run().await.unwrap();

    let mut conn = store.read().await.unwrap();
    let scene = scenes::find_by_path(&mut conn, &video.to_string_lossy())
        .await
        .unwrap()
        .expect("scene should be cataloged");
    let gallery = galleries::find_by_path(&mut conn, &zip_path.to_string_lossy())
        .await
        .unwrap()
        .expect("gallery should be cataloged");
    let linked = galleries::gallery_ids_for_scene(&mut conn, scene.id)
        .await
        .unwrap();
    assert_eq!(linked, vec![gallery.id]);
}
