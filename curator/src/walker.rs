use std::{collections::HashSet, fs, path::Path, path::PathBuf};

use regex::Regex;
use walkdir::WalkDir;

use crate::{
    config::{LibraryPath, Settings},
    error::{Error, Result},
    models::MediaKind,
};

/// Separator between a zip archive path and an entry path inside it.
/// Zip-contained images are stored in the catalog with this composite form.
const ZIP_SEPARATOR: char = '\0';

pub fn zip_file_path(zip_path: &Path, entry_name: &str) -> String {
    format!(
        "{}{}{}",
        zip_path.to_string_lossy(),
        ZIP_SEPARATOR,
        entry_name
    )
}

pub fn is_zip_path(path: &str) -> bool {
    path.contains(ZIP_SEPARATOR)
}

pub fn split_zip_path(path: &str) -> Option<(&str, &str)> {
    path.split_once(ZIP_SEPARATOR)
}

/// A display form that swaps the internal separator for something readable.
pub fn path_display_name(path: &str) -> String {
    path.replace(ZIP_SEPARATOR, " -> ")
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    pub kind: MediaKind,
}

/// Walks configured library roots and yields candidate media files,
/// partitioned into scene/image/gallery kinds. Extension allow-lists and
/// exclude regexes come from the settings passed at construction; the
/// generated-output directory is pruned entirely rather than filtered
/// per file.
pub struct FileWalker {
    video_extensions: HashSet<String>,
    image_extensions: HashSet<String>,
    gallery_extensions: HashSet<String>,
    exclude_video: Vec<Regex>,
    exclude_image: Vec<Regex>,
    generated_path: PathBuf,
}

impl FileWalker {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            video_extensions: extension_set(&settings.scan.video_extensions),
            image_extensions: extension_set(&settings.scan.image_extensions),
            gallery_extensions: extension_set(&settings.scan.gallery_extensions),
            exclude_video: compile_patterns(&settings.scan.exclude)?,
            exclude_image: compile_patterns(&settings.scan.image_exclude)?,
            generated_path: settings.library.generated_path.clone(),
        })
    }

    pub fn walk<'a>(&'a self, root: &'a LibraryPath) -> impl Iterator<Item = Candidate> + 'a {
        let generated = self.generated_path.clone();
        WalkDir::new(&root.path)
            .follow_links(true)
            .into_iter()
            .filter_entry(move |entry| {
                !(entry.file_type().is_dir() && entry.path().starts_with(&generated))
            })
            .filter_map(move |entry| {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        tracing::warn!(error = %err, "error walking directory");
                        return None;
                    }
                };
                if entry.file_type().is_dir() {
                    return None;
                }
                let path = entry.into_path();
                let kind = self.classify(&path, root)?;
                Some(Candidate { path, kind })
            })
    }

    fn classify(&self, path: &Path, root: &LibraryPath) -> Option<MediaKind> {
        let ext = lowercase_extension(path)?;

        if !root.exclude_video
            && self.video_extensions.contains(&ext)
            && !matches_any(&self.exclude_video, path)
        {
            return Some(MediaKind::Scene);
        }

        if !root.exclude_image && !matches_any(&self.exclude_image, path) {
            if self.gallery_extensions.contains(&ext) {
                return Some(MediaKind::Gallery);
            }
            if self.image_extensions.contains(&ext) {
                return Some(MediaKind::Image);
            }
        }

        None
    }

    pub fn is_image_extension(&self, name: &str) -> bool {
        lowercase_extension(Path::new(name))
            .map(|ext| self.image_extensions.contains(&ext))
            .unwrap_or(false)
    }
}

/// Enumerates the image entries of a zip gallery. Entries that are
/// directories or carry a non-image extension are skipped; the zip itself
/// is never yielded as a top-level candidate by the walker.
pub fn walk_zip_images(zip_path: &Path, walker: &FileWalker) -> Result<Vec<String>> {
    let file = fs::File::open(zip_path).map_err(|err| Error::io(zip_path, err))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|err| Error::zip(zip_path, err))?;

    let mut entries = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|err| Error::zip(zip_path, err))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if walker.is_image_extension(&name) {
            entries.push(name);
        }
    }
    entries.sort();
    Ok(entries)
}

/// True when any entry of the archive uses real compression. Stored (level
/// zero) archives stream much faster during image reads, so compressed
/// galleries are worth a warning at create time.
pub fn zip_uses_compression(zip_path: &Path) -> Result<bool> {
    let file = fs::File::open(zip_path).map_err(|err| Error::io(zip_path, err))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|err| Error::zip(zip_path, err))?;
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|err| Error::zip(zip_path, err))?;
        if !entry.is_dir() && entry.compression() != zip::CompressionMethod::Stored {
            return Ok(true);
        }
    }
    Ok(false)
}

fn extension_set(extensions: &[String]) -> HashSet<String> {
    extensions.iter().map(|ext| ext.to_lowercase()).collect()
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern)
                .map_err(|err| Error::Config(format!("invalid exclude pattern '{pattern}': {err}")))
        })
        .collect()
}

fn matches_any(patterns: &[Regex], path: &Path) -> bool {
    let path = path.to_string_lossy();
    patterns.iter().any(|pattern| pattern.is_match(&path))
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}
